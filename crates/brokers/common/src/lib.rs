//! Exchange-agnostic client plumbing.
//!
//! Everything an exchange client needs below its endpoint registry:
//! request signing, canonical parameter encoding, the HTTP transport
//! seam, the shared rate-limit governor and the 429/418 back-off loop.

pub mod dispatch;
pub mod error;
pub mod governor;
pub mod params;
pub mod signer;
pub mod simulated;
pub mod transport;

pub use dispatch::{dispatch, BackoffPolicy};
pub use error::ClientError;
pub use governor::{GovernorConfig, RateBudget, RateGovernor};
pub use params::Params;
pub use signer::{sign, sign_sha256, sign_sha384, SignatureAlgorithm};
pub use simulated::ReplayTransport;
pub use transport::{ApiResponse, HttpMethod, HttpTransport, PreparedRequest, RawResponse, Transport};
