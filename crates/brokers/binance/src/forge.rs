use cryptobot_brokers_common::{sign_sha256, ClientError, Params, PreparedRequest};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{BinanceConfig, Credentials};
use crate::endpoints::{template_vars, ClientGroup, Endpoint, EndpointDescriptor};

pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Millisecond wall clock. Injectable so tests can pin timestamps.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default())
}

/// Builds fully addressed, security-annotated requests for one client
/// group.
pub struct RequestForge {
    group: ClientGroup,
    base_url: String,
    sandbox: bool,
    credentials: Option<Credentials>,
    recv_window_ms: u64,
    clock: Clock,
    last_timestamp: AtomicU64,
}

impl RequestForge {
    pub fn new(group: ClientGroup, config: &BinanceConfig, credentials: Option<Credentials>) -> Self {
        Self {
            group,
            base_url: config.rest_base().to_string(),
            sandbox: config.sandbox,
            credentials,
            recv_window_ms: config.recv_window_ms,
            clock: system_clock(),
            last_timestamp: AtomicU64::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn group(&self) -> ClientGroup {
        self.group
    }

    /// Forge a request for an endpoint named within this forge's group.
    pub fn forge(&self, name: &str, params: Params) -> Result<PreparedRequest, ClientError> {
        let endpoint = Endpoint::from_name(self.group, name)?;
        self.forge_endpoint(endpoint, params)
    }

    pub fn forge_endpoint(
        &self,
        endpoint: Endpoint,
        params: Params,
    ) -> Result<PreparedRequest, ClientError> {
        if endpoint.group() != self.group {
            return Err(ClientError::Configuration(format!(
                "endpoint '{}' is not registered for group '{}'",
                endpoint, self.group
            )));
        }
        self.forge_descriptor(&endpoint.descriptor(), params)
    }

    pub fn forge_descriptor(
        &self,
        descriptor: &EndpointDescriptor,
        mut params: Params,
    ) -> Result<PreparedRequest, ClientError> {
        let mut path = substitute_path(descriptor.path, &mut params)?;
        if self.sandbox {
            path = sandbox_path(&path);
        }

        let policy = descriptor.security.policy();
        let mut headers = Vec::new();

        if policy.requires_api_key {
            let creds = self
                .credentials
                .as_ref()
                .ok_or(ClientError::MissingCredentials("API key required"))?;
            headers.push((API_KEY_HEADER.to_string(), creds.api_key.clone()));
        }

        let encoded = if policy.requires_signature {
            let creds = self
                .credentials
                .as_ref()
                .ok_or(ClientError::MissingCredentials("secret key required"))?;
            if !params.contains("recvWindow") {
                params.set("recvWindow", self.recv_window_ms);
            }
            params.set("timestamp", self.timestamp());

            // The signature covers exactly the bytes that are sent.
            let payload = params.encode();
            let signature = sign_sha256(&creds.secret_key, &payload);
            format!("{}&signature={}", payload, signature)
        } else {
            params.encode()
        };

        let mut url = format!("{}{}", self.base_url, path);
        let mut body = None;
        if descriptor.method.has_body() {
            headers.push((
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            ));
            body = Some(encoded);
        } else if !encoded.is_empty() {
            url.push('?');
            url.push_str(&encoded);
        }

        Ok(PreparedRequest {
            method: descriptor.method,
            url,
            headers,
            body,
        })
    }

    /// Wall-clock milliseconds, never behind a timestamp already issued.
    fn timestamp(&self) -> u64 {
        let now = (self.clock)();
        let prev = self.last_timestamp.fetch_max(now, Ordering::SeqCst);
        now.max(prev)
    }
}

/// Replace `{var}` placeholders with (and remove) the matching params.
pub fn substitute_path(template: &str, params: &mut Params) -> Result<String, ClientError> {
    let mut path = template.to_string();
    for var in template_vars(template)? {
        let value = params.take(var).ok_or_else(|| {
            ClientError::Configuration(format!("missing path parameter '{}' for {}", var, template))
        })?;
        path = path.replace(&format!("{{{}}}", var), &value);
    }
    Ok(path)
}

/// The test network serves only the current `/api/v3` namespace: legacy
/// `/sapi` and `/wapi` prefixes collapse to `/api` and older versions are
/// bumped to `v3`.
pub fn sandbox_path(path: &str) -> String {
    let mut segments: Vec<&str> = path.split('/').collect();

    if let Some(prefix) = segments.get_mut(1) {
        if *prefix == "sapi" || *prefix == "wapi" {
            *prefix = "api";
        }
    }
    if segments.get(1) == Some(&"api") {
        if let Some(version) = segments.get_mut(2) {
            let old = version
                .strip_prefix('v')
                .and_then(|n| n.parse::<u32>().ok());
            if matches!(old, Some(n) if n < 3) {
                *version = "v3";
            }
        }
    }

    segments.join("/")
}
