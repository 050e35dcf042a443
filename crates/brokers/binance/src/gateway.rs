use cryptobot_brokers_common::{
    dispatch, ApiResponse, BackoffPolicy, ClientError, Params, RateGovernor, Transport,
};
use std::sync::Arc;
use tracing::debug;

use crate::endpoints::{ClientGroup, Endpoint};
use crate::forge::RequestForge;

/// Request pipeline for one client group: governor gate, forge, send,
/// usage recording and 429/418 back-off.
pub struct RestGateway {
    forge: RequestForge,
    transport: Arc<dyn Transport>,
    governor: Arc<RateGovernor>,
    backoff: BackoffPolicy,
}

impl RestGateway {
    pub fn new(forge: RequestForge, transport: Arc<dyn Transport>, governor: Arc<RateGovernor>) -> Self {
        let backoff = BackoffPolicy::from(governor.config());
        Self {
            forge,
            transport,
            governor,
            backoff,
        }
    }

    pub fn group(&self) -> ClientGroup {
        self.forge.group()
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    /// Call an endpoint by its registered name.
    pub async fn call(&self, name: &str, params: Params) -> Result<ApiResponse, ClientError> {
        let endpoint = Endpoint::from_name(self.group(), name)?;
        self.call_endpoint(endpoint, params).await
    }

    /// Non-2xx statuses are returned, not raised. Only transport failures,
    /// unknown endpoints and missing credentials are errors.
    pub async fn call_endpoint(
        &self,
        endpoint: Endpoint,
        params: Params,
    ) -> Result<ApiResponse, ClientError> {
        self.governor.before_request().await;
        let request = self.forge.forge_endpoint(endpoint, params)?;

        debug!(
            endpoint = endpoint.name(),
            weight = endpoint.descriptor().weight,
            method = %request.method,
            "Dispatching request"
        );
        let raw = dispatch(self.transport.as_ref(), &self.governor, &request, self.backoff).await?;
        debug!(endpoint = endpoint.name(), status = raw.status, "Response received");

        Ok(raw.into_api_response())
    }
}
