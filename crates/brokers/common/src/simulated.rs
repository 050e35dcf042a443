use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use url::Url;

use crate::error::ClientError;
use crate::transport::{HttpMethod, PreparedRequest, RawResponse, Transport};

#[derive(Debug, Clone)]
enum Reply {
    Response(RawResponse),
    Failure(String),
}

#[derive(Debug, Default)]
struct ReplayState {
    routes: HashMap<(HttpMethod, String), VecDeque<Reply>>,
    requests: Vec<PreparedRequest>,
}

/// A simulated exchange for tests and dry runs.
///
/// Replies are queued per method and path (query ignored) and consumed in
/// order; the last reply of a route stays in place and answers every
/// further request. A request to an unrouted path fails like a refused
/// connection. Every request is recorded exactly as it was sent.
#[derive(Debug, Default)]
pub struct ReplayTransport {
    state: Mutex<ReplayState>,
}

impl ReplayTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `method` + `path`.
    pub fn push(&self, method: HttpMethod, path: &str, response: RawResponse) {
        self.enqueue(method, path, Reply::Response(response));
    }

    /// Queue a transport failure for `method` + `path`.
    pub fn push_failure(&self, method: HttpMethod, path: &str, message: &str) {
        self.enqueue(method, path, Reply::Failure(message.to_string()));
    }

    fn enqueue(&self, method: HttpMethod, path: &str, reply: Reply) {
        let mut state = self.lock();
        state
            .routes
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
    }

    /// Every request sent so far, in order.
    pub fn requests(&self) -> Vec<PreparedRequest> {
        self.lock().requests.clone()
    }

    /// Requests sent to one method + path.
    pub fn requests_to(&self, method: HttpMethod, path: &str) -> Vec<PreparedRequest> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.method == method && request_path(&r.url).as_deref() == Some(path))
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReplayState> {
        // A panicking test thread must not hide the recorded requests.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn request_path(url: &str) -> Option<String> {
    Url::parse(url).ok().map(|u| u.path().to_string())
}

#[async_trait]
impl Transport for ReplayTransport {
    async fn send(&self, request: &PreparedRequest) -> Result<RawResponse, ClientError> {
        let path = request_path(&request.url)
            .ok_or_else(|| ClientError::Transport(format!("invalid url {}", request.url)))?;

        let mut state = self.lock();
        state.requests.push(request.clone());

        let queue = state
            .routes
            .get_mut(&(request.method, path.clone()))
            .filter(|q| !q.is_empty())
            .ok_or_else(|| {
                ClientError::Transport(format!("connection refused: {} {}", request.method, path))
            })?;

        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };

        match reply {
            Some(Reply::Response(resp)) => Ok(resp),
            Some(Reply::Failure(msg)) => Err(ClientError::Transport(msg)),
            None => Err(ClientError::Transport(format!("no reply for {}", path))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(url: &str) -> PreparedRequest {
        PreparedRequest {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn test_last_reply_is_sticky() {
        let transport = ReplayTransport::new();
        transport.push(HttpMethod::Get, "/api/v3/ping", RawResponse::new(500, ""));
        transport.push(HttpMethod::Get, "/api/v3/ping", RawResponse::new(200, "{}"));

        let req = get("https://api.binance.com/api/v3/ping");
        assert_eq!(transport.send(&req).await.unwrap().status, 500);
        assert_eq!(transport.send(&req).await.unwrap().status, 200);
        assert_eq!(transport.send(&req).await.unwrap().status, 200);
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_failures_and_unrouted_paths() {
        let transport = ReplayTransport::new();
        transport.push_failure(HttpMethod::Get, "/api/v3/time", "timed out");
        transport.push(HttpMethod::Get, "/api/v3/time", RawResponse::new(200, "{}"));

        let req = get("https://api.binance.com/api/v3/time?x=1");
        assert!(matches!(
            transport.send(&req).await,
            Err(ClientError::Transport(msg)) if msg == "timed out"
        ));
        assert!(transport.send(&req).await.is_ok());

        let other = get("https://api.binance.com/api/v3/depth");
        assert!(transport.send(&other).await.is_err());
        assert_eq!(transport.requests_to(HttpMethod::Get, "/api/v3/time").len(), 2);
    }
}
