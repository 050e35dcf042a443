use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Connection error: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Stream already running; stop or refresh it first")]
    AlreadyRunning,
    #[error("Invalid stream url: {0}")]
    Url(String),
}

/// Subscription id for a symbol event stream, e.g. `btcusdt@trade`.
pub fn topic(symbol: &str, event: &str) -> String {
    format!("{}@{}", symbol.to_lowercase(), event)
}

/// Connection URL for a topic set: the raw form for one topic, the
/// combined form for several.
pub fn stream_url(base: &str, topics: &[String]) -> Result<String, StreamError> {
    let base = base.trim_end_matches('/');
    let url = match topics {
        [] => return Err(StreamError::Url("no topics to subscribe to".to_string())),
        [single] => format!("{}/ws/{}", base, single),
        many => format!("{}/stream?streams={}", base, many.join("/")),
    };
    url::Url::parse(&url).map_err(|e| StreamError::Url(format!("{}: {}", url, e)))?;
    Ok(url)
}

/// Sort an inbound frame: acknowledgements (`result`) are dropped,
/// combined-stream envelopes (`stream` + `data`) are unwrapped, anything
/// else is an event as-is.
pub fn classify(frame: Value) -> Option<Value> {
    match frame {
        Value::Object(obj) if obj.contains_key("result") => None,
        Value::Object(mut obj) if obj.contains_key("stream") && obj.contains_key("data") => {
            obj.remove("data")
        }
        other => Some(other),
    }
}

fn control_frame(method: &str, topics: &[String], id: u64) -> Message {
    json!({ "method": method, "params": topics, "id": id })
        .to_string()
        .into()
}

struct ActiveStream {
    topics: Vec<String>,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// One live WebSocket subscription at a time.
///
/// Events from every connection this client opens are delivered, in
/// arrival order, on a single channel taken with
/// [`StreamClient::take_receiver`]. A connection is fully stopped before
/// its replacement starts, so the channel never interleaves two
/// connections.
pub struct StreamClient {
    base_url: String,
    events_tx: mpsc::UnboundedSender<Value>,
    events_rx: Option<mpsc::UnboundedReceiver<Value>>,
    active: Option<ActiveStream>,
    next_id: u64,
}

impl StreamClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            base_url: base_url.into(),
            events_tx,
            events_rx: Some(events_rx),
            active: None,
            next_id: 1,
        }
    }

    /// The event channel. Available once. It is unbounded, so a slow
    /// consumer never stalls the receive loop.
    pub fn take_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<Value>> {
        self.events_rx.take()
    }

    /// Whether a connection task is alive.
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| !a.handle.is_finished())
    }

    pub fn topics(&self) -> &[String] {
        self.active.as_ref().map(|a| a.topics.as_slice()).unwrap_or(&[])
    }

    /// Connect and subscribe to `topics`.
    pub async fn start(&mut self, topics: Vec<String>) -> Result<(), StreamError> {
        if self.is_running() {
            return Err(StreamError::AlreadyRunning);
        }
        // A task that ended on its own leaves a finished handle behind.
        self.active = None;

        let url = stream_url(&self.base_url, &topics)?;
        info!(topics = ?topics, "Subscribing to streams");

        let (mut ws, _) = connect_async(url.as_str()).await?;
        let id = self.next_id;
        self.next_id += 2;
        ws.send(control_frame("SUBSCRIBE", &topics, id)).await?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_connection(
            ws,
            topics.clone(),
            id + 1,
            stop_rx,
            self.events_tx.clone(),
        ));

        self.active = Some(ActiveStream {
            topics,
            stop_tx,
            handle,
        });
        Ok(())
    }

    /// Unsubscribe, close and wait for the connection task to end.
    ///
    /// The receive loop notices the stop signal between frames, so one
    /// frame already being read may still be delivered.
    pub async fn stop(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        info!(topics = ?active.topics, "Shutting down streams client");
        let _ = active.stop_tx.send(true);

        match tokio::time::timeout(CLOSE_TIMEOUT * 2, &mut active.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Stream task ended abnormally"),
            Err(_) => {
                warn!("Stream task did not stop in time, aborting it");
                active.handle.abort();
                let _ = active.handle.await;
            }
        }
    }

    /// Replace the subscription: the old connection is stopped and
    /// awaited before the new one opens.
    pub async fn refresh(&mut self, topics: Vec<String>) -> Result<(), StreamError> {
        self.stop().await;
        self.start(topics).await
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.stop_tx.send(true);
        }
    }
}

async fn run_connection(
    mut ws: WsStream,
    topics: Vec<String>,
    unsubscribe_id: u64,
    mut stop_rx: watch::Receiver<bool>,
    events_tx: mpsc::UnboundedSender<Value>,
) {
    loop {
        tokio::select! {
            biased;

            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(&text) {
                    Ok(value) => {
                        if let Some(event) = classify(value) {
                            if events_tx.send(event).is_err() {
                                debug!("Event receiver dropped");
                                break;
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "Discarding undecodable frame"),
                },
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = ws.send(Message::Pong(payload)).await {
                        error!(error = %e, "Failed to answer ping");
                        return;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(topics = ?topics, "Stream closed by server");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "Stream connection failed");
                    return;
                }
            }
        }
    }

    // Stopped while still connected.
    if let Err(e) = ws
        .send(control_frame("UNSUBSCRIBE", &topics, unsubscribe_id))
        .await
    {
        debug!(error = %e, "Unsubscribe not sent");
    }
    if let Err(e) = ws.close(None).await {
        debug!(error = %e, "Close not sent");
    }
    let drained = tokio::time::timeout(CLOSE_TIMEOUT, async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
    if drained.is_err() {
        warn!("Server did not acknowledge close");
    }
    info!(topics = ?topics, "Stream stopped");
}
