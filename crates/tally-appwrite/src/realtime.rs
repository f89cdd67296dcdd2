//! Realtime WebSocket channel for document change events.
//!
//! Each subscription owns one connection to `/realtime`, kept alive with
//! heartbeat pings and re-established with exponential backoff until the
//! returned [`ChannelHandle`] is closed.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

use crate::client::GatewayConfig;
use crate::gateway::{ChannelHandle, Collection, EventHandler, RealtimeEvent};
use crate::AppwriteError;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
const READ_TIMEOUT: Duration = Duration::from_secs(90);
const MAX_BACKOFF_SECS: u64 = 60;

/// Opens realtime channels against one project.
#[derive(Debug, Clone)]
pub struct RealtimeClient {
    /// `ws(s)://host/v1/realtime`
    url: String,
    config: GatewayConfig,
}

impl RealtimeClient {
    pub fn new(config: &GatewayConfig) -> Self {
        let endpoint = &config.endpoint;
        let ws_endpoint = if let Some(rest) = endpoint.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = endpoint.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            endpoint.clone()
        };

        Self {
            url: format!("{}/realtime", ws_endpoint),
            config: config.clone(),
        }
    }

    /// Build the full WebSocket URL for one channel.
    fn build_url(&self, channel: &str) -> String {
        format!(
            "{}?project={}&channels[]={}",
            self.url, self.config.project_id, channel
        )
    }

    /// Start delivering change events for `collection` to `handler`.
    ///
    /// Must be called inside a Tokio runtime; outside one the channel stays
    /// closed and no events arrive.
    pub fn subscribe(&self, collection: Collection, handler: EventHandler) -> ChannelHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let channel = self.config.channel(collection);
        let connection = Connection {
            url: self.build_url(&channel),
            channel,
            handler,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { connection.run(shutdown_rx).await });
            }
            Err(_) => {
                warn!(channel = %connection.channel, "no async runtime, realtime channel not opened");
            }
        }

        ChannelHandle::new(move || {
            let _ = shutdown_tx.send(true);
        })
    }
}

/// One live channel.
struct Connection {
    url: String,
    channel: String,
    handler: EventHandler,
}

impl Connection {
    /// Connect and deliver events until shutdown, reconnecting on failure.
    async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut backoff_secs = 1u64;

        loop {
            if *shutdown_rx.borrow() {
                debug!(channel = %self.channel, "realtime channel closed");
                return;
            }

            info!(channel = %self.channel, "connecting to realtime");

            match self
                .connect_and_process(&mut shutdown_rx, &mut backoff_secs)
                .await
            {
                Ok(()) => return,
                Err(e) => {
                    error!(channel = %self.channel, error = %e, "realtime connection error, reconnecting");

                    let wait = Duration::from_secs(backoff_secs);
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                return;
                            }
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }

                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                }
            }
        }
    }

    /// Process frames until error or shutdown.
    async fn connect_and_process(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
        backoff_secs: &mut u64,
    ) -> Result<(), AppwriteError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| AppwriteError::WebSocket(format!("connection failed: {}", e)))?;

        let (mut write, mut read) = ws_stream.split();
        *backoff_secs = 1;
        info!(channel = %self.channel, "realtime connected");

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }

                _ = heartbeat.tick() => {
                    write
                        .send(Message::Text(r#"{"type":"ping"}"#.to_string()))
                        .await
                        .map_err(|e| AppwriteError::WebSocket(format!("heartbeat failed: {}", e)))?;
                }

                result = tokio::time::timeout(READ_TIMEOUT, read.next()) => {
                    match result {
                        Ok(Some(Ok(Message::Text(text)))) => {
                            if let Err(e) = self.handle_message(&text) {
                                warn!(error = %e, "failed to handle realtime message");
                            }
                        }
                        Ok(Some(Ok(Message::Close(_)))) => {
                            return Err(AppwriteError::WebSocket("connection closed".to_string()));
                        }
                        Ok(Some(Ok(_))) => {}
                        Ok(Some(Err(e))) => {
                            return Err(AppwriteError::WebSocket(format!("read error: {}", e)));
                        }
                        Ok(None) => {
                            return Err(AppwriteError::WebSocket("stream ended".to_string()));
                        }
                        Err(_) => {
                            return Err(AppwriteError::WebSocket("read timeout".to_string()));
                        }
                    }
                }
            }
        }
    }

    /// Handle a single realtime frame.
    fn handle_message(&self, text: &str) -> Result<(), AppwriteError> {
        let frame: RealtimeFrame = serde_json::from_str(text)?;

        match frame.kind.as_str() {
            "event" => {
                let event: RealtimeEvent = serde_json::from_value(frame.data)?;
                if !event.channels.is_empty() && !event.channels.contains(&self.channel) {
                    trace!(channels = ?event.channels, "ignoring event for other channel");
                    return Ok(());
                }
                trace!(events = ?event.events, "realtime event");
                (self.handler)(event);
            }
            "connected" => {
                debug!(channel = %self.channel, "realtime subscription confirmed");
            }
            "error" => {
                let message = frame
                    .data
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                warn!(channel = %self.channel, message, "realtime server error");
            }
            other => {
                trace!(kind = other, "ignoring realtime frame");
            }
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RealtimeFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_connection() -> (Connection, Arc<Mutex<Vec<RealtimeEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let connection = Connection {
            url: "ws://localhost/v1/realtime".to_string(),
            channel: "databases.inventory.collections.items.documents".to_string(),
            handler: Arc::new(move |event| sink.lock().unwrap().push(event)),
        };
        (connection, seen)
    }

    #[test]
    fn test_build_url_switches_scheme() {
        let client = RealtimeClient::new(&GatewayConfig::new(
            "https://cloud.appwrite.io/v1",
            "proj",
            "inventory",
        ));
        assert_eq!(
            client.build_url(&client.config.channel(Collection::Items)),
            "wss://cloud.appwrite.io/v1/realtime?project=proj&channels[]=databases.inventory.collections.items.documents"
        );

        let local = RealtimeClient::new(&GatewayConfig::new("http://localhost/v1", "p", "db"));
        assert!(local.build_url("c").starts_with("ws://localhost/v1/realtime?"));
    }

    #[test]
    fn test_event_frame_dispatched() {
        let (connection, seen) = recording_connection();
        let text = r#"{
            "type": "event",
            "data": {
                "events": ["databases.inventory.collections.items.documents.i1.update"],
                "channels": ["databases.inventory.collections.items.documents"],
                "timestamp": "2024-12-01 12:00:00.000",
                "payload": {"$id": "i1", "storeNumber": "4521", "count": 3}
            }
        }"#;

        connection.handle_message(text).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].store_number(), Some("4521"));
    }

    #[test]
    fn test_other_channel_ignored() {
        let (connection, seen) = recording_connection();
        let text = r#"{
            "type": "event",
            "data": {
                "events": ["databases.inventory.collections.stores.documents.s1.create"],
                "channels": ["databases.inventory.collections.stores.documents"],
                "payload": {"$id": "s1"}
            }
        }"#;

        connection.handle_message(text).unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_control_frames_ignored() {
        let (connection, seen) = recording_connection();
        connection
            .handle_message(r#"{"type":"connected","data":{"channels":[]}}"#)
            .unwrap();
        connection.handle_message(r#"{"type":"pong"}"#).unwrap();
        connection
            .handle_message(r#"{"type":"error","data":{"message":"bad channel","code":1008}}"#)
            .unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_frame_is_error() {
        let (connection, _) = recording_connection();
        assert!(connection.handle_message("not json").is_err());
    }

    #[tokio::test]
    async fn test_subscribe_receives_server_events() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let frame = serde_json::json!({
                "type": "event",
                "data": {
                    "events": ["databases.inventory.collections.items.documents.i1.create"],
                    "channels": ["databases.inventory.collections.items.documents"],
                    "payload": {"$id": "i1", "storeNumber": "4521"}
                }
            });
            ws.send(Message::Text(frame.to_string())).await.unwrap();
            // Hold the socket open until the client goes away.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let client = RealtimeClient::new(&GatewayConfig::new(
            format!("http://{}/v1", addr),
            "proj",
            "inventory",
        ));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = client.subscribe(
            Collection::Items,
            Arc::new(move |event: RealtimeEvent| {
                let _ = tx.send(event);
            }),
        );

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.document_id(), Some("i1"));

        handle.close();
    }
}
