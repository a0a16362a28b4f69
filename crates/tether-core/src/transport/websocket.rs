//! WebSocket realtime channel
//!
//! Maintains a long-lived WebSocket connection for realtime requests.
//! Handles reconnection automatically with exponential backoff, and
//! publishes the connection's health into [`Connectivity`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::RealtimeChannel;
use crate::connectivity::Connectivity;
use crate::error::TransportError;

/// Commands sent to the channel task
#[derive(Debug)]
enum ChannelCommand {
    /// Send a text frame
    Send(String),
    /// Drop the connection and dial again
    Reconnect,
    /// Close the connection and stop the task
    Shutdown,
}

/// Why a connection ended
enum ConnectionExit {
    Closed,
    Reconnect,
    Shutdown,
}

/// Configuration for the WebSocket channel
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// WebSocket URL
    pub url: String,
    /// Initial reconnect delay
    pub initial_reconnect_delay: Duration,
    /// Maximum reconnect delay
    pub max_reconnect_delay: Duration,
}

impl WebSocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

/// Shared state between the handle and the channel task
#[derive(Default)]
struct ChannelState {
    open: AtomicBool,
    last_data: Mutex<Option<Instant>>,
}

impl ChannelState {
    fn touch(&self) {
        *self.last_data.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }
}

/// Handle to a persistent WebSocket connection
pub struct WebSocketChannel {
    command_tx: mpsc::UnboundedSender<ChannelCommand>,
    state: Arc<ChannelState>,
}

impl WebSocketChannel {
    /// Spawn the connection task
    ///
    /// Returns the channel handle and a receiver of parsed inbound JSON frames.
    pub fn spawn(
        config: WebSocketConfig,
        connectivity: Connectivity,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Value>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let state = Arc::new(ChannelState::default());

        tokio::spawn(channel_loop(
            config,
            state.clone(),
            command_rx,
            inbound_tx,
            connectivity,
        ));

        (Arc::new(Self { command_tx, state }), inbound_rx)
    }

    /// Close the connection and stop reconnecting
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ChannelCommand::Shutdown);
    }
}

impl RealtimeChannel for WebSocketChannel {
    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    fn send(&self, frame: Value) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        let text =
            serde_json::to_string(&frame).map_err(|e| TransportError::Serialization(e.to_string()))?;
        self.command_tx
            .send(ChannelCommand::Send(text))
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn last_data_received(&self) -> Option<Instant> {
        *self
            .state
            .last_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn reconnect(&self) {
        let _ = self.command_tx.send(ChannelCommand::Reconnect);
    }
}

/// Main channel loop with reconnection
async fn channel_loop(
    config: WebSocketConfig,
    state: Arc<ChannelState>,
    mut command_rx: mpsc::UnboundedReceiver<ChannelCommand>,
    inbound_tx: mpsc::UnboundedSender<Value>,
    connectivity: Connectivity,
) {
    let mut reconnect_delay = config.initial_reconnect_delay;

    loop {
        debug!("Connecting to {}", config.url);
        let exit = match connect_async(&config.url).await {
            Ok((ws_stream, _)) => {
                info!("Realtime channel connected to {}", config.url);
                reconnect_delay = config.initial_reconnect_delay;
                state.touch();
                state.open.store(true, Ordering::SeqCst);
                connectivity.set_online(true);

                let exit = run_connection(ws_stream, &state, &mut command_rx, &inbound_tx).await;

                state.open.store(false, Ordering::SeqCst);
                connectivity.set_online(false);
                match exit {
                    Ok(exit) => exit,
                    Err(e) => {
                        warn!("Realtime channel error: {}", e);
                        ConnectionExit::Closed
                    }
                }
            }
            Err(e) => {
                warn!("Realtime connection to {} failed: {}", config.url, e);
                ConnectionExit::Closed
            }
        };

        match exit {
            ConnectionExit::Shutdown => break,
            ConnectionExit::Reconnect => continue,
            ConnectionExit::Closed => {}
        }

        // Wait before reconnecting, but check for shutdown command
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {
                reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
            }
            cmd = command_rx.recv() => {
                match cmd {
                    Some(ChannelCommand::Shutdown) | None => break,
                    Some(ChannelCommand::Reconnect) => {}
                    Some(ChannelCommand::Send(_)) => {
                        debug!("Dropping frame sent while disconnected");
                    }
                }
            }
        }
    }

    debug!("Realtime channel task stopped");
}

/// Pump frames until the connection ends or a command stops it
async fn run_connection(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    state: &ChannelState,
    command_rx: &mut mpsc::UnboundedReceiver<ChannelCommand>,
    inbound_tx: &mpsc::UnboundedSender<Value>,
) -> Result<ConnectionExit> {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                match cmd {
                    Some(ChannelCommand::Send(text)) => {
                        write.send(Message::Text(text)).await?;
                    }
                    Some(ChannelCommand::Reconnect) => {
                        write.close().await.ok();
                        return Ok(ConnectionExit::Reconnect);
                    }
                    Some(ChannelCommand::Shutdown) | None => {
                        write.close().await.ok();
                        return Ok(ConnectionExit::Shutdown);
                    }
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.touch();
                        match serde_json::from_str::<Value>(&text) {
                            Ok(frame) => {
                                let _ = inbound_tx.send(frame);
                            }
                            Err(e) => debug!("Ignoring malformed frame: {}", e),
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => state.touch(),
                    Some(Ok(Message::Close(_))) | None => return Ok(ConnectionExit::Closed),
                    Some(Err(e)) => return Err(e.into()),
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{RealtimeRequest, RequestCorrelator};
    use serde_json::json;
    use tokio::net::TcpListener;

    #[test]
    fn test_default_config() {
        let config = WebSocketConfig::default();
        assert_eq!(config.initial_reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(30));
    }

    /// Accepts one connection and answers every request frame successfully
    async fn echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let frame: Value = serde_json::from_str(&text).unwrap();
                let reply = json!({
                    "type": "response",
                    "body": {
                        "request_id": frame["body"]["request_id"],
                        "success": true,
                        "data": { "echo": frame["body"]["method"] }
                    }
                });
                ws.send(Message::Text(reply.to_string())).await.unwrap();
            }
        });

        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_round_trip_through_correlator() {
        let url = echo_server().await;
        let connectivity = Connectivity::new(false);
        let mut online = connectivity.subscribe();

        let (channel, inbound) = WebSocketChannel::spawn(WebSocketConfig::new(url), connectivity.clone());
        let (correlator, _changes) =
            RequestCorrelator::new(channel.clone(), Duration::from_secs(5));
        tokio::spawn(correlator.clone().run(inbound, Duration::from_millis(100)));

        // Wait for the channel to report itself online
        while !*online.borrow_and_update() {
            online.changed().await.unwrap();
        }
        assert!(channel.is_open());

        let response = correlator
            .send_request(RealtimeRequest {
                data: json!({ "method": "Message.create", "data": {} }),
                is_batchable: false,
            })
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.data["echo"], "Message.create");
        assert!(channel.last_data_received().is_some());

        channel.shutdown();
    }

    #[tokio::test]
    async fn test_send_rejected_before_connect() {
        let (channel, _inbound) = WebSocketChannel::spawn(
            WebSocketConfig::new("ws://127.0.0.1:9"),
            Connectivity::new(false),
        );
        assert_eq!(
            channel.send(json!({ "type": "request" })),
            Err(TransportError::NotConnected)
        );
        channel.shutdown();
    }
}
