//! WebSocket transport for push channels.

use super::channel::{ChannelConnector, ChannelError, ChannelTarget, TallyUpdate, UpdateChannel};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// Connects push channels over WebSocket
#[derive(Debug, Clone)]
pub struct WsConnector {
    ws_base: String,
}

impl WsConnector {
    /// `ws_base` is the WebSocket root of the API, e.g. `ws://localhost:8000/api`
    pub fn new(ws_base: impl Into<String>) -> Self {
        Self {
            ws_base: ws_base.into(),
        }
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self, target: &ChannelTarget) -> Result<Box<dyn UpdateChannel>, ChannelError> {
        let url = target.url(&self.ws_base)?;
        debug!(poll_id = %target.poll_id, private = target.creator_key.is_some(), "opening results channel");

        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        Ok(Box::new(WsChannel {
            poll_id: target.poll_id.clone(),
            stream,
        }))
    }
}

struct WsChannel {
    poll_id: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl UpdateChannel for WsChannel {
    async fn next_update(&mut self) -> Option<Result<TallyUpdate, ChannelError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(ChannelError::Transport(e.to_string()))),
            };

            let parsed = match message {
                Message::Text(text) => TallyUpdate::from_json(text.as_str()),
                Message::Binary(data) => TallyUpdate::from_slice(&data),
                Message::Close(frame) => {
                    debug!(poll_id = %self.poll_id, ?frame, "server closed results channel");
                    return None;
                }
                // Ping/pong are answered by tungstenite itself
                _ => continue,
            };

            match parsed {
                Ok(update) => return Some(Ok(update)),
                Err(e) => {
                    warn!(poll_id = %self.poll_id, error = %e, "ignoring undecodable results message");
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(poll_id = %self.poll_id, error = %e, "results channel already closed");
        }
    }
}
