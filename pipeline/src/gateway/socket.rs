//! WebSocket endpoint of the realtime gateway
//!
//! Client frames are `{"event": "subscribe", "data": "<channel>"}`. Server
//! frames are `{"event": "message", "data": "<payload>"}`, carrying either a
//! join acknowledgement or a raw log payload.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bus::topics::Topics;
use crate::gateway::groups::{ClientId, Groups};

pub const EVENT_SUBSCRIBE: &str = "subscribe";
pub const EVENT_MESSAGE: &str = "message";

/// A frame exchanged with gateway clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: String,
}

impl Frame {
    pub fn subscribe(channel: &str) -> Self {
        Self {
            event: EVENT_SUBSCRIBE.to_string(),
            data: channel.to_string(),
        }
    }

    pub fn message(payload: impl Into<String>) -> Self {
        Self {
            event: EVENT_MESSAGE.to_string(),
            data: payload.into(),
        }
    }

    fn to_ws(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Message::Text(text.into())),
            Err(e) => {
                warn!("Failed to encode gateway frame: {}", e);
                None
            }
        }
    }
}

/// Acknowledgement sent after a successful subscribe
pub fn join_ack(channel: &str) -> String {
    format!("Joined {}", channel)
}

/// Upgrade handler for `GET /ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(groups): State<Arc<Groups>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, groups))
}

async fn handle_socket(socket: WebSocket, groups: Arc<Groups>) {
    let (client, mut outgoing) = groups.register().await;
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let reply = match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&groups, client, text.as_str()).await
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => None,
                    Some(Err(e)) => {
                        debug!("Gateway client {} read error: {}", client, e);
                        break;
                    }
                };
                if let Some(message) = reply.as_ref().and_then(Frame::to_ws) {
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
            }
            payload = outgoing.recv() => {
                let Some(payload) = payload else { break };
                if let Some(message) = Frame::message(payload).to_ws() {
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    groups.remove(client).await;
}

/// Apply a client frame, returning the reply to send back
async fn handle_frame(groups: &Groups, client: ClientId, text: &str) -> Option<Frame> {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Ignoring malformed frame from client {}: {}", client, e);
            return None;
        }
    };

    if frame.event != EVENT_SUBSCRIBE {
        debug!("Ignoring '{}' frame from client {}", frame.event, client);
        return None;
    }

    let group = Topics::channel_group(&frame.data);
    if group.is_empty() {
        return None;
    }
    groups.join(client, &group).await;
    Some(Frame::message(join_ack(&frame.data)))
}
