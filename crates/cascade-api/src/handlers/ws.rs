//! /ws — one WebSocket per client connection.
//!
//! Outbound messages flow through a [`ChannelConnection`] whose receiver is
//! drained into the socket by a writer task. Inbound text frames are
//! decoded as [`ClientMessage`] and handed to the coordinator.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};

use cascade_core::wire::ClientMessage;
use cascade_services::{ChannelConnection, Connection, Inbound};

use super::ApiState;

pub async fn handle_ws(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(move |socket| run_socket(socket, state))
}

async fn run_socket(socket: WebSocket, state: ApiState) {
    let coordinator = state.coordinator;
    let (conn, mut outbound) = ChannelConnection::new(coordinator.hub().next_id());
    let id = conn.id();
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(conn = id, error = %e, "failed to encode message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    tracing::debug!(conn = id, "client connected");
    coordinator.handle(conn.clone(), Inbound::Connect).await;

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match decode(text.as_str()) {
                Some(msg) => coordinator.handle(conn.clone(), Inbound::Message(msg)).await,
                None => tracing::debug!(conn = id, "ignoring malformed client message"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn = id, error = %e, "websocket read failed");
                break;
            }
        }
    }

    coordinator.handle(conn, Inbound::Disconnect).await;
    // A pending batch may still hold the connection; stop writing now.
    writer.abort();
    tracing::debug!(conn = id, "client disconnected");
}

fn decode(text: &str) -> Option<ClientMessage> {
    serde_json::from_str(text).ok()
}
