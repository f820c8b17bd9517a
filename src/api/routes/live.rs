//! Live Feed
//!
//! - GET /ws - Write-only websocket of live readings
//!
//! Each connection subscribes to the broadcast hub, forwards every reading
//! as a JSON text frame, and closes normally once its lifetime elapses.
//! Inbound frames are read only to notice the client going away.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use crate::api::AppState;
use crate::broadcast::Broadcaster;
use crate::octopus::ConsumptionReading;

/// WebSocket upgrade handler
pub async fn live_feed(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let hub = Arc::clone(&state.hub);
    let lifetime = state.config.socket_lifetime();
    ws.on_upgrade(move |socket| handle_socket(socket, hub, lifetime))
}

/// Why a feed connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ended {
    LifetimeElapsed,
    HubStopped,
    ClientGone,
}

async fn handle_socket(
    socket: WebSocket,
    hub: Arc<Broadcaster<ConsumptionReading>>,
    lifetime: Duration,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = hub.subscribe().await;
    let connection_id = uuid::Uuid::new_v4();

    tracing::info!(
        connection_id = %connection_id,
        subscription = %subscription.id(),
        "Live feed connected"
    );

    let deadline = tokio::time::sleep(lifetime);
    tokio::pin!(deadline);

    let ended = loop {
        tokio::select! {
            _ = &mut deadline => break Ended::LifetimeElapsed,

            reading = subscription.recv() => {
                let Some(reading) = reading else {
                    break Ended::HubStopped;
                };

                let text = match serde_json::to_string(&reading) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize reading");
                        continue;
                    }
                };

                if sender.send(Message::Text(text)).await.is_err() {
                    tracing::debug!(connection_id = %connection_id, "WebSocket send failed");
                    break Ended::ClientGone;
                }
            }

            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break Ended::ClientGone,
                Some(Ok(_)) => {}
            },
        }
    };

    hub.unsubscribe(&subscription).await;

    if ended != Ended::ClientGone {
        let close = Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        }));
        let _ = sender.send(close).await;
    }

    tracing::info!(connection_id = %connection_id, reason = ?ended, "Live feed closed");
}
