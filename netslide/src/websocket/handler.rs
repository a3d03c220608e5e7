use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedSender};
use uuid::Uuid;

use crate::{
    config::AppState,
    service::{hub, ConnectionId, HubOp},
    websocket::{ClientEvent, RegisterPayload, ServerEvent},
};

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// WebSocket upgrade handler for presenter and viewer connections
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_client_socket(socket, state.hub_tx))
}

/// Handle an individual client WebSocket connection
async fn handle_client_socket(socket: WebSocket, hub_tx: UnboundedSender<HubOp>) {
    let conn_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();

    if let Err(e) = hub::connect(&hub_tx, conn_id, event_tx) {
        tracing::error!(conn_id = %conn_id, error = %e, "Failed to join multiplex hub");
        return;
    }
    tracing::info!(conn_id = %conn_id, "Client connected");

    // Drain relayed events into the socket
    let writer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!(conn_id = %conn_id, error = %e, "Failed to serialize event");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
        // Flushes the close reply queued when the client's Close frame was read
        let _ = sender.close().await;
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                tracing::trace!(
                    conn_id = %conn_id,
                    message_length = text.len(),
                    "Received text message"
                );

                if let Err(e) = handle_client_message(&text, conn_id, &hub_tx) {
                    tracing::error!(
                        conn_id = %conn_id,
                        error = %e,
                        "Error handling client message"
                    );
                    break;
                }
            }
            Ok(Message::Close(frame)) => {
                tracing::debug!(
                    conn_id = %conn_id,
                    reason = ?frame,
                    "Client closed connection"
                );
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Pongs are queued by the socket itself
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!(conn_id = %conn_id, "Received unexpected binary message");
            }
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Cleanup on disconnect
    if let Err(e) = hub::disconnect(&hub_tx, conn_id) {
        tracing::debug!(conn_id = %conn_id, error = %e, "Hub gone before disconnect");
    }
    // The hub drops our event sender on disconnect, which ends the writer
    let abort_writer = writer.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        tracing::debug!(conn_id = %conn_id, "Writer did not finish in time");
        abort_writer.abort();
    }
    tracing::info!(conn_id = %conn_id, "Client disconnected");
}

/// Route a client event to the hub. Malformed frames are dropped without
/// telling the sender; only a vanished hub is an error.
fn handle_client_message(
    text: &str,
    conn_id: ConnectionId,
    hub_tx: &UnboundedSender<HubOp>,
) -> crate::error::Result<()> {
    let event = match ClientEvent::parse(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(conn_id = %conn_id, error = %e, "Dropping malformed message");
            return Ok(());
        }
    };

    match event {
        ClientEvent::Register(RegisterPayload { secret }) => {
            hub::register_secret(hub_tx, conn_id, secret)
        }
        ClientEvent::StateChanged(payload) => hub::publish_state_change(hub_tx, conn_id, payload),
    }
}
