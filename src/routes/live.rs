//! Live event stream over WebSocket.
//!
//! Each connection gets its own broadcast receiver. A client that cannot
//! keep up skips the events it missed; ingestion never waits for it.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::sync::broadcast::error::RecvError;

use super::AppState;
use crate::broadcast::Broadcaster;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_events(socket, state.broadcaster))
}

/// Forward live events to one client until either side goes away.
async fn stream_events(mut socket: WebSocket, broadcaster: Arc<Broadcaster>) {
    // ---
    let conn_id = uuid::Uuid::new_v4().to_string();
    let mut events = broadcaster.subscribe();
    tracing::info!(conn_id = %conn_id, viewers = broadcaster.subscriber_count(), "Viewer connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(conn_id = %conn_id, "Failed to encode {}: {}", event.name(), e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        tracing::debug!(conn_id = %conn_id, "WebSocket sink closed");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(conn_id = %conn_id, skipped, "Viewer lagging, events skipped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    tracing::info!(conn_id = %conn_id, "Viewer disconnected");
}
