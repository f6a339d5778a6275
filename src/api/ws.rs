// =============================================================================
// WebSocket Handler — typed PipelineEvent push feed
// =============================================================================
//
// Clients connect to `/api/v1/ws?token=<token>` and receive every
// `PipelineEvent` published to the Telemetry & Dashboard Bus as a JSON
// frame, in publish order, from the moment they connect onward. No initial
// full-state snapshot is sent — callers that want current state hit
// `/api/v1/state` once and then follow the stream for changes.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::api::auth::validate_token;
use crate::app_state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if !validate_token(&token) {
        warn!("WebSocket connection rejected: invalid token");
        return (axum::http::StatusCode::FORBIDDEN, "Invalid or missing token").into_response();
    }

    info!("WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state)).into_response()
}

async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.telemetry_bus.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => {
                        let Ok(json) = serde_json::to_string(event.as_ref()) else { continue };
                        if let Err(e) = sender.send(Message::Text(json.into())).await {
                            debug!(error = %e, "WebSocket send failed — disconnecting");
                            break;
                        }
                    }
                    None => {
                        info!("telemetry bus closed — ending WebSocket connection");
                        break;
                    }
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket closed by client");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}
