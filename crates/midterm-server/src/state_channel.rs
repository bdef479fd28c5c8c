//! State/Settings Channel: two JSON WebSockets — `/ws/state`
//! pushes the session list and handles the `command` RPC envelope,
//! `/ws/settings` pushes the settings record.
//!
//! Grounded on `relay-server`'s JSON WebSocket handler (text frames,
//! `serde_json::from_str`/`to_string`, a `tokio::select!` over inbound
//! frames and a `watch` receiver) generalized to the hub's two process-wide
//! topics and a `command`/`response` RPC envelope.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use midterm_proto::state_dto::{CommandRequest, CommandResponse, ReorderPayload, ServerMessage, SettingsMessage};
use tracing::{debug, warn};

use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/ws/state", get(state_upgrade))
        .route("/ws/settings", get(settings_upgrade))
}

async fn state_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_state(socket, state))
}

async fn settings_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_settings(socket, state))
}

async fn run_state(mut socket: WebSocket, state: AppState) {
    let mut sessions_changed = state.hub.subscribe_sessions_changed();
    if send_sessions(&mut socket, &state).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(()) = handle_command(&mut socket, &state, &text).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "state channel read error, closing");
                        break;
                    }
                }
            }
            changed = sessions_changed.changed() => {
                if changed.is_err() {
                    break;
                }
                if send_sessions(&mut socket, &state).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn send_sessions(socket: &mut WebSocket, state: &AppState) -> Result<(), ()> {
    let msg = ServerMessage::Sessions { sessions: state.manager.list() };
    send_json(socket, &msg).await
}

async fn handle_command(socket: &mut WebSocket, state: &AppState, text: &str) -> Result<(), ()> {
    let request: CommandRequest = match serde_json::from_str(text) {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "malformed command envelope, closing state channel");
            return Err(());
        }
    };

    let response = match request.action.as_str() {
        "session.reorder" => match serde_json::from_value::<ReorderPayload>(request.payload.clone()) {
            Ok(payload) => match state.manager.reorder(payload.session_ids) {
                Ok(()) => CommandResponse::ok(request.id.clone(), None),
                Err(e) => CommandResponse::err(request.id.clone(), e.to_string()),
            },
            Err(e) => CommandResponse::err(request.id.clone(), format!("invalid payload: {e}")),
        },
        other => CommandResponse::err(request.id.clone(), format!("unknown action: {other}")),
    };

    let json = match serde_json::to_string(&response) {
        Ok(json) => json,
        Err(_) => return Ok(()),
    };
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

async fn run_settings(mut socket: WebSocket, state: AppState) {
    let mut settings_changed = state.hub.subscribe_settings_changed();
    if send_settings(&mut socket, &state).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "settings channel read error, closing");
                        break;
                    }
                }
            }
            changed = settings_changed.changed() => {
                if changed.is_err() {
                    break;
                }
                if send_settings(&mut socket, &state).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn send_settings(socket: &mut WebSocket, state: &AppState) -> Result<(), ()> {
    let msg = SettingsMessage::Settings(state.settings.get());
    send_json(socket, &msg).await
}

async fn send_json<T: serde::Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), ()> {
    let json = serde_json::to_string(value).map_err(|_| ())?;
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}
