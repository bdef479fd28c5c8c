//! `midterm-server`: the session manager and web-facing terminal
//! multiplexer server.
//!
//! One process owns every session on a machine. Each session's actual PTY
//! lives in a separate `midterm-host` process, reached through a
//! [`host_link::HostLink`]; this crate fans a session's output out to
//! however many browser tabs are currently attached to it.

pub mod config;
pub mod error;
pub mod host_link;
pub mod hub;
pub mod manager;
pub mod mux;
pub mod protocol_io;
pub mod rest;
pub mod scrollback;
pub mod session;
pub mod settings;
pub mod state_channel;

use std::sync::Arc;

use manager::SessionManager;

/// Shared application state, cloned into every request/websocket handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub hub: Arc<hub::BroadcastHub>,
    pub settings: Arc<settings::SettingsStore>,
}

pub fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .merge(rest::routes())
        .merge(mux::routes())
        .merge(state_channel::routes())
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
