pub mod assets;
pub mod config;
pub mod error;
pub mod handler;
pub mod listener;
pub mod room;
pub mod router;
pub mod service;
pub mod state;
pub mod tls;
pub mod tokens;
pub mod ws;

use axum::Router;

use config::ServerConfig;
use state::AppState;

/// Build the Axum router and application state from a config.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    let state = AppState::new(config);
    (router::build_router(state.clone()), state)
}
