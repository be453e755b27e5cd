use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::room::Room;
use crate::tokens::TokenStore;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub room: Arc<Room>,
    pub tokens: Arc<TokenStore>,
    pub config: Arc<ServerConfig>,
    pub web_root: Arc<PathBuf>,
    /// Cancelled when the server stops; open WebSocket sessions watch it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(Room::new()),
            Arc::new(TokenStore::new()),
            CancellationToken::new(),
        )
    }

    pub fn with_parts(
        config: ServerConfig,
        room: Arc<Room>,
        tokens: Arc<TokenStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            room,
            tokens,
            web_root: Arc::new(PathBuf::from(&config.web_root)),
            config: Arc::new(config),
            shutdown,
        }
    }
}
