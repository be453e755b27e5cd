use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use parley_core::net::protocol::{APP_PATH, DEV_SERVER_PORT};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::listener::ListeningServer;
use crate::room::Room;
use crate::state::AppState;
use crate::tokens::TokenStore;

/// Composition root: owns the token store, the room and the listening
/// server, and hands out session links.
pub struct SignalingService {
    room: Arc<Room>,
    tokens: Arc<TokenStore>,
    server: ListeningServer,
    public_url: String,
    token_ttl: Duration,
}

impl SignalingService {
    pub fn new(config: ServerConfig) -> Self {
        let public_url = resolve_public_url(&config);
        let token_ttl = config.token_ttl();
        let room = Arc::new(Room::new());
        let tokens = Arc::new(TokenStore::new());
        let state = AppState::with_parts(
            config,
            Arc::clone(&room),
            Arc::clone(&tokens),
            CancellationToken::new(),
        );
        tracing::debug!(%public_url, "Resolved public voice chat URL");
        Self {
            room,
            tokens,
            server: ListeningServer::new(state),
            public_url,
            token_ttl,
        }
    }

    /// Mint a single-use link for `user_id`.
    pub fn create_session_url(&self, user_id: Uuid) -> String {
        let token = self.tokens.create_token(user_id, self.token_ttl);
        append_token(&self.public_url, &token)
    }

    /// Like [`create_session_url`](Self::create_session_url), remembering the
    /// name peers will see in the welcome frame.
    pub fn create_session_url_named(&self, user_id: Uuid, display_name: &str) -> String {
        self.tokens.remember_name(user_id, display_name);
        self.create_session_url(user_id)
    }

    /// Link for a throwaway identity, for testing with extra browser tabs.
    pub fn create_debug_session_url(&self) -> String {
        let user_id = Uuid::new_v4();
        tracing::debug!(user_id = %user_id, "Issuing debug session link");
        self.create_session_url(user_id)
    }

    /// The host saw the player leave: drop their voice session too.
    pub fn player_disconnected(&self, user_id: Uuid) -> bool {
        self.room.disconnect_user(user_id)
    }

    pub fn start(&self) {
        self.server.start();
    }

    pub fn stop(&self) {
        self.server.stop();
    }

    pub async fn wait(&self) -> Result<(), ServerError> {
        self.server.wait().await
    }

    pub async fn ready(&self) -> Option<SocketAddr> {
        self.server.ready().await
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn public_url(&self) -> &str {
        &self.public_url
    }
}

/// Configured URL, else the dev server, else the bundled client on this port.
pub fn resolve_public_url(config: &ServerConfig) -> String {
    let configured = config.public_url.trim();
    if !configured.is_empty() {
        return configured.to_string();
    }
    if config.dev_forwarding {
        return format!("http://localhost:{DEV_SERVER_PORT}/");
    }
    let scheme = if config.tls.enabled { "https" } else { "http" };
    format!("{scheme}://localhost:{}{APP_PATH}", config.port)
}

fn append_token(base: &str, token: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}token={token}")
}
