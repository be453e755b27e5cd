use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use parley_core::net::messages::{ServerMessage, WelcomeMsg};
use parley_core::net::protocol::decode_server_message;

use parley_server::config::ServerConfig;
use parley_server::service::SignalingService;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub service: SignalingService,
}

impl TestServer {
    /// Start a test server serving the bundled web client.
    pub async fn new() -> Self {
        Self::from_config(test_config()).await
    }

    pub async fn with_dev_forwarding() -> Self {
        Self::from_config(ServerConfig {
            dev_forwarding: true,
            ..test_config()
        })
        .await
    }

    pub async fn with_web_root(root: &std::path::Path) -> Self {
        Self::from_config(ServerConfig {
            web_root: root.to_string_lossy().into_owned(),
            ..test_config()
        })
        .await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let service = SignalingService::new(config);
        service.start();
        let addr = service
            .ready()
            .await
            .expect("test server failed to bind");
        Self { addr, service }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/voice/ws", self.addr)
    }

    /// Mint a fresh token for `user`, as the host would.
    pub fn token_for(&self, user: Uuid) -> String {
        let url = self.service.create_session_url(user);
        url.rsplit_once("token=")
            .map(|(_, token)| token.to_string())
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.service.stop();
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        web_root: bundled_web_root().to_string_lossy().into_owned(),
        ..ServerConfig::default()
    }
}

/// The repository's `web/` directory.
pub fn bundled_web_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../web")
}

/// A unique empty directory under the system temp dir.
pub fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("parley-test-{}", Uuid::new_v4().simple()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// HTTP client that reports redirects instead of following them.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

pub async fn ws_send_json(stream: &mut WsStream, value: Value) {
    stream
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Read the next text frame (5s timeout).
pub async fn ws_read_text(stream: &mut WsStream) -> String {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Read the next ServerMessage from a WebSocket stream (5s timeout).
pub async fn ws_read_server_msg(stream: &mut WsStream) -> ServerMessage {
    let text = ws_read_text(stream).await;
    decode_server_message(&text).unwrap()
}

/// Try to read a ServerMessage, returning None on timeout.
pub async fn ws_try_read_server_msg(stream: &mut WsStream, timeout_ms: u64) -> Option<ServerMessage> {
    let deadline = Duration::from_millis(timeout_ms);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return decode_server_message(text.as_str()).ok(),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
                _ => continue,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Wait until the server closes the stream (5s timeout).
pub async fn ws_expect_closed(stream: &mut WsStream) {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for the server to close the socket")
}

/// Send `hello` with `token` and return the welcome.
pub async fn ws_hello(stream: &mut WsStream, token: &str) -> WelcomeMsg {
    ws_send_json(stream, json!({"type": "hello", "token": token})).await;
    match ws_read_server_msg(stream).await {
        ServerMessage::Welcome(welcome) => welcome,
        other => panic!("Expected Welcome, got: {other:?}"),
    }
}

/// Connect and authenticate as a fresh user. Returns (stream, user, welcome).
pub async fn ws_join(server: &TestServer) -> (WsStream, Uuid, WelcomeMsg) {
    let user = Uuid::new_v4();
    let token = server.token_for(user);
    let mut stream = ws_connect(&server.ws_url()).await;
    let welcome = ws_hello(&mut stream, &token).await;
    (stream, user, welcome)
}

/// Assert the next frame is an error carrying `message`.
pub async fn ws_expect_error(stream: &mut WsStream, message: &str) {
    assert_eq!(ws_read_server_msg(stream).await, ServerMessage::error(message));
}
