use serde_json::{Map, Value};

use super::messages::{ClientMessage, ServerMessage, SignalKind, StateKind};

/// Canonical path of the bundled web client.
pub const APP_PATH: &str = "/voice/";

/// WebSocket upgrade path for signaling.
pub const WS_PATH: &str = "/voice/ws";

/// Requests under this prefix are redirected to the dev server when dev
/// forwarding is enabled.
pub const DEV_PREFIX: &str = "/voice-dev";

/// Port of the hot-reload development server.
pub const DEV_SERVER_PORT: u16 = 5173;

/// Maximum signaling frame / aggregated request size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

/// Shortest lifetime a session token may be issued with.
pub const TOKEN_TTL_FLOOR_SECS: u64 = 30;

/// Protocol-level failures. The `Display` text is sent verbatim to the client
/// inside an `error` frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid message format.")]
    InvalidFormat,
    #[error("Missing message type.")]
    MissingType,
    #[error("Authentication required.")]
    AuthenticationRequired,
    #[error("Invalid or expired token. Please re-run /voice chat command.")]
    InvalidToken,
    #[error("Voice chat already connected for this user.")]
    AlreadyConnected,
    #[error("Missing target.")]
    MissingTarget,
    #[error("Target not available.")]
    TargetUnavailable,
    #[error("Missing state: {0}")]
    MissingState(&'static str),
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("serialize error: {0}")]
    Serialize(String),
}

impl ProtocolError {
    /// The `error` frame reported back to the sender.
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::error(self.to_string())
    }
}

/// A parsed JSON object frame whose `type` has been extracted but whose
/// body has not been validated yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: String,
    body: Map<String, Value>,
}

impl Envelope {
    pub fn is_hello(&self) -> bool {
        self.kind == "hello"
    }

    /// Validate the body against the envelope's type.
    pub fn into_message(mut self) -> Result<ClientMessage, ProtocolError> {
        match self.kind.as_str() {
            "hello" => Ok(ClientMessage::Hello {
                token: string_field(&self.body, "token"),
            }),
            "offer" | "answer" | "ice" => {
                let kind = match self.kind.as_str() {
                    "offer" => SignalKind::Offer,
                    "answer" => SignalKind::Answer,
                    _ => SignalKind::Ice,
                };
                let to = string_field(&self.body, "to").ok_or(ProtocolError::MissingTarget)?;
                Ok(ClientMessage::Signal {
                    kind,
                    to,
                    sdp: self.body.remove("sdp"),
                    candidate: self.body.remove("candidate"),
                })
            },
            "mute" => state_message(StateKind::Mute, &mut self.body),
            "ptt" => state_message(StateKind::Ptt, &mut self.body),
            _ => Err(ProtocolError::UnknownType(self.kind)),
        }
    }
}

fn state_message(
    kind: StateKind,
    body: &mut Map<String, Value>,
) -> Result<ClientMessage, ProtocolError> {
    // An explicit `null` is still a present value.
    let value = body
        .remove(kind.field())
        .ok_or(ProtocolError::MissingState(kind.field()))?;
    Ok(ClientMessage::State { kind, value })
}

/// Read a field as a string, accepting JSON primitives in their textual form.
/// Missing, `null`, arrays and objects yield `None`.
fn string_field(body: &Map<String, Value>, key: &str) -> Option<String> {
    match body.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse a text frame into an [`Envelope`].
pub fn decode_envelope(text: &str) -> Result<Envelope, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::InvalidFormat)?;
    let Value::Object(body) = value else {
        return Err(ProtocolError::InvalidFormat);
    };
    let kind = string_field(&body, "type").ok_or(ProtocolError::MissingType)?;
    Ok(Envelope { kind, body })
}

/// Encode a `ServerMessage` as a JSON text frame.
pub fn encode_server_message(msg: &ServerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Serialize(e.to_string()))
}

/// Decode a JSON text frame into a `ServerMessage` (client side / tests).
pub fn decode_server_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    serde_json::from_str(text).map_err(|_| ProtocolError::InvalidFormat)
}
