use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::presence::{Position, Rotation};

/// Opaque per-session identifier assigned after a successful `hello`.
pub type ConnectionId = String;

/// Which WebRTC signal a relayed message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    Ice,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Ice => "ice",
        }
    }
}

/// Peer state toggles that are fanned out to everyone else in the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Mute,
    Ptt,
}

impl StateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mute => "mute",
            Self::Ptt => "ptt",
        }
    }

    /// Name of the payload field carrying the state value.
    pub fn field(self) -> &'static str {
        match self {
            Self::Mute => "muted",
            Self::Ptt => "active",
        }
    }
}

/// A client frame after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Hello {
        token: Option<String>,
    },
    Signal {
        kind: SignalKind,
        to: ConnectionId,
        sdp: Option<Value>,
        candidate: Option<Value>,
    },
    State {
        kind: StateKind,
        value: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomeMsg {
    pub id: ConnectionId,
    #[serde(rename = "userName")]
    pub user_name: String,
    pub peers: Vec<ConnectionId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMsg {
    pub id: ConnectionId,
}

/// Relayed offer/answer/ice. Only the fields the sender supplied are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMsg {
    pub from: ConnectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuteMsg {
    pub id: ConnectionId,
    pub muted: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PttMsg {
    pub id: ConnectionId,
    pub active: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionMsg {
    pub id: ConnectionId,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationMsg {
    pub id: ConnectionId,
    pub rotation: Rotation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub message: String,
}

/// Messages sent from the server to browser clients, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Welcome(WelcomeMsg),
    PeerJoin(PeerMsg),
    PeerLeave(PeerMsg),
    Offer(SignalMsg),
    Answer(SignalMsg),
    Ice(SignalMsg),
    Mute(MuteMsg),
    Ptt(PttMsg),
    Position(PositionMsg),
    Rotation(RotationMsg),
    Error(ErrorMsg),
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorMsg {
            message: message.into(),
        })
    }

    pub fn signal(kind: SignalKind, msg: SignalMsg) -> Self {
        match kind {
            SignalKind::Offer => Self::Offer(msg),
            SignalKind::Answer => Self::Answer(msg),
            SignalKind::Ice => Self::Ice(msg),
        }
    }

    pub fn state(kind: StateKind, id: ConnectionId, value: Value) -> Self {
        match kind {
            StateKind::Mute => Self::Mute(MuteMsg { id, muted: value }),
            StateKind::Ptt => Self::Ptt(PttMsg { id, active: value }),
        }
    }
}
