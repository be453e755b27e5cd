use std::sync::Arc;

use uuid::Uuid;

use parley_core::net::messages::{
    ClientMessage, ConnectionId, PeerMsg, ServerMessage, SignalKind, SignalMsg, WelcomeMsg,
};
use parley_core::net::protocol::{Envelope, ProtocolError, decode_envelope};
use serde_json::Value;

use crate::room::{PeerHandle, Room, RoomError};
use crate::tokens::TokenStore;

/// Where a connection is in its lifecycle.
enum Session {
    Unauthenticated,
    Authenticated {
        connection_id: ConnectionId,
        user_id: Uuid,
    },
    Closed,
}

/// Per-connection protocol state machine.
///
/// Transport-agnostic: frames arrive through [`handle_text`](Self::handle_text)
/// and every reply, including errors, leaves through the connection's own
/// [`PeerHandle`] so it is ordered with relayed traffic.
pub struct ConnectionHandler {
    room: Arc<Room>,
    tokens: Arc<TokenStore>,
    peer: PeerHandle,
    session: Session,
}

impl ConnectionHandler {
    pub fn new(room: Arc<Room>, tokens: Arc<TokenStore>, peer: PeerHandle) -> Self {
        Self {
            room,
            tokens,
            peer,
            session: Session::Unauthenticated,
        }
    }

    pub fn connection_id(&self) -> Option<&str> {
        match &self.session {
            Session::Authenticated { connection_id, .. } => Some(connection_id),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.session, Session::Authenticated { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.session, Session::Closed)
    }

    /// Process one inbound text frame.
    pub fn handle_text(&mut self, text: &str) {
        let from = match &self.session {
            Session::Closed => return,
            Session::Unauthenticated => None,
            Session::Authenticated { connection_id, .. } => Some(connection_id.clone()),
        };

        let envelope = match decode_envelope(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.reply_error(&e);
                return;
            },
        };

        let result = match from {
            None if envelope.is_hello() => {
                self.handle_hello(envelope);
                Ok(())
            },
            None => Err(ProtocolError::AuthenticationRequired),
            Some(from) => self.handle_signaling(from, envelope),
        };

        if let Err(e) = result {
            self.reply_error(&e);
        }
    }

    fn handle_hello(&mut self, envelope: Envelope) {
        let token = match envelope.into_message() {
            Ok(ClientMessage::Hello { token }) => token,
            _ => None,
        };

        let Some(user_id) = self.tokens.consume_token_for_user(token.as_deref()) else {
            self.reply_error(&ProtocolError::InvalidToken);
            return;
        };

        let connection_id = Uuid::new_v4().simple().to_string();
        let user_name = self.tokens.user_name(user_id).unwrap_or_default();
        // Welcome is queued inside the join so no broadcast can overtake it.
        let joined = self.room.join_with_greeting(
            user_id,
            connection_id.clone(),
            self.peer.clone(),
            |peers| {
                ServerMessage::Welcome(WelcomeMsg {
                    id: connection_id.clone(),
                    user_name: user_name.clone(),
                    peers: peers.to_vec(),
                })
            },
        );
        if let Err(RoomError::AlreadyConnected(_)) = joined {
            tracing::debug!(user_id = %user_id, "Rejected duplicate voice connection");
            self.reply_error(&ProtocolError::AlreadyConnected);
            return;
        }

        tracing::info!(
            user_name = %user_name,
            user_id = %user_id,
            connection_id = %connection_id,
            "Voice client connected"
        );

        self.room.broadcast(
            &ServerMessage::PeerJoin(PeerMsg {
                id: connection_id.clone(),
            }),
            Some(&connection_id),
        );
        self.session = Session::Authenticated {
            connection_id,
            user_id,
        };
    }

    fn handle_signaling(&self, from: ConnectionId, envelope: Envelope) -> Result<(), ProtocolError> {
        // A repeated hello is not part of the authenticated vocabulary.
        if envelope.is_hello() {
            return Err(ProtocolError::UnknownType(envelope.kind));
        }
        match envelope.into_message()? {
            ClientMessage::Signal {
                kind,
                to,
                sdp,
                candidate,
            } => self.relay(kind, from, &to, sdp, candidate),
            ClientMessage::State { kind, value } => {
                self.room.broadcast_state(kind, &from, value);
                Ok(())
            },
            ClientMessage::Hello { .. } => Err(ProtocolError::UnknownType("hello".to_string())),
        }
    }

    fn relay(
        &self,
        kind: SignalKind,
        from: ConnectionId,
        to: &str,
        sdp: Option<Value>,
        candidate: Option<Value>,
    ) -> Result<(), ProtocolError> {
        let msg = ServerMessage::signal(
            kind,
            SignalMsg {
                from,
                sdp,
                candidate,
            },
        );
        if self.room.send_to(to, &msg) {
            Ok(())
        } else {
            tracing::debug!(target_id = %to, kind = kind.as_str(), "Relay target unavailable");
            Err(ProtocolError::TargetUnavailable)
        }
    }

    fn reply_error(&self, e: &ProtocolError) {
        self.peer.send(&e.to_message());
    }

    /// Leave the room and tell the remaining peers. Safe to call repeatedly.
    pub fn close(&mut self) {
        let session = std::mem::replace(&mut self.session, Session::Closed);
        if let Session::Authenticated {
            connection_id,
            user_id,
        } = session
        {
            self.room.remove(&connection_id);
            self.room.broadcast(
                &ServerMessage::PeerLeave(PeerMsg {
                    id: connection_id.clone(),
                }),
                Some(&connection_id),
            );
            tracing::info!(
                user_id = %user_id,
                connection_id = %connection_id,
                "Voice client disconnected"
            );
        }
    }
}
