use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use axum::extract::ws::Utf8Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use parley_core::net::messages::{
    ConnectionId, PositionMsg, RotationMsg, ServerMessage, StateKind,
};
use parley_core::net::protocol::encode_server_message;
use parley_core::presence::{Position, PresenceSink, Rotation};

/// Outbound side of a live WebSocket session.
///
/// Frames go through a bounded channel drained by the session's writer task;
/// a full or closed channel means the peer is not writable. `close` asks the
/// session to shut down through its normal close path.
#[derive(Clone, Debug)]
pub struct PeerHandle {
    tx: mpsc::Sender<Utf8Bytes>,
    closer: CancellationToken,
}

impl PeerHandle {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Utf8Bytes>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                tx,
                closer: CancellationToken::new(),
            },
            rx,
        )
    }

    pub fn is_active(&self) -> bool {
        !self.tx.is_closed() && !self.closer.is_cancelled()
    }

    /// Queue a text frame without waiting. Returns false if the peer is
    /// closed or its buffer is full.
    pub fn try_send(&self, frame: Utf8Bytes) -> bool {
        self.is_active() && self.tx.try_send(frame).is_ok()
    }

    /// Encode and queue a message for this peer only.
    pub fn send(&self, msg: &ServerMessage) -> bool {
        match encode_server_message(msg) {
            Ok(text) => self.try_send(text.into()),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode server message");
                false
            },
        }
    }

    pub fn close(&self) {
        self.closer.cancel();
    }

    /// Resolves once `close` has been called on any clone of this handle.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closer.cancelled()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("user {0} already has a live voice connection")]
    AlreadyConnected(Uuid),
}

struct PeerEntry {
    user_id: Uuid,
    handle: PeerHandle,
}

/// connection id → (user, transport) and user → connection id.
/// Only mutated through `Room` so the two sides stay in step.
#[derive(Default)]
struct RoomIndex {
    peers: HashMap<ConnectionId, PeerEntry>,
    by_user: HashMap<Uuid, ConnectionId>,
}

impl RoomIndex {
    fn insert(&mut self, user_id: Uuid, connection_id: ConnectionId, handle: PeerHandle) {
        if let Some(previous) = self.by_user.insert(user_id, connection_id.clone())
            && previous != connection_id
            && let Some(evicted) = self.peers.remove(&previous)
        {
            tracing::debug!(user_id = %user_id, connection_id = %previous, "Evicting replaced connection");
            evicted.handle.close();
        }
        self.peers
            .insert(connection_id, PeerEntry { user_id, handle });
    }

    fn remove(&mut self, connection_id: &str) -> Option<Uuid> {
        let entry = self.peers.remove(connection_id)?;
        if self
            .by_user
            .get(&entry.user_id)
            .is_some_and(|current| current == connection_id)
        {
            self.by_user.remove(&entry.user_id);
        }
        Some(entry.user_id)
    }
}

/// The single global voice room: every authenticated connection is a peer.
#[derive(Default)]
pub struct Room {
    index: RwLock<RoomIndex>,
}

impl Room {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RoomIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RoomIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a connection into every index. The caller is expected to have
    /// checked `is_user_connected` first; a connection already held by the
    /// same user is dropped from the room and told to close.
    pub fn register(&self, user_id: Uuid, connection_id: ConnectionId, handle: PeerHandle) {
        self.write().insert(user_id, connection_id, handle);
    }

    /// Check-and-register in one step. On success returns the ids of the
    /// peers that were present before this connection joined.
    pub fn join(
        &self,
        user_id: Uuid,
        connection_id: ConnectionId,
        handle: PeerHandle,
    ) -> Result<Vec<ConnectionId>, RoomError> {
        self.admit(user_id, connection_id, handle, |_| None)
    }

    /// Like [`join`](Self::join), but queues `greeting` on the new handle
    /// before the connection is visible to broadcasts, so it is the first
    /// frame that connection receives.
    pub fn join_with_greeting(
        &self,
        user_id: Uuid,
        connection_id: ConnectionId,
        handle: PeerHandle,
        greeting: impl FnOnce(&[ConnectionId]) -> ServerMessage,
    ) -> Result<Vec<ConnectionId>, RoomError> {
        self.admit(user_id, connection_id, handle, |peers| Some(greeting(peers)))
    }

    fn admit(
        &self,
        user_id: Uuid,
        connection_id: ConnectionId,
        handle: PeerHandle,
        greeting: impl FnOnce(&[ConnectionId]) -> Option<ServerMessage>,
    ) -> Result<Vec<ConnectionId>, RoomError> {
        let mut index = self.write();
        if index.by_user.contains_key(&user_id) {
            return Err(RoomError::AlreadyConnected(user_id));
        }
        let peers: Vec<ConnectionId> = index.peers.keys().cloned().collect();
        if let Some(msg) = greeting(&peers) {
            handle.send(&msg);
        }
        index.insert(user_id, connection_id, handle);
        Ok(peers)
    }

    /// Drop a connection from every index. Calling it twice is harmless.
    pub fn remove(&self, connection_id: &str) -> Option<Uuid> {
        self.write().remove(connection_id)
    }

    pub fn is_user_connected(&self, user_id: Uuid) -> bool {
        self.read().by_user.contains_key(&user_id)
    }

    pub fn connection_id_for(&self, user_id: Uuid) -> Option<ConnectionId> {
        self.read().by_user.get(&user_id).cloned()
    }

    /// Ask the user's live session to close. Its close path removes it from
    /// the room and notifies the other peers. Stale index entries with no
    /// transport are cleared directly.
    pub fn disconnect_user(&self, user_id: Uuid) -> bool {
        let mut index = self.write();
        let Some(connection_id) = index.by_user.get(&user_id).cloned() else {
            return false;
        };
        match index.peers.get(&connection_id) {
            Some(entry) => entry.handle.close(),
            None => {
                index.by_user.remove(&user_id);
            },
        }
        true
    }

    /// Deliver to exactly one connection. Returns false if it is absent or
    /// not writable.
    pub fn send_to(&self, connection_id: &str, msg: &ServerMessage) -> bool {
        let index = self.read();
        let Some(entry) = index.peers.get(connection_id) else {
            return false;
        };
        entry.handle.send(msg)
    }

    /// Best-effort delivery to every live connection except `exclude`.
    /// Dead or saturated peers are skipped; their own close path cleans up.
    pub fn broadcast(&self, msg: &ServerMessage, exclude: Option<&str>) {
        let frame: Utf8Bytes = match encode_server_message(msg) {
            Ok(text) => text.into(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode broadcast");
                return;
            },
        };
        let index = self.read();
        for (id, entry) in &index.peers {
            if exclude == Some(id.as_str()) {
                continue;
            }
            if !entry.handle.try_send(frame.clone()) {
                tracing::trace!(connection_id = %id, "Skipped unwritable peer");
            }
        }
    }

    /// Fan a mute/ptt toggle out to everyone but the sender.
    pub fn broadcast_state(&self, kind: StateKind, connection_id: &str, value: Value) {
        let msg = ServerMessage::state(kind, connection_id.to_string(), value);
        self.broadcast(&msg, Some(connection_id));
    }

    pub fn peer_ids_snapshot(&self) -> Vec<ConnectionId> {
        self.read().peers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().peers.is_empty()
    }
}

impl PresenceSink for Room {
    fn is_user_connected(&self, user_id: Uuid) -> bool {
        Room::is_user_connected(self, user_id)
    }

    fn send_position_update(&self, user_id: Uuid, position: Position) -> bool {
        let Some(id) = self.connection_id_for(user_id) else {
            return false;
        };
        self.broadcast(&ServerMessage::Position(PositionMsg { id, position }), None);
        true
    }

    fn send_rotation_update(&self, user_id: Uuid, rotation: Rotation) -> bool {
        let Some(id) = self.connection_id_for(user_id) else {
            return false;
        };
        self.broadcast(&ServerMessage::Rotation(RotationMsg { id, rotation }), None);
        true
    }
}
