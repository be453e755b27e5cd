use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// World-space position of a player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Look orientation of a player, in the host game's units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

/// Narrow interface the host's tick loop uses to push presence into the
/// signaling room.
pub trait PresenceSink {
    fn is_user_connected(&self, user_id: Uuid) -> bool;

    /// Broadcast a position update for the user's connection.
    /// Returns false when the user has no live connection.
    fn send_position_update(&self, user_id: Uuid, position: Position) -> bool;

    /// Broadcast a rotation update for the user's connection.
    /// Returns false when the user has no live connection.
    fn send_rotation_update(&self, user_id: Uuid, rotation: Rotation) -> bool;
}

/// What a [`PresenceSample::flush`] call pushed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub position_sent: bool,
    pub rotation_sent: bool,
}

/// Per-player presence state owned by the host's tick collaborator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceSample {
    pub position: Option<Position>,
    pub rotation: Option<Rotation>,
    pub position_dirty: bool,
    pub rotation_dirty: bool,
    /// Seconds accumulated since the last periodic update.
    pub time_since_last_update: f32,
}

impl PresenceSample {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest sampled transform, marking whichever half changed.
    pub fn observe(&mut self, position: Position, rotation: Rotation) {
        if self.position != Some(position) {
            self.position = Some(position);
            self.position_dirty = true;
        }
        if self.rotation != Some(rotation) {
            self.rotation = Some(rotation);
            self.rotation_dirty = true;
        }
    }

    /// Accumulate `dt` seconds. Returns true (and resets the accumulator)
    /// once `interval` seconds have passed.
    pub fn advance(&mut self, dt: f32, interval: f32) -> bool {
        self.time_since_last_update += dt;
        if self.time_since_last_update >= interval {
            self.time_since_last_update = 0.0;
            true
        } else {
            false
        }
    }

    /// Push dirty state into the sink. Disconnected users have their dirty
    /// flags cleared without sending anything.
    pub fn flush<S: PresenceSink + ?Sized>(&mut self, sink: &S, user_id: Uuid) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();
        if !sink.is_user_connected(user_id) {
            self.position_dirty = false;
            self.rotation_dirty = false;
            return outcome;
        }

        if self.position_dirty
            && let Some(position) = self.position
        {
            outcome.position_sent = sink.send_position_update(user_id, position);
            self.position_dirty = false;
        }

        if self.rotation_dirty
            && let Some(rotation) = self.rotation
        {
            outcome.rotation_sent = sink.send_rotation_update(user_id, rotation);
            self.rotation_dirty = false;
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    struct RecordingSink {
        connected: bool,
        positions: RefCell<Vec<Position>>,
        rotations: RefCell<Vec<Rotation>>,
    }

    impl RecordingSink {
        fn new(connected: bool) -> Self {
            Self {
                connected,
                positions: RefCell::new(Vec::new()),
                rotations: RefCell::new(Vec::new()),
            }
        }
    }

    impl PresenceSink for RecordingSink {
        fn is_user_connected(&self, _user_id: Uuid) -> bool {
            self.connected
        }

        fn send_position_update(&self, _user_id: Uuid, position: Position) -> bool {
            self.positions.borrow_mut().push(position);
            true
        }

        fn send_rotation_update(&self, _user_id: Uuid, rotation: Rotation) -> bool {
            self.rotations.borrow_mut().push(rotation);
            true
        }
    }

    fn pos(x: f64) -> Position {
        Position { x, y: 64.0, z: 0.0 }
    }

    #[test]
    fn observe_marks_only_changed_halves() {
        let mut sample = PresenceSample::new();
        sample.observe(pos(1.0), Rotation::default());
        assert!(sample.position_dirty);
        assert!(sample.rotation_dirty);

        sample.position_dirty = false;
        sample.rotation_dirty = false;
        sample.observe(pos(2.0), Rotation::default());
        assert!(sample.position_dirty);
        assert!(!sample.rotation_dirty);
    }

    #[test]
    fn flush_sends_dirty_state_once() {
        let sink = RecordingSink::new(true);
        let user = Uuid::new_v4();
        let mut sample = PresenceSample::new();
        sample.observe(pos(1.0), Rotation::default());

        let outcome = sample.flush(&sink, user);
        assert!(outcome.position_sent);
        assert!(outcome.rotation_sent);

        let outcome = sample.flush(&sink, user);
        assert_eq!(outcome, FlushOutcome::default());
        assert_eq!(sink.positions.borrow().len(), 1);
        assert_eq!(sink.rotations.borrow().len(), 1);
    }

    #[test]
    fn flush_clears_dirty_when_disconnected() {
        let sink = RecordingSink::new(false);
        let mut sample = PresenceSample::new();
        sample.observe(pos(1.0), Rotation::default());

        let outcome = sample.flush(&sink, Uuid::new_v4());
        assert_eq!(outcome, FlushOutcome::default());
        assert!(!sample.position_dirty);
        assert!(!sample.rotation_dirty);
        assert!(sink.positions.borrow().is_empty());
    }

    #[test]
    fn advance_fires_at_interval() {
        let mut sample = PresenceSample::new();
        assert!(!sample.advance(0.05, 0.1));
        assert!(sample.advance(0.06, 0.1));
        assert_eq!(sample.time_since_last_update, 0.0);
    }
}
