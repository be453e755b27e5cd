//! Shared wire protocol and presence types for the Parley signaling relay.

pub mod net;
pub mod presence;
