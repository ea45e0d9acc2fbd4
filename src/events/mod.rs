//! Live event subscription to a companion server.
//!
//! [`source`] opens the raw byte stream, [`codec`] splits it into frames,
//! [`client`] runs the connection state machine with heartbeat detection and
//! reconnection, and [`bus`] fans decoded events out to collaborators.

pub mod bus;
pub mod client;
pub mod codec;
pub mod source;
