//! The relay engine: per-port listeners, outbound connector, and the
//! connection-pair relay that shuttles bytes between an accepted inbound
//! connection and a dialed outbound connection.
//!
//! Cancellation is hierarchical. The process-wide shutdown channel is
//! subscribed by every port pipeline; each pipeline hands a receiver to the
//! relay pairs it spawns, and each pair owns its own cancel channel that its
//! four pumps select on. Cancelling a scope unblocks any pump pending on
//! socket or queue I/O, and the scope owner closes the sockets by dropping
//! them once all of its tasks have joined.

pub mod connector;
pub mod listener;
pub mod pair;
pub mod pump;
pub mod supervisor;

/// Read buffer size for relay pumps.
pub(crate) const CHUNK_SIZE: usize = 4096;
