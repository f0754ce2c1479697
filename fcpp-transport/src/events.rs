//! Event structs logged by this crate through `fcpp-logging`'s `Registry`.
//!
//! Mirrors the donor's convention of small, derive-heavy event structs fed
//! to a named stream (there: `OperatesEvent`, `ChannelsEvent`; here:
//! `SendRetryEvent`, `DropEvent`) — a struct per distinct occurrence, no
//! shared enum, so a subscriber interested in one kind can ask for exactly
//! that stream's type.

use serde::{Deserialize, Serialize};

use crate::Uid;

/// A send attempt that failed and is being retried (real mode only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRetryEvent {
    pub from: Uid,
    pub to: Uid,
    pub attempt: u32,
    pub backoff_millis: u64,
}

/// An envelope dropped rather than delivered: undeliverable after retries,
/// or malformed on arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropEvent {
    pub from: Option<Uid>,
    pub to: Uid,
    pub reason: String,
}
