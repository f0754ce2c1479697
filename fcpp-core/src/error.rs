//! The core's own error kinds, mirroring the taxonomy in `fcpp-transport`:
//! a config error and an invariant violation are the only two that ever
//! leave this crate uncaught; a round error is logged, the device's prior
//! export is retained, and it is rescheduled.

use thiserror::Error;

use crate::Uid;

/// A problem discovered before or while building a net, never during a
/// round in progress.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("retain window must be positive, got {0}")]
    NonPositiveRetainWindow(f64),

    #[error("duplicate uid {0} at net construction")]
    DuplicateUid(Uid),

    #[error("parallel batch epsilon must be non-negative, got {0}")]
    NegativeEpsilon(f64),
}

/// A single device's round failed to complete. The net logs it, keeps that
/// device's previous export as its export for this round, and reschedules
/// the device for its next event as if the round had succeeded.
#[derive(Debug, Error)]
pub enum RoundError {
    #[error("device {uid} round at time {time} panicked: {reason}")]
    Panicked { uid: Uid, time: f64, reason: String },

    #[error("device {uid} round at time {time} failed: {reason}")]
    Failed { uid: Uid, time: f64, reason: String },
}

/// A broken invariant. Unlike `RoundError`, this aborts the net: the
/// condition it signals means scheduling or alignment guarantees the engine
/// exists to provide have already been violated.
#[derive(Debug, Error)]
pub enum Invariant {
    #[error("trace stack popped with no matching push")]
    TraceStackUnderflow,

    #[error("trace stack non-empty ({0} frame(s)) at round end")]
    TraceStackLeaked(usize),

    #[error("self uid {0} appeared more than once in a field's neighbour table")]
    DuplicateSelfOverride(Uid),

    #[error("event queue yielded event for retired device {0}")]
    EventForRetiredDevice(Uid),
}
