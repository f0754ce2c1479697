//! The transport layer's two error kinds.
//!
//! Both are counted and reported, never fatal to the net: a failed send is
//! retried or dropped per the connector's own policy, and a malformed
//! envelope is dropped at the point it was about to be queued for decoding.

use thiserror::Error;

use crate::Uid;

/// A failure to move bytes between devices.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device {0} is not registered with this connector")]
    UnknownDevice(Uid),

    #[error("send from {from} to {to} failed after {attempts} attempt(s): {reason}")]
    SendFailed { from: Uid, to: Uid, attempts: u32, reason: String },

    #[error("encoding envelope from {0} failed: {1}")]
    Encode(Uid, #[source] std::io::Error),
}

/// A malformed or undecodable envelope, encountered on the receiving side.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("envelope from {sender:?} could not be parsed: {reason}")]
    Malformed { sender: Option<Uid>, reason: String },

    #[error("payload entry for trace {trace} declared type tag {declared}, expected {expected}")]
    TypeTagMismatch { trace: u64, declared: u8, expected: u8 },

    #[error("payload entry for trace {0} failed to decode: {1}")]
    Undecodable(u64, String),
}
