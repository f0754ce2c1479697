//! Connector/transceiver layer: moves serialised exports between devices.
//!
//! This crate knows nothing about traces, fields, or contexts — it moves
//! opaque byte payloads between numbered endpoints, under either a
//! simulated connectivity model or a real radio. The aggregate-computation
//! engine (`fcpp-core`) serialises an export's payload on one side and
//! decodes the bytes it receives back into one on the other.

pub mod envelope;
pub mod error;
pub mod events;
pub mod mailbox;
pub mod real;
pub mod simulated;

pub use envelope::Envelope;
pub use error::{ProtocolError, TransportError};
pub use mailbox::Mailbox;

use std::cmp::Ordering;

/// A device identifier. Stable and unique within one net.
pub type Uid = u32;

/// Simulated time, in abstract time units since net start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Time(pub f64);

impl Time {
    /// The zero instant.
    pub const ZERO: Time = Time(0.0);

    /// The time `delta` units after this one.
    pub fn advance(self, delta: f64) -> Time {
        Time(self.0 + delta)
    }
}

impl Eq for Time {}

impl PartialOrd for Time {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Time {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// A connector delivers serialised exports between devices, under either a
/// simulated connectivity model ([`simulated::SimulatedConnector`]) or a
/// real radio ([`real::RealConnector`]).
///
/// Callers register a device before it can send or receive, broadcast a
/// sealed export's bytes at the end of a round, and drain whatever has
/// arrived for a device since the last drain.
///
/// `register`/`unregister` take `&mut self`, since they are only ever called
/// from the net's single setup/teardown thread. `broadcast`/`drain` take
/// `&self` and rely on interior mutability (a per-device [`Mailbox`], itself
/// `Mutex`-backed) so a parallel-batch round can call them concurrently for
/// different devices without the net needing to serialise on the connector.
pub trait Connector {
    /// Registers a device as a participant. Must be called before
    /// `broadcast` or `drain` are used for `uid`.
    fn register(&mut self, uid: Uid);

    /// Removes a device. Pending mail addressed to it is dropped.
    fn unregister(&mut self, uid: Uid);

    /// Offers `payload`, sent by `sender` at `time`, to every device the
    /// connector considers reachable from `sender`.
    fn broadcast(&self, sender: Uid, time: Time, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Drains and returns everything that has arrived for `receiver` so far.
    fn drain(&self, receiver: Uid) -> Vec<(Uid, Time, Vec<u8>)>;
}
