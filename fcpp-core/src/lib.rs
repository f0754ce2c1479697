//! Field calculus: every device in a net runs the same program each round,
//! exchanging the values it writes with its neighbours and aligning itself
//! with them along the call tree the program traces out.
//!
//! The code is organized the way the donor dataflow engine organizes itself:
//! modules that depend on as little of each other as possible, each owning
//! one concern.
//!
//! **Trace alignment**: [`trace`] gives every `old`/`nbr`/`share` call site a
//! deterministic fingerprint of its position in the call tree, the way a
//! dataflow operator's path distinguishes it from its siblings.
//!
//! **Fields**: [`field`] is the neighbour-indexed value a device computes
//! over: a default plus sparse per-neighbour overrides.
//!
//! **Exchange**: [`export`] is what a device actually serialises and
//! broadcasts each round — a trace-keyed map of the values worth sharing.
//! [`context`] is the matching receive side: the most recent export heard
//! from each neighbour, windowed by recency.
//!
//! **Execution**: [`round`] drives one device through one round of a
//! program against its [`context::Context`], exposing `old`/`nbr`/`share`/
//! `branch`. [`device`] owns a device's identity and state across rounds.
//! [`identifier`] owns the population. [`net`] is the scheduler that drives
//! every device's rounds, sequentially or in parallel batches.
//!
//! # Examples
//!
//! A three-device gossip that converges on the minimum value any device
//! holds:
//!
//! ```
//! use fcpp_core::{Net, NetConfig, ExecutionMode, RoundEngine, Time, Uid};
//! use fcpp_transport::simulated::{InstantDelivery, SimulatedConnector};
//!
//! let connector = SimulatedConnector::new(|_a: Uid, _b: Uid| true, InstantDelivery);
//! let config = NetConfig {
//!     retain_window: 1000.0,
//!     fallback_interval: 1.0,
//!     execution_mode: ExecutionMode::Sequential,
//! };
//! let mut net = Net::new(config, connector, 0).unwrap();
//! net.spawn_device(1, None, Time::ZERO).unwrap();
//! net.spawn_device(2, None, Time::ZERO).unwrap();
//!
//! let program = |engine: &mut RoundEngine, uid: Uid| -> f64 {
//!     let local = if uid == 1 { 5i64 } else { 1i64 };
//!     engine.share(local, |field| field.fold(i64::MAX, |acc, v| acc.min(*v))).unwrap();
//!     1.0
//! };
//! for _ in 0..4 {
//!     net.step(&program).unwrap();
//! }
//! ```

pub mod context;
pub mod device;
pub mod error;
pub mod export;
pub mod field;
pub mod net;
pub mod identifier;
pub mod round;
pub mod trace;

pub use context::Context;
pub use device::{Device, DeviceState, Position};
pub use error::{ConfigError, Invariant, RoundError};
pub use export::{AggregateValue, Export, ExportBuilder, WireValue};
pub use field::Field;
pub use identifier::{DeviceHandle, Identifier};
pub use net::{ExecutionMode, Net, NetConfig, RoundFaultEvent};
pub use round::RoundEngine;
pub use trace::{ScopedFrame, Trace, TraceStack, ROOT_TRACE};

pub use fcpp_transport::{Connector, ProtocolError, Time, TransportError, Uid};
