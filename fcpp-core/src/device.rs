//! `Device`: one node's state across its lifetime in the net.
//!
//! A device moves `Created -> Live -> Retired` exactly once each way,
//! mirroring the donor worker's own guarded lifecycle (`Worker::new` then
//! repeated `step()` until a `Wrapper`'s `Drop` tears it down). `Live` is the
//! only state in which rounds run; `round_start`/`round_end` bracket one
//! round the way `RoundVM::new`/its result bracket one in the reference.

use std::collections::BTreeMap;

use crate::context::Context;
use crate::export::{Export, WireValue};
use crate::round::RoundEngine;
use crate::{ProtocolError, Time, Uid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Created,
    Live,
    Retired,
}

/// A point in 2D space; devices need not be spatial, so this is optional.
pub type Position = (f64, f64);

/// One node in the net: its identity, its declared-variable storage, its
/// previous export, and the neighbourhood context it rebuilds each round.
pub struct Device {
    uid: Uid,
    state: DeviceState,
    position: Option<Position>,
    velocity: Option<Position>,
    storage: BTreeMap<String, WireValue>,
    prev_export: Export,
    context: Context,
    next_time: Option<Time>,
}

impl Device {
    pub fn new(uid: Uid, position: Option<Position>, start_time: Time) -> Self {
        Device {
            uid,
            state: DeviceState::Created,
            position,
            velocity: None,
            storage: BTreeMap::new(),
            prev_export: Export::empty(),
            context: Context::new(uid, Export::empty()),
            next_time: Some(start_time),
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    pub fn set_position(&mut self, position: Position) {
        self.position = Some(position);
    }

    pub fn velocity(&self) -> Option<Position> {
        self.velocity
    }

    pub fn set_velocity(&mut self, velocity: Position) {
        self.velocity = Some(velocity);
    }

    pub fn storage_tuple(&self) -> &BTreeMap<String, WireValue> {
        &self.storage
    }

    pub fn set_storage(&mut self, key: impl Into<String>, value: WireValue) {
        self.storage.insert(key.into(), value);
    }

    /// The time this device is next due to run a round, or `None` once
    /// retired.
    pub fn next_time(&self) -> Option<Time> {
        self.next_time
    }

    /// Advances the scheduler cursor by `delta` simulated time units.
    pub fn schedule_next(&mut self, now: Time, delta: f64) {
        self.next_time = Some(now.advance(delta));
    }

    pub fn activate(&mut self) {
        debug_assert_eq!(self.state, DeviceState::Created);
        self.state = DeviceState::Live;
    }

    pub fn retire(&mut self) {
        self.state = DeviceState::Retired;
        self.next_time = None;
    }

    /// Feeds one received envelope's decoded export into this device's
    /// context. Called by the net once per arrival before `round_start`.
    pub fn receive(&mut self, from: Uid, time: Time, payload: &[u8]) -> Result<(), ProtocolError> {
        let export = Export::decode(payload)?;
        self.context.insert(from, time, export);
        Ok(())
    }

    /// Begins a round at `now`: evicts context entries older than
    /// `retain_window`, binds the context's self-default to this device's
    /// previous export, and hands back a [`RoundEngine`] ready to run the
    /// program against it.
    pub fn round_start(&mut self, now: Time, retain_window: f64) -> RoundEngine {
        self.context.retain_window(now, retain_window);
        self.context.set_self_export(self.prev_export.clone());
        RoundEngine::new(self.context.clone())
    }

    /// Commits a round that ran to completion: the engine's context
    /// (possibly unchanged) becomes this device's context, and the sealed
    /// export becomes its previous export, returned pre-encoded for
    /// broadcast.
    pub fn round_commit(&mut self, context: Context, export: Export) -> Vec<u8> {
        self.context = context;
        let bytes = export.encode();
        self.prev_export = export;
        bytes
    }

    /// A round failed: per the failure model, the device's previous export
    /// is retained unchanged and nothing is (re)broadcast for this round.
    pub fn round_failed(&self) {}

    pub fn previous_export(&self) -> &Export {
        &self.prev_export
    }
}
