//! `Net`: the scheduler that drives every device's rounds.
//!
//! A single priority queue holds one pending event per active device,
//! keyed by `(time, uid)` ascending so ties resolve the same way on every
//! run regardless of hash-map iteration order — the reproducibility
//! property a `HashMap`-keyed queue could not give. `Sequential` runs one
//! device at a time; `Parallel` runs every device in the earliest time
//! group (widened by `epsilon`) concurrently for the compute phase (each
//! under its own device lock, mirroring how the donor's `Worker` instances
//! run independently of one another within a step, including `receive` and
//! `drain`, since a connector's `broadcast`/`drain` take `&self`), then
//! applies every resulting commit and reschedule back on the calling thread,
//! since only the scheduler queue and logger need a single writer.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use fcpp_logging::{Logger, Registry};
use fcpp_transport::Connector;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::device::{DeviceState, Position};
use crate::export::Export;
use crate::identifier::Identifier;
use crate::round::RoundEngine;
use crate::{ConfigError, Context, Invariant, RoundError, Time, Uid};

/// How a batch of simultaneously-due devices is executed.
#[derive(Debug, Clone, Copy)]
pub enum ExecutionMode {
    /// One device at a time, strict event order.
    Sequential,
    /// Every device due within `epsilon` of the earliest pending time runs
    /// its round body concurrently, capped at `max_workers` threads at once.
    Parallel { epsilon: f64, max_workers: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct NetConfig {
    /// Context entries older than this many simulated time units are
    /// evicted at the start of each round.
    pub retain_window: f64,
    /// How a failed round's device is rescheduled, since the program never
    /// got to report its own desired next-round delta.
    pub fallback_interval: f64,
    pub execution_mode: ExecutionMode,
}

impl NetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retain_window <= 0.0 {
            return Err(ConfigError::NonPositiveRetainWindow(self.retain_window));
        }
        if let ExecutionMode::Parallel { epsilon, .. } = self.execution_mode {
            if epsilon < 0.0 {
                return Err(ConfigError::NegativeEpsilon(epsilon));
            }
        }
        Ok(())
    }
}

/// A round faulted; logged and otherwise ignored by the net.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundFaultEvent {
    pub uid: Uid,
    pub time: f64,
    pub reason: String,
}

enum RoundOutcome {
    Completed { context: Context, export: Export, delta: f64 },
    /// A round-local failure: logged, previous export retained, device
    /// rescheduled at the fallback interval. Never aborts the net.
    Faulted(RoundError),
    /// A broken invariant. Propagated out of `step` to abort the net,
    /// since scheduling or alignment guarantees have already been violated.
    Invariant(Invariant),
    /// The device named by a popped event is no longer in the population
    /// (legitimately removed between being scheduled and running). Not a
    /// fault: nothing to log, nothing to reschedule.
    Skipped,
}

/// Drives every device's rounds against a [`Connector`] `C`.
pub struct Net<C: Connector> {
    identifier: Identifier,
    queue: BinaryHeap<Reverse<(Time, Uid)>>,
    connector: C,
    config: NetConfig,
    rng: SmallRng,
    fault_log: Option<Logger<RoundFaultEvent>>,
}

impl<C: Connector + Sync> Net<C> {
    pub fn new(config: NetConfig, connector: C, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Net {
            identifier: Identifier::new(),
            queue: BinaryHeap::new(),
            connector,
            config,
            rng: SmallRng::seed_from_u64(seed),
            fault_log: None,
        })
    }

    pub fn attach_logging(&mut self, registry: &mut Registry) {
        registry.insert::<RoundFaultEvent>("fcpp/round", Box::new(|_, _| {}));
        self.fault_log = registry.get::<RoundFaultEvent>("fcpp/round");
    }

    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn spawn_device(&mut self, uid: Uid, position: Option<Position>, start_time: Time) -> Result<(), ConfigError> {
        let handle = self.identifier.spawn(uid, position, start_time)?;
        handle.lock().unwrap_or_else(|e| e.into_inner()).activate();
        self.connector.register(uid);
        self.queue.push(Reverse((start_time, uid)));
        Ok(())
    }

    /// Retires and removes a device. Any event already popped off the queue
    /// for `uid` before this call completes still runs to completion, but
    /// `compute_one` will see `DeviceState::Retired` if the handle is still
    /// reachable, or simply find it gone from the population.
    pub fn remove_device(&mut self, uid: Uid) {
        if let Some(handle) = self.identifier.get(uid) {
            handle.lock().unwrap_or_else(|e| e.into_inner()).retire();
        }
        self.identifier.remove(uid);
        self.connector.unregister(uid);
    }

    pub fn population_size(&self) -> usize {
        self.identifier.len()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pops and runs the next due event (`Sequential`) or the whole
    /// earliest-time batch (`Parallel`), calling `program` once per device
    /// to run its round. `program` returns the simulated-time delta until
    /// that device's next round.
    ///
    /// Returns `Err` only when a device's round broke an invariant, in
    /// which case the net must be considered aborted: scheduling or
    /// alignment guarantees it exists to provide no longer hold.
    pub fn step<F>(&mut self, program: &F) -> Result<(), Invariant>
    where
        F: Fn(&mut RoundEngine, Uid) -> f64 + Sync,
    {
        let batch = self.pop_batch();
        if batch.is_empty() {
            return Ok(());
        }
        match self.config.execution_mode {
            ExecutionMode::Sequential => {
                for (time, uid) in batch {
                    let outcome = self.compute_one(time, uid, program);
                    self.apply_outcome(time, uid, outcome)?;
                }
            }
            ExecutionMode::Parallel { max_workers, .. } => {
                for chunk in batch.chunks(max_workers.max(1)) {
                    let results: Mutex<Vec<(Time, Uid, RoundOutcome)>> = Mutex::new(Vec::new());
                    {
                        let net: &Self = self;
                        std::thread::scope(|scope| {
                            for &(time, uid) in chunk {
                                let results = &results;
                                scope.spawn(move || {
                                    let outcome = net.compute_one(time, uid, program);
                                    results.lock().unwrap_or_else(|e| e.into_inner()).push((time, uid, outcome));
                                });
                            }
                        });
                    }
                    for (time, uid, outcome) in results.into_inner().unwrap_or_else(|e| e.into_inner()) {
                        self.apply_outcome(time, uid, outcome)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn pop_batch(&mut self) -> Vec<(Time, Uid)> {
        let Some(&Reverse((first_time, _))) = self.queue.peek() else {
            return Vec::new();
        };
        let widen = match self.config.execution_mode {
            ExecutionMode::Sequential => 0.0,
            ExecutionMode::Parallel { epsilon, .. } => epsilon,
        };
        let mut batch = Vec::new();
        while let Some(&Reverse((time, _))) = self.queue.peek() {
            if time.0 - first_time.0 > widen {
                break;
            }
            let Reverse(entry) = self.queue.pop().unwrap();
            batch.push(entry);
        }
        batch
    }

    /// Runs one device's round to completion (receive, `round_start`, the
    /// program, `finish`) without touching the connector's send side or the
    /// scheduler queue, so it can safely run from any thread that holds
    /// only that device's lock.
    fn compute_one<F>(&self, time: Time, uid: Uid, program: &F) -> RoundOutcome
    where
        F: Fn(&mut RoundEngine, Uid) -> f64,
    {
        let Some(handle) = self.identifier.get(uid) else {
            // Removed between being scheduled and running: a legitimate
            // race with `remove_device`, not a broken invariant.
            return RoundOutcome::Skipped;
        };
        let mut device = handle.lock().unwrap_or_else(|e| e.into_inner());
        if device.state() == DeviceState::Retired {
            return RoundOutcome::Invariant(Invariant::EventForRetiredDevice(uid));
        }
        for (from, recv_time, payload) in self.connector.drain(uid) {
            let _ = device.receive(from, recv_time, &payload);
        }
        let engine = device.round_start(time, self.config.retain_window);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let mut engine = engine;
            let delta = program(&mut engine, uid);
            (engine.finish(), delta)
        }));
        match result {
            Ok((Ok((context, export)), delta)) => RoundOutcome::Completed { context, export, delta },
            Ok((Err(invariant), _)) => RoundOutcome::Invariant(invariant),
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "round panicked".to_string());
                RoundOutcome::Faulted(RoundError::Panicked { uid, time: time.0, reason })
            }
        }
    }

    /// Applies one device's round outcome: broadcasts and reschedules on a
    /// completed round, logs and reschedules at the fallback interval on a
    /// recoverable fault, does nothing on a skip, and propagates a broken
    /// invariant so `step` can abort the net.
    fn apply_outcome(&mut self, time: Time, uid: Uid, outcome: RoundOutcome) -> Result<(), Invariant> {
        match outcome {
            RoundOutcome::Completed { context, export, delta } => {
                let Some(handle) = self.identifier.get(uid) else { return Ok(()) };
                let mut device = handle.lock().unwrap_or_else(|e| e.into_inner());
                let bytes = device.round_commit(context, export);
                let _ = self.connector.broadcast(uid, time, bytes);
                device.schedule_next(time, delta);
                if let Some(next) = device.next_time() {
                    self.queue.push(Reverse((next, uid)));
                }
                Ok(())
            }
            RoundOutcome::Faulted(fault) => {
                if let Some(log) = &self.fault_log {
                    log.log(RoundFaultEvent { uid, time: time.0, reason: fault.to_string() });
                }
                if let Some(handle) = self.identifier.get(uid) {
                    let mut device = handle.lock().unwrap_or_else(|e| e.into_inner());
                    device.round_failed();
                    device.schedule_next(time, self.config.fallback_interval);
                    if let Some(next) = device.next_time() {
                        self.queue.push(Reverse((next, uid)));
                    }
                }
                Ok(())
            }
            RoundOutcome::Invariant(invariant) => Err(invariant),
            RoundOutcome::Skipped => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use fcpp_transport::simulated::{InstantDelivery, SimulatedConnector};

    fn complete_graph(_a: Uid, _b: Uid) -> bool {
        true
    }

    fn sequential_config() -> NetConfig {
        NetConfig { retain_window: 1000.0, fallback_interval: 1.0, execution_mode: ExecutionMode::Sequential }
    }

    fn parallel_config() -> NetConfig {
        NetConfig {
            retain_window: 1000.0,
            fallback_interval: 1.0,
            execution_mode: ExecutionMode::Parallel { epsilon: 0.01, max_workers: 4 },
        }
    }

    fn gossip_min_program() -> impl Fn(&mut RoundEngine, Uid) -> f64 {
        move |engine: &mut RoundEngine, uid: Uid| -> f64 {
            let local: i64 = match uid {
                1 => 5,
                2 => 1,
                3 => 9,
                other => other as i64,
            };
            engine.share(local, |field| field.fold(i64::MAX, |acc, v| acc.min(*v))).unwrap();
            1.0
        }
    }

    #[test]
    fn gossip_min_converges_across_three_devices() {
        let connector = SimulatedConnector::new(complete_graph, InstantDelivery);
        let mut net = Net::new(sequential_config(), connector, 1).unwrap();
        net.spawn_device(1, None, Time::ZERO).unwrap();
        net.spawn_device(2, None, Time::ZERO).unwrap();
        net.spawn_device(3, None, Time::ZERO).unwrap();

        let program = gossip_min_program();
        for _ in 0..12 {
            net.step(&program).unwrap();
        }

        for uid in [1u32, 2, 3] {
            let handle = net.identifier().get(uid).unwrap();
            let device = handle.lock().unwrap();
            assert_eq!(device.previous_export().get::<i64>(0).unwrap(), Some(1));
        }
    }

    #[test]
    fn parallel_batch_reaches_the_same_fixed_point_as_sequential() {
        let seq_connector = SimulatedConnector::new(complete_graph, InstantDelivery);
        let mut seq_net = Net::new(sequential_config(), seq_connector, 7).unwrap();
        let par_connector = SimulatedConnector::new(complete_graph, InstantDelivery);
        let mut par_net = Net::new(parallel_config(), par_connector, 7).unwrap();

        for net in [&mut seq_net, &mut par_net] {
            net.spawn_device(1, None, Time::ZERO).unwrap();
            net.spawn_device(2, None, Time::ZERO).unwrap();
            net.spawn_device(3, None, Time::ZERO).unwrap();
        }

        let program = gossip_min_program();
        for _ in 0..12 {
            seq_net.step(&program).unwrap();
            par_net.step(&program).unwrap();
        }

        for uid in [1u32, 2, 3] {
            let seq_value = seq_net.identifier().get(uid).unwrap().lock().unwrap().previous_export().get::<i64>(0).unwrap();
            let par_value = par_net.identifier().get(uid).unwrap().lock().unwrap().previous_export().get::<i64>(0).unwrap();
            assert_eq!(seq_value, par_value);
            assert_eq!(seq_value, Some(1));
        }
    }

    #[test]
    fn branch_alignment_keeps_non_entering_device_unpolluted() {
        let connector = SimulatedConnector::new(complete_graph, InstantDelivery);
        let mut net = Net::new(sequential_config(), connector, 2).unwrap();
        net.spawn_device(1, None, Time::ZERO).unwrap();
        net.spawn_device(2, None, Time::ZERO).unwrap();

        let program = move |engine: &mut RoundEngine, uid: Uid| -> f64 {
            let enter = uid == 1;
            engine.branch(42, enter, |e| {
                e.share(0i64, |field| field.fold(0, |acc, v| acc + v)).unwrap();
            });
            1.0
        };

        net.step(&program).unwrap();

        let handle2 = net.identifier().get(2).unwrap();
        let device2 = handle2.lock().unwrap();
        assert!(device2.previous_export().is_empty(), "device 2 never entered the branch, so it wrote nothing");
    }

    #[test]
    fn context_eviction_drops_neighbors_outside_retain_window() {
        let connector = SimulatedConnector::new(complete_graph, InstantDelivery);
        let config = NetConfig { retain_window: 2.0, fallback_interval: 1.0, execution_mode: ExecutionMode::Sequential };
        let mut net = Net::new(config, connector, 3).unwrap();
        net.spawn_device(1, None, Time::ZERO).unwrap();

        let handle = net.identifier().get(1).unwrap();
        {
            let mut device = handle.lock().unwrap();
            let mut engine = device.round_start(Time::ZERO, config.retain_window);
            engine.context_mut().insert(99, Time(0.0), Export::empty());
            let (context, export) = engine.finish().unwrap();
            device.round_commit(context, export);
        }
        {
            let mut device = handle.lock().unwrap();
            let engine = device.round_start(Time(10.0), config.retain_window);
            assert_eq!(engine.context().neighbor_count(), 0, "stale neighbour evicted after exceeding retain_window");
        }
    }

    #[test]
    fn tie_break_prefers_smaller_uid() {
        let mut field = crate::field::Field::constant(5i64);
        field.set(10, 1);
        field.set(4, 1);
        assert_eq!(field.argmin_uid_by(1, |v| *v), 4);
    }

    /// The distance-gradient and collected-sum computations below are two
    /// distinct top-level `nbr` calls in the same round; each is wrapped in
    /// its own always-entered branch so it gets a trace distinct from the
    /// other, rather than both colliding on `ROOT_TRACE`.
    const DIST_TAG: u64 = 0xD157;
    const COLLECT_TAG: u64 = 0xC011EC7;

    fn trace_for(tag: u64) -> crate::trace::Trace {
        let mut stack = crate::trace::TraceStack::new();
        stack.push(tag);
        stack.current()
    }

    #[test]
    fn linear_chain_collects_toward_the_root() {
        // Three devices in a line: 0 -- 1 -- 2, with 0 as the sink (distance
        // 0 from itself). Each device keeps a distance-to-sink gradient and,
        // alongside it, a single-path sum collection: every device's
        // collected value is its own local contribution plus its children's
        // (neighbours strictly farther from the sink) latest collected
        // values. Device 1 contributes 3, device 2 contributes 4, so the
        // sink's collected value settles at 3 + 4 = 7.
        let connectivity = |a: Uid, b: Uid| (a as i64 - b as i64).abs() == 1;
        let connector = SimulatedConnector::new(connectivity, InstantDelivery);
        let mut net = Net::new(sequential_config(), connector, 9).unwrap();
        net.spawn_device(0, None, Time::ZERO).unwrap();
        net.spawn_device(1, None, Time::ZERO).unwrap();
        net.spawn_device(2, None, Time::ZERO).unwrap();

        let program = move |engine: &mut RoundEngine, uid: Uid| -> f64 {
            let local = match uid {
                0 => 0i64,
                1 => 3i64,
                2 => 4i64,
                _ => 0i64,
            };
            let init_dist = if uid == 0 { 0i64 } else { i64::MAX / 2 };

            let mut neighbor_dist: BTreeMap<Uid, i64> = BTreeMap::new();
            let dist = engine
                .branch(DIST_TAG, true, |e| {
                    e.nbr(init_dist, |field| {
                        for (&nuid, &v) in field.overrides() {
                            neighbor_dist.insert(nuid, v);
                        }
                        let own = *field.default_value();
                        let via_neighbors = field.overrides().values().map(|v| v + 1).min().unwrap_or(i64::MAX / 2);
                        own.min(via_neighbors)
                    })
                    .unwrap()
                })
                .unwrap();

            engine.branch(COLLECT_TAG, true, |e| {
                e.nbr(local, |field| {
                    let children_sum: i64 = field
                        .overrides()
                        .iter()
                        .filter(|(nuid, _)| neighbor_dist.get(*nuid).copied().unwrap_or(i64::MAX / 2) > dist)
                        .map(|(_, v)| *v)
                        .sum();
                    local + children_sum
                })
                .unwrap()
            });

            1.0
        };

        for _ in 0..8 {
            net.step(&program).unwrap();
        }

        let handle0 = net.identifier().get(0).unwrap();
        let device0 = handle0.lock().unwrap();
        let collected = device0.previous_export().get::<i64>(trace_for(COLLECT_TAG)).unwrap();
        assert_eq!(collected, Some(7), "single-path collection with sum accumulator settles at 3 + 4");
    }
}
