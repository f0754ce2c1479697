//! Simulated-mode connector: a connectivity predicate plus a delay metric,
//! no network I/O at all.
//!
//! Grounded on the discover-then-send cycle in the RuFi platform's
//! `single_cycle` (subscribe to reachable neighbours, publish an export to
//! them), simplified to a direct predicate call since this connector is not
//! itself responsible for discovery protocol — just for deciding, given two
//! uids and a send time, whether and when a message arrives.

use std::collections::HashMap;

use fcpp_logging::Logger;

use crate::events::DropEvent;
use crate::mailbox::{Arrival, Mailbox};
use crate::{Connector, Time, TransportError, Uid};

/// Decides whether `from` can currently reach `to`.
pub trait Connectivity {
    fn connected(&self, from: Uid, to: Uid) -> bool;
}

impl<F: Fn(Uid, Uid) -> bool> Connectivity for F {
    fn connected(&self, from: Uid, to: Uid) -> bool {
        self(from, to)
    }
}

/// Gives the one-way propagation delay, in simulated time units, from `from`
/// to `to`. Called only for pairs `Connectivity` has already approved.
pub trait Metric {
    fn delay(&self, from: Uid, to: Uid) -> f64;
}

impl<F: Fn(Uid, Uid) -> f64> Metric for F {
    fn delay(&self, from: Uid, to: Uid) -> f64 {
        self(from, to)
    }
}

/// A zero-delay metric: every reachable neighbour receives instantly.
pub struct InstantDelivery;

impl Metric for InstantDelivery {
    fn delay(&self, _from: Uid, _to: Uid) -> f64 {
        0.0
    }
}

/// Delivers a broadcast to every registered device `connectivity` approves,
/// at `send_time + metric.delay(sender, recipient)`.
pub struct SimulatedConnector<C: Connectivity, M: Metric> {
    connectivity: C,
    metric: M,
    mailboxes: HashMap<Uid, Mailbox>,
    drop_log: Option<Logger<DropEvent>>,
}

impl<C: Connectivity, M: Metric> SimulatedConnector<C, M> {
    pub fn new(connectivity: C, metric: M) -> Self {
        SimulatedConnector { connectivity, metric, mailboxes: HashMap::new(), drop_log: None }
    }

    pub fn with_drop_log(mut self, logger: Logger<DropEvent>) -> Self {
        self.drop_log = Some(logger);
        self
    }

    /// All uids currently registered, for test assertions and diagnostics.
    pub fn participants(&self) -> Vec<Uid> {
        let mut uids: Vec<Uid> = self.mailboxes.keys().copied().collect();
        uids.sort_unstable();
        uids
    }
}

impl<C: Connectivity, M: Metric> Connector for SimulatedConnector<C, M> {
    fn register(&mut self, uid: Uid) {
        self.mailboxes.entry(uid).or_insert_with(Mailbox::new);
    }

    fn unregister(&mut self, uid: Uid) {
        self.mailboxes.remove(&uid);
    }

    fn broadcast(&self, sender: Uid, time: Time, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.mailboxes.contains_key(&sender) {
            return Err(TransportError::UnknownDevice(sender));
        }
        for (&uid, mailbox) in self.mailboxes.iter() {
            if uid == sender || !self.connectivity.connected(sender, uid) {
                continue;
            }
            let reception = time.advance(self.metric.delay(sender, uid));
            mailbox.push((sender, reception, payload.clone()));
        }
        Ok(())
    }

    fn drain(&self, receiver: Uid) -> Vec<Arrival> {
        match self.mailboxes.get(&receiver) {
            Some(mailbox) => mailbox.drain(),
            None => {
                if let Some(log) = &self.drop_log {
                    log.log(DropEvent { from: None, to: receiver, reason: "drain on unregistered device".into() });
                }
                Vec::new()
            }
        }
    }
}
