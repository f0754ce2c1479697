//! Real-mode connector: a background worker drives an actual radio with
//! retry-and-backoff sends, grounded on the donor's `start_connections`
//! connect-retry-with-sleep loop (`communication/src/networking.rs`),
//! adapted from one-shot TCP connect to per-message send.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fcpp_logging::Logger;
use rand::Rng;

use crate::envelope::Envelope;
use crate::events::{DropEvent, SendRetryEvent};
use crate::mailbox::{Arrival, Mailbox};
use crate::{Connector, Time, TransportError, Uid};

/// The physical (or emulated-physical) send/receive primitive a
/// `RealConnector` drives. Implementations are responsible for their own
/// addressing; `to`/`from` here are FCPP uids, which the radio is assumed
/// to know how to map to link-layer addresses.
pub trait Radio: Send + Sync + 'static {
    /// Attempts one send. Returns whether it was accepted by the link layer
    /// (not whether the peer received it — this layer cannot know that).
    fn send(&self, to: Uid, bytes: &[u8]) -> bool;

    /// Non-blocking poll for one inbound frame, if any has arrived. The
    /// returned `Uid` is the local device the frame was addressed to, not
    /// its sender — the sender is recovered by decoding the envelope.
    fn try_recv(&self) -> Option<(Uid, Vec<u8>)>;
}

/// Retry policy for real-mode sends.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { max_attempts: 3, base_backoff: Duration::from_millis(20) }
    }
}

struct Shared {
    mailboxes: Mutex<Vec<(Uid, Mailbox)>>,
}

impl Shared {
    fn mailbox_for(&self, uid: Uid) -> Option<Mailbox> {
        self.mailboxes.lock().unwrap_or_else(|e| e.into_inner()).iter().find(|(u, _)| *u == uid).map(|(_, m)| m.clone())
    }
}

/// A connector backed by a real [`Radio`], with a background thread pumping
/// `try_recv` into per-device mailboxes and an explicit retry-with-backoff
/// send path.
pub struct RealConnector<R: Radio> {
    radio: Arc<R>,
    shared: Arc<Shared>,
    policy: RetryPolicy,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    retry_log: Option<Logger<SendRetryEvent>>,
    drop_log: Option<Logger<DropEvent>>,
}

impl<R: Radio> RealConnector<R> {
    pub fn new(radio: R, policy: RetryPolicy) -> Self {
        let radio = Arc::new(radio);
        let shared = Arc::new(Shared { mailboxes: Mutex::new(Vec::new()) });
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let radio = Arc::clone(&radio);
            let shared = Arc::clone(&shared);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    match radio.try_recv() {
                        Some((to, bytes)) => {
                            if let Ok(env) = Envelope::decode(&bytes, true) {
                                if let Some(mailbox) = shared.mailbox_for(to) {
                                    mailbox.push((env.sender_uid, env.send_time, env.payload));
                                }
                            }
                        }
                        None => thread::sleep(Duration::from_millis(1)),
                    }
                }
            })
        };

        RealConnector { radio, shared, policy, stop, worker: Some(worker), retry_log: None, drop_log: None }
    }

    pub fn with_retry_log(mut self, logger: Logger<SendRetryEvent>) -> Self {
        self.retry_log = Some(logger);
        self
    }

    pub fn with_drop_log(mut self, logger: Logger<DropEvent>) -> Self {
        self.drop_log = Some(logger);
        self
    }

    fn send_with_retry(&self, from: Uid, to: Uid, bytes: &[u8]) -> Result<(), TransportError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if self.radio.send(to, bytes) {
                return Ok(());
            }
            if attempt >= self.policy.max_attempts {
                if let Some(log) = &self.drop_log {
                    log.log(DropEvent { from: Some(from), to, reason: "retries exhausted".into() });
                }
                return Err(TransportError::SendFailed {
                    from,
                    to,
                    attempts: attempt,
                    reason: "radio rejected send".into(),
                });
            }
            let jitter_millis = rand::thread_rng().gen_range(0..=10);
            let backoff = self.policy.base_backoff * attempt + Duration::from_millis(jitter_millis);
            if let Some(log) = &self.retry_log {
                log.log(SendRetryEvent { from, to, attempt, backoff_millis: backoff.as_millis() as u64 });
            }
            thread::sleep(backoff);
        }
    }
}

impl<R: Radio> Connector for RealConnector<R> {
    fn register(&mut self, uid: Uid) {
        let mut mailboxes = self.shared.mailboxes.lock().unwrap_or_else(|e| e.into_inner());
        if !mailboxes.iter().any(|(u, _)| *u == uid) {
            mailboxes.push((uid, Mailbox::new()));
        }
    }

    fn unregister(&mut self, uid: Uid) {
        let mut mailboxes = self.shared.mailboxes.lock().unwrap_or_else(|e| e.into_inner());
        mailboxes.retain(|(u, _)| *u != uid);
    }

    fn broadcast(&self, sender: Uid, time: Time, payload: Vec<u8>) -> Result<(), TransportError> {
        let peers: Vec<Uid> = {
            let mailboxes = self.shared.mailboxes.lock().unwrap_or_else(|e| e.into_inner());
            mailboxes.iter().map(|(u, _)| *u).filter(|&u| u != sender).collect()
        };
        let env = Envelope::new(sender, time, payload).with_delay(0.0);
        let bytes = env.encode(true).map_err(|e| TransportError::Encode(sender, e))?;
        let mut last_err = None;
        for to in peers {
            if let Err(e) = self.send_with_retry(sender, to, &bytes) {
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn drain(&self, receiver: Uid) -> Vec<Arrival> {
        self.shared.mailbox_for(receiver).map(|m| m.drain()).unwrap_or_default()
    }
}

impl<R: Radio> Drop for RealConnector<R> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    struct FlakyRadio {
        fail_first_n: u32,
        attempts: StdMutex<u32>,
    }

    impl Radio for FlakyRadio {
        fn send(&self, _to: Uid, _bytes: &[u8]) -> bool {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            *attempts > self.fail_first_n
        }

        fn try_recv(&self) -> Option<(Uid, Vec<u8>)> {
            None
        }
    }

    /// A radio with one scripted inbound frame, addressed (by the tuple's
    /// uid) to whichever local device it was queued for.
    struct ScriptedRadio {
        inbound: StdMutex<VecDeque<(Uid, Vec<u8>)>>,
    }

    impl Radio for ScriptedRadio {
        fn send(&self, _to: Uid, _bytes: &[u8]) -> bool {
            true
        }

        fn try_recv(&self) -> Option<(Uid, Vec<u8>)> {
            self.inbound.lock().unwrap().pop_front()
        }
    }

    #[test]
    fn inbound_frame_lands_in_the_addressed_devices_mailbox_not_the_senders() {
        let env = Envelope::new(9, Time(1.0), vec![1, 2, 3]).with_delay(0.0);
        let bytes = env.encode(true).unwrap();
        let radio = ScriptedRadio { inbound: StdMutex::new(VecDeque::from([(2, bytes)])) };
        let mut conn = RealConnector::new(radio, RetryPolicy::default());
        conn.register(9);
        conn.register(2);

        let mut arrivals = Vec::new();
        for _ in 0..50 {
            arrivals = conn.drain(2);
            if !arrivals.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(arrivals.len(), 1, "frame addressed to 2 must land in 2's mailbox");
        assert_eq!(arrivals[0].0, 9, "arrival still carries the envelope's sender uid");
        assert!(conn.drain(9).is_empty(), "frame must not land in the sender's own mailbox");
    }

    #[test]
    fn retries_until_success_within_budget() {
        let radio = FlakyRadio { fail_first_n: 2, attempts: StdMutex::new(0) };
        let mut conn = RealConnector::new(radio, RetryPolicy { max_attempts: 5, base_backoff: Duration::from_millis(1) });
        conn.register(1);
        conn.register(2);
        assert!(conn.broadcast(1, Time::ZERO, vec![1, 2, 3]).is_ok());
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let radio = FlakyRadio { fail_first_n: 100, attempts: StdMutex::new(0) };
        let mut conn = RealConnector::new(radio, RetryPolicy { max_attempts: 2, base_backoff: Duration::from_millis(1) });
        conn.register(1);
        conn.register(2);
        assert!(conn.broadcast(1, Time::ZERO, vec![]).is_err());
    }
}
