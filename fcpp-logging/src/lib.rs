//! A minimal named-stream event registry.
//!
//! A [`Registry`] binds a stream name (e.g. `"fcpp/round"`, `"fcpp/transport"`)
//! to an action invoked on batches of logged events. Components that want to
//! report structured events (round faults, context eviction, transport
//! retries) ask the registry for a [`Logger<E>`] and clone it freely; nothing
//! is written anywhere until a caller installs an action with
//! [`Registry::insert`]. This crate defines no sink: the action is supplied
//! by whoever wants to observe the stream (tests, or an external
//! aggregator/log pipeline, which is out of scope for this core).
//!
//! `Logger` is `Arc<Mutex<..>>`-backed rather than the donor's `Rc<RefCell<>>`,
//! since a net running its parallel-batch execution strategy hands `Logger`
//! clones to more than one round's worth of work at once, across threads.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A registry of named event streams, each bound to at most one action.
pub struct Registry {
    time: Instant,
    map: HashMap<String, Box<dyn Any>>,
}

impl Registry {
    /// Creates a new registry. `time` is the instant all logged durations
    /// are measured relative to (typically the net's start time).
    pub fn new(time: Instant) -> Self {
        Registry { time, map: HashMap::new() }
    }

    /// Binds `name` to an action invoked on flushed event batches, and
    /// returns any logger previously bound to that name (so it can be kept
    /// alive if desired; existing [`Logger`] handles continue to target
    /// their original action).
    pub fn insert<E: Send + 'static>(
        &mut self,
        name: impl Into<String>,
        action: Box<dyn Fn(&Duration, &[(Duration, E)]) + Send + Sync>,
    ) -> Option<Box<dyn Any>> {
        let logger = Logger::<E>::new(self.time, action);
        self.map.insert(name.into(), Box::new(logger))
    }

    /// Removes a bound logger, signalling end-of-stream to its action by
    /// dropping the last reference to it (if no other clones are held).
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Any>> {
        self.map.remove(name)
    }

    /// Retrieves a clone of the logger bound to `name`, if one was inserted
    /// with a matching event type.
    pub fn get<E: Send + 'static>(&self, name: &str) -> Option<Logger<E>> {
        self.map
            .get(name)
            .and_then(|entry| entry.downcast_ref::<Logger<E>>())
            .cloned()
    }

}

/// A cheaply cloned handle that buffers events and flushes them to a
/// shared action.
pub struct Logger<E> {
    time: Instant,
    action: Arc<Box<dyn Fn(&Duration, &[(Duration, E)]) + Send + Sync>>,
    buffer: Arc<Mutex<Vec<(Duration, E)>>>,
}

impl<E> Clone for Logger<E> {
    fn clone(&self) -> Self {
        Logger {
            time: self.time,
            action: Arc::clone(&self.action),
            buffer: Arc::clone(&self.buffer),
        }
    }
}

const DEFAULT_CAPACITY: usize = 256;

impl<E: Send> Logger<E> {
    /// Allocates a new logger bound to `action`.
    pub fn new(time: Instant, action: Box<dyn Fn(&Duration, &[(Duration, E)]) + Send + Sync>) -> Self {
        Logger {
            time,
            action: Arc::new(action),
            buffer: Arc::new(Mutex::new(Vec::with_capacity(DEFAULT_CAPACITY))),
        }
    }

    /// Logs one event, timestamped at the moment of the call (relative to
    /// the registry's start time). Flushes automatically once the buffer
    /// reaches its capacity.
    pub fn log(&self, event: E) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.push((self.time.elapsed(), event));
        if buffer.len() == buffer.capacity() {
            (self.action)(&self.time.elapsed(), &buffer[..]);
            buffer.clear();
        }
    }

    /// Flushes any buffered events to the bound action, regardless of
    /// buffer occupancy.
    pub fn flush(&self) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        if !buffer.is_empty() {
            (self.action)(&self.time.elapsed(), &buffer[..]);
            buffer.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Ev(u32);

    #[test]
    fn flush_delivers_buffered_events() {
        let mut registry = Registry::new(Instant::now());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        registry.insert::<Ev>(
            "test",
            Box::new(move |_time, data| {
                seen_clone.lock().unwrap().extend(data.iter().map(|(_, e)| e.clone()));
            }),
        );
        let logger = registry.get::<Ev>("test").unwrap();
        logger.log(Ev(1));
        logger.log(Ev(2));
        assert!(seen.lock().unwrap().is_empty());
        logger.flush();
        assert_eq!(*seen.lock().unwrap(), vec![Ev(1), Ev(2)]);
    }

    #[test]
    fn auto_flush_on_capacity() {
        let mut registry = Registry::new(Instant::now());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        registry.insert::<Ev>(
            "test",
            Box::new(move |_time, data| {
                count_clone.fetch_add(data.len(), Ordering::SeqCst);
            }),
        );
        let logger = registry.get::<Ev>("test").unwrap();
        for i in 0..(DEFAULT_CAPACITY + 1) {
            logger.log(Ev(i as u32));
        }
        assert_eq!(count.load(Ordering::SeqCst), DEFAULT_CAPACITY);
    }

    #[test]
    fn missing_stream_returns_none() {
        let registry = Registry::new(Instant::now());
        assert!(registry.get::<Ev>("absent").is_none());
    }
}
