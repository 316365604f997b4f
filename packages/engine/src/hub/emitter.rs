// packages/engine/src/hub/emitter.rs
//! Ordered multi-listener event emitter
//!
//! Listeners run in registration order and each one is driven to completion
//! before the next starts. Every emission works on a snapshot of the listener
//! list, so adding or removing listeners while an emission is in flight never
//! changes which listeners that emission calls. `once` listeners are claimed
//! (removed) right before they run, which keeps them single-shot even when
//! several emissions overlap.

use crate::hub::listener::{Listener, ListenerError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Default per-event listener count before a leak warning is logged
pub const DEFAULT_MAX_LISTENERS: usize = 10;

struct Entry<A> {
    listener: Listener<A>,
    once: bool,
}

impl<A> Clone for Entry<A> {
    fn clone(&self) -> Self {
        Self {
            listener: self.listener.clone(),
            once: self.once,
        }
    }
}

/// Event emitter keyed by event name
pub struct Emitter<K, A> {
    /// Listeners per event, in registration order
    events: RwLock<HashMap<K, Vec<Entry<A>>>>,

    /// Event names in first-registration order
    order: RwLock<Vec<K>>,

    /// Leak warning threshold (0 = unlimited)
    max_listeners: AtomicUsize,

    /// Set once the leak warning has been logged
    warned: AtomicBool,
}

impl<K, A> Emitter<K, A>
where
    K: Clone + Eq + Hash + Debug,
    A: Clone + Send + 'static,
{
    /// Create an emitter with the default leak threshold
    pub fn new() -> Self {
        Self::with_max_listeners(DEFAULT_MAX_LISTENERS)
    }

    /// Create an emitter with a custom leak threshold (0 = unlimited)
    pub fn with_max_listeners(max_listeners: usize) -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            max_listeners: AtomicUsize::new(max_listeners),
            warned: AtomicBool::new(false),
        }
    }

    pub fn set_max_listeners(&self, max_listeners: usize) -> &Self {
        self.max_listeners.store(max_listeners, Ordering::Relaxed);
        self
    }

    pub fn max_listeners(&self) -> usize {
        self.max_listeners.load(Ordering::Relaxed)
    }

    /// Append a listener
    pub fn on(&self, event: K, listener: Listener<A>) -> &Self {
        self.insert(event, Entry { listener, once: false }, false)
    }

    /// Append a listener that is removed after its first invocation
    pub fn once(&self, event: K, listener: Listener<A>) -> &Self {
        self.insert(event, Entry { listener, once: true }, false)
    }

    /// Insert a listener ahead of every existing one
    pub fn prepend_listener(&self, event: K, listener: Listener<A>) -> &Self {
        self.insert(event, Entry { listener, once: false }, true)
    }

    pub fn prepend_once_listener(&self, event: K, listener: Listener<A>) -> &Self {
        self.insert(event, Entry { listener, once: true }, true)
    }

    /// Remove the first registration of `listener`, `once` registrations included
    pub fn off(&self, event: &K, listener: &Listener<A>) -> &Self {
        let mut events = self.events.write();
        if let Some(entries) = events.get_mut(event) {
            if let Some(index) = entries.iter().position(|e| e.listener.same(listener)) {
                entries.remove(index);
                debug!("Removed listener for {:?}", event);
            }
        }
        self
    }

    /// Remove every listener of one event, or of all events
    pub fn remove_all_listeners(&self, event: Option<&K>) -> &Self {
        match event {
            Some(event) => {
                self.events.write().remove(event);
                self.order.write().retain(|name| name != event);
            }
            None => {
                self.events.write().clear();
                self.order.write().clear();
            }
        }
        self
    }

    /// Snapshot of the listeners of `event`
    pub fn listeners(&self, event: &K) -> Vec<Listener<A>> {
        self.snapshot(event).into_iter().map(|e| e.listener).collect()
    }

    pub fn listener_count(&self, event: &K) -> usize {
        self.events.read().get(event).map_or(0, Vec::len)
    }

    /// Event names that currently have listeners, in first-registration order
    pub fn event_names(&self) -> Vec<K> {
        let events = self.events.read();
        self.order
            .read()
            .iter()
            .filter(|name| events.get(*name).is_some_and(|e| !e.is_empty()))
            .cloned()
            .collect()
    }

    /// Invoke every listener of `event` in order.
    ///
    /// Listener failures are logged and do not stop the emission. Returns
    /// whether any listener was registered when the emission started.
    pub async fn emit(&self, event: K, arg: A) -> bool {
        let snapshot = self.snapshot(&event);
        let had_listeners = !snapshot.is_empty();

        for entry in snapshot {
            if entry.once && !self.claim(&event, &entry.listener) {
                continue;
            }
            if let Err(e) = entry.listener.call(arg.clone()).await {
                warn!("Listener for {:?} failed: {}", event, e);
            }
        }

        had_listeners
    }

    /// Invoke every listener of `event` in order, stopping at the first failure
    pub async fn emit_async(&self, event: K, arg: A) -> Result<bool, ListenerError> {
        let snapshot = self.snapshot(&event);
        let had_listeners = !snapshot.is_empty();

        for entry in snapshot {
            if entry.once && !self.claim(&event, &entry.listener) {
                continue;
            }
            entry.listener.call(arg.clone()).await?;
        }

        Ok(had_listeners)
    }

    fn insert(&self, event: K, entry: Entry<A>, prepend: bool) -> &Self {
        let count = {
            let mut events = self.events.write();
            let entries = events.entry(event.clone()).or_default();
            if prepend {
                entries.insert(0, entry);
            } else {
                entries.push(entry);
            }
            entries.len()
        };

        {
            let mut order = self.order.write();
            if !order.contains(&event) {
                order.push(event.clone());
            }
        }

        let max = self.max_listeners();
        if max > 0 && count > max && !self.warned.swap(true, Ordering::Relaxed) {
            warn!(
                "MaxListenersExceededWarning: Possible EventEmitter memory leak detected. \
                 {} {:?} listeners added. Use set_max_listeners() to increase limit",
                count, event
            );
        }

        self
    }

    fn snapshot(&self, event: &K) -> Vec<Entry<A>> {
        self.events.read().get(event).cloned().unwrap_or_default()
    }

    /// Remove a `once` registration, returning whether it was still present
    fn claim(&self, event: &K, listener: &Listener<A>) -> bool {
        let mut events = self.events.write();
        let Some(entries) = events.get_mut(event) else {
            return false;
        };
        match entries
            .iter()
            .position(|e| e.once && e.listener.same(listener))
        {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }
}

impl<K, A> Default for Emitter<K, A>
where
    K: Clone + Eq + Hash + Debug,
    A: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Debug, A> std::fmt::Debug for Emitter<K, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let events = self.events.read();
        let counts: Vec<(&K, usize)> = events.iter().map(|(k, v)| (k, v.len())).collect();
        f.debug_struct("Emitter")
            .field("listeners", &counts)
            .field("max_listeners", &self.max_listeners.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type TestEmitter = Emitter<&'static str, u32>;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Listener<u32> {
        let log = Arc::clone(log);
        Listener::sync(move |n: u32| log.lock().push(format!("{}:{}", name, n)))
    }

    #[tokio::test]
    async fn test_emit_in_registration_order() {
        let emitter = TestEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        emitter.on("tick", recorder(&log, "a"));
        emitter.on("tick", recorder(&log, "b"));
        emitter.prepend_listener("tick", recorder(&log, "first"));

        assert!(emitter.emit("tick", 1).await);
        assert_eq!(*log.lock(), vec!["first:1", "a:1", "b:1"]);
    }

    #[tokio::test]
    async fn test_emit_without_listeners() {
        let emitter = TestEmitter::new();
        assert!(!emitter.emit("tick", 1).await);
        assert!(!emitter.emit_async("tick", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_once_fires_once() {
        let emitter = TestEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        emitter.once("tick", recorder(&log, "once"));

        emitter.emit("tick", 1).await;
        emitter.emit("tick", 2).await;

        assert_eq!(*log.lock(), vec!["once:1"]);
        assert_eq!(emitter.listener_count(&"tick"), 0);
    }

    #[tokio::test]
    async fn test_off_removes_once_listener_before_it_fires() {
        let emitter = TestEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let listener = recorder(&log, "once");

        emitter.once("tick", listener.clone());
        emitter.off(&"tick", &listener);
        emitter.emit("tick", 1).await;

        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_mutation_during_emit_keeps_snapshot() {
        let emitter = Arc::new(TestEmitter::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let late = recorder(&log, "late");

        let adder = {
            let emitter = Arc::clone(&emitter);
            let late = late.clone();
            Listener::sync(move |_: u32| {
                emitter.on("tick", late.clone());
            })
        };
        emitter.on("tick", adder);
        emitter.on("tick", recorder(&log, "b"));

        emitter.emit("tick", 1).await;
        assert_eq!(*log.lock(), vec!["b:1"]);

        emitter.emit("tick", 2).await;
        assert_eq!(*log.lock(), vec!["b:1", "b:2", "late:2"]);
    }

    #[tokio::test]
    async fn test_emit_async_stops_at_failure() {
        let emitter = TestEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        emitter.on("tick", recorder(&log, "a"));
        emitter.on(
            "tick",
            Listener::new(|_: u32| async { Err::<(), ListenerError>("listener failed".into()) }),
        );
        emitter.on("tick", recorder(&log, "c"));

        let err = emitter.emit_async("tick", 7).await.unwrap_err();
        assert_eq!(err.to_string(), "listener failed");
        assert_eq!(*log.lock(), vec!["a:7"]);

        // Plain emit keeps going
        log.lock().clear();
        assert!(emitter.emit("tick", 8).await);
        assert_eq!(*log.lock(), vec!["a:8", "c:8"]);
    }

    #[tokio::test]
    async fn test_async_listeners_run_sequentially() {
        let emitter = TestEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let slow_log = Arc::clone(&log);
        emitter.on(
            "tick",
            Listener::new(move |n: u32| {
                let log = Arc::clone(&slow_log);
                async move {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    log.lock().push(format!("slow:{}", n));
                    Ok(())
                }
            }),
        );
        emitter.on("tick", recorder(&log, "fast"));

        emitter.emit("tick", 1).await;
        assert_eq!(*log.lock(), vec!["slow:1", "fast:1"]);
    }

    #[test]
    fn test_event_names_and_remove_all() {
        let emitter = TestEmitter::new();
        emitter.on("b", Listener::sync(|_: u32| {}));
        emitter.on("a", Listener::sync(|_: u32| {}));
        assert_eq!(emitter.event_names(), vec!["b", "a"]);

        emitter.remove_all_listeners(Some(&"b"));
        assert_eq!(emitter.event_names(), vec!["a"]);

        emitter.remove_all_listeners(None);
        assert!(emitter.event_names().is_empty());
        assert_eq!(emitter.listener_count(&"a"), 0);
    }

    #[test]
    fn test_leak_threshold_is_not_an_error() {
        let emitter = TestEmitter::with_max_listeners(2);
        for _ in 0..5 {
            emitter.on("tick", Listener::sync(|_: u32| {}));
        }
        assert_eq!(emitter.listener_count(&"tick"), 5);
        assert!(emitter.warned.load(Ordering::Relaxed));

        let unlimited = TestEmitter::with_max_listeners(0);
        for _ in 0..50 {
            unlimited.on("tick", Listener::sync(|_: u32| {}));
        }
        assert!(!unlimited.warned.load(Ordering::Relaxed));
    }
}
