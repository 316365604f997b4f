// packages/engine/src/interception/xhr/events.rs
//! XHR progress events and listener table

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Events an XHR instance dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XhrEventKind {
    ReadyStateChange,
    LoadStart,
    Progress,
    Load,
    LoadEnd,
    Error,
    Abort,
    Timeout,
}

impl XhrEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadyStateChange => "readystatechange",
            Self::LoadStart => "loadstart",
            Self::Progress => "progress",
            Self::Load => "load",
            Self::LoadEnd => "loadend",
            Self::Error => "error",
            Self::Abort => "abort",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for XhrEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event delivered to XHR listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XhrEvent {
    pub kind: XhrEventKind,

    /// Bytes received so far
    pub loaded: u64,

    /// Expected body length, when the response declares one
    pub total: Option<u64>,
}

impl XhrEvent {
    pub fn new(kind: XhrEventKind) -> Self {
        Self {
            kind,
            loaded: 0,
            total: None,
        }
    }

    pub fn progress(kind: XhrEventKind, loaded: u64, total: Option<u64>) -> Self {
        Self {
            kind,
            loaded,
            total,
        }
    }

    pub fn length_computable(&self) -> bool {
        self.total.is_some()
    }
}

/// XHR event callback. Identity is the `Arc`.
pub type XhrListener = Arc<dyn Fn(&XhrEvent) + Send + Sync>;

/// Wrap a closure as an [`XhrListener`]
pub fn xhr_listener<F>(callback: F) -> XhrListener
where
    F: Fn(&XhrEvent) + Send + Sync + 'static,
{
    Arc::new(callback)
}

/// Where a registration lands in a [`ListenerTable`]
pub enum Registration<'a> {
    /// Assignment-style handler (slot zero); `None` clears it
    Handler(Option<XhrListener>),
    Add(XhrListener),
    Remove(&'a XhrListener),
}

/// Per-event listener table. Slot zero holds the assignment-style handler,
/// the remaining slots hold listeners in registration order.
#[derive(Default)]
pub struct ListenerTable {
    slots: RwLock<HashMap<XhrEventKind, Vec<Option<XhrListener>>>>,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: XhrEventKind, registration: Registration<'_>) {
        let mut slots = self.slots.write();
        let entries = slots.entry(kind).or_insert_with(|| vec![None]);

        match registration {
            Registration::Handler(handler) => entries[0] = handler,
            Registration::Add(listener) => {
                let present = entries[1..]
                    .iter()
                    .flatten()
                    .any(|existing| Arc::ptr_eq(existing, &listener));
                if !present {
                    entries.push(Some(listener));
                }
            }
            Registration::Remove(listener) => {
                if let Some(index) = entries[1..]
                    .iter()
                    .position(|slot| slot.as_ref().is_some_and(|l| Arc::ptr_eq(l, listener)))
                {
                    entries.remove(index + 1);
                }
            }
        }
    }

    pub fn set_handler(&self, kind: XhrEventKind, handler: Option<XhrListener>) {
        self.register(kind, Registration::Handler(handler));
    }

    pub fn add(&self, kind: XhrEventKind, listener: XhrListener) {
        self.register(kind, Registration::Add(listener));
    }

    pub fn remove(&self, kind: XhrEventKind, listener: &XhrListener) {
        self.register(kind, Registration::Remove(listener));
    }

    pub fn handler(&self, kind: XhrEventKind) -> Option<XhrListener> {
        self.slots
            .read()
            .get(&kind)
            .and_then(|entries| entries[0].clone())
    }

    /// Handler first, then listeners in registration order
    pub fn listeners(&self, kind: XhrEventKind) -> Vec<XhrListener> {
        self.slots
            .read()
            .get(&kind)
            .map(|entries| entries.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, kind: XhrEventKind) -> usize {
        self.listeners(kind).len()
    }

    /// Invoke every callback registered for the event's kind.
    /// Runs on a snapshot; no lock is held while callbacks run.
    pub fn dispatch(&self, event: &XhrEvent) -> usize {
        let listeners = self.listeners(event.kind);
        for listener in &listeners {
            listener(event);
        }
        listeners.len()
    }
}

impl fmt::Debug for ListenerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.read();
        let counts: HashMap<&XhrEventKind, usize> = slots
            .iter()
            .map(|(kind, entries)| (kind, entries.iter().flatten().count()))
            .collect();
        f.debug_struct("ListenerTable").field("listeners", &counts).finish()
    }
}
