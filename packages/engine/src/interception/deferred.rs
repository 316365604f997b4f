// packages/engine/src/interception/deferred.rs
//! Deferred response slot
//!
//! A resolve-once value any number of tasks can wait on. The first
//! `resolve`/`reject` wins; later calls are ignored and report `false`.
//! A slot never times out on its own, callers race `wait` against their own
//! cancellation.

use tokio::sync::watch;

/// State of a [`Deferred`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredState<T> {
    Pending,
    Resolved(T),
    Rejected(String),
}

impl<T> DeferredState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Resolve-once slot
#[derive(Debug)]
pub struct Deferred<T> {
    state: watch::Sender<DeferredState<T>>,
}

impl<T: Clone> Deferred<T> {
    pub fn new() -> Self {
        let (state, _) = watch::channel(DeferredState::Pending);
        Self { state }
    }

    /// Settle with a value. Returns `false` if the slot was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(DeferredState::Resolved(value))
    }

    /// Settle with a failure reason. Returns `false` if already settled.
    pub fn reject(&self, reason: impl Into<String>) -> bool {
        self.settle(DeferredState::Rejected(reason.into()))
    }

    fn settle(&self, next: DeferredState<T>) -> bool {
        let mut next = Some(next);
        self.state.send_if_modified(|state| {
            if !state.is_pending() {
                return false;
            }
            if let Some(next) = next.take() {
                *state = next;
            }
            true
        })
    }

    pub fn state(&self) -> DeferredState<T> {
        self.state.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        self.state.borrow().is_pending()
    }

    /// Suspend until the slot settles and return the settled state
    pub async fn wait(&self) -> DeferredState<T> {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let settled = match rx.wait_for(|state| !state.is_pending()).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        settled
    }
}

impl<T: Clone> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}
