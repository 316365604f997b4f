// packages/engine/src/message/signal.rs
//! Request cancellation
//!
//! [`AbortController`] owns the right to cancel; [`AbortSignal`] is the
//! cloneable, observe-only side attached to a request. The first abort wins
//! and fixes the reason.

use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// Reason recorded when `abort` is called without one
pub const DEFAULT_ABORT_REASON: &str = "AbortError: This operation was aborted";

/// Observe-only cancellation signal
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl AbortSignal {
    /// A signal that is never aborted
    pub fn never() -> Self {
        Self::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<String> {
        if self.is_aborted() {
            self.reason.get().cloned()
        } else {
            None
        }
    }

    /// Resolve with the abort reason once the signal fires
    pub async fn aborted(&self) -> String {
        self.token.cancelled().await;
        self.reason
            .get()
            .cloned()
            .unwrap_or_else(|| DEFAULT_ABORT_REASON.to_string())
    }

    /// Underlying token, for `select!` arms and child tokens
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Owner side of an [`AbortSignal`]
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Abort with a reason; later calls keep the first reason
    pub fn abort(&self, reason: impl Into<String>) {
        let _ = self.signal.reason.set(reason.into());
        self.signal.token.cancel();
    }

    pub fn abort_default(&self) {
        self.abort(DEFAULT_ABORT_REASON);
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }
}
