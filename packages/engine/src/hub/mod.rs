// packages/engine/src/hub/mod.rs
//! Event hub
//!
//! - **Emitter**: ordered publish/subscribe with `once` support, snapshot
//!   emission, and a non-fatal listener leak warning
//! - **Listener**: identity-comparable handle around an async callback

pub mod emitter;
pub mod listener;

pub use emitter::{Emitter, DEFAULT_MAX_LISTENERS};
pub use listener::{Listener, ListenerError, ListenerFuture};
