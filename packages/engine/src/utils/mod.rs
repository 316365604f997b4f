// packages/engine/src/utils/mod.rs
//! Common utilities
//!
//! - **errors**: engine error type and `Result` alias
//! - **config**: layered engine configuration
//! - **proxy**: call/property interception wrapper with named hooks

pub mod config;
pub mod errors;
pub mod proxy;

pub use config::{EngineConfig, InterceptionConfig, LoggingConfig, TransportConfig};
pub use errors::{InterceptError, Result};
pub use proxy::{CallProxy, ConstructProxy, PropertySource, ProxyHooks, ProxyTarget};
