// packages/engine/src/lib.rs
//! Network Request Interception Engine
//!
//! Intercepts requests issued through fetch-style and XMLHttpRequest-style
//! clients, lets listeners inspect them and answer with mocked responses, and
//! reports every final response.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **hub**: Async event emitter with ordered, awaited listeners
//! - **message**: Request, response, headers, bodies and abort signals
//! - **interception**: Interceptor lifecycle, fetch and XHR interception
//! - **observability**: Tracing subscriber and metric descriptions
//! - **utils**: Configuration, errors and the call proxy

// Public module exports
pub mod hub;
pub mod interception;
pub mod message;
pub mod observability;
pub mod utils;

// Re-export commonly used types
pub use interception::{
    presets, BatchInterceptor, ClientEnvironment, FetchInterceptor, InterceptorEventKind,
    MockRoutes, XhrInterceptor,
};
pub use message::{AbortController, Request, Response};
pub use utils::config::EngineConfig;
pub use utils::errors::{InterceptError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
