// packages/engine/src/interception/mod.rs
//! Request interception layer
//!
//! - **Interceptor**: apply/dispose lifecycle, one live instance per symbol
//! - **Resolver**: runs `Request` listeners until one answers
//! - **Fetch**: patched fetch client with mock and passthrough paths
//! - **XHR**: proxied XMLHttpRequest driven by a per-request controller
//! - **Batch**: several interceptors behind one listener surface
//! - **Mock routes**: host-to-response table usable as a listener
//!
//! # Architecture
//!
//! ```text
//! Caller
//!     │
//!     ├─ fetch(request) ─┐
//!     │                  ├─ emit Request → listeners → respond_with?
//!     └─ xhr.send() ─────┘        │
//!                                 ├─ mocked  → synthetic response
//!                                 └─ none    → original client
//!                                                 │
//!                                 emit Response ◄─┘
//! ```

pub mod batch;
pub mod deferred;
pub mod environment;
pub mod events;
pub mod fetch;
pub mod interceptor;
pub mod registry;
pub mod resolver;
pub mod routing_table;
pub mod xhr;

// Re-export commonly used types
pub use batch::{presets, BatchInterceptor};
pub use deferred::{Deferred, DeferredState};
pub use environment::ClientEnvironment;
pub use events::{
    request_listener, response_listener, HttpEmitter, HttpListener, InteractiveRequest,
    InterceptorEvent, InterceptorEventKind, RequestController, RequestEvent, RequestId,
    ResponseEvent,
};
pub use fetch::{FetchClient, FetchInterceptor, HyperFetchClient, InterceptedFetch};
pub use interceptor::{Interceptor, InterceptorHandle, InterceptorSetup, InterceptorState};
pub use registry::{InterceptorRegistry, InterceptorSymbol};
pub use routing_table::{MockResponse, MockRoute, MockRoutes};
pub use xhr::{ReadyState, XhrFactory, XhrInterceptor, XmlHttpRequest};
