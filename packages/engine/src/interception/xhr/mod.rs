// packages/engine/src/interception/xhr/mod.rs
//! XMLHttpRequest interceptor
//!
//! Replaces the environment's XHR constructor. Every constructed instance is
//! a real instance wrapped in a proxy whose hooks are driven by an
//! [`XhrController`]: the controller records `open`/`setRequestHeader`,
//! turns `send` into a `Request` round, and either emulates the whole
//! response lifecycle from a mocked response or lets the real instance
//! perform the request.
//!
//! - **events**: progress events and the per-instance listener table
//! - **body**: `responseType`-driven body interpretation
//! - **target**: the reified XHR interface the proxy forwards
//! - **controller**: the per-instance controller
//! - **backend**: a real XHR implementation driven by any `FetchClient`

pub mod backend;
pub mod body;
pub mod controller;
pub mod events;
pub mod target;

pub use backend::{FetchXhr, FetchXhrFactory};
pub use body::{ResponseType, XhrResponseBody, XmlDocument};
pub use controller::{XhrController, XhrProxy};
pub use events::{xhr_listener, ListenerTable, XhrEvent, XhrEventKind, XhrListener};
pub use target::{XhrCall, XhrOutput, XhrProperty, XhrValue};

use crate::interception::environment::ClientEnvironment;
use crate::interception::events::HttpEmitter;
use crate::interception::interceptor::{Interceptor, InterceptorSetup, Subscription};
use crate::interception::registry::InterceptorSymbol;
use crate::utils::errors::{InterceptError, Result};
use crate::utils::proxy::ConstructProxy;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

const KIND: &str = "XMLHttpRequest";

/// Readiness stage of an XHR instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ReadyState {
    #[default]
    Unsent,
    Opened,
    HeadersReceived,
    Loading,
    Done,
}

impl ReadyState {
    pub fn as_u16(&self) -> u16 {
        match self {
            Self::Unsent => 0,
            Self::Opened => 1,
            Self::HeadersReceived => 2,
            Self::Loading => 3,
            Self::Done => 4,
        }
    }
}

/// Stateful, event-driven HTTP client
pub trait XmlHttpRequest: Send + Sync {
    /// Initialize a request. `url` may be relative when the instance knows a
    /// base location.
    fn open(&self, method: &str, url: &str) -> Result<()>;

    /// `open(url)`: a GET request
    fn open_url(&self, url: &str) -> Result<()> {
        self.open("GET", url)
    }

    fn set_request_header(&self, name: &str, value: &str) -> Result<()>;

    fn send(&self, body: Option<Bytes>) -> Result<()>;

    fn abort(&self);

    fn add_event_listener(&self, kind: XhrEventKind, listener: XhrListener);

    fn remove_event_listener(&self, kind: XhrEventKind, listener: &XhrListener);

    /// Assign the `on<event>` handler
    fn set_handler(&self, kind: XhrEventKind, handler: Option<XhrListener>);

    fn handler(&self, kind: XhrEventKind) -> Option<XhrListener>;

    /// Header value, `None` before headers are received
    fn get_response_header(&self, name: &str) -> Option<String>;

    /// Raw `name: value` block, empty before headers are received
    fn get_all_response_headers(&self) -> String;

    fn ready_state(&self) -> ReadyState;

    fn status(&self) -> u16;

    fn status_text(&self) -> String;

    fn response_url(&self) -> String;

    fn response_type(&self) -> ResponseType;

    fn set_response_type(&self, response_type: ResponseType) -> Result<()>;

    fn with_credentials(&self) -> bool;

    fn set_with_credentials(&self, with_credentials: bool) -> Result<()>;

    fn response(&self) -> Result<XhrResponseBody>;

    fn response_text(&self) -> Result<String>;

    fn response_xml(&self) -> Result<Option<XmlDocument>>;

    /// Raw body bytes received so far, whatever the response type
    fn response_bytes(&self) -> Bytes;
}

/// XHR constructor
pub trait XhrFactory: Send + Sync {
    fn create(&self) -> Arc<dyn XmlHttpRequest>;

    /// Whether this constructor is an interceptor's patch
    fn is_patched(&self) -> bool {
        false
    }
}

/// XHR constructor installed by [`XhrInterceptor`]
pub struct InterceptedXhrFactory {
    construct: ConstructProxy<(), Arc<dyn XmlHttpRequest>>,
}

impl InterceptedXhrFactory {
    pub fn new(pure: Arc<dyn XhrFactory>, emitter: Arc<HttpEmitter>, location: Option<Url>) -> Self {
        let construct = ConstructProxy::new(move |()| pure.create()).on_construct(
            move |args, next| {
                let real = next(args);
                debug!("[xhr] constructed intercepted instance");
                XhrController::new(real, Arc::clone(&emitter), location.clone()).into_request()
            },
        );
        Self { construct }
    }
}

impl XhrFactory for InterceptedXhrFactory {
    fn create(&self) -> Arc<dyn XmlHttpRequest> {
        self.construct.construct(())
    }

    fn is_patched(&self) -> bool {
        true
    }
}

/// Patches the environment's XHR constructor
#[derive(Debug, Default, Clone, Copy)]
pub struct XhrSetup;

impl InterceptorSetup for XhrSetup {
    const SYMBOL: InterceptorSymbol = InterceptorSymbol::new("xhr");

    fn check_environment(&self, env: &ClientEnvironment) -> bool {
        env.xhr_factory().is_some()
    }

    fn setup(
        &self,
        env: &Arc<ClientEnvironment>,
        emitter: &Arc<HttpEmitter>,
    ) -> Result<Vec<Subscription>> {
        let pure = env
            .xhr_factory()
            .ok_or_else(|| InterceptError::Unsupported(KIND.to_string()))?;

        if pure.is_patched() {
            return Err(InterceptError::AlreadyPatched(KIND.to_string()));
        }

        env.replace_xhr(Arc::new(InterceptedXhrFactory::new(
            Arc::clone(&pure),
            Arc::clone(emitter),
            env.location().cloned(),
        )));
        info!("Patched the XMLHttpRequest constructor");

        let env = Arc::clone(env);
        Ok(vec![Box::new(move || {
            env.replace_xhr(pure);
            info!("Restored the original XMLHttpRequest constructor");
        })])
    }
}

/// Interceptor for the XHR constructor
pub type XhrInterceptor = Interceptor<XhrSetup>;

impl Interceptor<XhrSetup> {
    pub fn xhr(env: Arc<ClientEnvironment>) -> Self {
        Self::new(XhrSetup, env)
    }
}
