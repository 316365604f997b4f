// packages/engine/src/interception/events.rs
//! Observer-facing interceptor events
//!
//! Every intercepted request produces one `Request` event carrying an
//! [`InteractiveRequest`] that listeners may answer through
//! [`InteractiveRequest::respond_with`], and at most one `Response` event once
//! the outcome (mocked or real) is known.

use crate::hub::{Emitter, Listener, ListenerError};
use crate::interception::deferred::{Deferred, DeferredState};
use crate::message::{Request, Response};
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use ulid::Ulid;

/// Unique id of one intercepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(Ulid);

impl RequestId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Holds the response slot of one request
#[derive(Debug, Default)]
pub struct RequestController {
    slot: Deferred<Option<Response>>,
}

impl RequestController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the request. `None` lets it through to the real client.
    /// Only the first answer counts.
    pub fn respond_with(&self, response: impl Into<Option<Response>>) -> bool {
        self.slot.resolve(response.into())
    }

    pub fn slot(&self) -> &Deferred<Option<Response>> {
        &self.slot
    }

    pub fn is_settled(&self) -> bool {
        !self.slot.is_pending()
    }

    /// Settled answer, if any
    pub fn answer(&self) -> Option<Response> {
        match self.slot.state() {
            DeferredState::Resolved(response) => response,
            _ => None,
        }
    }
}

/// Request handed to listeners, with the ability to answer it
#[derive(Debug, Clone)]
pub struct InteractiveRequest {
    request: Arc<Request>,
    controller: Arc<RequestController>,
}

impl InteractiveRequest {
    pub fn new(request: Request) -> Self {
        Self {
            request: Arc::new(request),
            controller: Arc::new(RequestController::new()),
        }
    }

    pub fn respond_with(&self, response: impl Into<Option<Response>>) -> bool {
        self.controller.respond_with(response)
    }

    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    pub fn controller(&self) -> &Arc<RequestController> {
        &self.controller
    }
}

impl Deref for InteractiveRequest {
    type Target = Request;

    fn deref(&self) -> &Request {
        &self.request
    }
}

/// Interceptor event names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterceptorEventKind {
    Request,
    Response,
}

/// Payload of a `Request` event
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub request: InteractiveRequest,
    pub request_id: RequestId,
}

/// Payload of a `Response` event
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub response: Response,

    /// Whether the response came from a listener rather than the real client
    pub is_mocked: bool,

    pub request: Arc<Request>,

    pub request_id: RequestId,
}

/// Event payload delivered to interceptor listeners
#[derive(Debug, Clone)]
pub enum InterceptorEvent {
    Request(RequestEvent),
    Response(ResponseEvent),
}

impl InterceptorEvent {
    pub fn kind(&self) -> InterceptorEventKind {
        match self {
            Self::Request(_) => InterceptorEventKind::Request,
            Self::Response(_) => InterceptorEventKind::Response,
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            Self::Request(event) => event.request_id,
            Self::Response(event) => event.request_id,
        }
    }
}

/// Event hub shared by an interceptor and its clients
pub type HttpEmitter = Emitter<InterceptorEventKind, InterceptorEvent>;

/// Listener type registered on an [`HttpEmitter`]
pub type HttpListener = Listener<InterceptorEvent>;

/// Build a `Request` listener from an async callback
pub fn request_listener<F, Fut>(callback: F) -> HttpListener
where
    F: Fn(RequestEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    let callback = Arc::new(callback);
    Listener::new(move |event: InterceptorEvent| {
        let callback = Arc::clone(&callback);
        async move {
            match event {
                InterceptorEvent::Request(event) => callback(event).await,
                InterceptorEvent::Response(_) => Ok(()),
            }
        }
    })
}

/// Build a `Response` listener from a synchronous callback
pub fn response_listener<F>(callback: F) -> HttpListener
where
    F: Fn(ResponseEvent) + Send + Sync + 'static,
{
    Listener::sync(move |event: InterceptorEvent| {
        if let InterceptorEvent::Response(event) = event {
            callback(event);
        }
    })
}
