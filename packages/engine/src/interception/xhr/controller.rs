// packages/engine/src/interception/xhr/controller.rs
//! Per-instance XHR controller
//!
//! Sits in front of one real XHR instance through a [`CallProxy`]. Until
//! `send`, calls are recorded and forwarded. `send` itself is held back: the
//! controller runs a `Request` round and then either emulates the complete
//! response lifecycle from the mocked response (ready states, progress
//! events, body accessors) or hands the request to the real instance.
//!
//! While the controller owns the lifecycle it dispatches events from its own
//! listener table. Listeners are mirrored onto the real instance so that a
//! passthrough request reaches them without any help.

use crate::interception::events::{
    HttpEmitter, InteractiveRequest, InterceptorEvent, InterceptorEventKind, RequestId,
    ResponseEvent,
};
use crate::interception::resolver::{resolve_request, Resolution};
use crate::interception::xhr::backend::{header_pairs, snapshot_response};
use crate::interception::xhr::body::{self, ResponseType};
use crate::interception::xhr::events::{xhr_listener, ListenerTable, XhrEvent, XhrEventKind};
use crate::interception::xhr::target::{XhrCall, XhrOutput, XhrProperty, XhrValue};
use crate::interception::xhr::{ReadyState, XmlHttpRequest};
use crate::message::headers;
use crate::message::{AbortController, Credentials, Request, RequestInit, Response};
use crate::utils::errors::{InterceptError, Result};
use crate::utils::proxy::{CallProxy, NextCall, NextGet, NextSet, ProxyHooks};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use hyper::header::HeaderMap;
use hyper::Method;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock, Weak};
use tokio::runtime::Handle;
use tracing::{debug, warn};
use url::Url;

const KIND: &str = "xhr";

/// Methods normalized to upper case when passed to `open`
const NORMALIZED_METHODS: [&str; 6] = ["DELETE", "GET", "HEAD", "OPTIONS", "POST", "PUT"];

type Real = Arc<dyn XmlHttpRequest>;

/// Intercepted XHR instance handed to callers
pub type XhrProxy = CallProxy<Real>;

/// Who currently drives the instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Opened,
    /// `send` was called, the request round is running
    Resolving,
    /// Emulating a mocked response
    Mocked,
    /// The real instance performs the request
    Passthrough,
    Done,
}

#[derive(Default)]
struct ControllerState {
    /// Minted by every `send`
    request_id: Option<RequestId>,
    method: Method,
    url: Option<Url>,
    request_headers: HeaderMap,
    request_body: Option<Bytes>,
    request: Option<Arc<Request>>,
    ready_state: ReadyState,
    phase: Phase,

    /// The current response comes from a listener
    mocked: bool,

    mock_headers: HeaderMap,
    buffer: BytesMut,
    abort: Option<AbortController>,

    /// Internal `load` listener installed on the real instance
    load_hooked: bool,
}

struct ControllerInner {
    emitter: Arc<HttpEmitter>,
    location: Option<Url>,
    listeners: ListenerTable,
    state: Mutex<ControllerState>,
    proxy: OnceLock<Weak<XhrProxy>>,
}

/// Controller for one intercepted XHR instance
pub struct XhrController {
    inner: Arc<ControllerInner>,
    proxy: Arc<XhrProxy>,
}

impl XhrController {
    pub fn new(real: Real, emitter: Arc<HttpEmitter>, location: Option<Url>) -> Self {
        let inner = Arc::new(ControllerInner {
            emitter,
            location,
            listeners: ListenerTable::new(),
            state: Mutex::new(ControllerState::default()),
            proxy: OnceLock::new(),
        });

        let on_call = Arc::clone(&inner);
        let on_get = Arc::clone(&inner);
        let on_set = Arc::clone(&inner);
        let hooks = ProxyHooks::<Real>::default()
            .on_call(move |proxy, call, next| on_call.handle_call(proxy, call, next))
            .on_get(move |_, property, next| on_get.handle_get(property, next))
            .on_set(move |_, property, value, next| on_set.handle_set(property, value, next));

        let proxy = Arc::new(CallProxy::new(real, hooks));
        let _ = inner.proxy.set(Arc::downgrade(&proxy));
        Self { inner, proxy }
    }

    /// Id of the request issued by the latest `send`
    pub fn request_id(&self) -> Option<RequestId> {
        self.inner.state.lock().request_id
    }

    pub fn proxy(&self) -> &Arc<XhrProxy> {
        &self.proxy
    }

    /// The intercepted instance
    pub fn into_request(self) -> Arc<dyn XmlHttpRequest> {
        self.proxy
    }
}

fn record(outcome: &'static str) {
    metrics::counter!("intercept_requests_total", "kind" => KIND, "outcome" => outcome)
        .increment(1);
}

fn normalize_method(method: &str) -> Result<Method> {
    let upper = method.to_ascii_uppercase();
    let method = if NORMALIZED_METHODS.contains(&upper.as_str()) {
        upper
    } else {
        method.to_string()
    };
    Method::from_bytes(method.as_bytes())
        .map_err(|_| InterceptError::InvalidRequest(format!("invalid method: {:?}", method)))
}

impl ControllerInner {
    fn handle_call(
        self: &Arc<Self>,
        proxy: &XhrProxy,
        call: XhrCall,
        next: NextCall<'_, Real>,
    ) -> Result<XhrOutput> {
        match call {
            XhrCall::Open { method, url } => self.open(proxy, &method, &url, next),
            XhrCall::SetRequestHeader { name, value } => {
                let output = next(XhrCall::SetRequestHeader {
                    name: name.clone(),
                    value: value.clone(),
                })?;
                headers::append(&mut self.state.lock().request_headers, &name, &value)?;
                Ok(output)
            }
            XhrCall::Send(body) => self.send(proxy, body),
            XhrCall::Abort => {
                self.abort(proxy);
                next(XhrCall::Abort)
            }
            XhrCall::AddEventListener(kind, listener) => {
                self.listeners.add(kind, Arc::clone(&listener));
                next(XhrCall::AddEventListener(kind, listener))
            }
            XhrCall::RemoveEventListener(kind, listener) => {
                self.listeners.remove(kind, &listener);
                next(XhrCall::RemoveEventListener(kind, listener))
            }
            XhrCall::GetResponseHeader(name) => {
                {
                    let state = self.state.lock();
                    if state.mocked {
                        let value = if state.ready_state < ReadyState::HeadersReceived {
                            None
                        } else {
                            headers::get_joined(&state.mock_headers, &name)
                        };
                        return Ok(XhrOutput::Header(value));
                    }
                }
                next(XhrCall::GetResponseHeader(name))
            }
            XhrCall::GetAllResponseHeaders => {
                {
                    let state = self.state.lock();
                    if state.mocked {
                        let raw = if state.ready_state < ReadyState::HeadersReceived {
                            String::new()
                        } else {
                            headers::to_raw(&state.mock_headers)
                        };
                        return Ok(XhrOutput::Headers(raw));
                    }
                }
                next(XhrCall::GetAllResponseHeaders)
            }
        }
    }

    fn handle_get(&self, property: XhrProperty, next: NextGet<'_, Real>) -> Result<XhrValue> {
        if !matches!(
            property,
            XhrProperty::Response
                | XhrProperty::ResponseText
                | XhrProperty::ResponseXml
                | XhrProperty::ResponseBytes
        ) {
            return next(property);
        }

        let response_type = match next(XhrProperty::ResponseType)? {
            XhrValue::ResponseType(response_type) => response_type,
            _ => ResponseType::Default,
        };

        let state = self.state.lock();
        if !state.mocked {
            drop(state);
            return next(property);
        }

        let content_type = headers::content_type(&state.mock_headers);
        match property {
            XhrProperty::ResponseBytes => Ok(XhrValue::Bytes(Bytes::copy_from_slice(&state.buffer))),
            XhrProperty::Response => Ok(XhrValue::Body(body::read_response(
                state.ready_state,
                response_type,
                &state.buffer,
                content_type.as_deref(),
            ))),
            XhrProperty::ResponseText => {
                body::read_text(state.ready_state, response_type, &state.buffer).map(XhrValue::Text)
            }
            _ => body::read_xml(
                state.ready_state,
                response_type,
                &state.buffer,
                content_type.as_deref(),
            )
            .map(XhrValue::Document),
        }
    }

    fn handle_set(
        &self,
        property: XhrProperty,
        value: XhrValue,
        next: NextSet<'_, Real>,
    ) -> Result<()> {
        match (&property, &value) {
            (XhrProperty::Handler(kind), XhrValue::Handler(handler)) => {
                self.listeners.set_handler(*kind, handler.clone());
            }
            (XhrProperty::ResponseType, _) => {
                let state = self.state.lock();
                if state.mocked && state.ready_state >= ReadyState::Loading {
                    return Err(InterceptError::InvalidState(
                        "responseType cannot be changed while loading or done".to_string(),
                    ));
                }
            }
            _ => {}
        }
        next(property, value)
    }

    fn open(
        &self,
        proxy: &XhrProxy,
        method: &str,
        url: &str,
        next: NextCall<'_, Real>,
    ) -> Result<XhrOutput> {
        let url = Url::options().base_url(self.location.as_ref()).parse(url)?;
        let method = normalize_method(method)?;

        {
            let mut state = self.state.lock();
            if let Some(previous) = state.abort.take() {
                previous.abort_default();
            }
            let load_hooked = state.load_hooked;
            *state = ControllerState {
                method: method.clone(),
                url: Some(url.clone()),
                ready_state: ReadyState::Opened,
                phase: Phase::Opened,
                load_hooked,
                ..ControllerState::default()
            };
        }
        for property in [
            XhrProperty::ReadyState,
            XhrProperty::Status,
            XhrProperty::StatusText,
            XhrProperty::ResponseUrl,
        ] {
            proxy.undefine(property);
        }

        debug!("[xhr] open {} {}", method, url);
        next(XhrCall::Open {
            method: method.to_string(),
            url: url.to_string(),
        })
    }

    fn send(self: &Arc<Self>, proxy: &XhrProxy, body: Option<Bytes>) -> Result<XhrOutput> {
        let handle = Handle::try_current().map_err(|_| {
            InterceptError::InvalidState("send requires a running tokio runtime".to_string())
        })?;
        let owned = self
            .proxy
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| InterceptError::InvalidState("instance was dropped".to_string()))?;
        let credentials = if proxy.with_credentials() {
            Credentials::Include
        } else {
            Credentials::SameOrigin
        };

        let request_id = RequestId::new();
        let request = {
            let mut state = self.state.lock();
            if state.phase != Phase::Opened {
                return Err(InterceptError::InvalidState(
                    "The object's state must be OPENED.".to_string(),
                ));
            }

            let url = state
                .url
                .clone()
                .ok_or_else(|| InterceptError::InvalidState("no url".to_string()))?;
            let body = body.filter(|_| state.method != Method::GET && state.method != Method::HEAD);
            let controller = AbortController::new();
            let init = RequestInit {
                method: Some(state.method.clone()),
                headers: header_pairs(&state.request_headers),
                body: body.clone(),
                credentials,
                signal: Some(controller.signal()),
            };
            let request = InteractiveRequest::new(Request::from_url(url, init)?);

            state.request_id = Some(request_id);
            state.request_body = body;
            state.request = Some(Arc::clone(request.request()));
            state.phase = Phase::Resolving;
            state.abort = Some(controller);
            request
        };

        self.hook_real_load(proxy, &handle);
        debug!(
            "[xhr] {} send {} {}",
            request_id,
            request.method(),
            request.url()
        );
        handle.spawn(Arc::clone(self).resolve(owned, request, request_id));
        Ok(XhrOutput::Unit)
    }

    fn abort(&self, proxy: &XhrProxy) {
        let (owned, request_id) = {
            let mut state = self.state.lock();
            if let Some(controller) = state.abort.take() {
                controller.abort_default();
            }
            state.buffer.clear();
            let owned = matches!(state.phase, Phase::Resolving | Phase::Mocked);
            if owned {
                state.phase = Phase::Done;
            }
            (owned, state.request_id)
        };

        if let (true, Some(request_id)) = (owned, request_id) {
            debug!("[xhr] {} aborted", request_id);
            self.set_ready_state(proxy, ReadyState::Done);
            self.dispatch(XhrEventKind::Abort);
            self.dispatch(XhrEventKind::LoadEnd);
        }
    }

    /// Emit the response event when the real instance finishes a
    /// passthrough request
    fn hook_real_load(self: &Arc<Self>, proxy: &XhrProxy, handle: &Handle) {
        {
            let mut state = self.state.lock();
            if state.load_hooked {
                return;
            }
            state.load_hooked = true;
        }

        let inner = Arc::downgrade(self);
        let handle = handle.clone();
        proxy.target().add_event_listener(
            XhrEventKind::Load,
            xhr_listener(move |_| {
                if let Some(inner) = inner.upgrade() {
                    inner.on_real_load(&handle);
                }
            }),
        );
    }

    fn on_real_load(self: &Arc<Self>, handle: &Handle) {
        let (request, request_id) = {
            let mut state = self.state.lock();
            if state.phase != Phase::Passthrough {
                return;
            }
            state.phase = Phase::Done;
            (state.request.clone(), state.request_id)
        };
        let (Some(request), Some(request_id), Some(proxy)) =
            (request, request_id, self.proxy.get().and_then(Weak::upgrade))
        else {
            return;
        };

        let response = match snapshot_response(proxy.target().as_ref()) {
            Ok(response) => response,
            Err(e) => {
                warn!("[xhr] {} could not read the real response: {}", request_id, e);
                return;
            }
        };

        let inner = Arc::clone(self);
        handle.spawn(async move {
            inner.emit_response(response, false, request, request_id).await;
        });
    }

    fn dispatch(&self, kind: XhrEventKind) {
        self.listeners.dispatch(&XhrEvent::new(kind));
    }

    /// Advance the emulated ready state. Never moves backwards.
    fn set_ready_state(&self, proxy: &XhrProxy, next: ReadyState) {
        {
            let mut state = self.state.lock();
            if next <= state.ready_state {
                return;
            }
            state.ready_state = next;
        }
        proxy.define(XhrProperty::ReadyState, XhrValue::ReadyState(next));
        self.dispatch(XhrEventKind::ReadyStateChange);
    }

    fn transition(&self, from: Phase, to: Phase) -> bool {
        let mut state = self.state.lock();
        if state.phase != from {
            return false;
        }
        state.phase = to;
        true
    }

    fn fail(&self, proxy: &XhrProxy, from: Phase) {
        if !self.transition(from, Phase::Done) {
            return;
        }
        self.state.lock().buffer.clear();
        self.set_ready_state(proxy, ReadyState::Done);
        self.dispatch(XhrEventKind::Error);
        self.dispatch(XhrEventKind::LoadEnd);
        record("network_error");
    }

    async fn emit_response(
        &self,
        response: Response,
        is_mocked: bool,
        request: Arc<Request>,
        request_id: RequestId,
    ) {
        let event = InterceptorEvent::Response(ResponseEvent {
            response,
            is_mocked,
            request,
            request_id,
        });
        self.emitter.emit(InterceptorEventKind::Response, event).await;
    }

    async fn resolve(
        self: Arc<Self>,
        proxy: Arc<XhrProxy>,
        request: InteractiveRequest,
        request_id: RequestId,
    ) {
        match resolve_request(&self.emitter, &request, request_id, KIND).await {
            Resolution::Aborted(reason) => {
                debug!("[xhr] {} aborted: {}", request_id, reason);
                record("aborted");
            }
            Resolution::Failed(cause) => {
                debug!("[xhr] {} failed: {}", request_id, cause);
                self.fail(&proxy, Phase::Resolving);
            }
            Resolution::NetworkError => {
                debug!("[xhr] {} answered with a network error", request_id);
                self.fail(&proxy, Phase::Resolving);
            }
            Resolution::Mocked(response) => {
                self.respond_with(&proxy, response, &request, request_id).await;
            }
            Resolution::Passthrough => self.passthrough(&proxy, request_id),
        }
    }

    fn passthrough(&self, proxy: &XhrProxy, request_id: RequestId) {
        let body = {
            let mut state = self.state.lock();
            if state.phase != Phase::Resolving {
                return;
            }
            state.phase = Phase::Passthrough;
            state.request_body.clone()
        };

        debug!("[xhr] {} no mock, performing request as-is", request_id);
        if let Err(e) = proxy.target().send(body) {
            warn!("[xhr] {} real send failed: {}", request_id, e);
        }
        record("passthrough");
    }

    /// Emulate the response lifecycle from a mocked response
    async fn respond_with(
        &self,
        proxy: &XhrProxy,
        response: Response,
        request: &InteractiveRequest,
        request_id: RequestId,
    ) {
        let signal = request.signal().clone();
        let url = request.url().clone();
        {
            let mut state = self.state.lock();
            if state.phase != Phase::Resolving {
                return;
            }
            state.phase = Phase::Mocked;
            state.mocked = true;
            state.mock_headers = response.headers().clone();
        }

        debug!(
            "[xhr] {} mocked with {} {}",
            request_id,
            response.status(),
            response.status_text()
        );
        proxy.define(XhrProperty::Status, XhrValue::Status(response.status()));
        proxy.define(
            XhrProperty::StatusText,
            XhrValue::Text(response.status_text().to_string()),
        );
        proxy.define(XhrProperty::ResponseUrl, XhrValue::Text(url.to_string()));

        let total = headers::content_length(response.headers());
        self.listeners
            .dispatch(&XhrEvent::progress(XhrEventKind::LoadStart, 0, total));
        self.set_ready_state(proxy, ReadyState::HeadersReceived);
        self.set_ready_state(proxy, ReadyState::Loading);

        let observed = response.clone();
        let mut chunks = response.into_body().into_stream();
        let mut loaded = 0u64;
        loop {
            let chunk = tokio::select! {
                biased;

                _ = signal.aborted() => return,
                chunk = chunks.next() => chunk,
            };

            match chunk {
                None => break,
                Some(Ok(bytes)) if bytes.is_empty() => continue,
                Some(Ok(bytes)) => {
                    {
                        let mut state = self.state.lock();
                        if state.phase != Phase::Mocked {
                            return;
                        }
                        state.buffer.extend_from_slice(&bytes);
                    }
                    loaded += bytes.len() as u64;
                    self.listeners
                        .dispatch(&XhrEvent::progress(XhrEventKind::Progress, loaded, total));
                }
                Some(Err(e)) => {
                    warn!("[xhr] {} mocked body failed: {}", request_id, e);
                    self.fail(proxy, Phase::Mocked);
                    return;
                }
            }
        }

        if !self.transition(Phase::Mocked, Phase::Done) {
            return;
        }
        self.set_ready_state(proxy, ReadyState::Done);
        self.listeners
            .dispatch(&XhrEvent::progress(XhrEventKind::Load, loaded, total));
        self.emit_response(
            observed.with_url(url),
            true,
            Arc::clone(request.request()),
            request_id,
        )
        .await;
        record("mocked");
        self.listeners
            .dispatch(&XhrEvent::progress(XhrEventKind::LoadEnd, loaded, total));
    }
}
