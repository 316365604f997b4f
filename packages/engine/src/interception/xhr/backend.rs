// packages/engine/src/interception/xhr/backend.rs
//! Real XHR instance backed by a fetch client
//!
//! [`FetchXhr`] implements the stateful XHR surface on top of any
//! [`FetchClient`]: `send` runs the request on the current tokio runtime and
//! walks the ready states while the response body streams in.

use crate::interception::fetch::FetchClient;
use crate::interception::xhr::body::{self, ResponseType, XhrResponseBody, XmlDocument};
use crate::interception::xhr::events::{ListenerTable, XhrEvent, XhrEventKind, XhrListener};
use crate::interception::xhr::{ReadyState, XhrFactory, XmlHttpRequest};
use crate::message::headers;
use crate::message::{AbortController, AbortSignal, Credentials, Request, RequestInit, Response};
use crate::utils::errors::{InterceptError, Result};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use hyper::header::HeaderMap;
use hyper::Method;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::debug;
use url::Url;

#[derive(Default)]
struct XhrState {
    ready_state: ReadyState,
    method: Option<Method>,
    url: Option<Url>,
    request_headers: HeaderMap,
    sent: bool,
    response_type: ResponseType,
    with_credentials: bool,
    status: u16,
    status_text: String,
    response_url: Option<Url>,
    response_headers: HeaderMap,
    buffer: BytesMut,
    abort: Option<AbortController>,
}

impl XhrState {
    fn require_unsent_open(&self) -> Result<()> {
        if self.ready_state != ReadyState::Opened || self.sent {
            return Err(InterceptError::InvalidState(
                "The object's state must be OPENED.".to_string(),
            ));
        }
        Ok(())
    }
}

/// XHR instance performing its requests through a [`FetchClient`]
pub struct FetchXhr {
    this: Weak<FetchXhr>,
    client: Arc<dyn FetchClient>,
    listeners: ListenerTable,
    state: Mutex<XhrState>,
}

impl FetchXhr {
    pub fn new(client: Arc<dyn FetchClient>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            client,
            listeners: ListenerTable::new(),
            state: Mutex::new(XhrState::default()),
        })
    }

    fn dispatch(&self, kind: XhrEventKind) {
        self.listeners.dispatch(&XhrEvent::new(kind));
    }

    /// Move to `next` unless the request was aborted or superseded
    fn advance(&self, signal: &AbortSignal, next: ReadyState) -> bool {
        {
            let mut state = self.state.lock();
            if signal.is_aborted() {
                return false;
            }
            state.ready_state = next;
        }
        self.dispatch(XhrEventKind::ReadyStateChange);
        true
    }

    fn fail(&self, signal: &AbortSignal) {
        {
            let mut state = self.state.lock();
            if signal.is_aborted() {
                return;
            }
            state.ready_state = ReadyState::Done;
            state.status = 0;
            state.status_text.clear();
            state.response_headers.clear();
            state.buffer.clear();
            state.abort = None;
        }
        self.dispatch(XhrEventKind::ReadyStateChange);
        self.dispatch(XhrEventKind::Error);
        self.dispatch(XhrEventKind::LoadEnd);
    }

    async fn run(self: Arc<Self>, request: Request, signal: AbortSignal) {
        let url = request.url().clone();
        self.listeners
            .dispatch(&XhrEvent::progress(XhrEventKind::LoadStart, 0, None));

        let fetched = tokio::select! {
            biased;

            _ = signal.aborted() => return,
            fetched = self.client.fetch(request) => fetched,
        };

        let response = match fetched {
            Ok(response) if !response.is_error() => response,
            Ok(_) => {
                debug!("[xhr] {} failed with a network error", url);
                self.fail(&signal);
                return;
            }
            Err(e) if e.is_aborted() => return,
            Err(e) => {
                debug!("[xhr] {} failed: {}", url, e);
                self.fail(&signal);
                return;
            }
        };

        let total = headers::content_length(response.headers());
        {
            let mut state = self.state.lock();
            if signal.is_aborted() {
                return;
            }
            state.status = response.status();
            state.status_text = response.status_text().to_string();
            state.response_headers = response.headers().clone();
            state.response_url = Some(response.url().cloned().unwrap_or(url));
        }

        if !self.advance(&signal, ReadyState::HeadersReceived)
            || !self.advance(&signal, ReadyState::Loading)
        {
            return;
        }

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
                        if signal.is_aborted() {
                            return;
                        }
                        state.buffer.extend_from_slice(&bytes);
                    }
                    loaded += bytes.len() as u64;
                    self.listeners
                        .dispatch(&XhrEvent::progress(XhrEventKind::Progress, loaded, total));
                }
                Some(Err(e)) => {
                    debug!("[xhr] body stream failed: {}", e);
                    self.fail(&signal);
                    return;
                }
            }
        }

        if !self.advance(&signal, ReadyState::Done) {
            return;
        }
        self.state.lock().abort = None;
        self.listeners
            .dispatch(&XhrEvent::progress(XhrEventKind::Load, loaded, total));
        self.listeners
            .dispatch(&XhrEvent::progress(XhrEventKind::LoadEnd, loaded, total));
    }
}

impl XmlHttpRequest for FetchXhr {
    fn open(&self, method: &str, url: &str) -> Result<()> {
        let url = Url::parse(url)?;
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| InterceptError::InvalidRequest(format!("invalid method: {:?}", method)))?;

        {
            let mut state = self.state.lock();
            if let Some(previous) = state.abort.take() {
                previous.abort_default();
            }
            let response_type = state.response_type;
            let with_credentials = state.with_credentials;
            *state = XhrState {
                ready_state: ReadyState::Opened,
                method: Some(method),
                url: Some(url),
                response_type,
                with_credentials,
                ..XhrState::default()
            };
        }
        self.dispatch(XhrEventKind::ReadyStateChange);
        Ok(())
    }

    fn set_request_header(&self, name: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.require_unsent_open()?;
        headers::append(&mut state.request_headers, name, value)
    }

    fn send(&self, body: Option<Bytes>) -> Result<()> {
        let handle = Handle::try_current().map_err(|_| {
            InterceptError::InvalidState("send requires a running tokio runtime".to_string())
        })?;
        let this = self
            .this
            .upgrade()
            .ok_or_else(|| InterceptError::InvalidState("instance was dropped".to_string()))?;

        let (request, signal) = {
            let mut state = self.state.lock();
            state.require_unsent_open()?;

            let method = state.method.clone().unwrap_or(Method::GET);
            let url = state
                .url
                .clone()
                .ok_or_else(|| InterceptError::InvalidState("no url".to_string()))?;
            let body = body.filter(|_| method != Method::GET && method != Method::HEAD);
            let controller = AbortController::new();
            let signal = controller.signal();

            let init = RequestInit {
                method: Some(method),
                headers: header_pairs(&state.request_headers),
                body,
                credentials: if state.with_credentials {
                    Credentials::Include
                } else {
                    Credentials::SameOrigin
                },
                signal: Some(signal.clone()),
            };
            let request = Request::from_url(url, init)?;

            state.sent = true;
            state.abort = Some(controller);
            (request, signal)
        };

        debug!("[xhr] sending {} {}", request.method(), request.url());
        handle.spawn(this.run(request, signal));
        Ok(())
    }

    fn abort(&self) {
        let in_flight = {
            let mut state = self.state.lock();
            let in_flight = state.sent && state.ready_state != ReadyState::Done;
            if let Some(controller) = state.abort.take() {
                controller.abort_default();
            }
            if in_flight {
                state.ready_state = ReadyState::Done;
                state.status = 0;
                state.buffer.clear();
            }
            in_flight
        };

        if in_flight {
            self.dispatch(XhrEventKind::ReadyStateChange);
            self.dispatch(XhrEventKind::Abort);
            self.dispatch(XhrEventKind::LoadEnd);
        }
    }

    fn add_event_listener(&self, kind: XhrEventKind, listener: XhrListener) {
        self.listeners.add(kind, listener);
    }

    fn remove_event_listener(&self, kind: XhrEventKind, listener: &XhrListener) {
        self.listeners.remove(kind, listener);
    }

    fn set_handler(&self, kind: XhrEventKind, handler: Option<XhrListener>) {
        self.listeners.set_handler(kind, handler);
    }

    fn handler(&self, kind: XhrEventKind) -> Option<XhrListener> {
        self.listeners.handler(kind)
    }

    fn get_response_header(&self, name: &str) -> Option<String> {
        let state = self.state.lock();
        if state.ready_state < ReadyState::HeadersReceived {
            return None;
        }
        headers::get_joined(&state.response_headers, name)
    }

    fn get_all_response_headers(&self) -> String {
        let state = self.state.lock();
        if state.ready_state < ReadyState::HeadersReceived {
            return String::new();
        }
        headers::to_raw(&state.response_headers)
    }

    fn ready_state(&self) -> ReadyState {
        self.state.lock().ready_state
    }

    fn status(&self) -> u16 {
        self.state.lock().status
    }

    fn status_text(&self) -> String {
        self.state.lock().status_text.clone()
    }

    fn response_url(&self) -> String {
        self.state
            .lock()
            .response_url
            .as_ref()
            .map(Url::to_string)
            .unwrap_or_default()
    }

    fn response_type(&self) -> ResponseType {
        self.state.lock().response_type
    }

    fn set_response_type(&self, response_type: ResponseType) -> Result<()> {
        let mut state = self.state.lock();
        if state.ready_state >= ReadyState::Loading {
            return Err(InterceptError::InvalidState(
                "responseType cannot be changed while loading or done".to_string(),
            ));
        }
        state.response_type = response_type;
        Ok(())
    }

    fn with_credentials(&self) -> bool {
        self.state.lock().with_credentials
    }

    fn set_with_credentials(&self, with_credentials: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.ready_state > ReadyState::Opened || state.sent {
            return Err(InterceptError::InvalidState(
                "withCredentials can only be set before send".to_string(),
            ));
        }
        state.with_credentials = with_credentials;
        Ok(())
    }

    fn response(&self) -> Result<XhrResponseBody> {
        let state = self.state.lock();
        let content_type = headers::content_type(&state.response_headers);
        Ok(body::read_response(
            state.ready_state,
            state.response_type,
            &state.buffer,
            content_type.as_deref(),
        ))
    }

    fn response_text(&self) -> Result<String> {
        let state = self.state.lock();
        body::read_text(state.ready_state, state.response_type, &state.buffer)
    }

    fn response_xml(&self) -> Result<Option<XmlDocument>> {
        let state = self.state.lock();
        let content_type = headers::content_type(&state.response_headers);
        body::read_xml(
            state.ready_state,
            state.response_type,
            &state.buffer,
            content_type.as_deref(),
        )
    }

    fn response_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.state.lock().buffer)
    }
}

pub(crate) fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.to_string(), value.to_string()))
        })
        .collect()
}

/// Build a [`Response`] snapshot from a settled XHR instance
pub(crate) fn snapshot_response(xhr: &dyn XmlHttpRequest) -> Result<Response> {
    let mut builder = Response::builder()
        .status(xhr.status())
        .status_text(xhr.status_text())
        .body(xhr.response_bytes());
    let raw = xhr.get_all_response_headers();
    let parsed = headers::parse_raw(&raw);
    for (name, value) in parsed.iter() {
        if let Ok(value) = value.to_str() {
            builder = builder.header(name.as_str(), value);
        }
    }
    if let Ok(url) = Url::parse(&xhr.response_url()) {
        builder = builder.url(url);
    }
    builder.build()
}

/// Constructor producing [`FetchXhr`] instances
pub struct FetchXhrFactory {
    client: Arc<dyn FetchClient>,
}

impl FetchXhrFactory {
    pub fn new(client: Arc<dyn FetchClient>) -> Self {
        Self { client }
    }
}

impl XhrFactory for FetchXhrFactory {
    fn create(&self) -> Arc<dyn XmlHttpRequest> {
        FetchXhr::new(Arc::clone(&self.client))
    }
}
