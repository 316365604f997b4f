// packages/engine/src/message/request.rs
//! Outbound request record

use crate::message::headers;
use crate::message::signal::AbortSignal;
use crate::utils::errors::{InterceptError, Result};
use bytes::Bytes;
use hyper::header::HeaderMap;
use hyper::Method;
use url::Url;

/// Credentials policy of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Credentials {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

/// Options used to build a [`Request`]
#[derive(Debug, Clone, Default)]
pub struct RequestInit {
    /// Method (default GET)
    pub method: Option<Method>,

    /// Header pairs, appended in order
    pub headers: Vec<(String, String)>,

    pub body: Option<Bytes>,

    pub credentials: Credentials,

    /// Cancellation signal (default: never aborted)
    pub signal: Option<AbortSignal>,
}

impl RequestInit {
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Immutable description of one outbound request
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
    credentials: Credentials,
    signal: AbortSignal,
}

impl Request {
    /// Build a request for an absolute URL
    pub fn new(url: &str, init: RequestInit) -> Result<Self> {
        Self::from_url(Url::parse(url)?, init)
    }

    /// Build a request, resolving `url` against `base` when it is relative
    pub fn with_base(url: &str, base: Option<&Url>, init: RequestInit) -> Result<Self> {
        let url = match base {
            Some(base) => base.join(url)?,
            None => Url::parse(url)?,
        };
        Self::from_url(url, init)
    }

    pub fn get(url: &str) -> Result<Self> {
        Self::new(url, RequestInit::default())
    }

    pub fn from_url(url: Url, init: RequestInit) -> Result<Self> {
        let method = init.method.unwrap_or(Method::GET);
        if init.body.is_some() && (method == Method::GET || method == Method::HEAD) {
            return Err(InterceptError::InvalidRequest(format!(
                "Request with {} method cannot have body",
                method
            )));
        }

        Ok(Self {
            method,
            url,
            headers: headers::header_map(init.headers)?,
            body: init.body,
            credentials: init.credentials,
            signal: init.signal.unwrap_or_default(),
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<String> {
        headers::get_joined(&self.headers, name)
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn credentials(&self) -> Credentials {
        self.credentials
    }

    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }
}
