// packages/engine/src/interception/xhr/target.rs
//! Reified XHR interface
//!
//! Every method and property of [`XmlHttpRequest`] is expressed as a value so
//! a [`CallProxy`] can route it through hooks. The proxy itself implements
//! [`XmlHttpRequest`], which is what callers of an intercepted constructor
//! receive.

use crate::interception::xhr::body::{ResponseType, XhrResponseBody, XmlDocument};
use crate::interception::xhr::events::{XhrEventKind, XhrListener};
use crate::interception::xhr::{ReadyState, XmlHttpRequest};
use crate::utils::errors::{InterceptError, Result};
use crate::utils::proxy::{CallProxy, ProxyTarget};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// A method call on an XHR instance
pub enum XhrCall {
    Open { method: String, url: String },
    SetRequestHeader { name: String, value: String },
    Send(Option<Bytes>),
    Abort,
    AddEventListener(XhrEventKind, XhrListener),
    RemoveEventListener(XhrEventKind, XhrListener),
    GetResponseHeader(String),
    GetAllResponseHeaders,
}

impl fmt::Debug for XhrCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { method, url } => write!(f, "Open({} {})", method, url),
            Self::SetRequestHeader { name, value } => {
                write!(f, "SetRequestHeader({}: {})", name, value)
            }
            Self::Send(body) => write!(f, "Send({} bytes)", body.as_ref().map_or(0, |b| b.len())),
            Self::Abort => f.write_str("Abort"),
            Self::AddEventListener(kind, _) => write!(f, "AddEventListener({})", kind),
            Self::RemoveEventListener(kind, _) => write!(f, "RemoveEventListener({})", kind),
            Self::GetResponseHeader(name) => write!(f, "GetResponseHeader({})", name),
            Self::GetAllResponseHeaders => f.write_str("GetAllResponseHeaders"),
        }
    }
}

/// Return value of an [`XhrCall`]
#[derive(Debug, Clone, PartialEq)]
pub enum XhrOutput {
    Unit,
    Header(Option<String>),
    Headers(String),
}

/// Readable properties of an XHR instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XhrProperty {
    ReadyState,
    Status,
    StatusText,
    ResponseUrl,
    ResponseType,
    WithCredentials,
    Response,
    ResponseText,
    ResponseXml,
    /// Raw body bytes
    ResponseBytes,
    /// The `on<event>` handler
    Handler(XhrEventKind),
}

/// Property values
#[derive(Clone)]
pub enum XhrValue {
    ReadyState(ReadyState),
    Status(u16),
    Text(String),
    ResponseType(ResponseType),
    Bool(bool),
    Body(XhrResponseBody),
    Document(Option<XmlDocument>),
    Bytes(Bytes),
    Handler(Option<XhrListener>),
}

impl fmt::Debug for XhrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadyState(state) => write!(f, "ReadyState({:?})", state),
            Self::Status(status) => write!(f, "Status({})", status),
            Self::Text(text) => write!(f, "Text({:?})", text),
            Self::ResponseType(rt) => write!(f, "ResponseType({:?})", rt),
            Self::Bool(value) => write!(f, "Bool({})", value),
            Self::Body(body) => write!(f, "Body({:?})", body),
            Self::Document(document) => write!(f, "Document({:?})", document),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Handler(handler) => write!(f, "Handler(set: {})", handler.is_some()),
        }
    }
}

fn mismatch(property: XhrProperty, value: &XhrValue) -> InterceptError {
    InterceptError::InvalidState(format!("cannot assign {:?} to {:?}", value, property))
}

impl<'a> ProxyTarget for Arc<dyn XmlHttpRequest + 'a> {
    type Call = XhrCall;
    type Output = Result<XhrOutput>;
    type Property = XhrProperty;
    type Value = XhrValue;

    fn invoke(&self, call: XhrCall) -> Result<XhrOutput> {
        match call {
            XhrCall::Open { method, url } => self.open(&method, &url).map(|_| XhrOutput::Unit),
            XhrCall::SetRequestHeader { name, value } => self
                .set_request_header(&name, &value)
                .map(|_| XhrOutput::Unit),
            XhrCall::Send(body) => self.send(body).map(|_| XhrOutput::Unit),
            XhrCall::Abort => {
                self.abort();
                Ok(XhrOutput::Unit)
            }
            XhrCall::AddEventListener(kind, listener) => {
                self.add_event_listener(kind, listener);
                Ok(XhrOutput::Unit)
            }
            XhrCall::RemoveEventListener(kind, listener) => {
                self.remove_event_listener(kind, &listener);
                Ok(XhrOutput::Unit)
            }
            XhrCall::GetResponseHeader(name) => {
                Ok(XhrOutput::Header(self.get_response_header(&name)))
            }
            XhrCall::GetAllResponseHeaders => Ok(XhrOutput::Headers(self.get_all_response_headers())),
        }
    }

    fn get(&self, property: XhrProperty) -> Result<XhrValue> {
        Ok(match property {
            XhrProperty::ReadyState => XhrValue::ReadyState(self.ready_state()),
            XhrProperty::Status => XhrValue::Status(self.status()),
            XhrProperty::StatusText => XhrValue::Text(self.status_text()),
            XhrProperty::ResponseUrl => XhrValue::Text(self.response_url()),
            XhrProperty::ResponseType => XhrValue::ResponseType(self.response_type()),
            XhrProperty::WithCredentials => XhrValue::Bool(self.with_credentials()),
            XhrProperty::Response => XhrValue::Body(self.response()?),
            XhrProperty::ResponseText => XhrValue::Text(self.response_text()?),
            XhrProperty::ResponseXml => XhrValue::Document(self.response_xml()?),
            XhrProperty::ResponseBytes => XhrValue::Bytes(self.response_bytes()),
            XhrProperty::Handler(kind) => XhrValue::Handler(self.handler(kind)),
        })
    }

    fn set(&self, property: XhrProperty, value: XhrValue) -> Result<bool> {
        match (property, value) {
            (XhrProperty::ResponseType, XhrValue::ResponseType(rt)) => {
                self.set_response_type(rt)?;
                Ok(true)
            }
            (XhrProperty::WithCredentials, XhrValue::Bool(value)) => {
                self.set_with_credentials(value)?;
                Ok(true)
            }
            (XhrProperty::Handler(kind), XhrValue::Handler(handler)) => {
                self.set_handler(kind, handler);
                Ok(true)
            }
            (XhrProperty::ResponseType, value)
            | (XhrProperty::WithCredentials, value)
            | (XhrProperty::Handler(_), value) => Err(mismatch(property, &value)),
            // Read-only on the target
            _ => Ok(false),
        }
    }
}

impl XmlHttpRequest for CallProxy<Arc<dyn XmlHttpRequest>> {
    fn open(&self, method: &str, url: &str) -> Result<()> {
        self.call(XhrCall::Open {
            method: method.to_string(),
            url: url.to_string(),
        })
        .map(|_| ())
    }

    fn set_request_header(&self, name: &str, value: &str) -> Result<()> {
        self.call(XhrCall::SetRequestHeader {
            name: name.to_string(),
            value: value.to_string(),
        })
        .map(|_| ())
    }

    fn send(&self, body: Option<Bytes>) -> Result<()> {
        self.call(XhrCall::Send(body)).map(|_| ())
    }

    fn abort(&self) {
        let _ = self.call(XhrCall::Abort);
    }

    fn add_event_listener(&self, kind: XhrEventKind, listener: XhrListener) {
        let _ = self.call(XhrCall::AddEventListener(kind, listener));
    }

    fn remove_event_listener(&self, kind: XhrEventKind, listener: &XhrListener) {
        let _ = self.call(XhrCall::RemoveEventListener(kind, Arc::clone(listener)));
    }

    fn set_handler(&self, kind: XhrEventKind, handler: Option<XhrListener>) {
        let _ = self.set(XhrProperty::Handler(kind), XhrValue::Handler(handler));
    }

    fn handler(&self, kind: XhrEventKind) -> Option<XhrListener> {
        match self.get(XhrProperty::Handler(kind)) {
            Ok(XhrValue::Handler(handler)) => handler,
            _ => self.target().handler(kind),
        }
    }

    fn get_response_header(&self, name: &str) -> Option<String> {
        match self.call(XhrCall::GetResponseHeader(name.to_string())) {
            Ok(XhrOutput::Header(value)) => value,
            _ => None,
        }
    }

    fn get_all_response_headers(&self) -> String {
        match self.call(XhrCall::GetAllResponseHeaders) {
            Ok(XhrOutput::Headers(raw)) => raw,
            _ => String::new(),
        }
    }

    fn ready_state(&self) -> ReadyState {
        match self.get(XhrProperty::ReadyState) {
            Ok(XhrValue::ReadyState(state)) => state,
            _ => self.target().ready_state(),
        }
    }

    fn status(&self) -> u16 {
        match self.get(XhrProperty::Status) {
            Ok(XhrValue::Status(status)) => status,
            _ => self.target().status(),
        }
    }

    fn status_text(&self) -> String {
        match self.get(XhrProperty::StatusText) {
            Ok(XhrValue::Text(text)) => text,
            _ => self.target().status_text(),
        }
    }

    fn response_url(&self) -> String {
        match self.get(XhrProperty::ResponseUrl) {
            Ok(XhrValue::Text(url)) => url,
            _ => self.target().response_url(),
        }
    }

    fn response_type(&self) -> ResponseType {
        match self.get(XhrProperty::ResponseType) {
            Ok(XhrValue::ResponseType(rt)) => rt,
            _ => self.target().response_type(),
        }
    }

    fn set_response_type(&self, response_type: ResponseType) -> Result<()> {
        self.set(XhrProperty::ResponseType, XhrValue::ResponseType(response_type))
    }

    fn with_credentials(&self) -> bool {
        match self.get(XhrProperty::WithCredentials) {
            Ok(XhrValue::Bool(value)) => value,
            _ => self.target().with_credentials(),
        }
    }

    fn set_with_credentials(&self, with_credentials: bool) -> Result<()> {
        self.set(XhrProperty::WithCredentials, XhrValue::Bool(with_credentials))
    }

    fn response(&self) -> Result<XhrResponseBody> {
        match self.get(XhrProperty::Response)? {
            XhrValue::Body(body) => Ok(body),
            other => Err(mismatch(XhrProperty::Response, &other)),
        }
    }

    fn response_text(&self) -> Result<String> {
        match self.get(XhrProperty::ResponseText)? {
            XhrValue::Text(text) => Ok(text),
            other => Err(mismatch(XhrProperty::ResponseText, &other)),
        }
    }

    fn response_xml(&self) -> Result<Option<XmlDocument>> {
        match self.get(XhrProperty::ResponseXml)? {
            XhrValue::Document(document) => Ok(document),
            other => Err(mismatch(XhrProperty::ResponseXml, &other)),
        }
    }

    fn response_bytes(&self) -> Bytes {
        match self.get(XhrProperty::ResponseBytes) {
            Ok(XhrValue::Bytes(bytes)) => bytes,
            _ => self.target().response_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interception::fetch::FetchClient;
    use crate::interception::xhr::backend::FetchXhr;
    use crate::message::{Request, Response};
    use crate::utils::proxy::PropertySource;
    use async_trait::async_trait;

    struct NoopClient;

    #[async_trait]
    impl FetchClient for NoopClient {
        async fn fetch(&self, _request: Request) -> Result<Response> {
            Ok(Response::new(""))
        }
    }

    fn transparent() -> CallProxy<Arc<dyn XmlHttpRequest>> {
        let real: Arc<dyn XmlHttpRequest> = FetchXhr::new(Arc::new(NoopClient));
        CallProxy::transparent(real)
    }

    #[test]
    fn test_transparent_proxy_forwards() {
        let proxy = transparent();
        proxy.open("GET", "http://x/").unwrap();
        assert_eq!(proxy.ready_state(), ReadyState::Opened);
        assert_eq!(proxy.target().ready_state(), ReadyState::Opened);
        assert_eq!(proxy.get_response_header("x"), None);
    }

    #[test]
    fn test_writable_properties_reach_the_target() {
        let proxy = transparent();
        proxy.set_response_type(ResponseType::Json).unwrap();
        proxy.set_with_credentials(true).unwrap();

        assert_eq!(proxy.property_source(XhrProperty::ResponseType), PropertySource::Target);
        assert_eq!(proxy.target().response_type(), ResponseType::Json);
        assert!(proxy.target().with_credentials());
    }

    #[test]
    fn test_read_only_properties_are_shadowed() {
        let proxy = transparent();
        proxy
            .set(XhrProperty::Status, XhrValue::Status(418))
            .unwrap();
        assert_eq!(proxy.status(), 418);
        assert_eq!(proxy.target().status(), 0);
    }

    #[test]
    fn test_mismatched_value_is_rejected() {
        let proxy = transparent();
        let err = proxy
            .set(XhrProperty::ResponseType, XhrValue::Bool(true))
            .unwrap_err();
        assert!(matches!(err, InterceptError::InvalidState(_)));
    }
}
