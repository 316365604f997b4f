// packages/engine/src/message/response.rs
//! Response record
//!
//! A [`Response`] is either built by a listener (mocked) or produced by the
//! real client (passthrough). The error marker returned by
//! [`Response::error`] asks the intercepted client to fail the call as a
//! network error instead of returning a response.

use crate::message::body::Body;
use crate::message::headers;
use crate::utils::errors::{InterceptError, Result};
use hyper::header::{HeaderMap, CONTENT_TYPE};
use hyper::StatusCode;
use serde::Serialize;
use url::Url;

/// Statuses whose responses never carry a body
pub const BODYLESS_STATUSES: [u16; 5] = [101, 103, 204, 205, 304];

pub fn is_bodyless_status(status: u16) -> bool {
    BODYLESS_STATUSES.contains(&status)
}

/// Response classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Basic,
    /// Network error marker
    Error,
}

/// Response returned to the caller or supplied by a listener
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    status_text: String,
    headers: HeaderMap,
    body: Body,
    kind: ResponseKind,
    url: Option<Url>,
}

impl Response {
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder::default()
    }

    /// 200 response with the given body
    pub fn new(body: impl Into<Body>) -> Self {
        Self {
            status: 200,
            status_text: default_status_text(200),
            headers: HeaderMap::new(),
            body: body.into(),
            kind: ResponseKind::Basic,
            url: None,
        }
    }

    /// Network error marker
    pub fn error() -> Self {
        Self {
            status: 0,
            status_text: String::new(),
            headers: HeaderMap::new(),
            body: Body::empty(),
            kind: ResponseKind::Error,
            url: None,
        }
    }

    /// 200 response with a JSON body and content type
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value).map_err(|e| InterceptError::Body(e.to_string()))?;
        Self::builder()
            .header(CONTENT_TYPE.as_str(), "application/json")
            .body(body)
            .build()
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Whether the status is in the 2xx range
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<String> {
        headers::get_joined(&self.headers, name)
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    pub fn is_error(&self) -> bool {
        self.kind == ResponseKind::Error
    }

    /// URL of the request that produced this response
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Attach the originating request URL
    pub(crate) fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    pub async fn bytes(self) -> Result<bytes::Bytes> {
        self.body.bytes().await
    }

    pub async fn text(self) -> Result<String> {
        self.body.text().await
    }

    pub async fn json_body<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        self.body.json().await
    }
}

fn default_status_text(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or_default()
        .to_string()
}

/// Builder for [`Response`]
#[derive(Debug, Default)]
pub struct ResponseBuilder {
    status: Option<u16>,
    status_text: Option<String>,
    headers: Vec<(String, String)>,
    body: Body,
    url: Option<Url>,
}

impl ResponseBuilder {
    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn status_text(mut self, status_text: impl Into<String>) -> Self {
        self.status_text = Some(status_text.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub(crate) fn url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn build(self) -> Result<Response> {
        let status = self.status.unwrap_or(200);
        if !(100..=599).contains(&status) {
            return Err(InterceptError::InvalidRequest(format!(
                "status {} is outside the range [100, 599]",
                status
            )));
        }

        let body = if is_bodyless_status(status) {
            Body::empty()
        } else {
            self.body
        };

        Ok(Response {
            status,
            status_text: self
                .status_text
                .unwrap_or_else(|| default_status_text(status)),
            headers: headers::header_map(self.headers)?,
            body,
            kind: ResponseKind::Basic,
            url: self.url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builder_defaults() {
        let response = Response::builder().body("ok").build().unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.status_text(), "OK");
        assert!(response.ok());
        assert!(response.url().is_none());
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_bodyless_status_drops_body() {
        let response = Response::builder()
            .status(204)
            .body("ignored")
            .build()
            .unwrap();
        assert!(response.body().is_empty());
        assert_eq!(response.text().await.unwrap(), "");
    }

    #[test]
    fn test_invalid_status() {
        assert!(Response::builder().status(42).build().is_err());
        assert!(Response::builder().status(600).build().is_err());
    }

    #[test]
    fn test_error_marker() {
        let response = Response::error();
        assert!(response.is_error());
        assert_eq!(response.status(), 0);
        assert!(!response.ok());
    }

    #[tokio::test]
    async fn test_json_response() {
        let response = Response::json(&serde_json::json!({"name": "john"})).unwrap();
        assert_eq!(response.header("content-type").as_deref(), Some("application/json"));
        let value: serde_json::Value = response.json_body().await.unwrap();
        assert_eq!(value["name"], "john");
    }

    #[test]
    fn test_custom_status_text_and_url() {
        let url = Url::parse("http://x/y").unwrap();
        let response = Response::builder()
            .status(418)
            .status_text("Short and stout")
            .build()
            .unwrap()
            .with_url(url.clone());
        assert_eq!(response.status_text(), "Short and stout");
        assert_eq!(response.url(), Some(&url));
    }
}
