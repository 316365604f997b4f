// packages/engine/src/interception/xhr/body.rs
//! XHR response body interpretation
//!
//! The same buffered bytes are exposed differently depending on the
//! instance's `responseType`. Accessors that do not match the declared type
//! fail with an invalid-state error instead of coercing.

use crate::interception::xhr::ReadyState;
use crate::utils::errors::{InterceptError, Result};
use bytes::Bytes;

/// Blob content type used when the response declares none
pub const DEFAULT_BLOB_TYPE: &str = "application/octet-stream";

/// Content types a DOM parser accepts
pub const DOM_PARSABLE_TYPES: [&str; 5] = [
    "application/xhtml+xml",
    "application/xml",
    "image/svg+xml",
    "text/html",
    "text/xml",
];

/// Declared interpretation of the response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// `""`: decoded text
    #[default]
    Default,
    Text,
    Json,
    ArrayBuffer,
    Blob,
    Document,
}

/// Markup document produced for DOM-parsable responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub content_type: String,
    pub source: String,
}

/// Value of the `response` accessor
#[derive(Debug, Clone, PartialEq)]
pub enum XhrResponseBody {
    /// Not done yet
    Null,
    Text(String),
    /// Parsed JSON; `Null` when the body is not valid JSON
    Json(serde_json::Value),
    ArrayBuffer(Bytes),
    Blob { bytes: Bytes, content_type: String },
    Document(Option<XmlDocument>),
}

/// MIME essence: lowercase type/subtype without parameters
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn is_dom_parsable(content_type: &str) -> bool {
    DOM_PARSABLE_TYPES.contains(&essence(content_type).as_str())
}

fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn decode_document(bytes: &[u8], content_type: Option<&str>) -> Option<XmlDocument> {
    let content_type = content_type.filter(|ct| is_dom_parsable(ct))?;
    Some(XmlDocument {
        content_type: essence(content_type),
        source: decode_text(bytes),
    })
}

/// `response` accessor
pub fn read_response(
    ready_state: ReadyState,
    response_type: ResponseType,
    bytes: &[u8],
    content_type: Option<&str>,
) -> XhrResponseBody {
    if ready_state != ReadyState::Done {
        return XhrResponseBody::Null;
    }

    match response_type {
        ResponseType::Json => XhrResponseBody::Json(
            serde_json::from_slice(bytes).unwrap_or(serde_json::Value::Null),
        ),
        ResponseType::ArrayBuffer => XhrResponseBody::ArrayBuffer(Bytes::copy_from_slice(bytes)),
        ResponseType::Blob => XhrResponseBody::Blob {
            bytes: Bytes::copy_from_slice(bytes),
            content_type: content_type.unwrap_or(DEFAULT_BLOB_TYPE).to_string(),
        },
        ResponseType::Document => XhrResponseBody::Document(decode_document(bytes, content_type)),
        ResponseType::Default | ResponseType::Text => XhrResponseBody::Text(decode_text(bytes)),
    }
}

/// `responseText` accessor
pub fn read_text(ready_state: ReadyState, response_type: ResponseType, bytes: &[u8]) -> Result<String> {
    if !matches!(response_type, ResponseType::Default | ResponseType::Text) {
        return Err(InterceptError::InvalidState(
            "responseText is only available when responseType is \"\" or \"text\"".to_string(),
        ));
    }
    if ready_state < ReadyState::Loading {
        return Ok(String::new());
    }
    Ok(decode_text(bytes))
}

/// `responseXML` accessor
pub fn read_xml(
    ready_state: ReadyState,
    response_type: ResponseType,
    bytes: &[u8],
    content_type: Option<&str>,
) -> Result<Option<XmlDocument>> {
    if !matches!(response_type, ResponseType::Default | ResponseType::Document) {
        return Err(InterceptError::InvalidState(
            "responseXML is only available when responseType is \"\" or \"document\"".to_string(),
        ));
    }
    if ready_state != ReadyState::Done {
        return Ok(None);
    }
    Ok(decode_document(bytes, content_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_is_null_until_done() {
        let body = read_response(ReadyState::Loading, ResponseType::Text, b"abc", None);
        assert_eq!(body, XhrResponseBody::Null);
    }

    #[test]
    fn test_response_interpretations() {
        let done = ReadyState::Done;
        assert_eq!(
            read_response(done, ResponseType::Default, b"hi", None),
            XhrResponseBody::Text("hi".to_string())
        );
        assert_eq!(
            read_response(done, ResponseType::Json, br#"{"a":1}"#, None),
            XhrResponseBody::Json(serde_json::json!({"a": 1}))
        );
        assert_eq!(
            read_response(done, ResponseType::Json, b"not json", None),
            XhrResponseBody::Json(serde_json::Value::Null)
        );
        assert_eq!(
            read_response(done, ResponseType::ArrayBuffer, b"\x00\x01", None),
            XhrResponseBody::ArrayBuffer(Bytes::from_static(b"\x00\x01"))
        );
    }

    #[test]
    fn test_blob_content_type() {
        let with_type = read_response(ReadyState::Done, ResponseType::Blob, b"x", Some("image/png"));
        assert_eq!(
            with_type,
            XhrResponseBody::Blob {
                bytes: Bytes::from_static(b"x"),
                content_type: "image/png".to_string()
            }
        );

        let without = read_response(ReadyState::Done, ResponseType::Blob, b"x", None);
        match without {
            XhrResponseBody::Blob { content_type, .. } => assert_eq!(content_type, DEFAULT_BLOB_TYPE),
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_response_text_rules() {
        assert!(matches!(
            read_text(ReadyState::Done, ResponseType::Json, b"{}"),
            Err(InterceptError::InvalidState(_))
        ));
        assert_eq!(read_text(ReadyState::HeadersReceived, ResponseType::Text, b"abc").unwrap(), "");
        assert_eq!(read_text(ReadyState::Loading, ResponseType::Default, b"ab").unwrap(), "ab");
    }

    #[test]
    fn test_response_xml_rules() {
        assert!(read_xml(ReadyState::Done, ResponseType::Text, b"", None).is_err());
        assert_eq!(read_xml(ReadyState::Loading, ResponseType::Document, b"<a/>", Some("text/xml")).unwrap(), None);

        let document = read_xml(ReadyState::Done, ResponseType::Default, b"<a/>", Some("text/xml; charset=utf-8"))
            .unwrap()
            .unwrap();
        assert_eq!(document.content_type, "text/xml");
        assert_eq!(document.source, "<a/>");

        assert_eq!(read_xml(ReadyState::Done, ResponseType::Default, b"{}", Some("application/json")).unwrap(), None);
    }

    #[test]
    fn test_dom_parsable() {
        assert!(is_dom_parsable("Text/HTML"));
        assert!(is_dom_parsable("image/svg+xml;charset=utf-8"));
        assert!(!is_dom_parsable("application/json"));
    }
}
