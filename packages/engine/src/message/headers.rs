// packages/engine/src/message/headers.rs
//! Header helpers
//!
//! Headers are kept in a hyper [`HeaderMap`]: names are case-insensitive and
//! iterate in insertion order.

use crate::utils::errors::{InterceptError, Result};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};

/// Build a header map from name/value pairs, appending repeated names
pub fn header_map<I, N, V>(pairs: I) -> Result<HeaderMap>
where
    I: IntoIterator<Item = (N, V)>,
    N: AsRef<str>,
    V: AsRef<str>,
{
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        append(&mut headers, name.as_ref(), value.as_ref())?;
    }
    Ok(headers)
}

/// Append one header, validating name and value
pub fn append(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let (name, value) = parse_pair(name, value)?;
    headers.append(name, value);
    Ok(())
}

/// Set one header, replacing previous values
pub fn set(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let (name, value) = parse_pair(name, value)?;
    headers.insert(name, value);
    Ok(())
}

fn parse_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|_| InterceptError::InvalidRequest(format!("invalid header name: {:?}", name)))?;
    let value = HeaderValue::from_str(value.trim()).map_err(|_| {
        InterceptError::InvalidRequest(format!("invalid header value for {}", name))
    })?;
    Ok((name, value))
}

/// Value of `name`, with repeated values joined by ", "
pub fn get_joined(headers: &HeaderMap, name: &str) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

/// Render headers as a raw `name: value` block separated by CRLF
pub fn to_raw(headers: &HeaderMap) -> String {
    headers
        .keys()
        .filter_map(|name| get_joined(headers, name.as_str()).map(|v| format!("{}: {}", name, v)))
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// Parse a raw header block as produced by `getAllResponseHeaders`.
/// Malformed lines are skipped.
pub fn parse_raw(raw: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for line in raw.split(['\r', '\n']) {
        if line.trim().is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let _ = append(&mut headers, name, value);
    }
    headers
}

/// Declared body length, if present and numeric
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

pub fn content_type(headers: &HeaderMap) -> Option<String> {
    get_joined(headers, CONTENT_TYPE.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_and_ordered() {
        let headers = header_map([
            ("X-First", "1"),
            ("content-type", "text/plain"),
            ("x-first", "2"),
        ])
        .unwrap();

        assert_eq!(get_joined(&headers, "x-FIRST").as_deref(), Some("1, 2"));
        assert_eq!(to_raw(&headers), "x-first: 1, 2\r\ncontent-type: text/plain");
    }

    #[test]
    fn test_invalid_header_name() {
        let err = header_map([("bad header", "x")]).unwrap_err();
        assert!(matches!(err, InterceptError::InvalidRequest(_)));
    }

    #[test]
    fn test_parse_raw() {
        let headers = parse_raw("Content-Type: application/json\r\nX-Trace: a: b\r\n\r\ngarbage\n");
        assert_eq!(content_type(&headers).as_deref(), Some("application/json"));
        assert_eq!(get_joined(&headers, "x-trace").as_deref(), Some("a: b"));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_content_length() {
        let headers = header_map([("Content-Length", " 42 ")]).unwrap();
        assert_eq!(content_length(&headers), Some(42));
        assert_eq!(content_length(&HeaderMap::new()), None);
    }
}
