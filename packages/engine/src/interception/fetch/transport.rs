// packages/engine/src/interception/fetch/transport.rs
//! Passthrough fetch client backed by hyper
//!
//! Sends requests over plain HTTP with the hyper-util legacy client, buffers
//! the response body, and honours the request's abort signal and a per-request
//! timeout. TLS is out of scope; `https` URLs are rejected.

use crate::interception::fetch::FetchClient;
use crate::message::{Request, Response};
use crate::utils::errors::{InterceptError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::debug;

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Real fetch client
pub struct HyperFetchClient {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl HyperFetchClient {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn exchange(&self, request: &Request) -> Result<(hyper::http::response::Parts, Bytes)> {
        let body = request.body().cloned().unwrap_or_default();
        let mut outgoing = hyper::Request::builder()
            .method(request.method().clone())
            .uri(request.url().as_str())
            .body(Full::new(body))?;
        *outgoing.headers_mut() = request.headers().clone();

        let response = self
            .client
            .request(outgoing)
            .await
            .map_err(|e| InterceptError::Transport(format!("request failed: {}", e)))?;

        let (parts, body) = response.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| InterceptError::Body(format!("response body error: {}", e)))?
            .to_bytes();

        Ok((parts, bytes))
    }

    /// A zero timeout waits indefinitely
    async fn exchange_with_timeout(
        &self,
        request: &Request,
    ) -> Result<(hyper::http::response::Parts, Bytes)> {
        if self.timeout.is_zero() {
            return self.exchange(request).await;
        }
        tokio::time::timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| {
                InterceptError::Transport(format!("request timed out after {:?}", self.timeout))
            })?
    }
}

impl Default for HyperFetchClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl FetchClient for HyperFetchClient {
    async fn fetch(&self, request: Request) -> Result<Response> {
        let scheme = request.url().scheme();
        if scheme != "http" {
            return Err(InterceptError::Unsupported(format!(
                "{} requests are not supported by the passthrough client",
                scheme
            )));
        }

        debug!("Forwarding request: {} {}", request.method(), request.url());

        let signal = request.signal().clone();
        let (parts, bytes) = tokio::select! {
            biased;

            reason = signal.aborted() => return Err(InterceptError::aborted(reason)),
            result = self.exchange_with_timeout(&request) => result?,
        };

        debug!("Response: {} for {}", parts.status, request.url());

        let mut builder = Response::builder()
            .status(parts.status.as_u16())
            .url(request.url().clone())
            .body(bytes);
        for (name, value) in parts.headers.iter() {
            if let Ok(value) = value.to_str() {
                builder = builder.header(name.as_str(), value);
            }
        }
        builder.build()
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Local HTTP server for passthrough tests

    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Serve `real:<method>:<path>:<body>` for every path, except `/slow`
    /// which answers after five seconds
    pub(crate) async fn spawn() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let service = service_fn(|req: hyper::Request<Incoming>| async move {
                        let method = req.method().clone();
                        let path = req.uri().path().to_string();
                        if path == "/slow" {
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                        let body = req.into_body().collect().await.unwrap().to_bytes();
                        let text = format!(
                            "real:{}:{}:{}",
                            method,
                            path,
                            String::from_utf8_lossy(&body)
                        );
                        let response = hyper::Response::builder()
                            .status(200)
                            .header("content-type", "text/plain")
                            .header("x-served-by", "test-server")
                            .body(Full::new(Bytes::from(text)))
                            .unwrap();
                        Ok::<_, Infallible>(response)
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AbortController, RequestInit};
    use hyper::Method;

    #[tokio::test]
    async fn test_passthrough_request() {
        let addr = test_server::spawn().await;
        let client = HyperFetchClient::default();

        let request = Request::new(
            &format!("http://{}/echo", addr),
            RequestInit::default().method(Method::POST).body("ping"),
        )
        .unwrap();
        let response = client.fetch(request).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.header("x-served-by").as_deref(), Some("test-server"));
        assert_eq!(
            response.url().map(|u| u.path().to_string()).as_deref(),
            Some("/echo")
        );
        assert_eq!(response.text().await.unwrap(), "real:POST:/echo:ping");
    }

    #[tokio::test]
    async fn test_abort_while_waiting() {
        let addr = test_server::spawn().await;
        let client = HyperFetchClient::default();

        let controller = AbortController::new();
        let request = Request::new(
            &format!("http://{}/slow", addr),
            RequestInit::default().signal(controller.signal()),
        )
        .unwrap();

        let abort = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            abort.abort("gave up");
        });

        let err = client.fetch(request).await.unwrap_err();
        assert_eq!(err, InterceptError::aborted("gave up"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let addr = test_server::spawn().await;
        let client = HyperFetchClient::new(Duration::from_millis(50));

        let request = Request::get(&format!("http://{}/slow", addr)).unwrap();
        let err = client.fetch(request).await.unwrap_err();
        assert!(matches!(err, InterceptError::Transport(_)));
    }

    #[tokio::test]
    async fn test_zero_timeout_waits() {
        let addr = test_server::spawn().await;
        let client = HyperFetchClient::new(Duration::ZERO);

        let request = Request::get(&format!("http://{}/quick", addr)).unwrap();
        let response = client.fetch(request).await.unwrap();
        assert_eq!(response.text().await.unwrap(), "real:GET:/quick:");
    }

    #[tokio::test]
    async fn test_https_is_unsupported() {
        let client = HyperFetchClient::default();
        let err = client
            .fetch(Request::get("https://example.com/").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, InterceptError::Unsupported(_)));
    }
}
