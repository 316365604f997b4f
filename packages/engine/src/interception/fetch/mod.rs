// packages/engine/src/interception/fetch/mod.rs
//! Fetch interceptor
//!
//! Replaces the environment's fetch entry point with [`InterceptedFetch`].
//! Every call runs a `Request` round; listeners may answer with a mocked
//! response, and otherwise the call reaches the original client.
//!
//! # Example
//!
//! ```rust,no_run
//! use netintercept_engine::interception::{ClientEnvironment, FetchInterceptor};
//! use netintercept_engine::message::{Request, Response};
//! use std::sync::Arc;
//!
//! # async fn example() -> netintercept_engine::utils::Result<()> {
//! let env = Arc::new(ClientEnvironment::from_config(&Default::default())?);
//! let interceptor = FetchInterceptor::fetch(Arc::clone(&env));
//! interceptor.apply()?;
//!
//! interceptor.on_request(|event| async move {
//!     event.request.respond_with(Response::new("mocked"));
//!     Ok(())
//! });
//!
//! let response = env.fetch(Request::get("http://localhost/users")?).await?;
//! assert_eq!(response.text().await?, "mocked");
//! # Ok(())
//! # }
//! ```

pub mod transport;

pub use transport::HyperFetchClient;

use crate::interception::environment::ClientEnvironment;
use crate::interception::events::{
    HttpEmitter, InteractiveRequest, InterceptorEvent, InterceptorEventKind, RequestId,
    ResponseEvent,
};
use crate::interception::interceptor::{Interceptor, InterceptorSetup, Subscription};
use crate::interception::registry::InterceptorSymbol;
use crate::interception::resolver::{resolve_request, Resolution};
use crate::message::{Request, Response};
use crate::utils::errors::{InterceptError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

const KIND: &str = "fetch";

/// Promise-style HTTP client
#[async_trait]
pub trait FetchClient: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<Response>;

    /// Whether this client is an interceptor's patch
    fn is_patched(&self) -> bool {
        false
    }
}

/// Fetch entry point installed by [`FetchInterceptor`]
pub struct InterceptedFetch {
    pure: Arc<dyn FetchClient>,
    emitter: Arc<HttpEmitter>,
}

impl InterceptedFetch {
    pub fn new(pure: Arc<dyn FetchClient>, emitter: Arc<HttpEmitter>) -> Self {
        Self { pure, emitter }
    }

    async fn emit_response(
        &self,
        response: &Response,
        is_mocked: bool,
        request: &InteractiveRequest,
        request_id: RequestId,
    ) {
        let event = InterceptorEvent::Response(ResponseEvent {
            response: response.clone(),
            is_mocked,
            request: Arc::clone(request.request()),
            request_id,
        });
        self.emitter.emit(InterceptorEventKind::Response, event).await;
    }
}

fn record(outcome: &'static str) {
    metrics::counter!("intercept_requests_total", "kind" => KIND, "outcome" => outcome)
        .increment(1);
}

#[async_trait]
impl FetchClient for InterceptedFetch {
    async fn fetch(&self, request: Request) -> Result<Response> {
        let request_id = RequestId::new();
        let request = InteractiveRequest::new(request);
        debug!(
            "[fetch] {} {} {}",
            request_id,
            request.method(),
            request.url()
        );

        match resolve_request(&self.emitter, &request, request_id, KIND).await {
            Resolution::Aborted(reason) => {
                debug!("[fetch] {} aborted: {}", request_id, reason);
                record("aborted");
                Err(InterceptError::aborted(reason))
            }
            Resolution::Failed(cause) => {
                record("network_error");
                Err(InterceptError::network(cause))
            }
            Resolution::NetworkError => {
                debug!("[fetch] {} answered with a network error", request_id);
                record("network_error");
                Err(InterceptError::network("Network error"))
            }
            Resolution::Mocked(response) => {
                debug!("[fetch] {} mocked with {}", request_id, response.status());
                let response = response.with_url(request.url().clone());
                self.emit_response(&response, true, &request, request_id)
                    .await;
                record("mocked");
                Ok(response)
            }
            Resolution::Passthrough => {
                debug!("[fetch] {} no mock, performing request as-is", request_id);
                let response = self.pure.fetch((**request.request()).clone()).await?;
                self.emit_response(&response, false, &request, request_id)
                    .await;
                record("passthrough");
                Ok(response)
            }
        }
    }

    fn is_patched(&self) -> bool {
        true
    }
}

/// Patches the environment's fetch entry point
#[derive(Debug, Default, Clone, Copy)]
pub struct FetchSetup;

impl InterceptorSetup for FetchSetup {
    const SYMBOL: InterceptorSymbol = InterceptorSymbol::new("fetch");

    fn check_environment(&self, env: &ClientEnvironment) -> bool {
        env.fetch_client().is_some()
    }

    fn setup(
        &self,
        env: &Arc<ClientEnvironment>,
        emitter: &Arc<HttpEmitter>,
    ) -> Result<Vec<Subscription>> {
        let pure = env
            .fetch_client()
            .ok_or_else(|| InterceptError::Unsupported(KIND.to_string()))?;

        if pure.is_patched() {
            return Err(InterceptError::AlreadyPatched(KIND.to_string()));
        }

        env.replace_fetch(Arc::new(InterceptedFetch::new(
            Arc::clone(&pure),
            Arc::clone(emitter),
        )));
        info!("Patched the fetch entry point");

        let env = Arc::clone(env);
        Ok(vec![Box::new(move || {
            env.replace_fetch(pure);
            info!("Restored the original fetch entry point");
        })])
    }
}

/// Interceptor for the fetch entry point
pub type FetchInterceptor = Interceptor<FetchSetup>;

impl Interceptor<FetchSetup> {
    pub fn fetch(env: Arc<ClientEnvironment>) -> Self {
        Self::new(FetchSetup, env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Listener, ListenerError};
    use crate::interception::interceptor::InterceptorState;
    use crate::message::{AbortController, RequestInit};
    use hyper::Method;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Real client double answering `real:<path>` and counting calls
    #[derive(Default)]
    struct StubClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FetchClient for StubClient {
        async fn fetch(&self, request: Request) -> Result<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Response::builder()
                .status(201)
                .header("x-real", "1")
                .body(format!("real:{}", request.url().path()))
                .build()
        }
    }

    fn setup() -> (Arc<ClientEnvironment>, Arc<StubClient>, FetchInterceptor) {
        let stub = Arc::new(StubClient::default());
        let env = Arc::new(ClientEnvironment::new().with_fetch(stub.clone()));
        let interceptor = FetchInterceptor::fetch(Arc::clone(&env));
        interceptor.apply().unwrap();
        (env, stub, interceptor)
    }

    fn collect_responses(interceptor: &FetchInterceptor) -> Arc<Mutex<Vec<ResponseEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        interceptor.on_response(move |event| sink.lock().push(event));
        events
    }

    #[tokio::test]
    async fn test_mocked_response() {
        let (env, stub, interceptor) = setup();
        interceptor.on_request(|event| async move {
            event
                .request
                .respond_with(Response::builder().status(200).body("ok").build().unwrap());
            Ok(())
        });
        let responses = collect_responses(&interceptor);

        let response = env.fetch(Request::get("http://x/y").unwrap()).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.url().map(|u| u.as_str()), Some("http://x/y"));
        assert_eq!(response.text().await.unwrap(), "ok");
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);

        let responses = responses.lock();
        assert_eq!(responses.len(), 1);
        assert!(responses[0].is_mocked);
        assert_eq!(responses[0].response.status(), 200);
    }

    #[tokio::test]
    async fn test_passthrough_without_listeners() {
        let (env, stub, interceptor) = setup();
        let responses = collect_responses(&interceptor);

        let response = env
            .fetch(Request::get("http://x/users").unwrap())
            .await
            .unwrap();

        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert_eq!(response.status(), 201);
        assert_eq!(response.header("x-real").as_deref(), Some("1"));
        assert!(response.url().is_none());

        let event = responses.lock().pop().unwrap();
        assert!(!event.is_mocked);
        assert_eq!(event.response.text().await.unwrap(), "real:/users");
        assert_eq!(response.text().await.unwrap(), "real:/users");
    }

    #[tokio::test]
    async fn test_passthrough_against_real_server() {
        let addr = transport::test_server::spawn().await;
        let env = Arc::new(ClientEnvironment::new().with_fetch(Arc::new(HyperFetchClient::default())));
        let interceptor = FetchInterceptor::fetch(Arc::clone(&env));
        interceptor.apply().unwrap();
        let responses = collect_responses(&interceptor);

        let response = env
            .fetch_url(
                &format!("http://{}/books", addr),
                RequestInit::default().method(Method::POST).body("title"),
            )
            .await
            .unwrap();

        assert_eq!(response.text().await.unwrap(), "real:POST:/books:title");
        assert_eq!(responses.lock().len(), 1);
        assert!(!responses.lock()[0].is_mocked);
    }

    #[tokio::test]
    async fn test_listener_error_is_network_failure() {
        let (env, stub, interceptor) = setup();
        interceptor.on(
            InterceptorEventKind::Request,
            Listener::new(|_: InterceptorEvent| async {
                Err::<(), ListenerError>("listener exploded".into())
            }),
        );
        let responses = collect_responses(&interceptor);

        let err = env.fetch(Request::get("http://x/").unwrap()).await.unwrap_err();
        assert_eq!(err, InterceptError::network("listener exploded"));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
        assert!(responses.lock().is_empty());
    }

    #[tokio::test]
    async fn test_error_marker_is_network_failure() {
        let (env, _stub, interceptor) = setup();
        interceptor.on_request(|event| async move {
            event.request.respond_with(Response::error());
            Ok(())
        });

        let err = env.fetch(Request::get("http://x/").unwrap()).await.unwrap_err();
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn test_mocked_error_status_is_returned() {
        let (env, _stub, interceptor) = setup();
        interceptor.on_request(|event| async move {
            event
                .request
                .respond_with(Response::builder().status(500).build().unwrap());
            Ok(())
        });

        let response = env.fetch(Request::get("http://x/").unwrap()).await.unwrap();
        assert_eq!(response.status(), 500);
        assert!(!response.ok());
    }

    #[tokio::test]
    async fn test_abort_before_resolution() {
        let (env, stub, interceptor) = setup();
        interceptor.on_request(|event| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            event.request.respond_with(Response::new("late"));
            Ok(())
        });
        let responses = collect_responses(&interceptor);

        let controller = AbortController::new();
        let request = Request::new(
            "http://x/",
            RequestInit::default().signal(controller.signal()),
        )
        .unwrap();

        let abort = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            abort.abort("navigation");
        });

        let err = env.fetch(request).await.unwrap_err();
        assert_eq!(err, InterceptError::aborted("navigation"));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
        assert!(responses.lock().is_empty());
    }

    #[tokio::test]
    async fn test_already_aborted_signal() {
        let (env, _stub, _interceptor) = setup();
        let controller = AbortController::new();
        controller.abort_default();

        let request = Request::new(
            "http://x/",
            RequestInit::default().signal(controller.signal()),
        )
        .unwrap();
        let err = env.fetch(request).await.unwrap_err();
        assert!(err.is_aborted());
    }

    #[tokio::test]
    async fn test_dispose_restores_original_client() {
        let (env, stub, interceptor) = setup();
        assert!(env.fetch_client().unwrap().is_patched());

        interceptor.dispose();
        assert_eq!(interceptor.state(), InterceptorState::Disposed);
        assert!(!env.fetch_client().unwrap().is_patched());

        env.fetch(Request::get("http://x/").unwrap()).await.unwrap();
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_patched_entry_point() {
        let stub: Arc<dyn FetchClient> = Arc::new(StubClient::default());
        let patched = Arc::new(InterceptedFetch::new(stub, Arc::new(HttpEmitter::new())));
        let env = Arc::new(ClientEnvironment::new().with_fetch(patched));

        let interceptor = FetchInterceptor::fetch(env);
        let err = interceptor.apply().unwrap_err();
        assert_eq!(err, InterceptError::AlreadyPatched("fetch".to_string()));
        assert_eq!(interceptor.state(), InterceptorState::Inactive);
    }

    #[tokio::test]
    async fn test_second_interceptor_shares_single_patch() {
        let (env, _stub, first) = setup();
        let second = FetchInterceptor::fetch(Arc::clone(&env));
        second.apply().unwrap();
        assert!(second.is_adopted());

        second.on_request(|event| async move {
            event.request.respond_with(Response::new("from second"));
            Ok(())
        });

        let response = env.fetch(Request::get("http://x/").unwrap()).await.unwrap();
        assert_eq!(response.text().await.unwrap(), "from second");

        // The owner still holds the patch after the adopter leaves
        second.dispose();
        assert!(env.fetch_client().unwrap().is_patched());
        first.dispose();
        assert!(!env.fetch_client().unwrap().is_patched());
    }

    #[tokio::test]
    async fn test_response_event_fires_once_per_request() {
        let (env, _stub, interceptor) = setup();
        interceptor.on_request(|event| async move {
            if event.request.url().path() == "/mocked" {
                event.request.respond_with(Response::new("mock"));
            }
            Ok(())
        });
        let responses = collect_responses(&interceptor);

        let (a, b) = tokio::join!(
            env.fetch(Request::get("http://x/mocked").unwrap()),
            env.fetch(Request::get("http://x/real").unwrap()),
        );
        a.unwrap();
        b.unwrap();

        let responses = responses.lock();
        assert_eq!(responses.len(), 2);
        assert_ne!(responses[0].request_id, responses[1].request_id);
        let mocked: Vec<bool> = responses.iter().map(|e| e.is_mocked).collect();
        assert!(mocked.contains(&true) && mocked.contains(&false));
    }
}
