// packages/engine/src/interception/batch.rs
//! Batch interceptor
//!
//! Applies, disposes and listens on several interceptors as one. A listener
//! registered on the batch is registered on every member, so a single
//! `Request` listener sees requests from every client kind in the batch.

use crate::hub::ListenerError;
use crate::interception::events::{
    request_listener, response_listener, HttpListener, InterceptorEventKind, RequestEvent,
    ResponseEvent,
};
use crate::interception::interceptor::{InterceptorHandle, InterceptorState};
use crate::interception::registry::InterceptorSymbol;
use crate::utils::errors::Result;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Group of interceptors driven together
pub struct BatchInterceptor {
    name: &'static str,
    interceptors: Vec<Arc<dyn InterceptorHandle>>,
}

impl BatchInterceptor {
    pub fn new(name: &'static str, interceptors: Vec<Arc<dyn InterceptorHandle>>) -> Self {
        Self { name, interceptors }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn interceptors(&self) -> &[Arc<dyn InterceptorHandle>] {
        &self.interceptors
    }

    /// Apply every member in order. Stops at the first failure; members
    /// applied before it stay applied.
    pub fn apply(&self) -> Result<()> {
        for interceptor in &self.interceptors {
            interceptor.apply()?;
        }
        info!(
            "Applied batch interceptor {} ({} members)",
            self.name,
            self.interceptors.len()
        );
        Ok(())
    }

    pub fn dispose(&self) {
        for interceptor in &self.interceptors {
            interceptor.dispose();
        }
        info!("Disposed batch interceptor {}", self.name);
    }

    pub fn on(&self, kind: InterceptorEventKind, listener: HttpListener) -> &Self {
        for interceptor in &self.interceptors {
            interceptor.on(kind, listener.clone());
        }
        self
    }

    /// Once per member: each member removes the listener after its first call
    pub fn once(&self, kind: InterceptorEventKind, listener: HttpListener) -> &Self {
        for interceptor in &self.interceptors {
            interceptor.once(kind, listener.clone());
        }
        self
    }

    pub fn off(&self, kind: InterceptorEventKind, listener: &HttpListener) -> &Self {
        for interceptor in &self.interceptors {
            interceptor.off(kind, listener);
        }
        self
    }

    pub fn remove_all_listeners(&self, kind: Option<InterceptorEventKind>) -> &Self {
        for interceptor in &self.interceptors {
            interceptor.remove_all_listeners(kind);
        }
        self
    }

    pub fn on_request<F, Fut>(&self, callback: F) -> HttpListener
    where
        F: Fn(RequestEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), ListenerError>> + Send + 'static,
    {
        let listener = request_listener(callback);
        self.on(InterceptorEventKind::Request, listener.clone());
        listener
    }

    pub fn on_response<F>(&self, callback: F) -> HttpListener
    where
        F: Fn(ResponseEvent) + Send + Sync + 'static,
    {
        let listener = response_listener(callback);
        self.on(InterceptorEventKind::Response, listener.clone());
        listener
    }

    /// Lifecycle state of each member
    pub fn states(&self) -> Vec<(InterceptorSymbol, InterceptorState)> {
        self.interceptors
            .iter()
            .map(|interceptor| (interceptor.symbol(), interceptor.state()))
            .collect()
    }
}

impl fmt::Debug for BatchInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchInterceptor")
            .field("name", &self.name)
            .field("members", &self.states())
            .finish()
    }
}

/// Ready-made interceptor groups
pub mod presets {
    use super::BatchInterceptor;
    use crate::interception::environment::ClientEnvironment;
    use crate::interception::fetch::FetchInterceptor;
    use crate::interception::interceptor::InterceptorHandle;
    use crate::interception::xhr::XhrInterceptor;
    use crate::utils::config::InterceptionConfig;
    use std::sync::Arc;

    /// Fetch and XHR interceptors, as enabled by `config`
    pub fn browser(env: Arc<ClientEnvironment>, config: &InterceptionConfig) -> BatchInterceptor {
        let mut interceptors: Vec<Arc<dyn InterceptorHandle>> = Vec::new();
        if config.fetch {
            interceptors.push(Arc::new(FetchInterceptor::fetch(Arc::clone(&env))));
        }
        if config.xhr {
            interceptors.push(Arc::new(XhrInterceptor::xhr(Arc::clone(&env))));
        }
        BatchInterceptor::new("browser", interceptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interception::environment::ClientEnvironment;
    use crate::interception::fetch::FetchClient;
    use crate::interception::xhr::events::{xhr_listener, XhrEventKind};
    use crate::interception::xhr::{FetchXhrFactory, ReadyState};
    use crate::message::{Request, Response};
    use crate::utils::config::InterceptionConfig;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct RealClient;

    #[async_trait]
    impl FetchClient for RealClient {
        async fn fetch(&self, _request: Request) -> Result<Response> {
            Ok(Response::new("real"))
        }
    }

    fn env() -> Arc<ClientEnvironment> {
        let client: Arc<dyn FetchClient> = Arc::new(RealClient);
        Arc::new(
            ClientEnvironment::new()
                .with_fetch(Arc::clone(&client))
                .with_xhr(Arc::new(FetchXhrFactory::new(client))),
        )
    }

    #[test]
    fn test_browser_preset_members() {
        let env = env();
        let all = presets::browser(Arc::clone(&env), &InterceptionConfig::default());
        let names: Vec<&str> = all.states().iter().map(|(s, _)| s.name()).collect();
        assert_eq!(names, vec!["fetch", "xhr"]);

        let config = InterceptionConfig {
            xhr: false,
            ..InterceptionConfig::default()
        };
        assert_eq!(presets::browser(env, &config).interceptors().len(), 1);
    }

    #[test]
    fn test_apply_and_dispose_all_members() {
        let env = env();
        let batch = presets::browser(Arc::clone(&env), &InterceptionConfig::default());

        batch.apply().unwrap();
        assert!(env.fetch_client().unwrap().is_patched());
        assert!(env.xhr_factory().unwrap().is_patched());
        assert!(batch
            .states()
            .iter()
            .all(|(_, state)| *state == InterceptorState::Applied));

        batch.dispose();
        assert!(!env.fetch_client().unwrap().is_patched());
        assert!(!env.xhr_factory().unwrap().is_patched());
    }

    #[tokio::test]
    async fn test_one_listener_mocks_every_client_kind() {
        let env = env();
        let batch = presets::browser(Arc::clone(&env), &InterceptionConfig::default());
        batch.apply().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        batch.on_request(move |event| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(event.request.url().path().to_string());
                event.request.respond_with(Response::new("mocked"));
                Ok(())
            }
        });

        let response = env
            .fetch(Request::get("http://x/from-fetch").unwrap())
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "mocked");

        let xhr = env.new_xhr().unwrap();
        let done = Arc::new(Notify::new());
        let notify = Arc::clone(&done);
        xhr.add_event_listener(
            XhrEventKind::LoadEnd,
            xhr_listener(move |_| notify.notify_one()),
        );
        xhr.open("GET", "http://x/from-xhr").unwrap();
        xhr.send(None).unwrap();
        tokio::time::timeout(Duration::from_secs(5), done.notified())
            .await
            .unwrap();

        assert_eq!(xhr.ready_state(), ReadyState::Done);
        assert_eq!(xhr.response_text().unwrap(), "mocked");
        assert_eq!(*seen.lock(), vec!["/from-fetch", "/from-xhr"]);

        batch.dispose();
    }

    #[tokio::test]
    async fn test_off_removes_from_every_member() {
        let env = env();
        let batch = presets::browser(Arc::clone(&env), &InterceptionConfig::default());
        batch.apply().unwrap();

        let listener = batch.on_request(|event| async move {
            event.request.respond_with(Response::new("mocked"));
            Ok(())
        });
        batch.off(InterceptorEventKind::Request, &listener);

        let response = env
            .fetch(Request::get("http://x/").unwrap())
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "real");
    }
}
