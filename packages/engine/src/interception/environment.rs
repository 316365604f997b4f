// packages/engine/src/interception/environment.rs
//! Client environment
//!
//! Owns the entry points that interceptors patch (the fetch client and the
//! XHR factory), the base location used to resolve relative URLs, and the
//! registry of running interceptors. Application code issues requests through
//! the environment so that whatever entry point is currently installed
//! handles them.

use crate::interception::fetch::transport::HyperFetchClient;
use crate::interception::fetch::FetchClient;
use crate::interception::registry::InterceptorRegistry;
use crate::interception::xhr::backend::FetchXhrFactory;
use crate::interception::xhr::{XhrFactory, XmlHttpRequest};
use crate::message::{Request, RequestInit, Response};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{InterceptError, Result};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Patchable client entry points plus the interceptor registry
pub struct ClientEnvironment {
    /// Current fetch entry point
    fetch: RwLock<Option<Arc<dyn FetchClient>>>,

    /// Current XHR constructor
    xhr: RwLock<Option<Arc<dyn XhrFactory>>>,

    /// Base URL for relative request URLs
    location: Option<Url>,

    /// Leak threshold for interceptor hubs (0 = unlimited)
    max_listeners: usize,

    registry: InterceptorRegistry,
}

impl ClientEnvironment {
    /// Environment without any client entry point
    pub fn new() -> Self {
        Self {
            fetch: RwLock::new(None),
            xhr: RwLock::new(None),
            location: None,
            max_listeners: 0,
            registry: InterceptorRegistry::new(),
        }
    }

    /// Environment with the hyper-backed fetch client and an XHR factory
    /// driven by it
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let location = config
            .interception
            .location
            .as_deref()
            .map(Url::parse)
            .transpose()?;

        let fetch: Arc<dyn FetchClient> = Arc::new(HyperFetchClient::new(Duration::from_millis(
            config.transport.timeout_ms,
        )));
        let xhr = Arc::new(FetchXhrFactory::new(Arc::clone(&fetch)));

        let mut env = Self::new()
            .with_fetch(fetch)
            .with_xhr(xhr)
            .with_max_listeners(config.interception.max_listeners);
        env.location = location;
        Ok(env)
    }

    pub fn with_fetch(self, client: Arc<dyn FetchClient>) -> Self {
        *self.fetch.write() = Some(client);
        self
    }

    pub fn with_xhr(self, factory: Arc<dyn XhrFactory>) -> Self {
        *self.xhr.write() = Some(factory);
        self
    }

    pub fn with_location(mut self, location: Url) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_max_listeners(mut self, max_listeners: usize) -> Self {
        self.max_listeners = max_listeners;
        self
    }

    /// Share an existing registry, e.g. with another environment copy
    pub fn with_registry(mut self, registry: InterceptorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &InterceptorRegistry {
        &self.registry
    }

    pub fn location(&self) -> Option<&Url> {
        self.location.as_ref()
    }

    pub fn max_listeners(&self) -> usize {
        self.max_listeners
    }

    /// Current fetch entry point
    pub fn fetch_client(&self) -> Option<Arc<dyn FetchClient>> {
        self.fetch.read().clone()
    }

    /// Install a fetch entry point, returning the previous one
    pub fn replace_fetch(&self, client: Arc<dyn FetchClient>) -> Option<Arc<dyn FetchClient>> {
        self.fetch.write().replace(client)
    }

    /// Current XHR constructor
    pub fn xhr_factory(&self) -> Option<Arc<dyn XhrFactory>> {
        self.xhr.read().clone()
    }

    /// Install an XHR constructor, returning the previous one
    pub fn replace_xhr(&self, factory: Arc<dyn XhrFactory>) -> Option<Arc<dyn XhrFactory>> {
        self.xhr.write().replace(factory)
    }

    /// Send a request through the current fetch entry point
    pub async fn fetch(&self, request: Request) -> Result<Response> {
        let client = self
            .fetch_client()
            .ok_or_else(|| InterceptError::Unsupported("fetch".to_string()))?;
        client.fetch(request).await
    }

    /// Build a request for `url` (resolved against the location) and send it
    pub async fn fetch_url(&self, url: &str, init: RequestInit) -> Result<Response> {
        let request = Request::with_base(url, self.location.as_ref(), init)?;
        self.fetch(request).await
    }

    /// Construct an XHR instance through the current constructor
    pub fn new_xhr(&self) -> Result<Arc<dyn XmlHttpRequest>> {
        let factory = self
            .xhr_factory()
            .ok_or_else(|| InterceptError::Unsupported("XMLHttpRequest".to_string()))?;
        Ok(factory.create())
    }
}

impl Default for ClientEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientEnvironment")
            .field("fetch", &self.fetch.read().is_some())
            .field("xhr", &self.xhr.read().is_some())
            .field("location", &self.location.as_ref().map(Url::as_str))
            .field("registry", &self.registry.symbols())
            .finish()
    }
}
