// packages/engine/src/interception/routing_table.rs
//! Mock routes
//!
//! Maps request hosts (and optionally path prefixes) to canned responses.
//! A [`MockRoutes`] table turns into a `Request` listener that answers every
//! matching request and lets the rest through.
//!
//! Host patterns are exact (`api.example.com`) or wildcard (`*.example.com`,
//! matching any subdomain). Routes are checked by descending priority; at
//! equal priority exact hosts win over wildcards, then longer path prefixes
//! win.

use crate::interception::events::{request_listener, HttpListener};
use crate::message::Response;
use crate::utils::errors::{InterceptError, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Canned response served by a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    pub status: u16,

    pub headers: Vec<(String, String)>,

    pub body: Bytes,
}

impl MockResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// 200 response with a JSON body
    pub fn json(value: &serde_json::Value) -> Self {
        Self::new(200, value.to_string()).with_header("content-type", "application/json")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn to_response(&self) -> Result<Response> {
        let mut builder = Response::builder().status(self.status).body(self.body.clone());
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.build()
    }
}

/// Route definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRoute {
    /// Host pattern (e.g. "api.example.com" or "*.example.com")
    pub host: String,

    /// Only match paths starting with this prefix
    pub path_prefix: Option<String>,

    pub response: MockResponse,

    /// Route priority (higher = checked first)
    pub priority: u32,
}

impl MockRoute {
    pub fn new(host: impl Into<String>, response: MockResponse) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            path_prefix: None,
            response,
            priority: 0,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    fn is_wildcard(&self) -> bool {
        self.host.starts_with("*.")
    }

    fn matches_host(&self, host: &str) -> bool {
        match self.host.strip_prefix("*.") {
            Some(suffix) => host
                .strip_suffix(suffix)
                .is_some_and(|rest| rest.ends_with('.')),
            None => self.host == host,
        }
    }

    fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        if !self.matches_host(&host.to_ascii_lowercase()) {
            return false;
        }
        self.path_prefix
            .as_deref()
            .map_or(true, |prefix| url.path().starts_with(prefix))
    }

    /// Ordering key: priority, then exact before wildcard, then prefix length
    fn rank(&self) -> (u32, bool, usize) {
        (
            self.priority,
            !self.is_wildcard(),
            self.path_prefix.as_ref().map_or(0, String::len),
        )
    }
}

/// Host-based mock routing table
#[derive(Debug, Default)]
pub struct MockRoutes {
    /// Kept sorted by descending rank
    routes: RwLock<Vec<MockRoute>>,
}

impl MockRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route. A route with the same host and prefix is replaced.
    pub fn add_route(&self, route: MockRoute) {
        let mut routes = self.routes.write();
        info!(
            "Adding mock route: {}{} -> {}",
            route.host,
            route.path_prefix.as_deref().unwrap_or(""),
            route.response.status
        );

        routes.retain(|r| !(r.host == route.host && r.path_prefix == route.path_prefix));
        let index = routes
            .iter()
            .position(|r| r.rank() < route.rank())
            .unwrap_or(routes.len());
        routes.insert(index, route);
    }

    /// Remove every route registered for `host`
    pub fn remove_route(&self, host: &str) -> Result<()> {
        let host = host.to_ascii_lowercase();
        let mut routes = self.routes.write();
        let before = routes.len();
        routes.retain(|r| r.host != host);

        if routes.len() < before {
            info!("Removed mock routes for {}", host);
            Ok(())
        } else {
            Err(InterceptError::Config(format!(
                "No mock route found for host: {}",
                host
            )))
        }
    }

    /// Best route for a request URL
    pub fn lookup(&self, url: &Url) -> Option<MockRoute> {
        let routes = self.routes.read();
        let found = routes.iter().find(|route| route.matches(url)).cloned();
        match &found {
            Some(route) => debug!("Mock route {} matched {}", route.host, url),
            None => debug!("No mock route for {}", url),
        }
        found
    }

    pub fn routes(&self) -> Vec<MockRoute> {
        self.routes.read().clone()
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    pub fn clear(&self) {
        self.routes.write().clear();
        info!("Cleared all mock routes");
    }

    /// Human-readable route listing, one route per line in match order
    pub fn export_config(&self) -> String {
        let routes = self.routes.read();
        let mut output = String::from("# Mock routes\n\n");
        for route in routes.iter() {
            output.push_str(&format!(
                "{}{} -> {} (priority {})\n",
                route.host,
                route.path_prefix.as_deref().unwrap_or(""),
                route.response.status,
                route.priority
            ));
        }
        output
    }

    /// `Request` listener answering matching requests from this table
    pub fn into_listener(self: Arc<Self>) -> HttpListener {
        request_listener(move |event| {
            let routes = Arc::clone(&self);
            async move {
                let Some(route) = routes.lookup(event.request.url()) else {
                    return Ok(());
                };
                match route.response.to_response() {
                    Ok(response) => {
                        event.request.respond_with(response);
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
        })
    }
}
