// packages/engine/src/observability/mod.rs
//! Observability
//!
//! - **Tracing**: `tracing-subscriber` registry with an `EnvFilter` and a
//!   plain or JSON formatter
//! - **Metrics**: counter descriptions for the `metrics` facade; the host
//!   installs whichever exporter it wants

use crate::utils::config::LoggingConfig;
use crate::utils::errors::{InterceptError, Result};
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Requests seen by an interceptor, by client kind and outcome
pub const REQUESTS_TOTAL: &str = "intercept_requests_total";

/// Request listeners that failed, by client kind
pub const LISTENER_ERRORS_TOTAL: &str = "intercept_listener_errors_total";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Calling this when a subscriber
/// is already installed leaves the existing one in place.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| InterceptError::Config(format!("invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    if installed.is_err() {
        debug!("Tracing subscriber already installed, keeping it");
    }
    Ok(())
}

/// Register metric descriptions with the installed recorder
pub fn init_metrics() {
    metrics::describe_counter!(
        REQUESTS_TOTAL,
        "Intercepted requests by client kind and outcome (mocked, passthrough, aborted, network_error)"
    );
    metrics::describe_counter!(
        LISTENER_ERRORS_TOTAL,
        "Request listeners that failed, turning the request into a network error"
    );
}
