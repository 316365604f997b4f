// packages/engine/src/utils/errors.rs
//! Error types for the interception engine

use thiserror::Error;

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, InterceptError>;

/// Errors surfaced by interceptors, intercepted clients, and their helpers
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InterceptError {
    /// The client entry point was already patched by an interceptor
    #[error("Failed to patch the \"{0}\" module: already patched.")]
    AlreadyPatched(String),

    /// The request's abort signal fired before the request settled
    #[error("request aborted: {reason}")]
    Aborted { reason: String },

    /// A request listener failed, or the request resolved to a network error
    #[error("Failed to fetch: {cause}")]
    Network { cause: String },

    /// Accessor used outside the state or response type that makes it valid
    #[error("InvalidStateError: {0}")]
    InvalidState(String),

    /// The environment does not expose the requested client
    #[error("unsupported environment: {0}")]
    Unsupported(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// A request or response could not be constructed from its parts
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Passthrough transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Reading a response or request body failed
    #[error("body error: {0}")]
    Body(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl InterceptError {
    /// Build a network failure wrapping the given cause
    pub fn network(cause: impl std::fmt::Display) -> Self {
        Self::Network {
            cause: cause.to_string(),
        }
    }

    /// Build an abort failure carrying the signal's reason
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

impl From<url::ParseError> for InterceptError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<config::ConfigError> for InterceptError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<hyper::http::Error> for InterceptError {
    fn from(err: hyper::http::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
