// packages/engine/src/interception/resolver.rs
//! Request round shared by the fetch and XHR interceptors
//!
//! Emits the `Request` event and decides how the request settles. The
//! listener round runs as its own task so that listeners registered after the
//! one that answered still observe the request.

use crate::interception::deferred::DeferredState;
use crate::interception::events::{
    HttpEmitter, InteractiveRequest, InterceptorEvent, InterceptorEventKind, RequestEvent,
    RequestId,
};
use crate::message::Response;
use std::sync::Arc;
use tracing::{debug, warn};

/// How a request round settled
#[derive(Debug)]
pub enum Resolution {
    /// The request's abort signal fired
    Aborted(String),

    /// A listener failed or the slot was rejected
    Failed(String),

    /// A listener answered with the network error marker
    NetworkError,

    /// A listener answered with a response
    Mocked(Response),

    /// Nobody answered
    Passthrough,
}

/// Run the `Request` round for one request.
///
/// The round is raced, in order of precedence, against the request's abort
/// signal, the listeners finishing, and the slot being answered early. When
/// the listeners finish without an answer the slot is settled to "no mock".
pub async fn resolve_request(
    emitter: &Arc<HttpEmitter>,
    request: &InteractiveRequest,
    request_id: RequestId,
    kind: &'static str,
) -> Resolution {
    let signal = request.signal().clone();
    if let Some(reason) = signal.reason() {
        return Resolution::Aborted(reason);
    }

    let controller = Arc::clone(request.controller());
    let event = InterceptorEvent::Request(RequestEvent {
        request: request.clone(),
        request_id,
    });

    // Failures are recorded where they happen, including those of listeners
    // that run after the request was already answered
    let round = {
        let emitter = Arc::clone(emitter);
        tokio::spawn(async move {
            let result = emitter
                .emit_async(InterceptorEventKind::Request, event)
                .await
                .map_err(|e| e.to_string());
            if let Err(cause) = &result {
                record_listener_failure(kind, request_id, cause);
            }
            result
        })
    };

    let outcome = tokio::select! {
        biased;

        reason = signal.aborted() => {
            debug!("[{}] {} aborted during request round", kind, request_id);
            return Resolution::Aborted(reason);
        }
        joined = round => match joined {
            Ok(result) => result.map(|_| ()),
            Err(e) => {
                let cause = format!("request listener panicked: {}", e);
                record_listener_failure(kind, request_id, &cause);
                Err(cause)
            }
        },
        _ = controller.slot().wait() => Ok(()),
    };

    // An answer given before the failure stands
    if let Err(cause) = outcome {
        if !controller.is_settled() {
            return Resolution::Failed(cause);
        }
        debug!(
            "[{}] {} keeps its answer despite a later listener failure",
            kind, request_id
        );
    }

    // Settle as "no mock" unless someone answered
    controller.respond_with(None);

    if let Some(reason) = signal.reason() {
        return Resolution::Aborted(reason);
    }

    match controller.slot().state() {
        DeferredState::Resolved(Some(response)) if response.is_error() => Resolution::NetworkError,
        DeferredState::Resolved(Some(response)) => Resolution::Mocked(response),
        DeferredState::Resolved(None) | DeferredState::Pending => Resolution::Passthrough,
        DeferredState::Rejected(reason) => Resolution::Failed(reason),
    }
}

fn record_listener_failure(kind: &'static str, request_id: RequestId, cause: &str) {
    warn!("[{}] request listener failed for {}: {}", kind, request_id, cause);
    metrics::counter!("intercept_listener_errors_total", "kind" => kind).increment(1);
}
