// packages/engine/src/hub/listener.rs
//! Listener handles
//!
//! A [`Listener`] is a cheaply cloneable handle around an async callback.
//! Identity is the handle itself: clones compare equal, two handles built
//! from identical closures do not.

use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Error a listener may fail with
pub type ListenerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Future returned by a listener invocation
pub type ListenerFuture = BoxFuture<'static, Result<(), ListenerError>>;

type Callback<A> = dyn Fn(A) -> ListenerFuture + Send + Sync;

/// Handle to an event callback
pub struct Listener<A> {
    callback: Arc<Callback<A>>,
}

impl<A: Send + 'static> Listener<A> {
    /// Wrap an async callback
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        Self {
            callback: Arc::new(move |arg| callback(arg).boxed()),
        }
    }

    /// Wrap a synchronous callback that cannot fail
    pub fn sync<F>(callback: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(move |arg| {
                callback(arg);
                futures::future::ready(Ok(())).boxed()
            }),
        }
    }

    pub fn call(&self, arg: A) -> ListenerFuture {
        (self.callback)(arg)
    }
}

impl<A> Listener<A> {
    /// Whether both handles refer to the same registration target
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.callback, &other.callback)
    }
}

impl<A> Clone for Listener<A> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<A> PartialEq for Listener<A> {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl<A> fmt::Debug for Listener<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("ptr", &Arc::as_ptr(&self.callback).cast::<()>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_sync_listener_runs() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let listener = Listener::sync(move |n: usize| {
            counter.fetch_add(n, Ordering::SeqCst);
        });

        listener.call(3).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_async_listener_error() {
        let listener = Listener::new(|_: ()| async { Err::<(), ListenerError>("boom".into()) });
        let err = listener.call(()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_identity() {
        let a = Listener::sync(|_: ()| {});
        let b = Listener::sync(|_: ()| {});
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
