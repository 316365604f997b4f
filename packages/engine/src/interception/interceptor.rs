// packages/engine/src/interception/interceptor.rs
//! Interceptor lifecycle
//!
//! [`Interceptor`] is the state machine every concrete interceptor kind
//! reuses. The kind itself only supplies an [`InterceptorSetup`]: the
//! environment check and the patch that installs it.
//!
//! # Lifecycle
//!
//! ```text
//! Inactive ──apply──▶ Applying ──▶ Applied ──dispose──▶ Disposing ──▶ Disposed
//!     ▲                  │                                               │
//!     └── setup failed ──┘                 apply (re-install) ◀──────────┘
//! ```
//!
//! At most one instance per kind patches the environment. An instance that
//! finds its kind already registered adopts the running instance: listeners
//! registered on the adopter are forwarded to the running instance's hub and
//! removed from it again on dispose.

use crate::hub::ListenerError;
use crate::interception::environment::ClientEnvironment;
use crate::interception::events::{
    request_listener, response_listener, HttpEmitter, HttpListener, InterceptorEventKind,
    RequestEvent, ResponseEvent,
};
use crate::interception::registry::{InterceptorSymbol, RegisteredInstance};
use crate::utils::errors::Result;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};
use ulid::Ulid;

/// Lifecycle state of an interceptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptorState {
    Inactive,
    Applying,
    Applied,
    Disposing,
    Disposed,
}

/// Teardown callback recorded while an interceptor is applied
pub type Subscription = Box<dyn FnOnce() + Send>;

/// What a concrete interceptor kind contributes to the lifecycle
pub trait InterceptorSetup: Send + Sync + 'static {
    /// Registry key shared by every instance of this kind
    const SYMBOL: InterceptorSymbol;

    /// Whether the environment exposes the client this kind patches
    fn check_environment(&self, env: &ClientEnvironment) -> bool;

    /// Patch the environment so requests are routed through `emitter`.
    /// Returns the callbacks that undo the patch.
    fn setup(
        &self,
        env: &Arc<ClientEnvironment>,
        emitter: &Arc<HttpEmitter>,
    ) -> Result<Vec<Subscription>>;
}

struct Lifecycle {
    state: InterceptorState,

    subscriptions: Vec<Subscription>,

    /// Hub of the adopted running instance
    running: Option<Arc<HttpEmitter>>,

    /// Listeners forwarded to the running instance
    forwarded: Vec<(InterceptorEventKind, HttpListener)>,
}

/// Lifecycle shared by all interceptor kinds
pub struct Interceptor<S: InterceptorSetup> {
    setup: S,
    env: Arc<ClientEnvironment>,
    emitter: Arc<HttpEmitter>,
    instance_id: Ulid,
    lifecycle: Mutex<Lifecycle>,
}

impl<S: InterceptorSetup> Interceptor<S> {
    pub fn new(setup: S, env: Arc<ClientEnvironment>) -> Self {
        let emitter = Arc::new(HttpEmitter::with_max_listeners(env.max_listeners()));
        Self {
            setup,
            env,
            emitter,
            instance_id: Ulid::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: InterceptorState::Inactive,
                subscriptions: Vec::new(),
                running: None,
                forwarded: Vec::new(),
            }),
        }
    }

    pub fn symbol(&self) -> InterceptorSymbol {
        S::SYMBOL
    }

    pub fn state(&self) -> InterceptorState {
        self.lifecycle.lock().state
    }

    pub fn environment(&self) -> &Arc<ClientEnvironment> {
        &self.env
    }

    /// Whether this instance adopted an already running one
    pub fn is_adopted(&self) -> bool {
        self.lifecycle.lock().running.is_some()
    }

    /// Install the interceptor. Idempotent while applied.
    pub fn apply(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();

        if lifecycle.state == InterceptorState::Applied {
            debug!("Interceptor {} already applied", S::SYMBOL);
            return Ok(());
        }

        if !self.setup.check_environment(&self.env) {
            debug!(
                "Interceptor {} not supported in this environment, skipping",
                S::SYMBOL
            );
            return Ok(());
        }

        lifecycle.state = InterceptorState::Applying;

        let registry = self.env.registry();
        if let Some(running) = registry.get(S::SYMBOL) {
            if running.instance_id != self.instance_id {
                info!(
                    "Interceptor {} already running ({}), adopting it",
                    S::SYMBOL,
                    running.instance_id
                );
                lifecycle.running = Some(running.emitter);
                lifecycle.state = InterceptorState::Applied;
                return Ok(());
            }
        }

        match self.setup.setup(&self.env, &self.emitter) {
            Ok(subscriptions) => lifecycle.subscriptions.extend(subscriptions),
            Err(e) => {
                lifecycle.state = InterceptorState::Inactive;
                return Err(e);
            }
        }

        registry.register(
            S::SYMBOL,
            RegisteredInstance {
                emitter: Arc::clone(&self.emitter),
                instance_id: self.instance_id,
            },
        );

        lifecycle.state = InterceptorState::Applied;
        info!("Interceptor {} applied", S::SYMBOL);
        Ok(())
    }

    /// Uninstall the interceptor. No-op unless applied.
    pub fn dispose(&self) {
        let mut lifecycle = self.lifecycle.lock();

        if lifecycle.state != InterceptorState::Applied {
            debug!("Interceptor {} not applied, nothing to dispose", S::SYMBOL);
            return;
        }

        lifecycle.state = InterceptorState::Disposing;

        for subscription in lifecycle.subscriptions.drain(..) {
            subscription();
        }

        if let Some(running) = lifecycle.running.take() {
            for (kind, listener) in lifecycle.forwarded.drain(..) {
                running.off(&kind, &listener);
            }
        }

        self.emitter.remove_all_listeners(None);
        self.env.registry().unregister(S::SYMBOL, self.instance_id);

        lifecycle.state = InterceptorState::Disposed;
        info!("Interceptor {} disposed", S::SYMBOL);
    }

    pub fn on(&self, kind: InterceptorEventKind, listener: HttpListener) -> &Self {
        self.register(kind, listener, false)
    }

    pub fn once(&self, kind: InterceptorEventKind, listener: HttpListener) -> &Self {
        self.register(kind, listener, true)
    }

    pub fn off(&self, kind: InterceptorEventKind, listener: &HttpListener) -> &Self {
        let mut guard = self.lifecycle.lock();
        let lifecycle = &mut *guard;
        if let Some(running) = &lifecycle.running {
            running.off(&kind, listener);
            lifecycle
                .forwarded
                .retain(|(k, l)| !(*k == kind && l.same(listener)));
        }
        self.emitter.off(&kind, listener);
        self
    }

    pub fn remove_all_listeners(&self, kind: Option<InterceptorEventKind>) -> &Self {
        let mut lifecycle = self.lifecycle.lock();
        if let Some(running) = lifecycle.running.clone() {
            lifecycle.forwarded.retain(|(k, l)| {
                let matches = kind.map_or(true, |kind| *k == kind);
                if matches {
                    running.off(k, l);
                }
                !matches
            });
        }
        self.emitter.remove_all_listeners(kind.as_ref());
        self
    }

    /// Register an async `Request` listener and return its handle
    pub fn on_request<F, Fut>(&self, callback: F) -> HttpListener
    where
        F: Fn(RequestEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), ListenerError>> + Send + 'static,
    {
        let listener = request_listener(callback);
        self.on(InterceptorEventKind::Request, listener.clone());
        listener
    }

    /// Register a `Response` listener and return its handle
    pub fn on_response<F>(&self, callback: F) -> HttpListener
    where
        F: Fn(ResponseEvent) + Send + Sync + 'static,
    {
        let listener = response_listener(callback);
        self.on(InterceptorEventKind::Response, listener.clone());
        listener
    }

    /// Number of listeners for `kind` on the hub this instance feeds
    pub fn listener_count(&self, kind: InterceptorEventKind) -> usize {
        match &self.lifecycle.lock().running {
            Some(running) => running.listener_count(&kind),
            None => self.emitter.listener_count(&kind),
        }
    }

    fn register(&self, kind: InterceptorEventKind, listener: HttpListener, once: bool) -> &Self {
        let mut lifecycle = self.lifecycle.lock();

        match lifecycle.state {
            InterceptorState::Disposing | InterceptorState::Disposed => {
                debug!(
                    "Interceptor {} is disposed, ignoring {:?} listener",
                    S::SYMBOL,
                    kind
                );
                return self;
            }
            _ => {}
        }

        let hub = match &lifecycle.running {
            Some(running) => Arc::clone(running),
            None => Arc::clone(&self.emitter),
        };

        if once {
            hub.once(kind, listener.clone());
        } else {
            hub.on(kind, listener.clone());
        }

        if lifecycle.running.is_some() {
            lifecycle.forwarded.push((kind, listener));
        }
        self
    }
}

impl<S: InterceptorSetup> fmt::Debug for Interceptor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("symbol", &S::SYMBOL)
            .field("instance_id", &self.instance_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Object-safe view of an interceptor, used to drive several kinds together
pub trait InterceptorHandle: Send + Sync {
    fn apply(&self) -> Result<()>;

    fn dispose(&self);

    fn on(&self, kind: InterceptorEventKind, listener: HttpListener);

    fn once(&self, kind: InterceptorEventKind, listener: HttpListener);

    fn off(&self, kind: InterceptorEventKind, listener: &HttpListener);

    fn remove_all_listeners(&self, kind: Option<InterceptorEventKind>);

    fn state(&self) -> InterceptorState;

    fn symbol(&self) -> InterceptorSymbol;
}

impl<S: InterceptorSetup> InterceptorHandle for Interceptor<S> {
    fn apply(&self) -> Result<()> {
        Interceptor::apply(self)
    }

    fn dispose(&self) {
        Interceptor::dispose(self)
    }

    fn on(&self, kind: InterceptorEventKind, listener: HttpListener) {
        Interceptor::on(self, kind, listener);
    }

    fn once(&self, kind: InterceptorEventKind, listener: HttpListener) {
        Interceptor::once(self, kind, listener);
    }

    fn off(&self, kind: InterceptorEventKind, listener: &HttpListener) {
        Interceptor::off(self, kind, listener);
    }

    fn remove_all_listeners(&self, kind: Option<InterceptorEventKind>) {
        Interceptor::remove_all_listeners(self, kind);
    }

    fn state(&self) -> InterceptorState {
        Interceptor::state(self)
    }

    fn symbol(&self) -> InterceptorSymbol {
        Interceptor::symbol(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Listener;
    use crate::interception::events::InterceptorEvent;
    use crate::utils::errors::InterceptError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const TEST_SYMBOL: InterceptorSymbol = InterceptorSymbol::new("test-interceptor");

    #[derive(Default)]
    struct CountingSetup {
        supported: bool,
        fail: AtomicBool,
        setups: Arc<AtomicUsize>,
        teardowns: Arc<AtomicUsize>,
    }

    impl CountingSetup {
        fn supported() -> Self {
            Self {
                supported: true,
                ..Self::default()
            }
        }
    }

    impl InterceptorSetup for CountingSetup {
        const SYMBOL: InterceptorSymbol = TEST_SYMBOL;

        fn check_environment(&self, _env: &ClientEnvironment) -> bool {
            self.supported
        }

        fn setup(
            &self,
            _env: &Arc<ClientEnvironment>,
            _emitter: &Arc<HttpEmitter>,
        ) -> Result<Vec<Subscription>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(InterceptError::AlreadyPatched("test".to_string()));
            }
            self.setups.fetch_add(1, Ordering::SeqCst);
            let teardowns = Arc::clone(&self.teardowns);
            Ok(vec![Box::new(move || {
                teardowns.fetch_add(1, Ordering::SeqCst);
            })])
        }
    }

    fn noop() -> HttpListener {
        Listener::sync(|_: InterceptorEvent| {})
    }

    #[test]
    fn test_apply_and_dispose_are_idempotent() {
        let env = Arc::new(ClientEnvironment::new());
        let setup = CountingSetup::supported();
        let setups = Arc::clone(&setup.setups);
        let teardowns = Arc::clone(&setup.teardowns);
        let interceptor = Interceptor::new(setup, Arc::clone(&env));

        interceptor.apply().unwrap();
        interceptor.apply().unwrap();
        assert_eq!(setups.load(Ordering::SeqCst), 1);
        assert_eq!(interceptor.state(), InterceptorState::Applied);
        assert!(env.registry().contains(TEST_SYMBOL));

        interceptor.dispose();
        interceptor.dispose();
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(interceptor.state(), InterceptorState::Disposed);
        assert!(!env.registry().contains(TEST_SYMBOL));
    }

    #[test]
    fn test_reapply_after_dispose() {
        let env = Arc::new(ClientEnvironment::new());
        let setup = CountingSetup::supported();
        let setups = Arc::clone(&setup.setups);
        let interceptor = Interceptor::new(setup, env);

        interceptor.apply().unwrap();
        interceptor.dispose();
        interceptor.apply().unwrap();

        assert_eq!(setups.load(Ordering::SeqCst), 2);
        assert_eq!(interceptor.state(), InterceptorState::Applied);
    }

    #[test]
    fn test_unsupported_environment_is_silent() {
        let env = Arc::new(ClientEnvironment::new());
        let interceptor = Interceptor::new(CountingSetup::default(), Arc::clone(&env));

        interceptor.apply().unwrap();
        assert_eq!(interceptor.state(), InterceptorState::Inactive);
        assert!(env.registry().is_empty());
    }

    #[test]
    fn test_failed_setup_returns_to_inactive() {
        let env = Arc::new(ClientEnvironment::new());
        let setup = CountingSetup::supported();
        setup.fail.store(true, Ordering::SeqCst);
        let interceptor = Interceptor::new(setup, Arc::clone(&env));

        let err = interceptor.apply().unwrap_err();
        assert!(matches!(err, InterceptError::AlreadyPatched(_)));
        assert_eq!(interceptor.state(), InterceptorState::Inactive);
        assert!(env.registry().is_empty());
    }

    #[test]
    fn test_second_instance_adopts_running_one() {
        let env = Arc::new(ClientEnvironment::new());
        let first_setup = CountingSetup::supported();
        let second_setup = CountingSetup::supported();
        let second_setups = Arc::clone(&second_setup.setups);

        let first = Interceptor::new(first_setup, Arc::clone(&env));
        let second = Interceptor::new(second_setup, Arc::clone(&env));

        first.apply().unwrap();
        second.apply().unwrap();

        assert!(second.is_adopted());
        assert_eq!(second_setups.load(Ordering::SeqCst), 0);

        let listener = noop();
        second.on(InterceptorEventKind::Request, listener.clone());
        assert_eq!(first.listener_count(InterceptorEventKind::Request), 1);

        // Disposing the adopter removes its forwarded listeners only
        second.dispose();
        assert_eq!(first.listener_count(InterceptorEventKind::Request), 0);
        assert!(env.registry().contains(TEST_SYMBOL));
        assert_eq!(first.state(), InterceptorState::Applied);
    }

    #[test]
    fn test_adopter_off_and_remove_all() {
        let env = Arc::new(ClientEnvironment::new());
        let first = Interceptor::new(CountingSetup::supported(), Arc::clone(&env));
        let second = Interceptor::new(CountingSetup::supported(), Arc::clone(&env));
        first.apply().unwrap();
        second.apply().unwrap();

        let a = noop();
        let b = noop();
        second.on(InterceptorEventKind::Request, a.clone());
        second.on(InterceptorEventKind::Response, b);
        first.on(InterceptorEventKind::Request, noop());

        second.off(InterceptorEventKind::Request, &a);
        assert_eq!(first.listener_count(InterceptorEventKind::Request), 1);

        second.remove_all_listeners(None);
        assert_eq!(first.listener_count(InterceptorEventKind::Response), 0);
        assert_eq!(first.listener_count(InterceptorEventKind::Request), 1);
    }

    #[test]
    fn test_listeners_ignored_after_dispose() {
        let env = Arc::new(ClientEnvironment::new());
        let interceptor = Interceptor::new(CountingSetup::supported(), env);
        interceptor.apply().unwrap();
        interceptor.on(InterceptorEventKind::Request, noop());
        interceptor.dispose();

        assert_eq!(interceptor.listener_count(InterceptorEventKind::Request), 0);
        interceptor.on(InterceptorEventKind::Request, noop());
        assert_eq!(interceptor.listener_count(InterceptorEventKind::Request), 0);
    }

    #[test]
    fn test_disposed_owner_frees_symbol_for_adopter_reapply() {
        let env = Arc::new(ClientEnvironment::new());
        let first = Interceptor::new(CountingSetup::supported(), Arc::clone(&env));
        first.apply().unwrap();
        first.dispose();

        let second_setup = CountingSetup::supported();
        let setups = Arc::clone(&second_setup.setups);
        let second = Interceptor::new(second_setup, env);
        second.apply().unwrap();

        assert!(!second.is_adopted());
        assert_eq!(setups.load(Ordering::SeqCst), 1);
    }
}
