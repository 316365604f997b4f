// packages/engine/src/interception/registry.rs
//! Registry of running interceptors
//!
//! Maps an interceptor kind's symbol to the instance currently patching that
//! kind. An interceptor that finds its symbol already registered adopts the
//! running instance instead of patching the client a second time.

use crate::interception::events::HttpEmitter;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use ulid::Ulid;

/// Registry key identifying one interceptor kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorSymbol(&'static str);

impl InterceptorSymbol {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for InterceptorSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// The running instance registered under a symbol
#[derive(Debug, Clone)]
pub struct RegisteredInstance {
    /// Hub of the running instance; adopters register listeners here
    pub emitter: Arc<HttpEmitter>,

    /// Identity of the running instance
    pub instance_id: Ulid,
}

/// Shared registry of running interceptors. Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct InterceptorRegistry {
    entries: Arc<DashMap<InterceptorSymbol, RegisteredInstance>>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Running instance for `symbol`, if any
    pub fn get(&self, symbol: InterceptorSymbol) -> Option<RegisteredInstance> {
        self.entries.get(&symbol).map(|entry| entry.value().clone())
    }

    /// Register `instance` under `symbol` unless another instance holds it.
    /// Returns the instance that ends up registered.
    pub fn register(
        &self,
        symbol: InterceptorSymbol,
        instance: RegisteredInstance,
    ) -> RegisteredInstance {
        let entry = self.entries.entry(symbol).or_insert_with(|| {
            info!("Registered interceptor {} ({})", symbol, instance.instance_id);
            instance
        });
        entry.value().clone()
    }

    /// Remove the entry for `symbol` if it belongs to `instance_id`
    pub fn unregister(&self, symbol: InterceptorSymbol, instance_id: Ulid) -> bool {
        let removed = self
            .entries
            .remove_if(&symbol, |_, entry| entry.instance_id == instance_id)
            .is_some();

        if removed {
            info!("Unregistered interceptor {} ({})", symbol, instance_id);
        } else {
            debug!("Interceptor {} not owned by {}, keeping entry", symbol, instance_id);
        }
        removed
    }

    pub fn contains(&self, symbol: InterceptorSymbol) -> bool {
        self.entries.contains_key(&symbol)
    }

    pub fn symbols(&self) -> Vec<InterceptorSymbol> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
