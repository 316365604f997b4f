// packages/engine/src/utils/proxy.rs
//! Transparent call proxy
//!
//! Wraps a target behind a finite, reified interface (calls, properties and
//! values are associated types of [`ProxyTarget`]) and lets named hooks sit in
//! front of construction, method calls, and property reads/writes. Every hook
//! defaults to forwarding to the target unchanged.
//!
//! Property resolution is explicit. Values defined on the wrapper live in an
//! override layer that is consulted before the target. A write goes to the
//! layer that owns the property: the override layer if the wrapper already
//! defined it, else the target's own setter, and only when the target has no
//! setter is the value defined on the wrapper.

use crate::utils::errors::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// An object whose calls and properties can be proxied
pub trait ProxyTarget: Send + Sync {
    /// A reified method call, arguments included
    type Call: Debug + Send;

    /// Result of a method call
    type Output;

    /// Property names
    type Property: Copy + Eq + Hash + Debug + Send + Sync;

    /// Property values
    type Value: Clone + Send + Sync;

    fn invoke(&self, call: Self::Call) -> Self::Output;

    fn get(&self, property: Self::Property) -> Result<Self::Value>;

    /// Write through the target's own setter. Returns `false` when the
    /// target has no setter for `property`.
    fn set(&self, property: Self::Property, value: Self::Value) -> Result<bool>;
}

/// Continuation that forwards a call to the target
pub type NextCall<'a, T> =
    &'a dyn Fn(<T as ProxyTarget>::Call) -> <T as ProxyTarget>::Output;

/// Continuation that performs the default property read
pub type NextGet<'a, T> =
    &'a dyn Fn(<T as ProxyTarget>::Property) -> Result<<T as ProxyTarget>::Value>;

/// Continuation that performs the default property write
pub type NextSet<'a, T> = &'a dyn Fn(
    <T as ProxyTarget>::Property,
    <T as ProxyTarget>::Value,
) -> Result<()>;

pub type CallHook<T> = Arc<
    dyn Fn(&CallProxy<T>, <T as ProxyTarget>::Call, NextCall<'_, T>) -> <T as ProxyTarget>::Output
        + Send
        + Sync,
>;

pub type GetHook<T> = Arc<
    dyn Fn(
            &CallProxy<T>,
            <T as ProxyTarget>::Property,
            NextGet<'_, T>,
        ) -> Result<<T as ProxyTarget>::Value>
        + Send
        + Sync,
>;

pub type SetHook<T> = Arc<
    dyn Fn(
            &CallProxy<T>,
            <T as ProxyTarget>::Property,
            <T as ProxyTarget>::Value,
            NextSet<'_, T>,
        ) -> Result<()>
        + Send
        + Sync,
>;

/// Hooks installed on a [`CallProxy`]
pub struct ProxyHooks<T: ProxyTarget> {
    pub on_call: Option<CallHook<T>>,
    pub on_get: Option<GetHook<T>>,
    pub on_set: Option<SetHook<T>>,
}

impl<T: ProxyTarget> Default for ProxyHooks<T> {
    fn default() -> Self {
        Self {
            on_call: None,
            on_get: None,
            on_set: None,
        }
    }
}

impl<T: ProxyTarget> Clone for ProxyHooks<T> {
    fn clone(&self) -> Self {
        Self {
            on_call: self.on_call.clone(),
            on_get: self.on_get.clone(),
            on_set: self.on_set.clone(),
        }
    }
}

impl<T: ProxyTarget> ProxyHooks<T> {
    pub fn on_call<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CallProxy<T>, T::Call, NextCall<'_, T>) -> T::Output + Send + Sync + 'static,
    {
        self.on_call = Some(Arc::new(hook));
        self
    }

    pub fn on_get<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CallProxy<T>, T::Property, NextGet<'_, T>) -> Result<T::Value>
            + Send
            + Sync
            + 'static,
    {
        self.on_get = Some(Arc::new(hook));
        self
    }

    pub fn on_set<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CallProxy<T>, T::Property, T::Value, NextSet<'_, T>) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.on_set = Some(Arc::new(hook));
        self
    }
}

/// Which layer owns a property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertySource {
    /// Defined on the wrapper
    Override,
    /// Owned by the wrapped target
    Target,
}

/// Wrapper that routes calls and property access through [`ProxyHooks`]
pub struct CallProxy<T: ProxyTarget> {
    target: T,
    hooks: ProxyHooks<T>,
    overrides: RwLock<HashMap<T::Property, T::Value>>,
}

impl<T: ProxyTarget> CallProxy<T> {
    pub fn new(target: T, hooks: ProxyHooks<T>) -> Self {
        Self {
            target,
            hooks,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Wrap without hooks; behaves exactly like the target
    pub fn transparent(target: T) -> Self {
        Self::new(target, ProxyHooks::default())
    }

    /// The wrapped target, bypassing every hook
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Invoke a method through the call hook. The hook's `next` invokes the
    /// target directly; calls that should be hooked again go through `call`.
    pub fn call(&self, call: T::Call) -> T::Output {
        let next = |call: T::Call| self.target.invoke(call);
        match &self.hooks.on_call {
            Some(hook) => hook(self, call, &next),
            None => next(call),
        }
    }

    /// Read a property through the get hook
    pub fn get(&self, property: T::Property) -> Result<T::Value> {
        let next = |property: T::Property| self.resolve(property);
        match &self.hooks.on_get {
            Some(hook) => hook(self, property, &next),
            None => next(property),
        }
    }

    /// Write a property through the set hook
    pub fn set(&self, property: T::Property, value: T::Value) -> Result<()> {
        let next = |property: T::Property, value: T::Value| self.assign(property, value);
        match &self.hooks.on_set {
            Some(hook) => hook(self, property, value, &next),
            None => next(property, value),
        }
    }

    /// Define a property on the wrapper, shadowing the target's value
    pub fn define(&self, property: T::Property, value: T::Value) {
        self.overrides.write().insert(property, value);
    }

    /// Remove a wrapper-defined property, exposing the target's value again
    pub fn undefine(&self, property: T::Property) -> Option<T::Value> {
        self.overrides.write().remove(&property)
    }

    pub fn property_source(&self, property: T::Property) -> PropertySource {
        if self.overrides.read().contains_key(&property) {
            PropertySource::Override
        } else {
            PropertySource::Target
        }
    }

    fn resolve(&self, property: T::Property) -> Result<T::Value> {
        if let Some(value) = self.overrides.read().get(&property) {
            return Ok(value.clone());
        }
        self.target.get(property)
    }

    fn assign(&self, property: T::Property, value: T::Value) -> Result<()> {
        if self.property_source(property) == PropertySource::Override {
            self.define(property, value);
            return Ok(());
        }

        if !self.target.set(property, value.clone())? {
            self.define(property, value);
        }
        Ok(())
    }
}

pub type ConstructHook<A, T> =
    Arc<dyn Fn(A, &dyn Fn(A) -> T) -> T + Send + Sync>;

/// Wrapper around a constructor with an optional construction hook
pub struct ConstructProxy<A, T> {
    construct: Arc<dyn Fn(A) -> T + Send + Sync>,
    on_construct: Option<ConstructHook<A, T>>,
}

impl<A, T> ConstructProxy<A, T> {
    pub fn new<F>(construct: F) -> Self
    where
        F: Fn(A) -> T + Send + Sync + 'static,
    {
        Self {
            construct: Arc::new(construct),
            on_construct: None,
        }
    }

    pub fn on_construct<H>(mut self, hook: H) -> Self
    where
        H: Fn(A, &dyn Fn(A) -> T) -> T + Send + Sync + 'static,
    {
        self.on_construct = Some(Arc::new(hook));
        self
    }

    pub fn construct(&self, args: A) -> T {
        let next = |args: A| (self.construct)(args);
        match &self.on_construct {
            Some(hook) => hook(args, &next),
            None => next(args),
        }
    }
}
