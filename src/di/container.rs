//! Service registry and resolution
//!
//! - Singletons are cached for the container's lifetime. Construction of a
//!   singleton token is serialized by a per-token lock, so concurrent
//!   resolvers observe at most one construction.
//! - Scoped services are cached in the active scope, or behave as transient
//!   when no scope is active.
//! - Every resolution carries the chain of tokens being constructed; seeing
//!   a token twice in one chain is reported as a cycle.
//! - A resolution about to wait on another thread's singleton construction
//!   first follows the wait-for edges between in-flight resolutions; a path
//!   back to itself is reported as a cycle instead of blocking forever.

use parking_lot::{Mutex, RwLock};
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use uuid::Uuid;

use super::descriptor::{DisposerFn, Provider};
use super::{Dependencies, DiError, Injectable, Instance, Lifecycle, ServiceDescriptor, Token};

/// A materialized instance and its teardown hook
struct Held {
    instance: Instance,
    disposer: Option<DisposerFn>,
}

impl Held {
    fn new(instance: Instance, descriptor: &ServiceDescriptor) -> Self {
        Self {
            instance,
            disposer: descriptor.disposer.clone(),
        }
    }

    fn dispose(&self) {
        if let Some(ref disposer) = self.disposer {
            disposer(&self.instance);
        }
    }
}

/// Instances memoized for one unit of work
struct ServiceScope {
    id: String,
    instances: HashMap<Token, Held>,
}

impl ServiceScope {
    fn dispose(&self) -> usize {
        for held in self.instances.values() {
            held.dispose();
        }
        tracing::debug!(scope = %self.id, instances = self.instances.len(), "Scope disposed");
        self.instances.len()
    }
}

#[derive(Clone, Copy)]
struct Owner {
    resolution: u64,
    thread: ThreadId,
}

/// Singleton constructions in progress across threads
#[derive(Default)]
struct InFlight {
    /// singleton token -> resolution constructing it
    owners: HashMap<Token, Owner>,
    /// resolution -> singleton token it is blocked on
    waiting: HashMap<u64, Token>,
}

/// Ownership of one singleton construction, released on drop
struct Owning<'a> {
    in_flight: &'a Mutex<InFlight>,
    token: Token,
}

impl<'a> Owning<'a> {
    fn claim(in_flight: &'a Mutex<InFlight>, token: &Token, resolution: u64) -> Self {
        in_flight.lock().owners.insert(
            token.clone(),
            Owner {
                resolution,
                thread: thread::current().id(),
            },
        );
        Self {
            in_flight,
            token: token.clone(),
        }
    }
}

impl Drop for Owning<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().owners.remove(&self.token);
    }
}

#[derive(Default)]
struct Inner {
    services: RwLock<HashMap<Token, ServiceDescriptor>>,
    singletons: RwLock<HashMap<Token, Held>>,
    construction_locks: Mutex<HashMap<Token, Arc<Mutex<()>>>>,
    in_flight: Mutex<InFlight>,
    next_resolution: AtomicU64,
    scopes: RwLock<HashMap<String, ServiceScope>>,
    current_scope: RwLock<Option<String>>,
    disposed: AtomicBool,
}

/// One top-level resolve call and the tokens it is constructing
#[derive(Clone)]
struct Resolution {
    id: u64,
    chain: Vec<Token>,
}

impl Resolution {
    fn child(&self, token: &Token) -> Self {
        let mut chain = self.chain.clone();
        chain.push(token.clone());
        Self { id: self.id, chain }
    }
}

/// Restores the previous current scope when a `with_scope` body ends,
/// including by panic or cancellation
struct ScopeGuard<'a> {
    slot: &'a RwLock<Option<String>>,
    previous: Option<String>,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        *self.slot.write() = self.previous.take();
    }
}

/// Dependency injection container
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct DiContainer {
    inner: Arc<Inner>,
}

/// Resolution context handed to service factories
///
/// Resolving through the `Resolver` (rather than the container) keeps the
/// construction chain intact for cycle detection and keeps scoped
/// dependencies in the same scope as the service being built.
pub struct Resolver<'a> {
    container: &'a DiContainer,
    resolution: Resolution,
    scope: Option<String>,
}

impl Resolver<'_> {
    pub fn resolve<T: Any + Send + Sync>(&self, token: &Token) -> Result<Arc<T>, DiError> {
        let instance = self
            .container
            .resolve_instance(token, self.scope.as_deref(), &self.resolution)?;
        downcast(token, instance)
    }

    pub fn resolve_injectable<T: Injectable>(&self) -> Result<Arc<T>, DiError> {
        self.container.ensure_injectable::<T>();
        self.resolve(&T::token())
    }

    /// Scope the current resolution runs in
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }
}

impl DiContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a descriptor; nothing is constructed eagerly
    ///
    /// Replacing a singleton registration disposes and drops its cached
    /// instance.
    pub fn register(&self, descriptor: ServiceDescriptor) {
        if self.is_disposed() {
            tracing::warn!(token = %descriptor.token, "Ignoring registration on disposed container");
            return;
        }

        let token = descriptor.token.clone();
        let lifecycle = descriptor.lifecycle;
        let replaced = self
            .inner
            .services
            .write()
            .insert(token.clone(), descriptor)
            .is_some();
        if replaced {
            let cached = self.inner.singletons.write().remove(&token);
            if let Some(held) = cached {
                held.dispose();
            }
        }
        tracing::debug!(token = %token, lifecycle = %lifecycle, replaced, "Service registered");
    }

    pub fn register_singleton<T, F>(&self, token: Token, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Resolver<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register(ServiceDescriptor::singleton(token, factory));
    }

    pub fn register_transient<T, F>(&self, token: Token, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Resolver<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register(ServiceDescriptor::transient(token, factory));
    }

    pub fn register_scoped<T, F>(&self, token: Token, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Resolver<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register(ServiceDescriptor::scoped(token, factory));
    }

    pub fn register_instance<T: Any + Send + Sync>(&self, token: Token, value: Arc<T>) {
        self.register(ServiceDescriptor::instance(token, value));
    }

    /// Register an injectable type with an explicit dependency list
    ///
    /// The list takes precedence over [`Injectable::dependencies`].
    pub fn register_injectable_with<T: Injectable>(&self, dependencies: Vec<Token>) {
        self.register(ServiceDescriptor::injectable::<T>().with_dependencies(dependencies));
    }

    pub fn is_registered(&self, token: &Token) -> bool {
        self.inner.services.read().contains_key(token)
    }

    /// Remove a registration, disposing its cached singleton
    pub fn unregister(&self, token: &Token) -> bool {
        let removed = self.inner.services.write().remove(token).is_some();
        let cached = self.inner.singletons.write().remove(token);
        if let Some(held) = cached {
            held.dispose();
        }
        removed
    }

    /// Number of registered services
    pub fn len(&self) -> usize {
        self.inner.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve in the current scope (if any)
    pub fn resolve<T: Any + Send + Sync>(&self, token: &Token) -> Result<Arc<T>, DiError> {
        let scope = self.current_scope();
        let instance = self.resolve_instance(token, scope.as_deref(), &self.begin_resolution())?;
        downcast(token, instance)
    }

    /// Resolve an [`Injectable`], registering it first if needed
    pub fn resolve_injectable<T: Injectable>(&self) -> Result<Arc<T>, DiError> {
        self.ensure_injectable::<T>();
        self.resolve(&T::token())
    }

    /// Resolve inside an explicit scope, regardless of the current one
    pub fn resolve_in_scope<T: Any + Send + Sync>(&self, scope_id: &str, token: &Token) -> Result<Arc<T>, DiError> {
        if !self.inner.scopes.read().contains_key(scope_id) {
            return Err(DiError::ScopeNotFound {
                scope: scope_id.to_string(),
            });
        }
        let instance = self.resolve_instance(token, Some(scope_id), &self.begin_resolution())?;
        downcast(token, instance)
    }

    /// Create a scope (a random id is generated when none is given)
    ///
    /// Creating an existing scope id is a no-op.
    pub fn create_scope(&self, scope_id: Option<&str>) -> String {
        let id = scope_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.inner
            .scopes
            .write()
            .entry(id.clone())
            .or_insert_with(|| ServiceScope {
                id: id.clone(),
                instances: HashMap::new(),
            });
        id
    }

    /// Run `f` with `scope_id` as the current scope
    ///
    /// The scope is created if missing. The previous current scope is
    /// restored when `f` finishes, panics, or the returned future is
    /// dropped; the scope itself stays alive until
    /// [`dispose_scope`](Self::dispose_scope).
    pub async fn with_scope<F, Fut, R>(&self, scope_id: &str, f: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        let id = self.create_scope(Some(scope_id));
        let previous = std::mem::replace(&mut *self.inner.current_scope.write(), Some(id));
        let _restore = ScopeGuard {
            slot: &self.inner.current_scope,
            previous,
        };

        f().await
    }

    pub fn current_scope(&self) -> Option<String> {
        self.inner.current_scope.read().clone()
    }

    /// Tear down one scope and its disposable instances
    pub fn dispose_scope(&self, scope_id: &str) -> Result<(), DiError> {
        let scope = self
            .inner
            .scopes
            .write()
            .remove(scope_id)
            .ok_or_else(|| DiError::ScopeNotFound {
                scope: scope_id.to_string(),
            })?;

        {
            let mut current = self.inner.current_scope.write();
            if current.as_deref() == Some(scope_id) {
                *current = None;
            }
        }

        scope.dispose();
        Ok(())
    }

    /// Tear down all scopes and singletons, then clear every registry
    ///
    /// Later calls are no-ops; later resolutions fail with
    /// [`DiError::Disposed`].
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let scopes: Vec<ServiceScope> = self.inner.scopes.write().drain().map(|(_, s)| s).collect();
        let scoped_instances: usize = scopes.iter().map(ServiceScope::dispose).sum();

        let singletons: Vec<Held> = self
            .inner
            .singletons
            .write()
            .drain()
            .map(|(_, held)| held)
            .collect();
        for held in &singletons {
            held.dispose();
        }

        self.inner.services.write().clear();
        self.inner.construction_locks.lock().clear();
        *self.inner.in_flight.lock() = InFlight::default();
        *self.inner.current_scope.write() = None;

        tracing::info!(
            scopes = scopes.len(),
            scoped_instances,
            singletons = singletons.len(),
            "DI container disposed"
        );
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    fn ensure_injectable<T: Injectable>(&self) {
        self.register_if_absent(ServiceDescriptor::injectable::<T>());
    }

    /// Register unless the token is already taken; never replaces
    fn register_if_absent(&self, descriptor: ServiceDescriptor) {
        if self.is_disposed() {
            return;
        }
        let token = descriptor.token.clone();
        let mut services = self.inner.services.write();
        if !services.contains_key(&token) {
            tracing::debug!(token = %token, "Auto-registering injectable");
            services.insert(token, descriptor);
        }
    }

    fn begin_resolution(&self) -> Resolution {
        Resolution {
            id: self.inner.next_resolution.fetch_add(1, Ordering::Relaxed),
            chain: Vec::new(),
        }
    }

    fn lookup(&self, token: &Token) -> Option<ServiceDescriptor> {
        self.inner.services.read().get(token).cloned()
    }

    fn resolve_instance(&self, token: &Token, scope: Option<&str>, parent: &Resolution) -> Result<Instance, DiError> {
        if self.is_disposed() {
            return Err(DiError::Disposed);
        }

        if parent.chain.contains(token) {
            let mut cycle = parent.chain.clone();
            cycle.push(token.clone());
            return Err(DiError::CircularDependency { chain: cycle });
        }

        let descriptor = match (self.lookup(token), token.registrar()) {
            (Some(descriptor), _) => descriptor,
            (None, Some(registrar)) => {
                let descriptor = registrar();
                let registered_as = descriptor.token.clone();
                self.register_if_absent(descriptor);
                // An injectable may register under a token of its own choosing
                if registered_as != *token {
                    return self.resolve_instance(&registered_as, scope, parent);
                }
                self.lookup(token)
                    .ok_or_else(|| DiError::NotRegistered { token: token.clone() })?
            }
            (None, None) => return Err(DiError::NotRegistered { token: token.clone() }),
        };

        if let Provider::Instance(ref instance) = descriptor.provider {
            return Ok(instance.clone());
        }

        match descriptor.lifecycle {
            Lifecycle::Singleton => self.resolve_singleton(&descriptor, parent),
            Lifecycle::Scoped => match scope {
                Some(scope_id) => self.resolve_scoped(&descriptor, scope_id, parent),
                None => self.construct(&descriptor, None, parent),
            },
            Lifecycle::Transient => self.construct(&descriptor, scope, parent),
        }
    }

    fn resolve_singleton(&self, descriptor: &ServiceDescriptor, parent: &Resolution) -> Result<Instance, DiError> {
        let token = &descriptor.token;
        if let Some(held) = self.inner.singletons.read().get(token) {
            return Ok(held.instance.clone());
        }

        let lock = self
            .inner
            .construction_locks
            .lock()
            .entry(token.clone())
            .or_default()
            .clone();
        let _guard = match lock.try_lock() {
            Some(guard) => guard,
            None => {
                self.wait_for_construction(token, parent)?;
                let guard = lock.lock();
                self.inner.in_flight.lock().waiting.remove(&parent.id);
                guard
            }
        };

        // Another resolver may have finished while we waited
        if let Some(held) = self.inner.singletons.read().get(token) {
            return Ok(held.instance.clone());
        }

        let _owning = Owning::claim(&self.inner.in_flight, token, parent.id);

        // Singletons never capture a scope
        let instance = self.construct(descriptor, None, parent)?;
        self.inner
            .singletons
            .write()
            .insert(token.clone(), Held::new(instance.clone(), descriptor));
        tracing::debug!(token = %token, "Singleton constructed");
        Ok(instance)
    }

    /// Record that `parent` is about to block on `token`, unless doing so
    /// would close a wait-for cycle
    ///
    /// Follows owner -> awaited token -> owner edges starting at `token`.
    /// Reaching `parent` itself, or a construction running on this thread,
    /// means blocking would never return.
    fn wait_for_construction(&self, token: &Token, parent: &Resolution) -> Result<(), DiError> {
        let this_thread = thread::current().id();
        let mut in_flight = self.inner.in_flight.lock();

        let mut cycle = parent.chain.clone();
        cycle.push(token.clone());
        let mut next = token.clone();
        for _ in 0..=in_flight.owners.len() {
            let owner = match in_flight.owners.get(&next) {
                Some(owner) => *owner,
                None => break,
            };
            if owner.resolution == parent.id || owner.thread == this_thread {
                tracing::warn!(token = %token, "Cross-resolution singleton cycle detected");
                return Err(DiError::CircularDependency { chain: cycle });
            }
            match in_flight.waiting.get(&owner.resolution) {
                Some(awaited) => {
                    next = awaited.clone();
                    cycle.push(next.clone());
                }
                None => break,
            }
        }

        in_flight.waiting.insert(parent.id, token.clone());
        Ok(())
    }

    fn resolve_scoped(&self, descriptor: &ServiceDescriptor, scope_id: &str, parent: &Resolution) -> Result<Instance, DiError> {
        let token = &descriptor.token;
        let scope_missing = || DiError::ScopeNotFound {
            scope: scope_id.to_string(),
        };

        {
            let scopes = self.inner.scopes.read();
            let scope = scopes.get(scope_id).ok_or_else(scope_missing)?;
            if let Some(held) = scope.instances.get(token) {
                return Ok(held.instance.clone());
            }
        }

        let instance = self.construct(descriptor, Some(scope_id), parent)?;

        let mut scopes = self.inner.scopes.write();
        let scope = scopes.get_mut(scope_id).ok_or_else(scope_missing)?;
        let held = scope
            .instances
            .entry(token.clone())
            .or_insert_with(|| Held::new(instance, descriptor));
        Ok(held.instance.clone())
    }

    fn construct(&self, descriptor: &ServiceDescriptor, scope: Option<&str>, parent: &Resolution) -> Result<Instance, DiError> {
        let resolution = parent.child(&descriptor.token);

        let result = match descriptor.provider {
            Provider::Instance(ref instance) => return Ok(instance.clone()),
            Provider::Factory(ref factory) => {
                let resolver = Resolver {
                    container: self,
                    resolution,
                    scope: scope.map(str::to_string),
                };
                factory(&resolver)
            }
            Provider::Constructor {
                ref dependencies,
                ref construct,
            } => {
                let instances = dependencies
                    .iter()
                    .map(|dependency| self.resolve_instance(dependency, scope, &resolution))
                    .collect::<Result<Vec<_>, _>>()?;
                construct(&Dependencies::new(dependencies.clone(), instances))
            }
        };

        result.map_err(|e| match e.downcast::<DiError>() {
            Ok(inner) => inner,
            Err(e) => DiError::ConstructionFailed {
                token: descriptor.token.clone(),
                message: format!("{:#}", e),
            },
        })
    }
}

fn downcast<T: Any + Send + Sync>(token: &Token, instance: Instance) -> Result<Arc<T>, DiError> {
    instance.downcast::<T>().map_err(|_| DiError::TypeMismatch {
        token: token.clone(),
        expected: type_name::<T>(),
    })
}
