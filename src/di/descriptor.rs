//! Service descriptors and the injectable contract

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

use super::container::Resolver;
use super::{DiError, Instance, Lifecycle, Token};

pub(crate) type FactoryFn = Arc<dyn Fn(&Resolver<'_>) -> anyhow::Result<Instance> + Send + Sync>;
pub(crate) type ConstructorFn = Arc<dyn Fn(&Dependencies) -> anyhow::Result<Instance> + Send + Sync>;
pub(crate) type DisposerFn = Arc<dyn Fn(&Instance) + Send + Sync>;

/// Teardown hook run when the owning scope or container is disposed
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

/// A type that knows how to register itself
///
/// [`DiContainer::resolve_injectable`](super::DiContainer::resolve_injectable)
/// auto-registers implementors on first use, and so does resolving
/// the default [`token`](Injectable::token) as another service's
/// dependency.
pub trait Injectable: Sized + Send + Sync + 'static {
    fn token() -> Token {
        Token::injectable::<Self>()
    }

    fn lifecycle() -> Lifecycle {
        Lifecycle::Singleton
    }

    /// Constructor parameter tokens, in order
    fn dependencies() -> Vec<Token> {
        Vec::new()
    }

    fn construct(deps: &Dependencies) -> anyhow::Result<Self>;
}

/// Resolved constructor arguments, in declaration order
pub struct Dependencies {
    tokens: Vec<Token>,
    instances: Vec<Instance>,
}

impl Dependencies {
    pub(crate) fn new(tokens: Vec<Token>, instances: Vec<Instance>) -> Self {
        Self { tokens, instances }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Typed argument at `index`
    pub fn get<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>, DiError> {
        let token = self.tokens.get(index).cloned().unwrap_or_else(|| {
            Token::named(format!("#{}", index))
        });
        let instance = self
            .instances
            .get(index)
            .cloned()
            .ok_or_else(|| DiError::NotRegistered { token: token.clone() })?;
        instance.downcast::<T>().map_err(|_| DiError::TypeMismatch {
            token,
            expected: type_name::<T>(),
        })
    }
}

#[derive(Clone)]
pub(crate) enum Provider {
    Instance(Instance),
    Factory(FactoryFn),
    Constructor {
        dependencies: Vec<Token>,
        construct: ConstructorFn,
    },
}

/// How to materialize one service
#[derive(Clone)]
pub struct ServiceDescriptor {
    pub(crate) token: Token,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) provider: Provider,
    pub(crate) disposer: Option<DisposerFn>,
}

impl ServiceDescriptor {
    /// Factory-backed descriptor; the factory may resolve further services
    pub fn factory<T, F>(token: Token, lifecycle: Lifecycle, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Resolver<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            token,
            lifecycle,
            provider: Provider::Factory(Arc::new(move |resolver: &Resolver<'_>| {
                Ok(Arc::new(factory(resolver)?) as Instance)
            })),
            disposer: None,
        }
    }

    pub fn singleton<T, F>(token: Token, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Resolver<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::factory(token, Lifecycle::Singleton, factory)
    }

    pub fn transient<T, F>(token: Token, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Resolver<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::factory(token, Lifecycle::Transient, factory)
    }

    pub fn scoped<T, F>(token: Token, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Resolver<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::factory(token, Lifecycle::Scoped, factory)
    }

    /// Pre-built singleton value
    pub fn instance<T: Any + Send + Sync>(token: Token, value: Arc<T>) -> Self {
        Self {
            token,
            lifecycle: Lifecycle::Singleton,
            provider: Provider::Instance(value as Instance),
            disposer: None,
        }
    }

    /// Constructor with an ordered list of dependency tokens
    pub fn constructor<T, F>(token: Token, lifecycle: Lifecycle, dependencies: Vec<Token>, construct: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Dependencies) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            token,
            lifecycle,
            provider: Provider::Constructor {
                dependencies,
                construct: Arc::new(move |deps: &Dependencies| Ok(Arc::new(construct(deps)?) as Instance)),
            },
            disposer: None,
        }
    }

    /// Descriptor declared by an [`Injectable`] type
    pub fn injectable<T: Injectable>() -> Self {
        Self::constructor(T::token(), T::lifecycle(), T::dependencies(), T::construct)
    }

    /// Replace the constructor dependency list
    ///
    /// Has no effect on factory or instance descriptors.
    pub fn with_dependencies(mut self, tokens: Vec<Token>) -> Self {
        if let Provider::Constructor { ref mut dependencies, .. } = self.provider {
            *dependencies = tokens;
        }
        self
    }

    /// Teardown hook for instances of `T`
    pub fn with_disposer<T, F>(mut self, disposer: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.disposer = Some(Arc::new(move |instance: &Instance| {
            if let Some(value) = instance.downcast_ref::<T>() {
                disposer(value);
            }
        }));
        self
    }

    /// Use `T`'s [`Disposable`] impl as the teardown hook
    pub fn disposable<T: Disposable + Any>(self) -> Self {
        self.with_disposer(|value: &T| value.dispose())
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Declared constructor dependencies (empty for factories and instances)
    pub fn dependencies(&self) -> &[Token] {
        match self.provider {
            Provider::Constructor { ref dependencies, .. } => dependencies,
            _ => &[],
        }
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.provider {
            Provider::Instance(_) => "instance",
            Provider::Factory(_) => "factory",
            Provider::Constructor { .. } => "constructor",
        };
        f.debug_struct("ServiceDescriptor")
            .field("token", &self.token)
            .field("lifecycle", &self.lifecycle)
            .field("provider", &kind)
            .field("dependencies", &self.dependencies())
            .field("disposable", &self.disposer.is_some())
            .finish()
    }
}
