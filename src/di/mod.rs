//! Dependency injection container
//!
//! Services are registered under a [`Token`] with a [`ServiceDescriptor`]
//! and materialized lazily on resolution according to their [`Lifecycle`].
//! Constructor dependencies are declared as an ordered token list at
//! registration time; there is no reflection.

pub mod container;
pub mod descriptor;

pub use container::{DiContainer, Resolver};
pub use descriptor::{Dependencies, Disposable, Injectable, ServiceDescriptor};

use std::any::{type_name, Any, TypeId};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;

/// Type-erased service instance
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Registry key for a service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Token {
    /// Opaque string token
    Named(Cow<'static, str>),
    /// Token derived from a Rust type
    Type(TypeKey),
}

/// Type identity used by [`Token::Type`]
///
/// Equality, ordering and hashing look at the type only. Keys built by
/// [`Token::injectable`] also carry the type's registration so the
/// container can register it the first time the token is resolved.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
    registrar: Option<fn() -> ServiceDescriptor>,
}

impl TypeKey {
    pub(crate) fn registrar(&self) -> Option<fn() -> ServiceDescriptor> {
        self.registrar
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeKey")
            .field("name", &self.name)
            .field("injectable", &self.registrar.is_some())
            .finish()
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for TypeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Token {
    /// String token, usable in `const` items
    pub const fn from_static(name: &'static str) -> Self {
        Self::Named(Cow::Borrowed(name))
    }

    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Named(name.into())
    }

    /// Token keyed on the type itself
    ///
    /// Carries no registration; resolving it requires the type to be
    /// registered already. Use [`Token::injectable`] for self-registering
    /// dependencies.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::Type(TypeKey {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
            registrar: None,
        })
    }

    /// Type token for an [`Injectable`], registered on first resolution
    ///
    /// Compares equal to [`Token::of::<T>()`](Token::of).
    pub fn injectable<T: Injectable>() -> Self {
        Self::Type(TypeKey {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
            registrar: Some(ServiceDescriptor::injectable::<T> as fn() -> ServiceDescriptor),
        })
    }

    /// Registration carried by an injectable type token
    pub(crate) fn registrar(&self) -> Option<fn() -> ServiceDescriptor> {
        match self {
            Self::Named(_) => None,
            Self::Type(key) => key.registrar(),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{}", name),
            Self::Type(key) => write!(f, "{}", key.name),
        }
    }
}

impl From<&'static str> for Token {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

/// Service lifetimes controlling instance caching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// One instance for the container's lifetime
    Singleton,
    /// New instance per resolution
    Transient,
    /// One instance per scope; transient outside any scope
    Scoped,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Singleton => write!(f, "singleton"),
            Self::Transient => write!(f, "transient"),
            Self::Scoped => write!(f, "scoped"),
        }
    }
}

/// Resolution and lifecycle errors
#[derive(Debug, Error)]
pub enum DiError {
    #[error("Service not registered: {token}")]
    NotRegistered { token: Token },

    #[error("Circular dependency detected: {}", format_chain(.chain))]
    CircularDependency { chain: Vec<Token> },

    #[error("Service {token} is not of type {expected}")]
    TypeMismatch { token: Token, expected: &'static str },

    #[error("Failed to construct {token}: {message}")]
    ConstructionFailed { token: Token, message: String },

    #[error("Scope not found: {scope}")]
    ScopeNotFound { scope: String },

    #[error("Container has been disposed")]
    Disposed,
}

fn format_chain(chain: &[Token]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
