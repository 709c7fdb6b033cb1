//! DI Container Unit Tests
//!
//! Covers lifecycle semantics as seen by callers:
//! - Singletons resolve to one shared instance
//! - Transients are rebuilt on every resolution
//! - Scoped services are shared within a scope and isolated across scopes
//! - Constructor dependencies and cycle detection

use jewelbox_core::di::{Dependencies, DiContainer, DiError, Lifecycle, Resolver, ServiceDescriptor, Token};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Counter {
    serial: usize,
}

struct Repository {
    counter: Arc<Counter>,
}

const COUNTER: Token = Token::from_static("counter");
const REPOSITORY: Token = Token::from_static("repository");

fn counting_factory(
    built: Arc<AtomicUsize>,
) -> impl Fn(&Resolver<'_>) -> anyhow::Result<Counter> + Send + Sync + 'static {
    move |_| {
        let serial = built.fetch_add(1, Ordering::SeqCst);
        Ok(Counter { serial })
    }
}

#[test]
fn test_singleton_resolves_identical_instance() {
    let container = DiContainer::new();
    let built = Arc::new(AtomicUsize::new(0));
    container.register_singleton(COUNTER, counting_factory(built.clone()));

    let first = container.resolve::<Counter>(&COUNTER).unwrap();
    let second = container.resolve::<Counter>(&COUNTER).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(built.load(Ordering::SeqCst), 1);
}

#[test]
fn test_transient_resolves_distinct_instances() {
    let container = DiContainer::new();
    let built = Arc::new(AtomicUsize::new(0));
    container.register_transient(COUNTER, counting_factory(built.clone()));

    let first = container.resolve::<Counter>(&COUNTER).unwrap();
    let second = container.resolve::<Counter>(&COUNTER).unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_ne!(first.serial, second.serial);
    assert_eq!(built.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_scoped_instances_per_scope() {
    let container = DiContainer::new();
    let built = Arc::new(AtomicUsize::new(0));
    container.register_scoped(COUNTER, counting_factory(built.clone()));

    let request_a = container.create_scope(Some("request-a"));
    let request_b = container.create_scope(Some("request-b"));

    let a1 = container.resolve_in_scope::<Counter>(&request_a, &COUNTER).unwrap();
    let a2 = container.resolve_in_scope::<Counter>(&request_a, &COUNTER).unwrap();
    let b1 = container.resolve_in_scope::<Counter>(&request_b, &COUNTER).unwrap();

    assert!(Arc::ptr_eq(&a1, &a2));
    assert!(!Arc::ptr_eq(&a1, &b1));

    let inside = container
        .with_scope(&request_a, || async { container.resolve::<Counter>(&COUNTER) })
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&inside, &a1));
    assert_eq!(container.current_scope(), None);

    container.dispose_scope(&request_a).unwrap();
    assert!(matches!(
        container.resolve_in_scope::<Counter>(&request_a, &COUNTER),
        Err(DiError::ScopeNotFound { .. })
    ));
}

#[test]
fn test_constructor_receives_dependencies() {
    let container = DiContainer::new();
    container.register_singleton(COUNTER, |_| Ok(Counter { serial: 7 }));
    container.register(ServiceDescriptor::constructor(
        REPOSITORY,
        Lifecycle::Transient,
        vec![COUNTER],
        |deps: &Dependencies| {
            Ok(Repository {
                counter: deps.get::<Counter>(0)?,
            })
        },
    ));

    let repo = container.resolve::<Repository>(&REPOSITORY).unwrap();
    let counter = container.resolve::<Counter>(&COUNTER).unwrap();
    assert_eq!(repo.counter.serial, 7);
    assert!(Arc::ptr_eq(&repo.counter, &counter));
}

#[test]
fn test_circular_dependency_is_reported() {
    let container = DiContainer::new();
    container.register_singleton(Token::from_static("a"), |r| {
        Ok(*r.resolve::<u32>(&Token::from_static("b"))?)
    });
    container.register_singleton(Token::from_static("b"), |r| {
        Ok(*r.resolve::<u32>(&Token::from_static("a"))?)
    });

    let err = container.resolve::<u32>(&Token::from_static("a")).unwrap_err();
    match err {
        DiError::CircularDependency { chain } => {
            let names: Vec<String> = chain.iter().map(|t| t.to_string()).collect();
            assert_eq!(names, vec!["a", "b", "a"]);
        }
        other => panic!("expected circular dependency, got {:?}", other),
    }
}

#[test]
fn test_unregistered_and_mismatched_tokens() {
    let container = DiContainer::new();
    assert!(matches!(
        container.resolve::<Counter>(&COUNTER),
        Err(DiError::NotRegistered { .. })
    ));

    container.register_instance(COUNTER, Arc::new(Counter { serial: 1 }));
    assert!(matches!(
        container.resolve::<String>(&COUNTER),
        Err(DiError::TypeMismatch { .. })
    ));
}
