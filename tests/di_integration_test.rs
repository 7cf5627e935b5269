//! End-to-end exercise of the boot controller: registration, dependency
//! ordering, task invocation, and disposal.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use runner_rs::deps::{Dep, DependencySet};
use runner_rs::error::FrameworkError;
use runner_rs::resource::{register_resource, ResourceDefinition};
use runner_rs::run::{self, RunOptions};
use runner_rs::task::{register_task, TaskDefinition};

fn quiet_options() -> RunOptions {
    RunOptions {
        test_mode: true,
        install_global_subscriber: false,
        ..Default::default()
    }
}

#[derive(Default)]
struct Counter(AtomicI64);

fn db_resource() -> Arc<ResourceDefinition<(), Counter>> {
    Arc::new(ResourceDefinition::new("app.db", |_config, _deps| async {
        Ok(Counter::default())
    }))
}

fn root_resource() -> Arc<ResourceDefinition<(), String>> {
    Arc::new(
        ResourceDefinition::new("app.root", |_config, deps| async move {
            let db = deps.get(&Dep::<Counter>::new("app.db"))?;
            db.0.fetch_add(1, Ordering::SeqCst);
            Ok("ready".to_string())
        })
        .with_dependencies(DependencySet::new().with("app.db"))
        .with_register(|_config| {
            vec![
                register_resource(db_resource()),
                register_task(Arc::new(TaskDefinition::<Value, i64>::new("app.addToCounter", |input, deps| async move {
                    let db = deps.get(&Dep::<Counter>::new("app.db"))?;
                    let add = input.get("add").and_then(Value::as_i64).unwrap_or(0);
                    Ok(db.0.fetch_add(add, Ordering::SeqCst) + add)
                }))),
            ]
        }),
    )
}

#[tokio::test]
async fn resources_initialize_before_their_dependents_and_tasks_see_the_same_deps() {
    let result = run::run(root_resource(), quiet_options()).await.expect("boot succeeds");
    assert_eq!(result.value.as_str(), "ready");

    let db = result.deps.get(&Dep::<Counter>::new("app.db")).unwrap();
    assert_eq!(db.0.load(Ordering::SeqCst), 1, "app.db.init ran, then app.root.init bumped it once");

    let total = result.run_task::<i64>("app.addToCounter", json!({"add": 5})).await.unwrap();
    assert_eq!(*total, 6);

    let failures = result.dispose().await;
    assert!(failures.is_empty());
}

#[tokio::test]
async fn registering_after_ready_is_rejected() {
    let result = run::run(root_resource(), quiet_options()).await.unwrap();
    let err = result.store.register(db_resource()).unwrap_err();
    assert!(err.is("lockdownViolationError"));
}

#[tokio::test]
async fn dispose_is_idempotent() {
    let result = run::run(root_resource(), quiet_options()).await.unwrap();
    let first = result.dispose().await;
    let second = result.dispose().await;
    assert!(first.is_empty());
    assert!(second.is_empty(), "a resource already Disposed is skipped, not re-disposed");
}

#[tokio::test]
async fn dry_run_reports_the_graph_without_initializing_anything() {
    let report = run::dry_run(root_resource()).expect("graph is valid");
    assert!(report.resource_ids.iter().any(|id| id.as_ref() == "app.db"));
    assert!(report.resource_ids.iter().any(|id| id.as_ref() == "app.root"));
    assert!(report.task_ids.iter().any(|id| id.as_ref() == "app.addToCounter"));
    assert_eq!(report.init_order.last().map(|i| i.as_ref()), Some("app.root"));
}

#[tokio::test]
async fn unknown_dependency_fails_resolution_before_any_init() {
    let broken = Arc::new(
        ResourceDefinition::<(), String>::new("app.broken", |_c, _d| async { Ok(String::new()) })
            .with_dependencies(DependencySet::new().with("app.doesNotExist")),
    );
    let err = run::dry_run(broken).unwrap_err();
    match err {
        FrameworkError::UnknownDependency { dependency, .. } => assert_eq!(dependency.as_ref(), "app.doesNotExist"),
        other => panic!("expected UnknownDependency, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_resource_init_rolls_back_already_initialized_resources() {
    let disposed = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let disposed_for_dispose = disposed.clone();

    let good = Arc::new(
        ResourceDefinition::<(), ()>::new("app.good", |_c, _d| async { Ok(()) })
            .with_dispose(move |_v, _c, _d| {
                let disposed = disposed_for_dispose.clone();
                async move {
                    disposed.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }),
    );

    let root = Arc::new(
        ResourceDefinition::<(), ()>::new("app.failingRoot", |_config, _deps| async {
            Err(FrameworkError::ContractViolation("app.failingRoot".into(), "boom".into()))
        })
        .with_dependencies(DependencySet::new().with("app.good"))
        .with_register(move |_config| vec![register_resource(good.clone())]),
    );

    let err = run::run(root, quiet_options()).await.unwrap_err();
    assert!(err.is("contractViolationError"));
    assert!(disposed.load(Ordering::SeqCst), "app.good must be disposed once app.failingRoot's init fails");
}
