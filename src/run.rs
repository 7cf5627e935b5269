//! The boot controller (spec §4.2, §4.9).
//!
//! `run()` sequences registration, override finalization, dependency
//! resolution, middleware chain compilation, resource initialization (in
//! topological order, building up a [`DepsRegistry`] one resource at a
//! time), the `ready` transition, and post-`ready` lockdown into a single
//! call, returning a [`RunResult`] whose `dispose()` tears everything back
//! down in reverse init order. [`dry_run`] runs everything up through
//! dependency resolution — so a broken graph, a missing override target, or
//! a cycle fails the same way it would in `run()` — without calling a
//! single `init`, for validating a wiring before committing to it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::clock::now_millis;
use crate::debug::{self, DebugOption};
use crate::deps::DepsRegistry;
use crate::error::{ComponentKind, ErrorEventKind, ErrorPayload, FrameworkError};
use crate::event::{EventManager, EventRecord, Listener};
use crate::globals::{self, events as global_events};
use crate::id::{id, Id};
use crate::logger::{LogExtras, Logger, PrintStrategy};
use crate::middleware::{CompiledResourceChain, MiddlewareManager, ResourceMiddlewareDefinition, TaskMiddlewareDefinition};
use crate::resolver::DependencyResolver;
use crate::resource::{register_resource, ResourceDefinition, ResourceInvocationContext, ResourceRunner};
use crate::runtime_ctx::{register_tree, RegistrationContext};
use crate::store::Store;
use crate::task::TaskRunner;

/// Configuration for one `run()` call (spec §6 `RunOptions`).
#[derive(Clone)]
pub struct RunOptions {
    /// Which logging/tracing interceptors to install (`"normal"`,
    /// `"verbose"`, off, or a custom [`crate::debug::DebugConfig`]).
    pub debug: DebugOption,
    /// Which `tracing-subscriber` formatter to install for this process.
    pub print_strategy: PrintStrategy,
    /// Silences the logger's default print threshold, matching how tests
    /// in the source system run quietly unless `BLUELIBS_LOG_LEVEL` is set.
    pub test_mode: bool,
    /// Whether `run()` installs a process-global `tracing-subscriber` at
    /// all. Applications that already manage their own subscriber (or are
    /// composing multiple `run()` calls in one process, e.g. in tests) set
    /// this to `false`.
    pub install_global_subscriber: bool,
    /// Chains a `std::panic::set_hook` that forwards panics to
    /// `on_unhandled_error` before invoking the previous hook. Only takes
    /// effect when `on_unhandled_error` is also set.
    pub error_boundary: bool,
    /// Called for every `onError` emission across the run (task failures,
    /// resource init failures, and — if `error_boundary` is set — panics),
    /// in addition to whatever emitted the error handling it. This reports
    /// every `onError` emission rather than only ones no listener handled,
    /// the simplest sound rendition of "unhandled" without a suppress-aware
    /// bookkeeping pass across concrete and wildcard listeners alike.
    pub on_unhandled_error: Option<Arc<dyn Fn(ErrorPayload) + Send + Sync>>,
    /// Installs a background task that disposes every resource on SIGINT
    /// (and, on Unix, SIGTERM).
    pub shutdown_hooks: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            debug: DebugOption::Off,
            print_strategy: PrintStrategy::Pretty,
            test_mode: false,
            install_global_subscriber: true,
            error_boundary: false,
            on_unhandled_error: None,
            shutdown_hooks: false,
        }
    }
}

/// Everything a running application needs after `run()` returns (spec §6
/// `RunResult`).
pub struct RunResult<V> {
    pub value: Arc<V>,
    pub logger: Logger,
    pub store: Arc<Store>,
    pub tasks: Arc<TaskRunner>,
    pub resources: Arc<ResourceRunner>,
    pub events: Arc<EventManager<Value>>,
    pub error_events: Arc<EventManager<ErrorPayload>>,
    pub deps: Arc<DepsRegistry>,
    pub middleware: Arc<MiddlewareManager>,
}

impl<V: Send + Sync + 'static> RunResult<V> {
    /// `runTask(id, input)` (spec §6), bound to this run's resolved deps.
    pub async fn run_task<O: Send + Sync + 'static>(&self, task_id: &str, input: Value) -> Result<Arc<O>, FrameworkError> {
        self.tasks.run_task(task_id, input, self.deps.clone()).await
    }

    /// Looks up an initialized resource's value by id.
    pub fn get_resource<R: Send + Sync + 'static>(&self, resource_id: &str) -> Result<Arc<R>, FrameworkError> {
        self.resources.get_value(resource_id)
    }

    /// Disposes every resource in reverse init order (spec §4.9 step 10).
    /// Best-effort: collects failures rather than stopping at the first
    /// one. Calling this twice is safe — already-disposed resources are
    /// skipped.
    pub async fn dispose(&self) -> Vec<(Id, FrameworkError)> {
        dispose_resources(&self.resources, &self.deps, &self.events, &self.error_events, &self.middleware).await
    }
}

async fn dispose_resources(
    resources: &Arc<ResourceRunner>,
    deps: &Arc<DepsRegistry>,
    events: &Arc<EventManager<Value>>,
    error_events: &Arc<EventManager<ErrorPayload>>,
    middleware: &Arc<MiddlewareManager>,
) -> Vec<(Id, FrameworkError)> {
    // `dispose()` never reads `ctx.chain` (disposal doesn't go through the
    // init middleware chain), so every resource shares one placeholder
    // here instead of looking up each one's compiled chain again.
    let placeholder_chain = Arc::new(CompiledResourceChain { layers: Vec::new() });
    let ctx = ResourceInvocationContext {
        deps: deps.clone(),
        events: events.clone(),
        error_events: error_events.clone(),
        middleware: middleware.clone(),
        chain: placeholder_chain,
    };
    resources.dispose_all(ctx).await
}

struct UnhandledErrorListener {
    id: Id,
    callback: Arc<dyn Fn(ErrorPayload) + Send + Sync>,
}

#[async_trait]
impl Listener<ErrorPayload> for UnhandledErrorListener {
    fn id(&self) -> &Id {
        &self.id
    }

    async fn handle(&self, event: &Arc<EventRecord<ErrorPayload>>) -> Result<(), FrameworkError> {
        (self.callback)(event.data.clone());
        Ok(())
    }
}

fn install_error_boundary(logger: Logger, callback: Arc<dyn Fn(ErrorPayload) + Send + Sync>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let message = info.to_string();
        logger.critical(message.clone(), LogExtras::default());
        callback(ErrorPayload {
            message,
            error_kind_id: "processError",
            phase: ErrorEventKind::Process,
            source: id("globals.process"),
        });
        previous(info);
    }));
}

fn install_shutdown_hooks<V: Send + Sync + 'static>(result: &RunResult<V>) {
    let resources = result.resources.clone();
    let deps = result.deps.clone();
    let events = result.events.clone();
    let error_events = result.error_events.clone();
    let middleware = result.middleware.clone();
    let logger = result.logger.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sig) => sig,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
        }
        logger.info("received shutdown signal, disposing resources", LogExtras::default());
        for (resource_id, err) in dispose_resources(&resources, &deps, &events, &error_events, &middleware).await {
            logger.error(format!("error disposing `{resource_id}`: {err}"), LogExtras::default());
        }
    });
}

/// Splits every registered middleware definition into its task/resource
/// global subsets (`everywhere.is_some()`), plus the combined id list the
/// resolver needs to compute each one's transitive-dependency exclusion
/// set. Discriminates task vs. resource middleware by which typed
/// `Store::resolve` call succeeds — `MiddlewareManager` itself keeps no
/// separate registry of definitions.
fn collect_global_middleware(
    store: &Store,
) -> (Vec<Arc<TaskMiddlewareDefinition>>, Vec<Arc<ResourceMiddlewareDefinition>>, Vec<Id>) {
    let mut task_mw = Vec::new();
    let mut resource_mw = Vec::new();
    let mut ids = Vec::new();
    for meta in store.all_meta() {
        if meta.kind != ComponentKind::Middleware {
            continue;
        }
        if let Some(def) = store.resolve::<TaskMiddlewareDefinition>(&meta.id) {
            if def.everywhere.is_some() {
                ids.push(meta.id.clone());
                task_mw.push(def);
            }
            continue;
        }
        if let Some(def) = store.resolve::<ResourceMiddlewareDefinition>(&meta.id) {
            if def.everywhere.is_some() {
                ids.push(meta.id.clone());
                resource_mw.push(def);
            }
        }
    }
    (task_mw, resource_mw, ids)
}

struct Skeleton {
    store: Arc<Store>,
    middleware: Arc<MiddlewareManager>,
    events: Arc<EventManager<Value>>,
    error_events: Arc<EventManager<ErrorPayload>>,
    tasks: Arc<TaskRunner>,
    resources: Arc<ResourceRunner>,
}

fn build_skeleton() -> Skeleton {
    let store = Arc::new(Store::new());
    let middleware = Arc::new(MiddlewareManager::new());
    let events: Arc<EventManager<Value>> = Arc::new(EventManager::new());
    let error_events: Arc<EventManager<ErrorPayload>> = Arc::new(EventManager::new());
    let tasks = Arc::new(TaskRunner::new(middleware.clone(), events.clone(), error_events.clone()));
    let resources = Arc::new(ResourceRunner::new());
    Skeleton {
        store,
        middleware,
        events,
        error_events,
        tasks,
        resources,
    }
}

/// Walks the registration tree rooted at `root` (built-ins first, then the
/// application root resource and everything it transitively registers),
/// finalizes overrides, and resolves the dependency graph — every step of
/// spec §4.9 up to (not including) resource initialization.
fn register_and_resolve<C, V>(
    skeleton: &Skeleton,
    root: Arc<ResourceDefinition<C, V>>,
    logger: Logger,
) -> Result<crate::resolver::Resolution, FrameworkError>
where
    C: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let ctx = RegistrationContext {
        store: skeleton.store.clone(),
        tasks: skeleton.tasks.clone(),
        resources: skeleton.resources.clone(),
        events: skeleton.events.clone(),
        error_events: skeleton.error_events.clone(),
        middleware: skeleton.middleware.clone(),
    };

    let mut thunks = globals::builtin_thunks(&ctx, logger);
    thunks.push(register_resource(root));
    register_tree(&ctx, thunks)?;
    skeleton.store.finalize_overrides()?;

    let (_, _, global_mw_ids) = collect_global_middleware(&skeleton.store);
    DependencyResolver::resolve(&skeleton.store, &global_mw_ids)
}

/// Validates the registration tree and dependency graph rooted at `root`
/// without initializing a single resource (spec §4.9, "dry-run mode").
pub fn dry_run<C, V>(root: Arc<ResourceDefinition<C, V>>) -> Result<DryRunReport, FrameworkError>
where
    C: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let skeleton = build_skeleton();
    let resolution = register_and_resolve(&skeleton, root, Logger::new(true))?;
    Ok(DryRunReport {
        init_order: resolution.init_order,
        task_ids: skeleton.tasks.registered_ids(),
        resource_ids: skeleton.resources.registered_ids(),
    })
}

/// What [`dry_run`] reports: the graph was valid, plus what would have run.
pub struct DryRunReport {
    pub init_order: Vec<Id>,
    pub task_ids: Vec<Id>,
    pub resource_ids: Vec<Id>,
}

/// Boots an application rooted at `root` (spec §4.9's full ten-step
/// sequence): registers built-ins and the application tree, finalizes
/// overrides, resolves the dependency graph, compiles every task's and
/// resource's middleware chain, initializes resources in topological
/// order — each one's `init` sees every earlier resource's value through
/// the same shared [`DepsRegistry`] — emits `ready`, and locks the store,
/// middleware manager, and event managers against further registration.
pub async fn run<C, V>(root: Arc<ResourceDefinition<C, V>>, options: RunOptions) -> Result<RunResult<V>, FrameworkError>
where
    C: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    if options.install_global_subscriber {
        crate::logger::install_global_subscriber(options.print_strategy);
    }
    let logger = Logger::new(options.test_mode);
    let root_id = root.id.clone();

    let skeleton = build_skeleton();
    let resolution = register_and_resolve(&skeleton, root, logger.clone())?;

    debug::install(options.debug.resolve(), &logger, &skeleton.middleware, &skeleton.events);

    if let Some(callback) = options.on_unhandled_error.clone() {
        if options.error_boundary {
            install_error_boundary(logger.clone(), callback.clone());
        }
        skeleton.error_events.add_listener(
            None,
            Arc::new(UnhandledErrorListener {
                id: id("globals.hooks.onUnhandledError"),
                callback,
            }),
        )?;
    }

    let (global_task_mw, global_resource_mw, _) = collect_global_middleware(&skeleton.store);

    for task_id in skeleton.tasks.registered_ids() {
        let meta = skeleton
            .store
            .meta(&task_id)
            .ok_or_else(|| FrameworkError::DependencyNotInitialized(task_id.clone()))?;
        let local = skeleton.tasks.middleware_attachments(&task_id);
        let chain = skeleton.middleware.compile_task_chain(
            &meta,
            &global_task_mw,
            &local,
            &resolution.middleware_exclusions,
            |mw_id| skeleton.store.resolve::<TaskMiddlewareDefinition>(mw_id),
        )?;
        skeleton.tasks.install_chain(&task_id, chain);
    }

    for resource_id in skeleton.resources.registered_ids() {
        let meta = skeleton
            .store
            .meta(&resource_id)
            .ok_or_else(|| FrameworkError::DependencyNotInitialized(resource_id.clone()))?;
        let local = skeleton.resources.middleware_attachments(&resource_id);
        let chain = skeleton.middleware.compile_resource_chain(
            &meta,
            &global_resource_mw,
            &local,
            &resolution.middleware_exclusions,
            |mw_id| skeleton.store.resolve::<ResourceMiddlewareDefinition>(mw_id),
        )?;
        skeleton.resources.install_chain(&resource_id, chain);
    }

    let deps = Arc::new(DepsRegistry::new());
    for resource_id in &resolution.init_order {
        let chain = skeleton
            .resources
            .chain(resource_id)
            .ok_or_else(|| FrameworkError::DependencyNotInitialized(resource_id.clone()))?;
        let ctx = ResourceInvocationContext {
            deps: deps.clone(),
            events: skeleton.events.clone(),
            error_events: skeleton.error_events.clone(),
            middleware: skeleton.middleware.clone(),
            chain,
        };
        if let Err(init_err) = skeleton.resources.init_one(resource_id, ctx).await {
            // Fatal errors during resource init fail the boot and trigger
            // disposal of already-initialized resources in reverse order
            // (spec §4.3's failure policy) — best-effort, so a disposal
            // failure here is logged rather than masking `init_err`.
            for (disposed_id, dispose_err) in
                dispose_resources(&skeleton.resources, &deps, &skeleton.events, &skeleton.error_events, &skeleton.middleware).await
            {
                logger.error(
                    format!("error disposing `{disposed_id}` during boot rollback: {dispose_err}"),
                    LogExtras::default(),
                );
            }
            return Err(init_err);
        }
        if let Some(value) = skeleton.resources.get_any(resource_id) {
            deps.insert(resource_id.clone(), value);
        }
    }

    let value = skeleton.resources.get_value::<V>(&root_id)?;

    skeleton
        .events
        .emit(&id(global_events::READY), Value::Null, root_id.clone(), false, now_millis())
        .await?;

    skeleton.store.lock();
    skeleton.middleware.lock();
    skeleton.events.lock();
    skeleton.error_events.lock();

    let result = RunResult {
        value,
        logger,
        store: skeleton.store,
        tasks: skeleton.tasks,
        resources: skeleton.resources,
        events: skeleton.events,
        error_events: skeleton.error_events,
        deps,
        middleware: skeleton.middleware,
    };

    if options.shutdown_hooks {
        install_shutdown_hooks(&result);
    }

    Ok(result)
}
