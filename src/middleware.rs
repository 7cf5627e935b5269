//! Middleware chain composition for tasks and resource initialization
//! (spec §4.3).
//!
//! Chains are compiled once per task/resource at wiring time into a
//! [`CompiledTaskChain`]/[`CompiledResourceChain`] (an ordered list of
//! `(definition, config)` pairs); [`MiddlewareManager::run_task_chain`] and
//! [`MiddlewareManager::run_resource_chain`] fold that list into a single
//! `next`-passing closure per call, outer-to-inner, the same way the event
//! manager folds interceptors in `event.rs`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::any_value::AnyValue;
use crate::deps::{DependencySet, DepsRegistry};
use crate::error::{ComponentKind, FrameworkError};
use crate::event::BoxFuture;
use crate::id::{id, Id};
use crate::resource::RegistrationThunk;
use crate::store::{DefMeta, Definition};
use crate::tag::Tags;

/// Continuation that resumes the chain with (possibly rewritten) input.
pub type TaskNext = Arc<dyn Fn(AnyValue) -> BoxFuture<'static, Result<AnyValue, FrameworkError>> + Send + Sync>;
/// Continuation that resumes resource init; it takes no input since a
/// resource's config is fixed for the lifetime of that resource instance.
pub type ResourceNext = Arc<dyn Fn() -> BoxFuture<'static, Result<AnyValue, FrameworkError>> + Send + Sync>;

#[derive(Clone)]
pub struct TaskMiddlewareContext {
    pub task_id: Id,
    pub deps: Arc<DepsRegistry>,
}

#[derive(Clone)]
pub struct ResourceMiddlewareContext {
    pub resource_id: Id,
    pub deps: Arc<DepsRegistry>,
}

pub type TaskMiddlewareHandler = Arc<
    dyn Fn(TaskMiddlewareContext, AnyValue, Value, TaskNext) -> BoxFuture<'static, Result<AnyValue, FrameworkError>>
        + Send
        + Sync,
>;

pub type ResourceMiddlewareHandler = Arc<
    dyn Fn(ResourceMiddlewareContext, Value, ResourceNext) -> BoxFuture<'static, Result<AnyValue, FrameworkError>>
        + Send
        + Sync,
>;

/// Predicate deciding whether a global middleware applies to a given
/// component (`everywhere: boolean | predicate` in spec §3).
pub type EverywherePredicate = Arc<dyn Fn(&DefMeta) -> bool + Send + Sync>;

/// `middleware.with(config)` — pairs a middleware id with a config payload
/// for attachment on a specific task or resource.
#[derive(Clone)]
pub struct MiddlewareAttachment {
    pub id: Id,
    pub config: Value,
}

pub struct TaskMiddlewareDefinition {
    pub id: Id,
    pub tags: Tags,
    pub dependencies: DependencySet,
    pub everywhere: Option<EverywherePredicate>,
    handler: TaskMiddlewareHandler,
}

impl TaskMiddlewareDefinition {
    pub fn new<F, Fut>(mw_id: impl AsRef<str>, handler: F) -> Self
    where
        F: Fn(TaskMiddlewareContext, AnyValue, Value, TaskNext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<AnyValue, FrameworkError>> + Send + 'static,
    {
        Self {
            id: id(mw_id),
            tags: Tags::new(),
            dependencies: DependencySet::new(),
            everywhere: None,
            handler: Arc::new(move |ctx, input, config, next| Box::pin(handler(ctx, input, config, next))),
        }
    }

    pub fn global(mut self) -> Self {
        self.everywhere = Some(Arc::new(|_| true));
        self
    }

    pub fn global_when(mut self, predicate: impl Fn(&DefMeta) -> bool + Send + Sync + 'static) -> Self {
        self.everywhere = Some(Arc::new(predicate));
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_dependencies(mut self, deps: DependencySet) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with(&self, config: Value) -> MiddlewareAttachment {
        MiddlewareAttachment {
            id: self.id.clone(),
            config,
        }
    }
}

impl Definition for TaskMiddlewareDefinition {
    fn meta(&self) -> DefMeta {
        DefMeta {
            id: self.id.clone(),
            kind: ComponentKind::Middleware,
            tags: self.tags.clone(),
            dependencies: self.dependencies.ids().to_vec(),
            registration_index: 0,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub struct ResourceMiddlewareDefinition {
    pub id: Id,
    pub tags: Tags,
    pub dependencies: DependencySet,
    pub everywhere: Option<EverywherePredicate>,
    handler: ResourceMiddlewareHandler,
}

impl ResourceMiddlewareDefinition {
    pub fn new<F, Fut>(mw_id: impl AsRef<str>, handler: F) -> Self
    where
        F: Fn(ResourceMiddlewareContext, Value, ResourceNext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<AnyValue, FrameworkError>> + Send + 'static,
    {
        Self {
            id: id(mw_id),
            tags: Tags::new(),
            dependencies: DependencySet::new(),
            everywhere: None,
            handler: Arc::new(move |ctx, config, next| Box::pin(handler(ctx, config, next))),
        }
    }

    pub fn global(mut self) -> Self {
        self.everywhere = Some(Arc::new(|_| true));
        self
    }

    pub fn global_when(mut self, predicate: impl Fn(&DefMeta) -> bool + Send + Sync + 'static) -> Self {
        self.everywhere = Some(Arc::new(predicate));
        self
    }

    pub fn with_dependencies(mut self, deps: DependencySet) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with(&self, config: Value) -> MiddlewareAttachment {
        MiddlewareAttachment {
            id: self.id.clone(),
            config,
        }
    }
}

impl Definition for ResourceMiddlewareDefinition {
    fn meta(&self) -> DefMeta {
        DefMeta {
            id: self.id.clone(),
            kind: ComponentKind::Middleware,
            tags: self.tags.clone(),
            dependencies: self.dependencies.ids().to_vec(),
            registration_index: 0,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub struct CompiledTaskChain {
    pub layers: Vec<(Arc<TaskMiddlewareDefinition>, Value)>,
}

pub struct CompiledResourceChain {
    pub layers: Vec<(Arc<ResourceMiddlewareDefinition>, Value)>,
}

/// What each dispatch-level interceptor (`intercept`/`interceptMiddleware`)
/// sees about the layer it is wrapping.
#[derive(Clone)]
pub struct TaskDispatchInfo {
    pub middleware_id: Id,
    pub task_id: Id,
    pub config: Value,
}

#[derive(Clone)]
pub struct ResourceDispatchInfo {
    pub middleware_id: Id,
    pub resource_id: Id,
    pub config: Value,
}

pub type TaskDispatchInterceptor =
    Arc<dyn Fn(TaskDispatchInfo, AnyValue, TaskNext) -> BoxFuture<'static, Result<AnyValue, FrameworkError>> + Send + Sync>;
pub type ResourceDispatchInterceptor =
    Arc<dyn Fn(ResourceDispatchInfo, ResourceNext) -> BoxFuture<'static, Result<AnyValue, FrameworkError>> + Send + Sync>;

/// Holds the registered global middleware and the installed interceptors;
/// compiles and runs chains for individual tasks/resources.
#[derive(Default)]
pub struct MiddlewareManager {
    task_kind_interceptors: RwLock<Vec<TaskDispatchInterceptor>>,
    resource_kind_interceptors: RwLock<Vec<ResourceDispatchInterceptor>>,
    per_task_middleware: RwLock<HashMap<Id, Vec<TaskDispatchInterceptor>>>,
    per_resource_middleware: RwLock<HashMap<Id, Vec<ResourceDispatchInterceptor>>>,
    locked: std::sync::atomic::AtomicBool,
}

impl MiddlewareManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) {
        self.locked.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_lock(&self, target: &Id) -> Result<(), FrameworkError> {
        if self.locked.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(FrameworkError::LockdownViolation(target.clone()));
        }
        Ok(())
    }

    /// `middlewareManager.intercept("task", fn)` — wraps every task
    /// middleware dispatch.
    pub fn intercept_task(&self, interceptor: TaskDispatchInterceptor) -> Result<(), FrameworkError> {
        self.check_lock(&id("globals.middlewareManager"))?;
        self.task_kind_interceptors.write().push(interceptor);
        Ok(())
    }

    /// `middlewareManager.intercept("resource", fn)`.
    pub fn intercept_resource(&self, interceptor: ResourceDispatchInterceptor) -> Result<(), FrameworkError> {
        self.check_lock(&id("globals.middlewareManager"))?;
        self.resource_kind_interceptors.write().push(interceptor);
        Ok(())
    }

    /// `interceptMiddleware(mw, fn)` for a task middleware.
    pub fn intercept_task_middleware(
        &self,
        target: &Id,
        interceptor: TaskDispatchInterceptor,
    ) -> Result<(), FrameworkError> {
        self.check_lock(target)?;
        self.per_task_middleware.write().entry(target.clone()).or_default().push(interceptor);
        Ok(())
    }

    /// `interceptMiddleware(mw, fn)` for a resource middleware.
    pub fn intercept_resource_middleware(
        &self,
        target: &Id,
        interceptor: ResourceDispatchInterceptor,
    ) -> Result<(), FrameworkError> {
        self.check_lock(target)?;
        self.per_resource_middleware.write().entry(target.clone()).or_default().push(interceptor);
        Ok(())
    }

    /// Compiles the chain for one task: global middleware (in registration
    /// order, filtered by the resolver's exclusion set and the `everywhere`
    /// predicate) followed by the task's own local attachments, in
    /// declaration order (spec §4.3 rule 1).
    pub fn compile_task_chain(
        &self,
        task_meta: &DefMeta,
        global_task_middleware: &[Arc<TaskMiddlewareDefinition>],
        local: &[MiddlewareAttachment],
        exclusions: &HashMap<Id, std::collections::HashSet<Id>>,
        resolve: impl Fn(&str) -> Option<Arc<TaskMiddlewareDefinition>>,
    ) -> Result<CompiledTaskChain, FrameworkError> {
        let mut layers = Vec::new();
        for mw in global_task_middleware {
            if let Some(excluded) = exclusions.get(&mw.id) {
                if excluded.contains(&task_meta.id) {
                    continue;
                }
            }
            let applies = mw.everywhere.as_ref().map(|p| p(task_meta)).unwrap_or(false);
            if applies {
                layers.push((mw.clone(), Value::Null));
            }
        }
        for attachment in local {
            let mw = resolve(&attachment.id).ok_or_else(|| FrameworkError::UnknownDependency {
                dependency: attachment.id.clone(),
                by: task_meta.id.clone(),
            })?;
            layers.push((mw, attachment.config.clone()));
        }
        Ok(CompiledTaskChain { layers })
    }

    pub fn compile_resource_chain(
        &self,
        resource_meta: &DefMeta,
        global_resource_middleware: &[Arc<ResourceMiddlewareDefinition>],
        local: &[MiddlewareAttachment],
        exclusions: &HashMap<Id, std::collections::HashSet<Id>>,
        resolve: impl Fn(&str) -> Option<Arc<ResourceMiddlewareDefinition>>,
    ) -> Result<CompiledResourceChain, FrameworkError> {
        let mut layers = Vec::new();
        for mw in global_resource_middleware {
            if let Some(excluded) = exclusions.get(&mw.id) {
                if excluded.contains(&resource_meta.id) {
                    continue;
                }
            }
            let applies = mw.everywhere.as_ref().map(|p| p(resource_meta)).unwrap_or(false);
            if applies {
                layers.push((mw.clone(), Value::Null));
            }
        }
        for attachment in local {
            let mw = resolve(&attachment.id).ok_or_else(|| FrameworkError::UnknownDependency {
                dependency: attachment.id.clone(),
                by: resource_meta.id.clone(),
            })?;
            layers.push((mw, attachment.config.clone()));
        }
        Ok(CompiledResourceChain { layers })
    }

    /// Runs a compiled task chain outer-to-inner around `tail` (the
    /// innermost step: input validation + `beforeRun` + user `run` +
    /// `afterRun`, built by the caller in `task.rs`).
    pub async fn run_task_chain(
        &self,
        chain: &CompiledTaskChain,
        ctx: TaskMiddlewareContext,
        input: AnyValue,
        tail: TaskNext,
    ) -> Result<AnyValue, FrameworkError> {
        let kind_interceptors = self.task_kind_interceptors.read().clone();
        let per_middleware = self.per_task_middleware.read().clone();

        let mut next = tail;
        for (mw, config) in chain.layers.iter().rev() {
            let handler = mw.handler.clone();
            let mw_id = mw.id.clone();
            let task_id = ctx.task_id.clone();
            let config = config.clone();
            let ctx_for_handler = ctx.clone();
            let inner_next = next.clone();

            let real: TaskNext = Arc::new(move |input: AnyValue| {
                (handler)(ctx_for_handler.clone(), input, config.clone(), inner_next.clone())
            });

            let mut wrapped = real;
            let specific = per_middleware.get(mw_id.as_ref()).cloned().unwrap_or_default();
            for interceptor in specific.into_iter().rev() {
                let inner = wrapped.clone();
                let info = TaskDispatchInfo {
                    middleware_id: mw_id.clone(),
                    task_id: task_id.clone(),
                    config: config.clone(),
                };
                wrapped = Arc::new(move |input: AnyValue| interceptor(info.clone(), input, inner.clone()));
            }
            for interceptor in kind_interceptors.iter().cloned().rev() {
                let inner = wrapped.clone();
                let info = TaskDispatchInfo {
                    middleware_id: mw_id.clone(),
                    task_id: task_id.clone(),
                    config: config.clone(),
                };
                wrapped = Arc::new(move |input: AnyValue| interceptor(info.clone(), input, inner.clone()));
            }
            next = wrapped;
        }
        next(input).await
    }

    /// Runs a compiled resource chain around `tail` (the innermost step:
    /// `beforeInit` + `init` + `afterInit`, built by `resource.rs`).
    pub async fn run_resource_chain(
        &self,
        chain: &CompiledResourceChain,
        ctx: ResourceMiddlewareContext,
        tail: ResourceNext,
    ) -> Result<AnyValue, FrameworkError> {
        let kind_interceptors = self.resource_kind_interceptors.read().clone();
        let per_middleware = self.per_resource_middleware.read().clone();

        let mut next = tail;
        for (mw, config) in chain.layers.iter().rev() {
            let handler = mw.handler.clone();
            let mw_id = mw.id.clone();
            let resource_id = ctx.resource_id.clone();
            let config = config.clone();
            let ctx_for_handler = ctx.clone();
            let inner_next = next.clone();

            let real: ResourceNext = Arc::new(move || (handler)(ctx_for_handler.clone(), config.clone(), inner_next.clone()));

            let mut wrapped = real;
            let specific = per_middleware.get(mw_id.as_ref()).cloned().unwrap_or_default();
            for interceptor in specific.into_iter().rev() {
                let inner = wrapped.clone();
                let info = ResourceDispatchInfo {
                    middleware_id: mw_id.clone(),
                    resource_id: resource_id.clone(),
                    config: config.clone(),
                };
                wrapped = Arc::new(move || interceptor(info.clone(), inner.clone()));
            }
            for interceptor in kind_interceptors.iter().cloned().rev() {
                let inner = wrapped.clone();
                let info = ResourceDispatchInfo {
                    middleware_id: mw_id.clone(),
                    resource_id: resource_id.clone(),
                    config: config.clone(),
                };
                wrapped = Arc::new(move || interceptor(info.clone(), inner.clone()));
            }
            next = wrapped;
        }
        next().await
    }
}

/// Wraps a task middleware definition as a deferred registration. Task and
/// resource middleware definitions live only in the [`crate::store::Store`]
/// — `MiddlewareManager` discriminates them from each other by which typed
/// `Store::resolve` call succeeds, not by a registry of its own.
pub fn register_task_middleware(def: Arc<TaskMiddlewareDefinition>) -> RegistrationThunk {
    RegistrationThunk::other(move |ctx| ctx.store.register(def.clone()))
}

pub fn register_resource_middleware(def: Arc<ResourceMiddlewareDefinition>) -> RegistrationThunk {
    RegistrationThunk::other(move |ctx| ctx.store.register(def.clone()))
}
