//! Task definitions and the runner that executes them through their
//! compiled middleware chain (spec §3, §4.3).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::any_value::{self, AnyValue};
use crate::clock::now_millis;
use crate::deps::{DependencySet, DepsRegistry};
use crate::error::{ComponentKind, ErrorEventKind, ErrorPayload, FrameworkError};
use crate::event::{BoxFuture, EventManager};
use crate::id::{id, Id};
use crate::middleware::{CompiledTaskChain, MiddlewareAttachment, MiddlewareManager, TaskMiddlewareContext, TaskNext};
use crate::resource::RegistrationThunk;
use crate::store::{DefMeta, Definition, Store};
use crate::tag::Tags;
use crate::validation::{validate, JsonSchema, Schema};

/// Wraps a task definition as a deferred registration, for use inside a
/// resource's `register()` factory alongside `register_resource`/
/// `register_event`/`register_hook`.
pub fn register_task<I, O>(def: Arc<TaskDefinition<I, O>>) -> RegistrationThunk
where
    I: serde::de::DeserializeOwned + Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    RegistrationThunk::other(move |ctx| ctx.tasks.register(&ctx.store, def.clone()))
}

/// `TaskDefinition { id, dependencies, middleware, inputSchema?, run(input,
/// deps) → T, meta, tags }` (spec §3). `I` is the validated input type, `O`
/// the task's return type.
pub struct TaskDefinition<I, O> {
    pub id: Id,
    pub tags: Tags,
    pub dependencies: DependencySet,
    pub middleware: Vec<MiddlewareAttachment>,
    pub input_schema: Arc<dyn Schema<I> + Send + Sync>,
    run: Arc<dyn Fn(I, Arc<DepsRegistry>) -> BoxFuture<'static, Result<O, FrameworkError>> + Send + Sync>,
}

impl<I, O> TaskDefinition<I, O>
where
    I: serde::de::DeserializeOwned + Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    pub fn new<F, Fut>(task_id: impl AsRef<str>, run: F) -> Self
    where
        F: Fn(I, Arc<DepsRegistry>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<O, FrameworkError>> + Send + 'static,
    {
        Self {
            id: id(task_id),
            tags: Tags::new(),
            dependencies: DependencySet::new(),
            middleware: Vec::new(),
            input_schema: Arc::new(JsonSchema::new()),
            run: Arc::new(move |input, deps| Box::pin(run(input, deps))),
        }
    }

    /// Like [`TaskDefinition::new`], but derives the id from the call site
    /// instead of requiring one (spec §3, "Anonymous ids are derived from
    /// the declaring source file path + symbol name when omitted").
    #[track_caller]
    pub fn anonymous<F, Fut>(run: F) -> Self
    where
        F: Fn(I, Arc<DepsRegistry>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<O, FrameworkError>> + Send + 'static,
    {
        Self::new(crate::id::anonymous_id("task"), run)
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_dependencies(mut self, deps: DependencySet) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_middleware(mut self, attachments: Vec<MiddlewareAttachment>) -> Self {
        self.middleware = attachments;
        self
    }

    pub fn with_schema(mut self, schema: Arc<dyn Schema<I> + Send + Sync>) -> Self {
        self.input_schema = schema;
        self
    }
}

impl<I: Send + Sync + 'static, O: Send + Sync + 'static> Definition for TaskDefinition<I, O> {
    fn meta(&self) -> DefMeta {
        DefMeta {
            id: self.id.clone(),
            kind: ComponentKind::Task,
            tags: self.tags.clone(),
            dependencies: self.dependencies.ids().to_vec(),
            registration_index: 0,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Everything a task invocation needs that is scoped to the run rather than
/// to the task's own definition.
#[derive(Clone)]
pub struct TaskInvocationContext {
    pub deps: Arc<DepsRegistry>,
    pub events: Arc<EventManager<Value>>,
    pub error_events: Arc<EventManager<ErrorPayload>>,
    pub middleware: Arc<MiddlewareManager>,
    pub chain: Arc<CompiledTaskChain>,
}

/// Object-safe view over a `TaskDefinition<I, O>` so the runner can hold
/// tasks of different `I`/`O` in one map, keyed by id.
#[async_trait]
pub trait TaskRuntime: Send + Sync {
    fn id(&self) -> &Id;
    fn middleware_attachments(&self) -> &[MiddlewareAttachment];
    async fn invoke(&self, input: Value, ctx: TaskInvocationContext) -> Result<AnyValue, FrameworkError>;
}

#[async_trait]
impl<I, O> TaskRuntime for TaskDefinition<I, O>
where
    I: serde::de::DeserializeOwned + Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    fn id(&self) -> &Id {
        &self.id
    }

    fn middleware_attachments(&self) -> &[MiddlewareAttachment] {
        &self.middleware
    }

    async fn invoke(&self, input: Value, ctx: TaskInvocationContext) -> Result<AnyValue, FrameworkError> {
        let task_id = self.id.clone();
        let input_schema = self.input_schema.clone();
        let run = self.run.clone();
        let events = ctx.events.clone();
        let error_events = ctx.error_events.clone();
        let deps = ctx.deps.clone();

        // Innermost step of the onion (spec §4.3 rule 2): validate, emit
        // `beforeRun`, call user code, emit `afterRun`.
        let tail: TaskNext = {
            let task_id = task_id.clone();
            Arc::new(move |boxed_input: AnyValue| {
                let task_id = task_id.clone();
                let input_schema = input_schema.clone();
                let run = run.clone();
                let events = events.clone();
                let deps = deps.clone();
                Box::pin(async move {
                    let raw = any_value::downcast::<Value>(&boxed_input, &task_id)?;
                    let parsed: I = validate(input_schema.as_ref(), (*raw).clone(), ComponentKind::Task, &task_id)?;
                    events
                        .emit(&id(format!("{task_id}.beforeRun")), Value::Null, task_id.clone(), false, now_millis())
                        .await?;
                    let output = (run)(parsed, deps.clone()).await?;
                    events
                        .emit(&id(format!("{task_id}.afterRun")), Value::Null, task_id.clone(), false, now_millis())
                        .await?;
                    Ok(any_value::boxed(output))
                }) as BoxFuture<'static, Result<AnyValue, FrameworkError>>
            })
        };

        let mw_ctx = TaskMiddlewareContext {
            task_id: task_id.clone(),
            deps: ctx.deps.clone(),
        };
        let result = ctx
            .middleware
            .run_task_chain(&ctx.chain, mw_ctx, any_value::boxed(input), tail)
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                // spec §4.3 rule 3: unless a listener suppresses the error,
                // it propagates.
                let payload = ErrorPayload::from_error(&err, ErrorEventKind::Task, task_id.clone());
                let record = error_events
                    .emit_record(&id(format!("{task_id}.onError")), payload, task_id.clone(), false, now_millis())
                    .await?;
                if record.is_suppressed() {
                    Ok(any_value::boxed(Value::Null))
                } else {
                    Err(err)
                }
            }
        }
    }
}

/// Owns the task registry and dispatches calls through their compiled
/// middleware chain. One `TaskRunner` exists per run.
pub struct TaskRunner {
    tasks: RwLock<HashMap<Id, Arc<dyn TaskRuntime>>>,
    chains: RwLock<HashMap<Id, Arc<CompiledTaskChain>>>,
    middleware: Arc<MiddlewareManager>,
    events: Arc<EventManager<Value>>,
    error_events: Arc<EventManager<ErrorPayload>>,
}

impl TaskRunner {
    pub fn new(
        middleware: Arc<MiddlewareManager>,
        events: Arc<EventManager<Value>>,
        error_events: Arc<EventManager<ErrorPayload>>,
    ) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            chains: RwLock::new(HashMap::new()),
            middleware,
            events,
            error_events,
        }
    }

    /// Registers a task's definition into both the [`Store`] (for metadata
    /// and resolution by the resolver) and this runner's dispatch table.
    pub fn register<I, O>(&self, store: &Store, def: Arc<TaskDefinition<I, O>>) -> Result<(), FrameworkError>
    where
        I: serde::de::DeserializeOwned + Send + Sync + 'static,
        O: Send + Sync + 'static,
    {
        store.register(def.clone())?;
        let runtime: Arc<dyn TaskRuntime> = def;
        self.tasks.write().insert(runtime.id().clone(), runtime);
        Ok(())
    }

    /// Installs the compiled chain for a task, computed once by the boot
    /// controller after dependency resolution.
    pub fn install_chain(&self, task_id: &Id, chain: CompiledTaskChain) {
        self.chains.write().insert(task_id.clone(), Arc::new(chain));
    }

    pub fn middleware_attachments(&self, task_id: &str) -> Vec<MiddlewareAttachment> {
        self.tasks
            .read()
            .get(task_id)
            .map(|t| t.middleware_attachments().to_vec())
            .unwrap_or_default()
    }

    pub fn registered_ids(&self) -> Vec<Id> {
        self.tasks.read().keys().cloned().collect()
    }

    /// `runTask(id, input)` (spec §6).
    pub async fn run_task<O: Send + Sync + 'static>(
        &self,
        task_id: &str,
        input: Value,
        deps: Arc<DepsRegistry>,
    ) -> Result<Arc<O>, FrameworkError> {
        let runtime = self
            .tasks
            .read()
            .get(task_id)
            .cloned()
            .ok_or_else(|| FrameworkError::UnknownDependency {
                dependency: id(task_id),
                by: id("runTask"),
            })?;
        let chain = self
            .chains
            .read()
            .get(task_id)
            .cloned()
            .ok_or_else(|| FrameworkError::DependencyNotInitialized(id(task_id)))?;
        let ctx = TaskInvocationContext {
            deps,
            events: self.events.clone(),
            error_events: self.error_events.clone(),
            middleware: self.middleware.clone(),
            chain,
        };
        let boxed = runtime.invoke(input, ctx).await?;
        any_value::downcast::<O>(&boxed, &id(task_id))
    }
}
