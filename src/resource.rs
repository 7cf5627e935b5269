//! Resource definitions and the lifecycle driver that initializes and
//! disposes them (spec §3, §4.3, "State machines").

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::any_value::{self, AnyValue};
use crate::clock::now_millis;
use crate::deps::{DependencySet, DepsRegistry};
use crate::error::{ComponentKind, ErrorEventKind, ErrorPayload, FrameworkError};
use crate::event::{BoxFuture, EventManager};
use crate::id::{id, Id};
use crate::middleware::{
    CompiledResourceChain, MiddlewareAttachment, MiddlewareManager, ResourceMiddlewareContext, ResourceNext,
};
use crate::store::{DefMeta, Definition, Store};
use crate::tag::Tags;

/// A deferred registration, produced by a resource's `register` factory
/// once its config is known (spec §4.2: "`register` may also be a factory
/// of config — its registrations must be materialized before resolution
/// continues"). `kind` distinguishes a nested resource registration from
/// everything else so the boot controller can apply the leaf-to-root
/// override precedence rule from spec §4.1 — see DESIGN.md for the exact
/// traversal this drives.
pub struct RegistrationThunk {
    pub kind: ThunkKind,
    run: Box<dyn FnOnce(&crate::runtime_ctx::RegistrationContext) -> Result<(), FrameworkError> + Send>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ThunkKind {
    Resource,
    Other,
}

impl RegistrationThunk {
    pub fn resource<F>(run: F) -> Self
    where
        F: FnOnce(&crate::runtime_ctx::RegistrationContext) -> Result<(), FrameworkError> + Send + 'static,
    {
        Self {
            kind: ThunkKind::Resource,
            run: Box::new(run),
        }
    }

    pub fn other<F>(run: F) -> Self
    where
        F: FnOnce(&crate::runtime_ctx::RegistrationContext) -> Result<(), FrameworkError> + Send + 'static,
    {
        Self {
            kind: ThunkKind::Other,
            run: Box::new(run),
        }
    }

    pub fn invoke(self, ctx: &crate::runtime_ctx::RegistrationContext) -> Result<(), FrameworkError> {
        (self.run)(ctx)
    }
}

/// Registers a resource definition and everything it (transitively)
/// registers. Used both for the root resource and for any nested resource a
/// `register` factory returns.
pub fn register_resource<C, V>(def: Arc<ResourceDefinition<C, V>>) -> RegistrationThunk
where
    C: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    RegistrationThunk::resource(move |ctx| {
        ctx.resources.register(&ctx.store, def.clone())?;
        crate::runtime_ctx::register_tree(ctx, def.materialize_registrations())
    })
}

/// `ResourceDefinition { id, config, value, dependencies, register, init,
/// dispose, configSchema?, ... }` (spec §3). Config is bound once via
/// [`ResourceDefinition::with`]; this Rust rendition resolves the
/// open question on resource interception (spec §9) by giving resources the
/// same `MiddlewareManager` chain machinery tasks get.
pub struct ResourceDefinition<C, V> {
    pub id: Id,
    pub tags: Tags,
    pub dependencies: DependencySet,
    pub middleware: Vec<MiddlewareAttachment>,
    config: Arc<C>,
    register: Option<Arc<dyn Fn(Arc<C>) -> Vec<RegistrationThunk> + Send + Sync>>,
    init: Arc<dyn Fn(Arc<C>, Arc<DepsRegistry>) -> BoxFuture<'static, Result<V, FrameworkError>> + Send + Sync>,
    dispose: Option<Arc<dyn Fn(Arc<V>, Arc<C>, Arc<DepsRegistry>) -> BoxFuture<'static, Result<(), FrameworkError>> + Send + Sync>>,
}

impl<C: Default + Send + Sync + 'static, V: Send + Sync + 'static> ResourceDefinition<C, V> {
    pub fn new<F, Fut>(resource_id: impl AsRef<str>, init: F) -> Self
    where
        F: Fn(Arc<C>, Arc<DepsRegistry>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<V, FrameworkError>> + Send + 'static,
    {
        Self {
            id: id(resource_id),
            tags: Tags::new(),
            dependencies: DependencySet::new(),
            middleware: Vec::new(),
            config: Arc::new(C::default()),
            register: None,
            init: Arc::new(move |config, deps| Box::pin(init(config, deps))),
            dispose: None,
        }
    }

    /// Like [`ResourceDefinition::new`], but derives the id from the call
    /// site instead of requiring one (spec §3, "Anonymous ids are derived
    /// from the declaring source file path + symbol name when omitted").
    #[track_caller]
    pub fn anonymous<F, Fut>(init: F) -> Self
    where
        F: Fn(Arc<C>, Arc<DepsRegistry>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<V, FrameworkError>> + Send + 'static,
    {
        Self::new(crate::id::anonymous_id("resource"), init)
    }
}

impl<C: Send + Sync + 'static, V: Send + Sync + 'static> ResourceDefinition<C, V> {
    /// `.with(config)` — binds a configured instance (spec §3).
    pub fn with(mut self, config: C) -> Self {
        self.config = Arc::new(config);
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

    pub fn with_middleware(mut self, attachments: Vec<MiddlewareAttachment>) -> Self {
        self.middleware = attachments;
        self
    }

    pub fn with_register<F>(mut self, register: F) -> Self
    where
        F: Fn(Arc<C>) -> Vec<RegistrationThunk> + Send + Sync + 'static,
    {
        self.register = Some(Arc::new(register));
        self
    }

    pub fn with_dispose<F, Fut>(mut self, dispose: F) -> Self
    where
        F: Fn(Arc<V>, Arc<C>, Arc<DepsRegistry>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), FrameworkError>> + Send + 'static,
    {
        self.dispose = Some(Arc::new(move |value, config, deps| Box::pin(dispose(value, config, deps))));
        self
    }
}

impl<C: Send + Sync + 'static, V: Send + Sync + 'static> Definition for ResourceDefinition<C, V> {
    fn meta(&self) -> DefMeta {
        DefMeta {
            id: self.id.clone(),
            kind: ComponentKind::Resource,
            tags: self.tags.clone(),
            dependencies: self.dependencies.ids().to_vec(),
            registration_index: 0,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Clone)]
pub struct ResourceInvocationContext {
    pub deps: Arc<DepsRegistry>,
    pub events: Arc<EventManager<Value>>,
    pub error_events: Arc<EventManager<ErrorPayload>>,
    pub middleware: Arc<MiddlewareManager>,
    pub chain: Arc<CompiledResourceChain>,
}

/// Object-safe view over `ResourceDefinition<C, V>`.
#[async_trait]
pub trait ResourceRuntime: Send + Sync {
    fn id(&self) -> &Id;
    fn middleware_attachments(&self) -> &[MiddlewareAttachment];
    fn materialize_registrations(&self) -> Vec<RegistrationThunk>;
    async fn init(&self, ctx: ResourceInvocationContext) -> Result<AnyValue, FrameworkError>;
    async fn dispose(&self, value: AnyValue, ctx: ResourceInvocationContext) -> Result<(), FrameworkError>;
}

#[async_trait]
impl<C: Send + Sync + 'static, V: Send + Sync + 'static> ResourceRuntime for ResourceDefinition<C, V> {
    fn id(&self) -> &Id {
        &self.id
    }

    fn middleware_attachments(&self) -> &[MiddlewareAttachment] {
        &self.middleware
    }

    fn materialize_registrations(&self) -> Vec<RegistrationThunk> {
        match &self.register {
            Some(f) => f(self.config.clone()),
            None => Vec::new(),
        }
    }

    async fn init(&self, ctx: ResourceInvocationContext) -> Result<AnyValue, FrameworkError> {
        let resource_id = self.id.clone();
        let init = self.init.clone();
        let config = self.config.clone();
        let deps = ctx.deps.clone();
        let events = ctx.events.clone();

        // Innermost step of the onion: `beforeInit` → `init` → `afterInit`.
        let tail: ResourceNext = {
            let resource_id = resource_id.clone();
            Arc::new(move || {
                let resource_id = resource_id.clone();
                let init = init.clone();
                let config = config.clone();
                let deps = deps.clone();
                let events = events.clone();
                Box::pin(async move {
                    events
                        .emit(&id(format!("{resource_id}.beforeInit")), Value::Null, resource_id.clone(), false, now_millis())
                        .await?;
                    let value = (init)(config, deps.clone()).await?;
                    events
                        .emit(&id(format!("{resource_id}.afterInit")), Value::Null, resource_id.clone(), false, now_millis())
                        .await?;
                    Ok(any_value::boxed(value))
                }) as BoxFuture<'static, Result<AnyValue, FrameworkError>>
            })
        };

        let mw_ctx = ResourceMiddlewareContext {
            resource_id: resource_id.clone(),
            deps: ctx.deps.clone(),
        };
        let result = ctx.middleware.run_resource_chain(&ctx.chain, mw_ctx, tail).await;
        if let Err(err) = &result {
            // A resource-init failure always aborts boot (spec §4.3
            // "Failure policy"); `onError` still fires so the failure is
            // observable through the same channel a task's would be, but
            // suppression is meaningless here — there is no fallback value
            // to resume with.
            let payload = ErrorPayload::from_error(err, ErrorEventKind::ResourceInit, resource_id.clone());
            let _ = ctx
                .error_events
                .emit(&id(format!("{resource_id}.onError")), payload, resource_id.clone(), false, now_millis())
                .await;
        }
        result
    }

    async fn dispose(&self, value: AnyValue, ctx: ResourceInvocationContext) -> Result<(), FrameworkError> {
        if let Some(dispose_fn) = &self.dispose {
            let typed = any_value::downcast::<V>(&value, &self.id)?;
            (dispose_fn)(typed, self.config.clone(), ctx.deps.clone()).await?;
        }
        Ok(())
    }
}

/// Resource lifecycle state machine (spec §4.9 "State machines"):
/// `Registered → Initializing → Ready → Disposing → Disposed`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResourceState {
    Registered,
    Initializing,
    Ready,
    Disposing,
    Disposed,
}

struct ResourceSlot {
    runtime: Arc<dyn ResourceRuntime>,
    state: ResourceState,
    value: Option<AnyValue>,
}

/// Drives resource registration, initialization in topological order, and
/// disposal in reverse order. One `ResourceRunner` exists per run.
pub struct ResourceRunner {
    slots: RwLock<HashMap<Id, ResourceSlot>>,
    chains: RwLock<HashMap<Id, Arc<CompiledResourceChain>>>,
    initialized_order: Mutex<Vec<Id>>,
}

impl Default for ResourceRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRunner {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            chains: RwLock::new(HashMap::new()),
            initialized_order: Mutex::new(Vec::new()),
        }
    }

    pub fn register<C: Send + Sync + 'static, V: Send + Sync + 'static>(
        &self,
        store: &Store,
        def: Arc<ResourceDefinition<C, V>>,
    ) -> Result<(), FrameworkError> {
        store.register(def.clone())?;
        let runtime: Arc<dyn ResourceRuntime> = def;
        self.slots.write().insert(
            runtime.id().clone(),
            ResourceSlot {
                runtime,
                state: ResourceState::Registered,
                value: None,
            },
        );
        Ok(())
    }

    pub fn install_chain(&self, resource_id: &Id, chain: CompiledResourceChain) {
        self.chains.write().insert(resource_id.clone(), Arc::new(chain));
    }

    pub fn chain(&self, resource_id: &str) -> Option<Arc<CompiledResourceChain>> {
        self.chains.read().get(resource_id).cloned()
    }

    pub fn materialize_registrations(&self, resource_id: &str) -> Vec<RegistrationThunk> {
        self.slots
            .read()
            .get(resource_id)
            .map(|s| s.runtime.materialize_registrations())
            .unwrap_or_default()
    }

    pub fn middleware_attachments(&self, resource_id: &str) -> Vec<MiddlewareAttachment> {
        self.slots
            .read()
            .get(resource_id)
            .map(|s| s.runtime.middleware_attachments().to_vec())
            .unwrap_or_default()
    }

    pub fn registered_ids(&self) -> Vec<Id> {
        self.slots.read().keys().cloned().collect()
    }

    pub fn state(&self, resource_id: &str) -> Option<ResourceState> {
        self.slots.read().get(resource_id).map(|s| s.state)
    }

    /// Initializes one resource (spec invariant: "exactly one init per
    /// resource per run"). The boot controller calls this once per resource
    /// id, in the order the resolver computed.
    pub async fn init_one(&self, resource_id: &Id, ctx: ResourceInvocationContext) -> Result<(), FrameworkError> {
        let runtime = {
            let mut slots = self.slots.write();
            let slot = slots
                .get_mut(resource_id.as_ref())
                .ok_or_else(|| FrameworkError::UnknownDependency {
                    dependency: resource_id.clone(),
                    by: id("run"),
                })?;
            if slot.state != ResourceState::Registered {
                return Err(FrameworkError::ContractViolation(
                    resource_id.clone(),
                    format!("resource already in state {:?}, expected Registered", slot.state),
                ));
            }
            slot.state = ResourceState::Initializing;
            slot.runtime.clone()
        };

        let value = runtime.init(ctx).await?;

        let mut slots = self.slots.write();
        if let Some(slot) = slots.get_mut(resource_id.as_ref()) {
            slot.state = ResourceState::Ready;
            slot.value = Some(value);
        }
        drop(slots);
        self.initialized_order.lock().push(resource_id.clone());
        Ok(())
    }

    pub fn get_value<V: Send + Sync + 'static>(&self, resource_id: &str) -> Result<Arc<V>, FrameworkError> {
        let slots = self.slots.read();
        let slot = slots
            .get(resource_id)
            .ok_or_else(|| FrameworkError::DependencyNotInitialized(id(resource_id)))?;
        let value = slot
            .value
            .as_ref()
            .ok_or_else(|| FrameworkError::DependencyNotInitialized(id(resource_id)))?;
        any_value::downcast(value, &id(resource_id))
    }

    pub fn get_any(&self, resource_id: &str) -> Option<AnyValue> {
        self.slots.read().get(resource_id).and_then(|s| s.value.clone())
    }

    /// Disposes every initialized resource in reverse init order
    /// (spec §4.9 step 10). Best-effort: a failing dispose is collected but
    /// does not abort the rest. A resource already `Disposed` is skipped
    /// (second `dispose()` call is a no-op, spec §8 boundary behavior).
    pub async fn dispose_all(&self, ctx: ResourceInvocationContext) -> Vec<(Id, FrameworkError)> {
        let order: Vec<Id> = {
            let mut guard = self.initialized_order.lock();
            let order = guard.clone();
            guard.clear();
            order
        };

        let mut failures = Vec::new();
        for resource_id in order.into_iter().rev() {
            let (runtime, value) = {
                let mut slots = self.slots.write();
                let Some(slot) = slots.get_mut(resource_id.as_ref()) else {
                    continue;
                };
                if slot.state == ResourceState::Disposed {
                    continue;
                }
                slot.state = ResourceState::Disposing;
                let value = slot.value.take();
                (slot.runtime.clone(), value)
            };
            let Some(value) = value else { continue };
            let result = runtime.dispose(value, ctx.clone()).await;
            if let Err(err) = result {
                failures.push((resource_id.clone(), err));
            }
            if let Some(slot) = self.slots.write().get_mut(resource_id.as_ref()) {
                slot.state = ResourceState::Disposed;
            }
        }
        failures
    }
}
