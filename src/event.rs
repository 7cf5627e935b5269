//! Typed pub/sub with deterministic ordering and cycle safety (spec §4.4).

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{ComponentKind, ErrorPayload, FrameworkError};
use crate::id::{id, Id};
use crate::resource::RegistrationThunk;
use crate::store::{DefMeta, Definition};
use crate::tag::{well_known, Tags};
use crate::validation::{JsonSchema, Schema};

tokio::task_local! {
    /// The set of event ids currently in-flight on this causal chain
    /// (ambient call-stack tracking, spec §4.4/§5). A `RefCell` is sound
    /// here because task-local storage is only ever accessed by the single
    /// task that owns this async scope.
    static EMISSION_STACK: RefCell<Vec<Id>>;
}

/// Boxed future shorthand used throughout the event/middleware machinery.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Registered description of an event type. `P` is the payload type.
pub struct EventDefinition<P = Value> {
    pub id: Id,
    pub tags: Tags,
    pub payload_schema: Arc<dyn Schema<P> + Send + Sync>,
}

impl<P: serde::de::DeserializeOwned + Send + Sync + 'static> EventDefinition<P> {
    pub fn new(event_id: impl AsRef<str>) -> Self {
        Self {
            id: id(event_id),
            tags: Tags::new(),
            payload_schema: Arc::new(JsonSchema::new()),
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_schema(mut self, schema: Arc<dyn Schema<P> + Send + Sync>) -> Self {
        self.payload_schema = schema;
        self
    }
}

impl<P: Send + Sync + 'static> Definition for EventDefinition<P> {
    fn meta(&self) -> DefMeta {
        DefMeta {
            id: self.id.clone(),
            kind: ComponentKind::Event,
            tags: self.tags.clone(),
            dependencies: Vec::new(),
            registration_index: 0,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// A single emission, handed to every listener in turn. `stop_propagation`
/// halts remaining listeners for *this* emission; `suppress` (meaningful
/// only on `onError` events) converts a propagating task error into a
/// normal `None` return, per spec §4.3 rule 3.
pub struct EventRecord<P> {
    pub id: Id,
    pub data: P,
    pub source: Id,
    pub timestamp: u64,
    propagation_stopped: std::sync::atomic::AtomicBool,
    suppressed: std::sync::atomic::AtomicBool,
}

impl<P> EventRecord<P> {
    pub fn new(id: Id, data: P, source: Id, timestamp: u64) -> Self {
        Self {
            id,
            data,
            source,
            timestamp,
            propagation_stopped: std::sync::atomic::AtomicBool::new(false),
            suppressed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn stop_propagation(&self) {
        self.propagation_stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped.load(Ordering::SeqCst)
    }

    pub fn suppress(&self) {
        self.suppressed.store(true, Ordering::SeqCst);
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
    }
}

/// A registered listener: either a concrete hook or an ad hoc handler
/// attached via `EventManager::add_listener`.
#[async_trait]
pub trait Listener<P>: Send + Sync {
    fn id(&self) -> &Id;
    fn order(&self) -> i64 {
        0
    }
    /// The id of the component this listener belongs to, used for the
    /// self-suppression rule ("a listener whose own source equals the
    /// emitted event's source suppresses only itself").
    fn owner_source(&self) -> Option<&Id> {
        None
    }
    async fn handle(&self, event: &Arc<EventRecord<P>>) -> Result<(), FrameworkError>;
}

struct Entry<P> {
    listener: Arc<dyn Listener<P>>,
    registration_index: usize,
}

/// The continuation an interceptor calls to run the wrapped behavior.
pub type Next<P> =
    Arc<dyn Fn(Arc<EventRecord<P>>) -> BoxFuture<'static, Result<(), FrameworkError>> + Send + Sync>;

/// Installed via `EventManager::intercept`: wraps the whole emission
/// (every listener dispatch for one `emit` call).
pub type EmitInterceptor<P> =
    Arc<dyn Fn(Arc<EventRecord<P>>, Next<P>) -> BoxFuture<'static, Result<(), FrameworkError>> + Send + Sync>;

/// Installed via `EventManager::intercept_hook`: wraps a single listener
/// invocation.
pub type HookInterceptor<P> = Arc<
    dyn Fn(Arc<dyn Listener<P>>, Arc<EventRecord<P>>, Next<P>) -> BoxFuture<'static, Result<(), FrameworkError>>
        + Send
        + Sync,
>;

/// Registry of listeners for a single event payload type, plus the
/// wildcard ("*") list. One `EventManager<P>` exists per distinct payload
/// type the application uses; most applications share a single payload
/// envelope (e.g. `serde_json::Value`) so one manager suffices, matching
/// how the source system's single untyped `EventManager` behaves.
pub struct EventManager<P> {
    concrete: RwLock<std::collections::HashMap<Id, Vec<Entry<P>>>>,
    wildcard: RwLock<Vec<Entry<P>>>,
    next_index: AtomicU64,
    locked: std::sync::atomic::AtomicBool,
    emit_interceptors: RwLock<Vec<EmitInterceptor<P>>>,
    hook_interceptors: RwLock<Vec<HookInterceptor<P>>>,
}

impl<P> Default for EventManager<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Send + Sync + 'static> EventManager<P> {
    pub fn new() -> Self {
        Self {
            concrete: RwLock::new(std::collections::HashMap::new()),
            wildcard: RwLock::new(Vec::new()),
            next_index: AtomicU64::new(0),
            locked: std::sync::atomic::AtomicBool::new(false),
            emit_interceptors: RwLock::new(Vec::new()),
            hook_interceptors: RwLock::new(Vec::new()),
        }
    }

    pub fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    fn check_lock(&self) -> Result<(), FrameworkError> {
        if self.locked.load(Ordering::SeqCst) {
            return Err(FrameworkError::LockdownViolation(id("eventManager")));
        }
        Ok(())
    }

    /// Registers a listener on a specific event id. `None` registers a
    /// wildcard ("*") listener.
    pub fn add_listener(
        &self,
        event_id: Option<&str>,
        listener: Arc<dyn Listener<P>>,
    ) -> Result<(), FrameworkError> {
        self.check_lock()?;
        let registration_index = self.next_index.fetch_add(1, Ordering::SeqCst) as usize;
        let entry = Entry {
            listener,
            registration_index,
        };
        match event_id {
            Some(event_id) => {
                let mut map = self.concrete.write();
                let list = map.entry(id(event_id)).or_default();
                list.push(entry);
                list.sort_by_key(|e| (e.listener.order(), e.registration_index));
            }
            None => {
                let mut list = self.wildcard.write();
                list.push(entry);
                list.sort_by_key(|e| (e.listener.order(), e.registration_index));
            }
        }
        Ok(())
    }

    /// Wraps every emission dispatched through this manager. Interceptors
    /// compose onion-style: the most-recently-installed interceptor is
    /// outermost.
    pub fn intercept(&self, interceptor: EmitInterceptor<P>) {
        self.emit_interceptors.write().push(interceptor);
    }

    /// Wraps every individual listener invocation (both concrete and
    /// wildcard listeners).
    pub fn intercept_hook(&self, interceptor: HookInterceptor<P>) {
        self.hook_interceptors.write().push(interceptor);
    }

    /// Dispatches to a single listener, routed through every installed hook
    /// interceptor (most-recently-installed outermost). Free of `&self` so
    /// it can be called from inside the `'static` emission closure built in
    /// `emit_record` after the interceptor list has already been cloned out.
    async fn dispatch_one(
        interceptors: &[HookInterceptor<P>],
        listener: Arc<dyn Listener<P>>,
        record: Arc<EventRecord<P>>,
    ) -> Result<(), FrameworkError> {
        let base: Next<P> = {
            let listener = listener.clone();
            Arc::new(move |rec: Arc<EventRecord<P>>| {
                let listener = listener.clone();
                Box::pin(async move { listener.handle(&rec).await }) as BoxFuture<'static, Result<(), FrameworkError>>
            })
        };
        let chain = interceptors.iter().cloned().rev().fold(base, |next, interceptor| {
            let listener = listener.clone();
            Arc::new(move |rec: Arc<EventRecord<P>>| interceptor(listener.clone(), rec, next.clone())) as Next<P>
        });
        chain(record).await
    }

    /// Convenience wrapper over [`EventManager::emit_record`] for callers
    /// that don't need to inspect the dispatched record afterward.
    pub async fn emit(
        &self,
        event_id: &Id,
        payload: P,
        source: Id,
        excluded_from_global_hooks: bool,
        now: u64,
    ) -> Result<(), FrameworkError> {
        self.emit_record(event_id, payload, source, excluded_from_global_hooks, now)
            .await
            .map(|_| ())
    }

    /// Dispatches `payload` as event `event_id` from `source` and returns
    /// the resulting record so the caller can inspect `is_suppressed()`
    /// (used by task/resource `onError` handling) or `is_propagation_stopped()`.
    /// Implements: ordered sequential listener execution, propagation
    /// control, self-suppression, `excludeFromGlobalHooks` wildcard gating,
    /// and re-entrant-emission cycle detection via the ambient task-local
    /// stack.
    pub async fn emit_record(
        &self,
        event_id: &Id,
        payload: P,
        source: Id,
        excluded_from_global_hooks: bool,
        now: u64,
    ) -> Result<Arc<EventRecord<P>>, FrameworkError> {
        let already_inflight = EMISSION_STACK
            .try_with(|stack| stack.borrow().iter().any(|e| e.as_ref() == event_id.as_ref()))
            .unwrap_or(false);
        if already_inflight {
            return Err(FrameworkError::EventCycle(event_id.clone()));
        }

        let record = Arc::new(EventRecord::new(event_id.clone(), payload, source.clone(), now));

        let hook_interceptors = self.hook_interceptors.read().clone();
        let base: Next<P> = {
            let this_concrete = {
                let map = self.concrete.read();
                map.get(event_id)
                    .map(|list| list.iter().map(|e| e.listener.clone()).collect::<Vec<_>>())
                    .unwrap_or_default()
            };
            let this_wildcard: Vec<Arc<dyn Listener<P>>> = if excluded_from_global_hooks {
                Vec::new()
            } else {
                self.wildcard.read().iter().map(|e| e.listener.clone()).collect()
            };
            Arc::new(move |record: Arc<EventRecord<P>>| {
                let concrete = this_concrete.clone();
                let wildcard = this_wildcard.clone();
                let hook_interceptors = hook_interceptors.clone();
                Box::pin(async move {
                    for listener in &concrete {
                        if record.is_propagation_stopped() {
                            break;
                        }
                        if listener.owner_source().map(|s| s.as_ref()) == Some(record.source.as_ref()) {
                            continue;
                        }
                        Self::dispatch_one(&hook_interceptors, listener.clone(), record.clone()).await?;
                    }
                    for listener in &wildcard {
                        if record.is_propagation_stopped() {
                            break;
                        }
                        if listener.owner_source().map(|s| s.as_ref()) == Some(record.source.as_ref()) {
                            continue;
                        }
                        Self::dispatch_one(&hook_interceptors, listener.clone(), record.clone()).await?;
                    }
                    Ok(())
                }) as BoxFuture<'static, Result<(), FrameworkError>>
            })
        };

        let emit_interceptors = self.emit_interceptors.read().clone();
        let chain = emit_interceptors.into_iter().rev().fold(base, |next, interceptor| {
            Arc::new(move |rec: Arc<EventRecord<P>>| interceptor(rec, next.clone())) as Next<P>
        });

        let fut = chain(record.clone());
        let dispatch_result = match EMISSION_STACK.try_with(|stack| {
            stack.borrow_mut().push(event_id.clone());
        }) {
            Ok(()) => {
                let r = fut.await;
                EMISSION_STACK.with(|stack| {
                    stack.borrow_mut().pop();
                });
                r
            }
            Err(_) => {
                EMISSION_STACK
                    .scope(RefCell::new(vec![event_id.clone()]), fut)
                    .await
            }
        };
        dispatch_result.map(|()| record)
    }
}

/// A lightweight hook definition (spec §3: `HookDefinition`). Hooks have no
/// middleware and carry only an ordering priority plus the handler
/// closure.
pub struct HookDefinition<P> {
    pub id: Id,
    pub on: HookTarget,
    pub order: i64,
    #[allow(clippy::type_complexity)]
    handler: Arc<dyn Fn(Arc<EventRecord<P>>) -> BoxFuture<'static, Result<(), FrameworkError>> + Send + Sync>,
    pub owner_source: Option<Id>,
}

/// What a hook listens to: a single event id, a list of ids, or every
/// event ("*").
#[derive(Clone)]
pub enum HookTarget {
    Single(Id),
    Many(Vec<Id>),
    Wildcard,
}

impl<P: Send + Sync + 'static> HookDefinition<P> {
    pub fn new<F, Fut>(hook_id: impl AsRef<str>, on: HookTarget, handler: F) -> Self
    where
        F: Fn(Arc<EventRecord<P>>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), FrameworkError>> + Send + 'static,
    {
        Self {
            id: id(hook_id),
            on,
            order: 0,
            handler: Arc::new(move |ev| Box::pin(handler(ev))),
            owner_source: None,
        }
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn with_owner(mut self, owner: Id) -> Self {
        self.owner_source = Some(owner);
        self
    }
}

#[async_trait]
impl<P: Send + Sync + 'static> Listener<P> for HookDefinition<P> {
    fn id(&self) -> &Id {
        &self.id
    }

    fn order(&self) -> i64 {
        self.order
    }

    fn owner_source(&self) -> Option<&Id> {
        self.owner_source.as_ref()
    }

    async fn handle(&self, event: &Arc<EventRecord<P>>) -> Result<(), FrameworkError> {
        (self.handler)(event.clone()).await
    }
}

pub fn excluded_from_global_hooks(tags: &Tags) -> bool {
    tags.exists(well_known::EXCLUDE_FROM_GLOBAL_HOOKS)
}

/// Wraps an event definition as a deferred registration. Event definitions
/// only carry metadata (id, tags, payload schema) — they live in the
/// [`crate::store::Store`] but have no separate runner.
pub fn register_event<P: Send + Sync + 'static>(def: Arc<EventDefinition<P>>) -> RegistrationThunk {
    RegistrationThunk::other(move |ctx| ctx.store.register(def.clone()))
}

fn wire_hook<P: Send + Sync + 'static>(
    manager: &EventManager<P>,
    target: &HookTarget,
    listener: Arc<dyn Listener<P>>,
) -> Result<(), FrameworkError> {
    match target {
        HookTarget::Single(event_id) => manager.add_listener(Some(event_id.as_ref()), listener),
        HookTarget::Many(event_ids) => {
            for event_id in event_ids {
                manager.add_listener(Some(event_id.as_ref()), listener.clone())?;
            }
            Ok(())
        }
        HookTarget::Wildcard => manager.add_listener(None, listener),
    }
}

/// Wraps a hook targeting the `serde_json::Value`-payload event manager
/// (the one application events and lifecycle events like `beforeRun`/`ready`
/// ride on) as a deferred registration. Wiring happens immediately when the
/// thunk runs rather than being deferred to `ready`, since nothing observes
/// a hook before `ready` fires anyway — see DESIGN.md.
pub fn register_hook(def: Arc<HookDefinition<Value>>) -> RegistrationThunk {
    RegistrationThunk::other(move |ctx| {
        let target = def.on.clone();
        wire_hook(&ctx.events, &target, def.clone())
    })
}

/// Wraps a hook targeting the `onError`-payload event manager.
pub fn register_error_hook(def: Arc<HookDefinition<ErrorPayload>>) -> RegistrationThunk {
    RegistrationThunk::other(move |ctx| {
        let target = def.on.clone();
        wire_hook(&ctx.error_events, &target, def.clone())
    })
}
