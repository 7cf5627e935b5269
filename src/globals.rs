//! The framework's own built-in resources and middleware (spec §6).
//!
//! These live in the `globals.*` id namespace purely by convention — there
//! is nothing special about a `globals.*` id to the [`crate::store::Store`]
//! or the resolver. They flow through the exact same registration,
//! resolution, and dependency pipeline any application resource does, which
//! is why [`value_resource`] wraps each one in a trivial
//! `ResourceDefinition<(), V>` rather than special-casing them: an
//! application task can declare `Dep::<Logger>::new(resources::LOGGER)` and
//! get it the same way it would get any other resource's value.
//!
//! None of these are marked `.global()` — `globals.` names a namespace of
//! built-ins, not an instruction to auto-attach. An application opts in by
//! listing `globals::middleware::task::RETRY` (etc.) in a task's own
//! `.with_middleware(...)`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::any_value::AnyValue;
use crate::clock::now_millis;
use crate::deps::Dep;
use crate::error::FrameworkError;
use crate::event::{register_event, EventDefinition};
use crate::middleware::{
    register_resource_middleware, register_task_middleware, ResourceMiddlewareContext, ResourceMiddlewareDefinition,
    ResourceNext, TaskMiddlewareContext, TaskMiddlewareDefinition, TaskNext,
};
use crate::resource::{register_resource, RegistrationThunk, ResourceDefinition};
use crate::runtime_ctx::RegistrationContext;
use crate::tag::{register_tag, well_known, TagDefinition};

/// Well-known ids for the built-in resources (spec §6).
pub mod resources {
    pub const LOGGER: &str = "globals.resources.logger";
    pub const EVENT_MANAGER: &str = "globals.resources.eventManager";
    pub const STORE: &str = "globals.resources.store";
    pub const TASK_RUNNER: &str = "globals.resources.taskRunner";
    pub const CACHE: &str = "globals.resources.cache";
    pub const SERIALIZER: &str = "globals.resources.serializer";
}

/// Well-known ids for the built-in middleware (spec §6).
pub mod middleware {
    pub mod task {
        pub const CACHE: &str = "globals.middleware.task.cache";
        pub const RETRY: &str = "globals.middleware.task.retry";
        pub const TIMEOUT: &str = "globals.middleware.task.timeout";
    }
    pub mod resource {
        pub const RETRY: &str = "globals.middleware.resource.retry";
        pub const TIMEOUT: &str = "globals.middleware.resource.timeout";
    }
}

/// Well-known ids for the built-in events (spec §4.9, §6).
pub mod events {
    pub const READY: &str = "globals.events.ready";
}

/// An in-memory key/value cache, shared by every cloned handle, backing
/// `globals.middleware.task.cache`. Also resolvable directly as a
/// `Dep<Cache>` by application code that wants its own caching.
#[derive(Clone, Default)]
pub struct Cache {
    entries: Arc<parking_lot::Mutex<HashMap<String, (AnyValue, u64)>>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key` if present and, when `ttl_ms` is
    /// set, not older than that many milliseconds.
    pub fn get_fresh(&self, key: &str, ttl_ms: Option<u64>) -> Option<AnyValue> {
        let entries = self.entries.lock();
        let (value, stored_at) = entries.get(key)?;
        if let Some(ttl) = ttl_ms {
            if now_millis().saturating_sub(*stored_at) > ttl {
                return None;
            }
        }
        Some(value.clone())
    }

    pub fn put(&self, key: String, value: AnyValue) {
        self.entries.lock().insert(key, (value, now_millis()));
    }
}

/// Thin `serde_json` wrapper backing `globals.resources.serializer` — the
/// framework's own (de)serialization boundary never needs more than this,
/// since every task input/output already round-trips through
/// `serde_json::Value`.
#[derive(Clone, Copy, Default)]
pub struct Serializer;

impl Serializer {
    pub fn to_value<T: serde::Serialize>(&self, value: &T) -> Result<Value, FrameworkError> {
        serde_json::to_value(value).map_err(|e| crate::error::user_error(SerdeError(e.to_string())))
    }

    pub fn from_value<T: serde::de::DeserializeOwned>(&self, value: Value) -> Result<T, FrameworkError> {
        serde_json::from_value(value).map_err(|e| crate::error::user_error(SerdeError(e.to_string())))
    }
}

#[derive(Debug)]
struct SerdeError(String);

impl std::fmt::Display for SerdeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for SerdeError {}

/// Wraps an already-built value as a resource registration, so it flows
/// through the normal init/deps pipeline (and can be `Dep<V>`-resolved by
/// application code) without defining a full `ResourceDefinition` by hand.
pub fn value_resource<V: Clone + Send + Sync + 'static>(
    resource_id: impl AsRef<str>,
    value: V,
) -> Arc<ResourceDefinition<(), V>> {
    Arc::new(ResourceDefinition::new(resource_id, move |_config, _deps| {
        let value = value.clone();
        async move { Ok(value) }
    }))
}

async fn cache_task_middleware(
    ctx: TaskMiddlewareContext,
    input: AnyValue,
    config: Value,
    next: TaskNext,
) -> Result<AnyValue, FrameworkError> {
    let cache = ctx.deps.get(&Dep::<Cache>::new(resources::CACHE))?;
    let raw_input = crate::any_value::downcast::<Value>(&input, &ctx.task_id)?;
    let ttl_ms = config.get("ttlMs").and_then(Value::as_u64);
    let key = format!("{}:{}", ctx.task_id, raw_input);
    if let Some(hit) = cache.get_fresh(&key, ttl_ms) {
        return Ok(hit);
    }
    let result = next(input).await?;
    cache.put(key, result.clone());
    Ok(result)
}

async fn retry_task_middleware(
    _ctx: TaskMiddlewareContext,
    input: AnyValue,
    config: Value,
    next: TaskNext,
) -> Result<AnyValue, FrameworkError> {
    let retries = config.get("retries").and_then(Value::as_u64).unwrap_or(0);
    let delay_ms = config.get("delayMs").and_then(Value::as_u64).unwrap_or(0);
    let mut attempt = 0u64;
    loop {
        match next(input.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= retries {
                    return Err(err);
                }
                attempt += 1;
                if delay_ms > 0 {
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }
}

async fn timeout_task_middleware(
    ctx: TaskMiddlewareContext,
    input: AnyValue,
    config: Value,
    next: TaskNext,
) -> Result<AnyValue, FrameworkError> {
    let timeout_ms = config.get("timeoutMs").and_then(Value::as_u64).unwrap_or(0);
    if timeout_ms == 0 {
        return next(input).await;
    }
    match tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), next(input)).await {
        Ok(result) => result,
        Err(_) => Err(FrameworkError::Timeout(ctx.task_id.clone())),
    }
}

async fn retry_resource_middleware(
    _ctx: ResourceMiddlewareContext,
    config: Value,
    next: ResourceNext,
) -> Result<AnyValue, FrameworkError> {
    let retries = config.get("retries").and_then(Value::as_u64).unwrap_or(0);
    let delay_ms = config.get("delayMs").and_then(Value::as_u64).unwrap_or(0);
    let mut attempt = 0u64;
    loop {
        match next().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= retries {
                    return Err(err);
                }
                attempt += 1;
                if delay_ms > 0 {
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }
}

async fn timeout_resource_middleware(
    ctx: ResourceMiddlewareContext,
    config: Value,
    next: ResourceNext,
) -> Result<AnyValue, FrameworkError> {
    let timeout_ms = config.get("timeoutMs").and_then(Value::as_u64).unwrap_or(0);
    if timeout_ms == 0 {
        return next().await;
    }
    match tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), next()).await {
        Ok(result) => result,
        Err(_) => Err(FrameworkError::Timeout(ctx.resource_id.clone())),
    }
}

/// Builds every `RegistrationThunk` the built-in namespace contributes. The
/// boot controller registers these before the application's own root
/// resource, so any `globals.*` id is already in the [`crate::store::Store`]
/// by the time the resolver walks application dependency edges.
pub fn builtin_thunks(ctx: &RegistrationContext, logger: crate::logger::Logger) -> Vec<RegistrationThunk> {
    vec![
        register_resource(value_resource(resources::LOGGER, logger)),
        register_resource(value_resource(resources::EVENT_MANAGER, ctx.events.clone())),
        register_resource(value_resource(resources::STORE, ctx.store.clone())),
        register_resource(value_resource(resources::TASK_RUNNER, ctx.tasks.clone())),
        register_resource(value_resource(resources::CACHE, Cache::new())),
        register_resource(value_resource(resources::SERIALIZER, Serializer)),
        register_event(Arc::new(EventDefinition::<Value>::new(events::READY))),
        register_task_middleware(Arc::new(TaskMiddlewareDefinition::new(middleware::task::CACHE, cache_task_middleware))),
        register_task_middleware(Arc::new(TaskMiddlewareDefinition::new(middleware::task::RETRY, retry_task_middleware))),
        register_task_middleware(Arc::new(TaskMiddlewareDefinition::new(middleware::task::TIMEOUT, timeout_task_middleware))),
        register_resource_middleware(Arc::new(ResourceMiddlewareDefinition::new(
            middleware::resource::RETRY,
            retry_resource_middleware,
        ))),
        register_resource_middleware(Arc::new(ResourceMiddlewareDefinition::new(
            middleware::resource::TIMEOUT,
            timeout_resource_middleware,
        ))),
        register_tag(Arc::new(TagDefinition::new(well_known::SYSTEM).with_description(
            "marks a built-in framework component, as opposed to application code",
        ))),
        register_tag(Arc::new(TagDefinition::new(well_known::DEBUG).with_description(
            "marks a component that only exists to support debug tooling",
        ))),
        register_tag(Arc::new(
            TagDefinition::new(well_known::EXCLUDE_FROM_GLOBAL_HOOKS)
                .with_description("opts a task or resource out of global (wildcard) event listeners"),
        )),
    ]
}
