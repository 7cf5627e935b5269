//! Ambient async-scoped values (spec §4.5, "Async context").
//!
//! An `AsyncContextDefinition<T>` provides a value for the lifetime of an
//! async scope (`provide`) and reads it back anywhere downstream of that
//! scope (`use_context`/`require`), the same way [`crate::event`]'s
//! `EMISSION_STACK` rides a `tokio::task_local!` through an emission's call
//! graph. Every context shares one ambient map keyed by context id rather
//! than one `task_local!` per definition, since Rust's `task_local!` macro
//! needs a fixed type known at compile time and the set of contexts an
//! application defines is open-ended.

use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;

use crate::any_value::{self, AnyValue};
use crate::error::{ComponentKind, FrameworkError};
use crate::id::{id, Id};
use crate::store::{DefMeta, Definition};
use crate::tag::Tags;
use crate::validation::{validate, JsonSchema, Schema};

tokio::task_local! {
    static CONTEXT_VALUES: RefCell<HashMap<Id, AnyValue>>;
}

/// Registered description of an async context. `T` is the value type
/// `provide`/`require` exchange.
pub struct AsyncContextDefinition<T> {
    pub id: Id,
    pub tags: Tags,
    pub schema: Arc<dyn Schema<T> + Send + Sync>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: serde::de::DeserializeOwned + Send + Sync + 'static> AsyncContextDefinition<T> {
    pub fn new(context_id: impl AsRef<str>) -> Self {
        Self {
            id: id(context_id),
            tags: Tags::new(),
            schema: Arc::new(JsonSchema::new()),
            _marker: PhantomData,
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_schema(mut self, schema: Arc<dyn Schema<T> + Send + Sync>) -> Self {
        self.schema = schema;
        self
    }
}

impl<T: Send + Sync + 'static> Definition for AsyncContextDefinition<T> {
    fn meta(&self) -> DefMeta {
        DefMeta {
            id: self.id.clone(),
            kind: ComponentKind::AsyncContext,
            tags: self.tags.clone(),
            dependencies: Vec::new(),
            registration_index: 0,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl<T: Send + Sync + 'static> AsyncContextDefinition<T> {
    /// Runs `body` with `value` bound for this context id for the duration
    /// of the returned future, restoring whatever was bound before once it
    /// resolves. Nested `provide` calls for the same id shadow the outer
    /// value rather than erroring (spec §4.5: "nested provide shadows").
    pub async fn provide<F, Fut, R>(&self, value: T, body: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = R>,
    {
        let mut map = CONTEXT_VALUES
            .try_with(|m| m.borrow().clone())
            .unwrap_or_default();
        map.insert(self.id.clone(), any_value::boxed(value));
        CONTEXT_VALUES.scope(RefCell::new(map), body()).await
    }

    /// `context.use()` — the bound value, if any scope upstream provided
    /// one.
    pub fn use_context(&self) -> Option<Arc<T>> {
        let boxed = CONTEXT_VALUES
            .try_with(|m| m.borrow().get(self.id.as_ref()).cloned())
            .ok()
            .flatten()?;
        any_value::downcast::<T>(&boxed, &self.id).ok()
    }

    /// `context.require()` — fails with [`FrameworkError::MissingContext`]
    /// instead of returning `None` (spec §4.5: "require throws outside any
    /// provide scope").
    pub fn require(&self) -> Result<Arc<T>, FrameworkError> {
        self.use_context()
            .ok_or_else(|| FrameworkError::MissingContext(self.id.clone()))
    }

    /// Validates a raw JSON value against this context's schema before
    /// `provide`-ing it, for call sites that receive untyped input (e.g. a
    /// boot-time override).
    pub fn parse(&self, raw: Value) -> Result<T, FrameworkError> {
        validate(self.schema.as_ref(), raw, ComponentKind::AsyncContext, &self.id)
    }
}
