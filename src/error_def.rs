//! User-declared error types (spec §3: `ErrorDefinition`).
//!
//! Distinct from [`crate::error::FrameworkError`] (the runtime's own
//! taxonomy): an `ErrorDefinition<Data>` lets application code declare a
//! *named* error kind — `throw(data)` builds one, `is(err)` matches one back
//! out of a `FrameworkError::User` — the same "match by stable id, not by
//! downcast" shape `FrameworkError::is` gives the built-in taxonomy.

use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{user_error, ComponentKind, FrameworkError};
use crate::id::{id, Id};
use crate::store::{DefMeta, Definition};
use crate::tag::Tags;
use crate::validation::{validate, JsonSchema, Schema};

/// A single instance thrown from `ErrorDefinition::throw`. Carries the
/// definition's id as `name` and renders `data.message` (when present) as
/// its display message, matching spec §3: "thrown errors carry `name = id`
/// and `message = data.message`".
#[derive(Debug)]
pub struct ThrownError<Data> {
    pub name: Id,
    pub data: Data,
    message: String,
}

impl<Data: std::fmt::Debug> std::fmt::Display for ThrownError<Data> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl<Data: std::fmt::Debug + Send + Sync + 'static> std::error::Error for ThrownError<Data> {}

/// `ErrorDefinition { id, dataSchema?, throw(data), is(err) }` (spec §3).
pub struct ErrorDefinition<Data = Value> {
    pub id: Id,
    pub tags: Tags,
    pub data_schema: Arc<dyn Schema<Data> + Send + Sync>,
    extract_message: Arc<dyn Fn(&Data) -> String + Send + Sync>,
}

impl<Data: serde::de::DeserializeOwned + Send + Sync + std::fmt::Debug + 'static> ErrorDefinition<Data> {
    pub fn new(error_id: impl AsRef<str>) -> Self {
        Self {
            id: id(error_id),
            tags: Tags::new(),
            data_schema: Arc::new(JsonSchema::new()),
            extract_message: Arc::new(|data| format!("{data:?}")),
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_schema(mut self, schema: Arc<dyn Schema<Data> + Send + Sync>) -> Self {
        self.data_schema = schema;
        self
    }

    /// Overrides how `data` is rendered into the thrown error's message
    /// (defaults to `{:?}`). Application error data carrying a `message`
    /// field typically supplies `|d| d.message.clone()` here.
    pub fn with_message(mut self, extract: impl Fn(&Data) -> String + Send + Sync + 'static) -> Self {
        self.extract_message = Arc::new(extract);
        self
    }

    /// Validates `raw` against `data_schema` and wraps the result as a
    /// [`FrameworkError::User`] carrying this definition's id as `name`.
    pub fn throw_raw(&self, raw: Value) -> FrameworkError {
        match validate::<Data>(self.data_schema.as_ref(), raw, ComponentKind::Error, &self.id) {
            Ok(data) => self.throw(data),
            Err(validation_err) => validation_err,
        }
    }

    /// `.throw(data)` — builds a `FrameworkError` carrying this definition's
    /// id and the rendered message.
    pub fn throw(&self, data: Data) -> FrameworkError {
        let message = (self.extract_message)(&data);
        user_error(ThrownError {
            name: self.id.clone(),
            data,
            message,
        })
    }

    /// `.is(err)` — true if `err` is a `FrameworkError::User` wrapping a
    /// `ThrownError` from this exact definition.
    pub fn is(&self, err: &FrameworkError) -> bool {
        match err {
            FrameworkError::User(inner) => inner
                .downcast_ref::<ThrownError<Data>>()
                .map(|thrown| thrown.name.as_ref() == self.id.as_ref())
                .unwrap_or(false),
            _ => false,
        }
    }
}

impl<Data: Send + Sync + 'static> Definition for ErrorDefinition<Data> {
    fn meta(&self) -> DefMeta {
        DefMeta {
            id: self.id.clone(),
            kind: ComponentKind::Error,
            tags: self.tags.clone(),
            dependencies: Vec::new(),
            registration_index: 0,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Wraps an error definition as a deferred registration, for use inside a
/// resource's `register()` factory alongside `register_task`/
/// `register_resource`/`register_event`.
pub fn register_error<Data: Send + Sync + 'static>(
    def: Arc<ErrorDefinition<Data>>,
) -> crate::resource::RegistrationThunk {
    crate::resource::RegistrationThunk::other(move |ctx| ctx.store.register(def.clone()))
}
