//! The `parse(input) -> T` schema contract (spec §6).
//!
//! Any object that can turn a `serde_json::Value` into a typed `T` or fail
//! qualifies as a schema. Concrete validation libraries (Zod/Yup/Joi
//! equivalents) are out of scope; we only specify and implement the
//! contract plus the `serde`-backed default every definition gets for free.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ComponentKind, FrameworkError};
use crate::id::Id;

/// A validator that turns untyped input into a concrete `T`, or fails.
///
/// Implementations are expected to be cheap to call repeatedly (one call
/// per task invocation / resource bind / event emission), so no `&mut self`
/// is provided; internal caching, if any, must use interior mutability.
pub trait Schema<T>: Send + Sync {
    fn parse(&self, input: Value) -> Result<T, String>;
}

/// Default schema for any `T: DeserializeOwned`: delegates straight to
/// `serde_json`. This is what a definition gets when it doesn't supply an
/// explicit `inputSchema`/`configSchema`/`payloadSchema` — the runtime
/// still round-trips through `serde_json::Value` so the wire shape is
/// uniform whether or not a schema was declared.
pub struct JsonSchema<T>(PhantomData<fn() -> T>);

impl<T> JsonSchema<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned + Send + Sync> Schema<T> for JsonSchema<T> {
    fn parse(&self, input: Value) -> Result<T, String> {
        serde_json::from_value(input).map_err(|e| e.to_string())
    }
}

/// Wraps a plain closure as a [`Schema`], for ad hoc validation without
/// defining a type.
pub struct FnSchema<F>(F);

impl<F> FnSchema<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<T, F> Schema<T> for FnSchema<F>
where
    F: Fn(Value) -> Result<T, String> + Send + Sync,
{
    fn parse(&self, input: Value) -> Result<T, String> {
        (self.0)(input)
    }
}

/// Runs `schema.parse(input)`, wrapping a failure into the framework's
/// `ValidationError` with the offending component's kind and id attached,
/// exactly as spec §4.3 requires: validation errors surface before any
/// user code runs.
pub fn validate<T>(
    schema: &dyn Schema<T>,
    input: Value,
    kind: ComponentKind,
    id: &Id,
) -> Result<T, FrameworkError> {
    schema.parse(input).map_err(|cause| FrameworkError::Validation {
        kind,
        id: id.clone(),
        cause,
    })
}
