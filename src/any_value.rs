//! Type-erased value plumbing.
//!
//! The source system passes arbitrary dependency maps, task inputs, and
//! event payloads around as dynamically-typed objects. The systems-language
//! rendition (spec §9, "Dynamic dependency map") is an `Arc<dyn Any + Send +
//! Sync>` carried through the generic chain/event machinery, downcast back
//! to a concrete type at the typed boundary (definition authors and
//! `RunResult` call sites never see `AnyValue` directly).

use std::any::Any;
use std::sync::Arc;

use crate::error::FrameworkError;
use crate::id::Id;

/// An opaque, reference-counted value of unknown static type.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// Wraps a concrete value as an [`AnyValue`].
pub fn boxed<T: Send + Sync + 'static>(value: T) -> AnyValue {
    Arc::new(value)
}

/// Downcasts an [`AnyValue`] back to `T`, failing with a
/// [`FrameworkError::ContractViolation`] (the closest taxonomy member to
/// "the type the caller expected does not match what's stored") rather than
/// panicking — a mismatch here means two components disagree on a
/// dependency's type, which is a programming error but not one the runtime
/// should crash on.
pub fn downcast<T: Send + Sync + 'static>(value: &AnyValue, owner: &Id) -> Result<Arc<T>, FrameworkError> {
    Arc::downcast::<T>(value.clone()).map_err(|_| {
        FrameworkError::ContractViolation(
            owner.clone(),
            format!("value stored under `{owner}` is not of the expected type"),
        )
    })
}
