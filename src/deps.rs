//! Typed dependency declarations and the runtime registry they resolve
//! against (spec §9, "Dynamic dependency map" design note).
//!
//! A component declares what it needs with [`Dep<T>`] — a named reference
//! to another component plus the Rust type its resolved value will have.
//! At wiring time the [`DepsRegistry`] maps each id to the boxed value the
//! resource lifecycle produced (or, for tasks/hooks/middleware, the value a
//! already-`Ready` resource produced) and hands back a downcast `Arc<T>`.

use std::collections::HashMap;
use std::marker::PhantomData;

use parking_lot::RwLock;

use crate::any_value::{downcast, AnyValue};
use crate::error::FrameworkError;
use crate::id::{id, Id};

/// A typed reference to another component's resolved value.
pub struct Dep<T> {
    pub id: Id,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Dep<T> {
    pub fn new(target: impl AsRef<str>) -> Self {
        Self {
            id: id(target),
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for Dep<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}

/// The set of ids a component depends on, erased of their value types —
/// this is what the [`crate::resolver::DependencyResolver`] actually walks;
/// [`Dep<T>`] is the typed, author-facing handle built on top of it.
#[derive(Clone, Debug, Default)]
pub struct DependencySet(Vec<Id>);

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, dep_id: impl AsRef<str>) -> Self {
        self.0.push(id(dep_id));
        self
    }

    pub fn ids(&self) -> &[Id] {
        &self.0
    }
}

impl FromIterator<Id> for DependencySet {
    fn from_iter<I: IntoIterator<Item = Id>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The resolved value store a component's dependencies are read from at
/// use-time. Built incrementally by the boot controller as resources come
/// `Ready` — one resource's `init` runs with every earlier resource's value
/// already visible through the same shared `Arc<DepsRegistry>` — and is
/// never mutated again afterward, matching spec §5's "mutation only by the
/// boot controller before `ready`" rule. The inner lock exists only to let
/// `insert` take `&self` so the same `Arc` can be handed to each resource's
/// `init` call as it becomes ready, not for concurrent writers.
#[derive(Default)]
pub struct DepsRegistry {
    values: RwLock<HashMap<Id, AnyValue>>,
}

impl DepsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, target: Id, value: AnyValue) {
        self.values.write().insert(target, value);
    }

    /// Resolves a typed dependency reference, failing if the id was never
    /// initialized or the stored value is not of type `T`.
    pub fn get<T: Send + Sync + 'static>(&self, dep: &Dep<T>) -> Result<std::sync::Arc<T>, FrameworkError> {
        let value = self
            .values
            .read()
            .get(&dep.id)
            .cloned()
            .ok_or_else(|| FrameworkError::DependencyNotInitialized(dep.id.clone()))?;
        downcast(&value, &dep.id)
    }

    pub fn get_raw(&self, target: &str) -> Option<AnyValue> {
        self.values.read().get(target).cloned()
    }

    pub fn contains(&self, target: &str) -> bool {
        self.values.read().contains_key(target)
    }
}
