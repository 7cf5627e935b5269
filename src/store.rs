//! The definition registry (spec §4.1).
//!
//! `Store` is the canonical home for every registered task, resource,
//! event, hook, middleware, tag, and error definition for one run. It
//! tracks registration order (for deterministic tie-breaks), the tag index,
//! staged overrides, and the post-`ready` lockdown flag.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{ComponentKind, FrameworkError};
use crate::id::Id;
use crate::tag::Tags;

/// Metadata about a registered component, independent of its concrete
/// (generic) Rust type. The resolver and tag index only ever need this —
/// the full typed definition is only looked up at the handful of call
/// sites (task invocation, resource init, event emission) that know the
/// concrete type they're asking for.
#[derive(Clone, Debug)]
pub struct DefMeta {
    pub id: Id,
    pub kind: ComponentKind,
    pub tags: Tags,
    /// Ids of other components this one depends on (init-time for
    /// resources, use-time for everything else) — the edges the resolver
    /// walks.
    pub dependencies: Vec<Id>,
    pub registration_index: usize,
}

/// Anything that can be registered in the [`Store`]. Implemented by every
/// concrete `*Definition` type; `as_any`/`as_any_arc` let the store erase
/// the concrete type for homogeneous storage while [`Store::resolve`]
/// downcasts it back.
pub trait Definition: Any + Send + Sync {
    fn meta(&self) -> DefMeta;
    fn as_any(&self) -> &dyn Any;
}

type OverridePatch = Arc<dyn Fn(Arc<dyn Any + Send + Sync>) -> Arc<dyn Any + Send + Sync> + Send + Sync>;

struct StagedOverride {
    target: Id,
    apply: OverridePatch,
}

#[derive(Default)]
struct StoreInner {
    definitions: HashMap<Id, Arc<dyn Any + Send + Sync>>,
    meta: HashMap<Id, DefMeta>,
    registration_order: Vec<Id>,
    overrides: HashMap<Id, Vec<StagedOverride>>,
    tag_index: HashMap<Id, Vec<Id>>,
    locked: bool,
}

/// The run-scoped definition registry.
pub struct Store {
    inner: RwLock<StoreInner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.read().locked
    }

    /// One-way transition performed by the boot controller right after the
    /// `ready` event is emitted (spec §3, §4.9 step 7).
    pub fn lock(&self) {
        self.inner.write().locked = true;
    }

    /// Registers a definition. Registering the exact same id twice with an
    /// object that is reference-identical (`Arc::ptr_eq`) to the one
    /// already stored is a no-op, matching the idempotence law in spec §8;
    /// registering a *different* object under an id already taken is a
    /// `DuplicateDefinition` error.
    pub fn register<T: Definition + 'static>(&self, def: Arc<T>) -> Result<(), FrameworkError> {
        let meta = def.meta();
        let erased: Arc<dyn Any + Send + Sync> = def.clone();
        let mut inner = self.inner.write();
        if inner.locked {
            return Err(FrameworkError::LockdownViolation(meta.id.clone()));
        }
        if let Some(existing) = inner.definitions.get(&meta.id) {
            let same_object = Arc::ptr_eq(existing, &erased);
            if same_object {
                return Ok(());
            }
            return Err(FrameworkError::DuplicateDefinition {
                kind: meta.kind,
                id: meta.id,
            });
        }

        for tag_id in meta.tags.ids() {
            inner
                .tag_index
                .entry(tag_id.clone())
                .or_default()
                .push(meta.id.clone());
        }

        inner.registration_order.push(meta.id.clone());
        inner.meta.insert(meta.id.clone(), DefMeta {
            registration_index: inner.registration_order.len() - 1,
            ..meta.clone()
        });
        inner.definitions.insert(meta.id.clone(), erased);
        Ok(())
    }

    /// Stages an override targeting `target`. Overrides are validated and
    /// applied lazily, at [`Store::resolve`] time, in the order they were
    /// staged: the *last staged* patch wins (spec §4.1, "root-most wins").
    /// It is the boot controller's responsibility to stage overrides while
    /// walking the registration tree leaves-first so the root's overrides
    /// land last — see DESIGN.md for the sibling-tie-break decision.
    pub fn add_override<T: Send + Sync + 'static>(
        &self,
        target: impl Into<Id>,
        patch: impl Fn(&T) -> T + Send + Sync + 'static,
    ) -> Result<(), FrameworkError> {
        let target = target.into();
        let mut inner = self.inner.write();
        if inner.locked {
            return Err(FrameworkError::LockdownViolation(target));
        }
        let apply: OverridePatch = Arc::new(move |value: Arc<dyn Any + Send + Sync>| {
            match value.downcast::<T>() {
                Ok(typed) => Arc::new(patch(&typed)) as Arc<dyn Any + Send + Sync>,
                Err(original) => original,
            }
        });
        inner
            .overrides
            .entry(target.clone())
            .or_default()
            .push(StagedOverride { target, apply });
        Ok(())
    }

    /// Applies all staged overrides for `id`, failing if overrides target
    /// an id that was never registered (spec §3: "overriding a
    /// non-registered id fails fast at boot").
    pub fn finalize_overrides(&self) -> Result<(), FrameworkError> {
        let inner = self.inner.read();
        for target in inner.overrides.keys() {
            if !inner.definitions.contains_key(target) {
                return Err(FrameworkError::OverrideTargetMissing(target.clone()));
            }
        }
        Ok(())
    }

    /// Resolves the effective (override-applied) definition for `id`, or
    /// `None` if not registered.
    pub fn resolve<T: Send + Sync + 'static>(&self, target: &str) -> Option<Arc<T>> {
        let inner = self.inner.read();
        let base = inner.definitions.get(target)?.clone();
        let effective = match inner.overrides.get(target) {
            Some(patches) => patches.iter().fold(base, |acc, p| (p.apply)(acc)),
            None => base,
        };
        effective.downcast::<T>().ok()
    }

    pub fn meta(&self, target: &str) -> Option<DefMeta> {
        self.inner.read().meta.get(target).cloned()
    }

    pub fn all_meta(&self) -> Vec<DefMeta> {
        let inner = self.inner.read();
        inner
            .registration_order
            .iter()
            .filter_map(|id| inner.meta.get(id.as_ref()).cloned())
            .collect()
    }

    /// `getTasksWithTag` / `getResourcesWithTag` — ids in registration
    /// order, filtered by both tag and kind.
    pub fn with_tag(&self, tag: &str, kind: ComponentKind) -> Vec<Id> {
        let inner = self.inner.read();
        let Some(members) = inner.tag_index.get(tag) else {
            return Vec::new();
        };
        let member_set: std::collections::HashSet<&Id> = members.iter().collect();
        inner
            .registration_order
            .iter()
            .filter(|id| member_set.contains(id))
            .filter(|id| {
                inner
                    .meta
                    .get(id.as_ref())
                    .map(|m| m.kind == kind)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn registration_order(&self) -> Vec<Id> {
        self.inner.read().registration_order.clone()
    }
}

/// Wraps a staged override as a deferred registration, for use inside a
/// resource's `register()` factory. Overrides staged by a nested resource's
/// factory run before the ones staged by its parent (leaf-to-root traversal,
/// see `runtime_ctx::register_tree`), so the parent's patch is always the
/// last one applied — the root of the registration tree always wins.
pub fn register_override<T: Send + Sync + 'static>(
    target: impl Into<Id>,
    patch: impl Fn(&T) -> T + Send + Sync + 'static,
) -> crate::resource::RegistrationThunk {
    let target = target.into();
    crate::resource::RegistrationThunk::other(move |ctx| ctx.store.add_override(target.clone(), patch))
}
