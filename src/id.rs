//! Canonical component identity.
//!
//! Every task, resource, event, hook, middleware, tag, error, and async
//! context carries a string id that is unique within a run. This module is
//! the home of the `Id` alias and the [`IdRegistry`] that enforces
//! uniqueness and derives anonymous ids for definitions that omit one.

use std::collections::HashMap;
use std::panic::Location;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ComponentKind, FrameworkError};

/// A component identifier. Cheaply cloned (`Arc<str>` under the hood) since
/// ids are threaded through every definition, dependency edge, and event
/// record in the runtime.
pub type Id = Arc<str>;

/// Builds an [`Id`] from anything string-like.
pub fn id(s: impl AsRef<str>) -> Id {
    Arc::from(s.as_ref())
}

/// Tracks every id handed out during a run and derives anonymous ids for
/// definitions that don't supply one explicitly.
///
/// Anonymous ids are derived from the call site (`#[track_caller]`) rather
/// than a source file path read off the filesystem — Rust has no runtime
/// equivalent of "the file that declared this object" without that
/// attribute, so `Location::caller()` is the idiomatic substitute.
pub struct IdRegistry {
    anon_counters: Mutex<HashMap<&'static str, u32>>,
}

impl Default for IdRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IdRegistry {
    pub fn new() -> Self {
        Self {
            anon_counters: Mutex::new(HashMap::new()),
        }
    }

    /// Derives a stable anonymous id of the form `{file}:{line}.{kind}.{n}`.
    /// Calling this twice from the exact same call site yields distinct,
    /// incrementing ids rather than colliding, since a single call site can
    /// legitimately register many anonymous components in a loop.
    #[track_caller]
    pub fn anonymous(&self, kind: &str) -> Id {
        let loc = Location::caller();
        let key_owned = format!("{}:{}.{}", loc.file(), loc.line(), kind);
        let mut counters = self.anon_counters.lock();
        // Only leak a new `&'static str` the first time this call site is
        // seen — looking up by content first avoids leaking one string per
        // `anonymous()` call for call sites that fire repeatedly (e.g. in a
        // loop), which would otherwise leak unboundedly over a long-running
        // process.
        let key: &'static str = match counters.keys().find(|k| ***k == *key_owned) {
            Some(existing) => *existing,
            None => Box::leak(key_owned.clone().into_boxed_str()),
        };
        let counter = counters.entry(key).or_insert(0);
        let n = *counter;
        *counter += 1;
        id(format!("{key_owned}#{n}"))
    }
}

static GLOBAL_ID_REGISTRY: std::sync::OnceLock<IdRegistry> = std::sync::OnceLock::new();

/// Derives an anonymous id from the caller's source location, via a
/// process-global [`IdRegistry`]. Backs the `*Definition::anonymous(...)`
/// constructors for callers that don't want to name every task/resource
/// explicitly (spec §3, "Anonymous ids are derived from the declaring source
/// file path + symbol name when omitted").
#[track_caller]
pub fn anonymous_id(kind: &str) -> Id {
    GLOBAL_ID_REGISTRY.get_or_init(IdRegistry::new).anonymous(kind)
}

/// Checks a candidate id against an existing set, failing with
/// [`FrameworkError::DuplicateDefinition`] unless it is the same id bound to
/// the same underlying object (registration is idempotent for identical
/// objects, per the Store invariant in spec §3).
pub fn check_duplicate(
    existing: Option<&Id>,
    candidate: &Id,
    kind: ComponentKind,
) -> Result<(), FrameworkError> {
    if let Some(existing) = existing {
        if existing.as_ref() != candidate.as_ref() {
            return Err(FrameworkError::DuplicateDefinition {
                kind,
                id: candidate.clone(),
            });
        }
    }
    Ok(())
}
