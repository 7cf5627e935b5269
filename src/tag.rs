//! Typed metadata tags (spec §3, §4.1).
//!
//! A `TagDefinition` in the source system can carry a config payload and an
//! output contract. Since Rust has no ambient reflection, tags attached to
//! a task/resource/event are represented as a small ordered map from tag id
//! to a `serde_json::Value` config payload, carried alongside every
//! definition. `Tags::exists`/`Tags::extract` give the two operations spec
//! §3 calls for.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::ComponentKind;
use crate::id::{id, Id};
use crate::store::{DefMeta, Definition};

/// The set of tags attached to a single definition.
#[derive(Clone, Debug, Default)]
pub struct Tags {
    order: Vec<Id>,
    configs: HashMap<Id, Value>,
}

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a tag with no config payload.
    pub fn tag(mut self, tag_id: impl AsRef<str>) -> Self {
        let tag_id = id(tag_id);
        if !self.configs.contains_key(&tag_id) {
            self.order.push(tag_id.clone());
        }
        self.configs.insert(tag_id, Value::Null);
        self
    }

    /// Attaches a tag together with a config payload.
    pub fn tag_with(mut self, tag_id: impl AsRef<str>, config: Value) -> Self {
        let tag_id = id(tag_id);
        if !self.configs.contains_key(&tag_id) {
            self.order.push(tag_id.clone());
        }
        self.configs.insert(tag_id, config);
        self
    }

    /// `Tag.exists(target)` — is this tag attached at all.
    pub fn exists(&self, tag_id: &str) -> bool {
        self.configs.contains_key(tag_id)
    }

    /// `Tag.extract(target)` — the tag's config payload, if attached.
    pub fn extract(&self, tag_id: &str) -> Option<&Value> {
        self.configs.get(tag_id)
    }

    /// Ids in attachment order, for deterministic iteration.
    pub fn ids(&self) -> impl Iterator<Item = &Id> {
        self.order.iter()
    }
}

/// A registered `TagDefinition`. Tags themselves are registered in the
/// [`Store`](crate::store::Store) like any other component so `getTasksWithTag`/
/// `getResourcesWithTag` can resolve a tag reference (id or definition) to a
/// canonical id.
#[derive(Clone, Debug)]
pub struct TagDefinition {
    pub id: Id,
    /// Optional documentation of the shape of this tag's config, purely
    /// informational at runtime (no schema attached here — callers that
    /// need validated tag configs supply their own `Schema` at the call
    /// site via [`Tags::extract`] + [`crate::validation::validate`]).
    pub description: Option<String>,
}

impl TagDefinition {
    pub fn new(tag_id: impl AsRef<str>) -> Self {
        Self {
            id: id(tag_id),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Definition for TagDefinition {
    fn meta(&self) -> DefMeta {
        DefMeta {
            id: self.id.clone(),
            kind: ComponentKind::Tag,
            tags: Tags::new(),
            dependencies: Vec::new(),
            registration_index: 0,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Wraps a tag definition as a deferred registration, for use inside a
/// resource's `register()` factory alongside `register_task`/`register_event`.
pub fn register_tag(def: std::sync::Arc<TagDefinition>) -> crate::resource::RegistrationThunk {
    crate::resource::RegistrationThunk::other(move |ctx| ctx.store.register(def.clone()))
}

/// Built-in tag ids (`globals.tags.*`), mirroring spec §6.
pub mod well_known {
    pub const SYSTEM: &str = "globals.tags.system";
    pub const DEBUG: &str = "globals.tags.debug";
    pub const EXCLUDE_FROM_GLOBAL_HOOKS: &str = "globals.tags.excludeFromGlobalHooks";
}
