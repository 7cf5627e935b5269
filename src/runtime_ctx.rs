//! The shared handles every registration thunk needs (spec §4.1, §4.9).
//!
//! Kept in its own module because [`crate::resource`]'s `RegistrationThunk`
//! and [`crate::run`]'s boot controller both need it, and putting it in
//! either of those would make the other one the "owner" of a type that's
//! really just plumbing between them.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{ErrorPayload, FrameworkError};
use crate::event::EventManager;
use crate::middleware::MiddlewareManager;
use crate::resource::{RegistrationThunk, ResourceRunner, ThunkKind};
use crate::store::Store;
use crate::task::TaskRunner;

/// Everything a [`RegistrationThunk`] needs to register itself into the run.
#[derive(Clone)]
pub struct RegistrationContext {
    pub store: Arc<Store>,
    pub tasks: Arc<TaskRunner>,
    pub resources: Arc<ResourceRunner>,
    pub events: Arc<EventManager<Value>>,
    pub error_events: Arc<EventManager<ErrorPayload>>,
    pub middleware: Arc<MiddlewareManager>,
}

/// Applies one level of a `register()` factory's output, honoring the
/// leaf-to-root override precedence rule (spec §4.1): nested resources (and
/// everything *they* transitively register) are fully processed before this
/// level's own non-resource registrations (tasks, events, hooks, overrides,
/// middleware, tags). Since override precedence is "last-staged wins"
/// (`Store::add_override`/`Store::resolve`), running nested-resource thunks
/// first means any override they stage always loses to one staged by an
/// ancestor — i.e. the root-most override wins, resolving spec §9's open
/// question on sibling ties by registration order within each partition.
pub fn register_tree(ctx: &RegistrationContext, thunks: Vec<RegistrationThunk>) -> Result<(), FrameworkError> {
    let (resources, others): (Vec<_>, Vec<_>) = thunks.into_iter().partition(|t| t.kind == ThunkKind::Resource);
    for thunk in resources {
        thunk.invoke(ctx)?;
    }
    for thunk in others {
        thunk.invoke(ctx)?;
    }
    Ok(())
}
