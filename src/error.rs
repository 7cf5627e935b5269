//! The runtime's error taxonomy (spec §7).
//!
//! One `thiserror` enum carries every framework-raised failure kind. Each
//! variant carries the structured data the spec calls for (cycle path,
//! missing id, component kind, ...) and `FrameworkError::is` gives
//! "match by stable id" semantics instead of requiring callers to match on
//! the Rust variant directly, mirroring the source system's `*.is(err)`
//! helpers.

use crate::id::Id;

/// Which kind of component a [`FrameworkError`] or log record concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Task,
    Resource,
    Event,
    Hook,
    Middleware,
    Tag,
    Error,
    AsyncContext,
    Queue,
    Semaphore,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Task => "task",
            ComponentKind::Resource => "resource",
            ComponentKind::Event => "event",
            ComponentKind::Hook => "hook",
            ComponentKind::Middleware => "middleware",
            ComponentKind::Tag => "tag",
            ComponentKind::Error => "error",
            ComponentKind::AsyncContext => "asyncContext",
            ComponentKind::Queue => "queue",
            ComponentKind::Semaphore => "semaphore",
        }
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every error kind the runtime itself can raise. User code errors are
/// wrapped in [`FrameworkError::User`] rather than translated, so the
/// original error and its downcast chain survive.
#[derive(Debug, thiserror::Error)]
pub enum FrameworkError {
    #[error("validation failed for {kind} `{id}`: {cause}")]
    Validation {
        kind: ComponentKind,
        id: Id,
        cause: String,
    },

    #[error("circular dependency detected along: {}", path.iter().map(|i| i.as_ref()).collect::<Vec<_>>().join(" -> "))]
    CircularDependency { path: Vec<Id> },

    #[error("unknown dependency `{dependency}` referenced by `{by}`")]
    UnknownDependency { dependency: Id, by: Id },

    #[error("override target `{0}` is not registered")]
    OverrideTargetMissing(Id),

    #[error("{kind} `{id}` is already registered with a different definition")]
    DuplicateDefinition { kind: ComponentKind, id: Id },

    #[error("attempted to mutate `{0}` after lockdown (run is ready)")]
    LockdownViolation(Id),

    #[error("event `{0}` re-entered its own emission chain")]
    EventCycle(Id),

    #[error("deadlock: queue `{0}` was re-entered by a task it is already running")]
    Deadlock(Id),

    #[error("operation on `{0}` timed out")]
    Timeout(Id),

    #[error("`{0}` has already been disposed")]
    Disposed(Id),

    #[error("no value provided for async context `{0}`")]
    MissingContext(Id),

    #[error("contract violation for `{0}`: {1}")]
    ContractViolation(Id, String),

    #[error("dependency `{0}` was not found in the resolved dependency set")]
    DependencyNotInitialized(Id),

    #[error(transparent)]
    User(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl FrameworkError {
    /// Stable, kebab-case-ish id for this error kind, independent of the
    /// Rust variant name, for `*.is(id)`-style matching.
    pub fn kind_id(&self) -> &'static str {
        match self {
            FrameworkError::Validation { .. } => "validationError",
            FrameworkError::CircularDependency { .. } => "circularDependencyError",
            FrameworkError::UnknownDependency { .. } => "unknownDependencyError",
            FrameworkError::OverrideTargetMissing(_) => "overrideTargetMissingError",
            FrameworkError::DuplicateDefinition { .. } => "duplicateDefinitionError",
            FrameworkError::LockdownViolation(_) => "lockdownViolationError",
            FrameworkError::EventCycle(_) => "eventCycleError",
            FrameworkError::Deadlock(_) => "deadlockError",
            FrameworkError::Timeout(_) => "timeoutError",
            FrameworkError::Disposed(_) => "disposedError",
            FrameworkError::MissingContext(_) => "missingContextError",
            FrameworkError::ContractViolation(..) => "contractViolationError",
            FrameworkError::DependencyNotInitialized(_) => "dependencyNotInitializedError",
            FrameworkError::User(_) => "userError",
        }
    }

    /// Matches this error's kind by its stable id rather than the Rust
    /// variant, so application code never needs to `match` on our enum.
    pub fn is(&self, kind_id: &str) -> bool {
        self.kind_id() == kind_id
    }
}

/// Convenience for wrapping an arbitrary user error thrown from `run`/`init`
/// handlers, task middleware, or hooks.
pub fn user_error<E>(err: E) -> FrameworkError
where
    E: std::error::Error + Send + Sync + 'static,
{
    FrameworkError::User(Box::new(err))
}

/// Which lifecycle phase an `onError`/`onUnhandledError` report concerns
/// (spec §6, `onUnhandledError({error, kind, source})`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorEventKind {
    Task,
    ResourceInit,
    Hook,
    Middleware,
    Process,
    Run,
}

impl ErrorEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorEventKind::Task => "task",
            ErrorEventKind::ResourceInit => "resourceInit",
            ErrorEventKind::Hook => "hook",
            ErrorEventKind::Middleware => "middleware",
            ErrorEventKind::Process => "process",
            ErrorEventKind::Run => "run",
        }
    }
}

/// The payload carried by every `onError` emission. Carries only the
/// error's display data (message + stable kind id) rather than the
/// `FrameworkError` itself, so the originating `Result::Err` stays owned by
/// the caller and doesn't need to round-trip through the event system to be
/// propagated.
#[derive(Debug, Clone)]
pub struct ErrorPayload {
    pub message: String,
    pub error_kind_id: &'static str,
    pub phase: ErrorEventKind,
    pub source: Id,
}

impl ErrorPayload {
    pub fn from_error(err: &FrameworkError, phase: ErrorEventKind, source: Id) -> Self {
        Self {
            message: err.to_string(),
            error_kind_id: err.kind_id(),
            phase,
            source,
        }
    }
}
