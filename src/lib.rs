#![doc(html_logo_url = "https://www.rust-lang.org/logos/rust-logo-128x128.png")]
#![doc(html_favicon_url = "https://www.rust-lang.org/favicon.ico")]
//! # Runner
//!
//! > **A dependency-injection runtime for composing asynchronous applications
//! > out of tasks, resources, events, and middleware.**
//!
//! An application built on this crate declares a tree of **resources**
//! (long-lived, initialized-once dependencies — a database pool, a logger, a
//! client) and **tasks** (the units of work that consume them), wires them
//! together with typed dependency edges, and hands the root resource to
//! [`run::run`]. The boot controller resolves the dependency graph, compiles
//! each task's and resource's middleware chain, initializes every resource in
//! topological order, and returns a [`run::RunResult`] wired up and ready to
//! serve requests.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### Why a definition/runtime split?
//!
//! Every component (`TaskDefinition`, `ResourceDefinition`, `EventDefinition`,
//! middleware, hooks, tags, errors) is a plain, inert value describing *what*
//! something is and *what it depends on*. The boot controller is the only
//! thing that turns a definition into a running instance. This split is what
//! makes [`run::dry_run`] possible: it walks the exact same registration tree
//! and dependency graph `run()` would, without calling a single `init`, so a
//! broken wiring fails the same way whether or not you ever start the
//! application.
//!
//! ### Type erasure at the edges, typed everywhere else
//! The [`store::Store`] and [`deps::DepsRegistry`] hold every component
//! behind [`any_value::AnyValue`] (`Arc<dyn Any + Send + Sync>`) so they can
//! be homogeneous collections. Every call site that actually *uses* a
//! component — a task invoking another task's output type, a resource
//! reading a dependency's value — downcasts back to a concrete type at the
//! boundary and never passes the erased form further than it has to.
//!
//! ### Ambient call-stack tracking via `task_local!`
//! A handful of invariants are naturally expressed as "is this id already on
//! the current async call stack": re-entrant event emission
//! ([`event::EventManager::emit_record`]), nested context values
//! ([`context::AsyncContextDefinition::provide`]), and same-task queue
//! self-enqueue ([`queue::Queue::run`]). Each uses its own
//! `tokio::task_local!` rather than a shared global, so the three concerns
//! stay independent of each other.
//!
//! ## 👩‍💻 Architecture Notes
//!
//! ### 1. Error handling
//! [`error::FrameworkError`] is a single `thiserror` enum covering the
//! runtime's own failure modes (cycles, lockdown violations, timeouts,
//! deadlocks...) plus a `User` variant boxing application errors.
//! [`error::FrameworkError::is`] matches by a stable `kind_id()` string
//! rather than by Rust variant name, and [`error_def::ErrorDefinition`] gives
//! application code the same "match by id, not by downcast" shape for its
//! own named error kinds.
//!
//! ### 2. Logging
//! [`logger::Logger`] forwards structured log records to `tracing` macros;
//! [`logger::install_global_subscriber`] configures `tracing-subscriber`'s
//! actual rendering (pretty, plain, or JSON) once per process.
//! [`debug::DebugOption`] wires additional trace-level interceptors into the
//! middleware and event pipelines for local development.
//!
//! ### 3. Concurrency primitives
//! Registry and manager state ([`store::Store`], [`middleware::MiddlewareManager`],
//! [`event::EventManager`]) is protected with `parking_lot` locks, kept for
//! the duration of a synchronous read/write only. Anything that crosses an
//! `.await` boundary — a counting [`semaphore::Semaphore`] or a single-lane
//! [`queue::Queue`] — is built on `tokio::sync` channels instead.
//!
//! ## 🗺️ Module Tour
//!
//! ### The registry ([`store`], [`resolver`], [`id`], [`tag`])
//! Where every definition lives for the duration of one run, plus the
//! iterative cycle-detecting, topologically-sorting dependency resolver that
//! walks it before anything is initialized.
//!
//! ### The work units ([`task`], [`resource`], [`runtime_ctx`])
//! `TaskDefinition`/`ResourceDefinition` plus the runners that invoke/
//! initialize them and the leaf-to-root registration walk that gives nested
//! resources' overrides the right precedence.
//!
//! ### The cross-cutting layers ([`middleware`], [`event`], [`context`])
//! Onion-style middleware chains compiled once at wiring time; an event bus
//! with ordered listeners, propagation control, and hooks; task-local async
//! context values.
//!
//! ### The ambient stack ([`logger`], [`debug`], [`error`], [`error_def`], [`validation`], [`globals`])
//! Structured logging, debug tracing, the framework's error taxonomy,
//! application-declared error kinds, the schema contract tasks/resources
//! validate against, and the framework's own built-in resources and
//! middleware (`globals.*`).
//!
//! ### The boot controller ([`run`])
//! Sequences registration, resolution, middleware compilation, resource
//! initialization, and the `ready` transition into one call.
//!
//! ### Test support ([`testing`])
//! Expectation-queue mocks for application tests that need to fake out a
//! dependency without booting the real thing.
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! # Run with info-level logs
//! RUST_LOG=info cargo run
//! ```
//!
//! ```bash
//! cargo test
//! ```

pub mod any_value;
pub mod clock;
pub mod context;
pub mod debug;
pub mod deps;
pub mod error;
pub mod error_def;
pub mod event;
pub mod globals;
pub mod id;
pub mod logger;
pub mod middleware;
pub mod queue;
pub mod resolver;
pub mod resource;
pub mod run;
pub mod runtime_ctx;
pub mod semaphore;
pub mod store;
pub mod tag;
pub mod task;
pub mod testing;
pub mod validation;
