//! Debug subsystem: installs logging interceptors based on run configuration
//! (spec §2 "Debug subsystem", §6 `RunOptions.debug`).
//!
//! `"normal"` and `"verbose"` are convenience presets over [`DebugConfig`];
//! applications that want finer control pass a [`DebugConfig`] directly.
//! Every flag just toggles whether a given interceptor gets installed on the
//! shared [`MiddlewareManager`]/[`EventManager`] — the interceptors
//! themselves are the same machinery `intercept`/`interceptHook` expose to
//! application code (spec §4.3, §4.4).

use std::sync::Arc;

use serde_json::Value;

use crate::event::EventManager;
use crate::logger::{LogExtras, Logger};
use crate::middleware::MiddlewareManager;

/// Fine-grained toggles for what the debug subsystem logs.
#[derive(Clone, Copy, Debug)]
pub struct DebugConfig {
    pub log_task_middleware: bool,
    pub log_resource_middleware: bool,
    pub log_event_emissions: bool,
    pub log_hook_dispatch: bool,
}

impl DebugConfig {
    pub const OFF: DebugConfig = DebugConfig {
        log_task_middleware: false,
        log_resource_middleware: false,
        log_event_emissions: false,
        log_hook_dispatch: false,
    };

    pub const NORMAL: DebugConfig = DebugConfig {
        log_task_middleware: false,
        log_resource_middleware: false,
        log_event_emissions: true,
        log_hook_dispatch: false,
    };

    pub const VERBOSE: DebugConfig = DebugConfig {
        log_task_middleware: true,
        log_resource_middleware: true,
        log_event_emissions: true,
        log_hook_dispatch: true,
    };
}

/// What `RunOptions.debug` accepts: a named preset or an explicit config.
#[derive(Clone, Copy, Debug)]
pub enum DebugOption {
    Off,
    Normal,
    Verbose,
    Custom(DebugConfig),
}

impl Default for DebugOption {
    fn default() -> Self {
        DebugOption::Off
    }
}

impl DebugOption {
    pub fn resolve(self) -> DebugConfig {
        match self {
            DebugOption::Off => DebugConfig::OFF,
            DebugOption::Normal => DebugConfig::NORMAL,
            DebugOption::Verbose => DebugConfig::VERBOSE,
            DebugOption::Custom(cfg) => cfg,
        }
    }
}

/// Installs interceptors matching `config` onto the boot controller's
/// middleware manager and event managers. Called once, before `ready`,
/// while everything is still unlocked.
pub fn install(
    config: DebugConfig,
    logger: &Logger,
    middleware: &Arc<MiddlewareManager>,
    events: &Arc<EventManager<Value>>,
) {
    let debug_logger = logger.with("debug", None);

    if config.log_task_middleware {
        let l = debug_logger.clone();
        let _ = middleware.intercept_task(Arc::new(move |info, input, next| {
            let l = l.clone();
            Box::pin(async move {
                l.trace(
                    format!("task middleware `{}` dispatching for `{}`", info.middleware_id, info.task_id),
                    LogExtras::default(),
                );
                next(input).await
            })
        }));
    }

    if config.log_resource_middleware {
        let l = debug_logger.clone();
        let _ = middleware.intercept_resource(Arc::new(move |info, next| {
            let l = l.clone();
            Box::pin(async move {
                l.trace(
                    format!("resource middleware `{}` dispatching for `{}`", info.middleware_id, info.resource_id),
                    LogExtras::default(),
                );
                next().await
            })
        }));
    }

    if config.log_event_emissions {
        let l = debug_logger.clone();
        events.intercept(Arc::new(move |record, next| {
            let l = l.clone();
            Box::pin(async move {
                l.trace(format!("emitting `{}` from `{}`", record.id, record.source), LogExtras::default());
                next(record).await
            })
        }));
    }

    if config.log_hook_dispatch {
        let l = debug_logger;
        events.intercept_hook(Arc::new(move |listener, record, next| {
            let l = l.clone();
            Box::pin(async move {
                l.trace(format!("dispatching `{}` to listener `{}`", record.id, listener.id()), LogExtras::default());
                next(record).await
            })
        }));
    }
}
