//! Leveled structured logging with subscriber fan-out (spec §4.8).
//!
//! Rendering (pretty/plain/json/json-pretty) is explicitly out of scope for
//! the `Logger` type itself (spec.md §1 names "the logger's pretty-printer"
//! as an external collaborator) — `Logger` only produces [`LogRecord`]s and
//! forwards them to `tracing`, the same crate the teacher's
//! `lifecycle::tracing::setup_tracing` initializes. `tracing-subscriber`'s
//! own formatters are the actual rendering layer; [`PrintStrategy`] only
//! selects which one `run()` installs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::clock::now_millis;
use crate::id::Id;

/// Ascending severity, matching spec §4.8: `trace < debug < info < warn <
/// error < critical`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            "critical" => Some(LogLevel::Critical),
            _ => None,
        }
    }

    /// Forwards this record's level into the matching `tracing` event
    /// macro, so the framework's own diagnostics and application logs ride
    /// the same subscriber pipeline `lifecycle::tracing::setup_tracing`
    /// configures.
    fn emit_tracing(&self, record: &LogRecord) {
        let source = record.source.as_deref().unwrap_or("-");
        match self {
            LogLevel::Trace => tracing::trace!(source, message = %record.message, data = ?record.data),
            LogLevel::Debug => tracing::debug!(source, message = %record.message, data = ?record.data),
            LogLevel::Info => tracing::info!(source, message = %record.message, data = ?record.data),
            LogLevel::Warn => tracing::warn!(source, message = %record.message, data = ?record.data),
            LogLevel::Error => tracing::error!(source, message = %record.message, error = ?record.error, data = ?record.data),
            LogLevel::Critical => tracing::error!(source, critical = true, message = %record.message, error = ?record.error, data = ?record.data),
        }
    }
}

/// One emitted log record (spec §4.8).
#[derive(Clone, Debug)]
pub struct LogRecord {
    pub level: LogLevel,
    pub source: Option<String>,
    pub message: String,
    pub timestamp: u64,
    pub error: Option<String>,
    pub data: Option<Value>,
    pub context: HashMap<String, Value>,
}

/// Extra fields a call site may attach to a single record.
#[derive(Default, Clone)]
pub struct LogExtras {
    pub error: Option<String>,
    pub data: Option<Value>,
    pub source: Option<String>,
}

pub type LogHandler = Arc<dyn Fn(&LogRecord) + Send + Sync>;

struct LoggerShared {
    subscribers: RwLock<Vec<LogHandler>>,
    print_threshold: RwLock<Option<LogLevel>>,
}

/// Leveled logger with `with()`-derived sub-loggers that share the parent's
/// subscriber list and print threshold (spec §4.8: "sub-loggers share
/// subscribers").
#[derive(Clone)]
pub struct Logger {
    shared: Arc<LoggerShared>,
    source: Option<String>,
    context: HashMap<String, Value>,
}

impl Logger {
    /// Builds a root logger. `test_mode` selects the spec-mandated default
    /// print threshold (`info` normally, `null`/silent under test), then
    /// `BLUELIBS_LOG_LEVEL`/`BLUELIBS_DISABLE_LOGS` override it (spec §6
    /// "Environment variables").
    pub fn new(test_mode: bool) -> Self {
        let mut threshold = if test_mode { None } else { Some(LogLevel::Info) };
        if let Ok(level) = std::env::var("BLUELIBS_LOG_LEVEL") {
            threshold = LogLevel::parse(&level);
        }
        if std::env::var("BLUELIBS_DISABLE_LOGS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
        {
            threshold = None;
        }
        Self {
            shared: Arc::new(LoggerShared {
                subscribers: RwLock::new(Vec::new()),
                print_threshold: RwLock::new(threshold),
            }),
            source: None,
            context: HashMap::new(),
        }
    }

    /// `logger.with(source, additionalContext?)` — a sub-logger that merges
    /// `context` into this logger's own and tags every record with
    /// `source`, while sharing the same subscriber list and print
    /// threshold.
    pub fn with(&self, source: impl Into<String>, additional_context: Option<HashMap<String, Value>>) -> Logger {
        let mut context = self.context.clone();
        if let Some(extra) = additional_context {
            context.extend(extra);
        }
        Logger {
            shared: self.shared.clone(),
            source: Some(source.into()),
            context,
        }
    }

    pub fn on_log(&self, handler: LogHandler) {
        self.shared.subscribers.write().push(handler);
    }

    pub fn set_print_threshold(&self, level: Option<LogLevel>) {
        *self.shared.print_threshold.write() = level;
    }

    fn should_print(&self, level: LogLevel) -> bool {
        self.shared
            .print_threshold
            .read()
            .map(|threshold| level >= threshold)
            .unwrap_or(false)
    }

    fn log(&self, level: LogLevel, message: impl Into<String>, extras: LogExtras) {
        let record = LogRecord {
            level,
            source: extras.source.or_else(|| self.source.clone()),
            message: message.into(),
            timestamp: now_millis(),
            error: extras.error,
            data: extras.data,
            context: self.context.clone(),
        };
        if self.should_print(level) {
            level.emit_tracing(&record);
        }
        for subscriber in self.shared.subscribers.read().iter() {
            subscriber(&record);
        }
    }

    pub fn trace(&self, message: impl Into<String>, extras: LogExtras) {
        self.log(LogLevel::Trace, message, extras)
    }
    pub fn debug(&self, message: impl Into<String>, extras: LogExtras) {
        self.log(LogLevel::Debug, message, extras)
    }
    pub fn info(&self, message: impl Into<String>, extras: LogExtras) {
        self.log(LogLevel::Info, message, extras)
    }
    pub fn warn(&self, message: impl Into<String>, extras: LogExtras) {
        self.log(LogLevel::Warn, message, extras)
    }
    pub fn error(&self, message: impl Into<String>, extras: LogExtras) {
        self.log(LogLevel::Error, message, extras)
    }
    pub fn critical(&self, message: impl Into<String>, extras: LogExtras) {
        self.log(LogLevel::Critical, message, extras)
    }
}

/// Selects which `tracing-subscriber` formatter `run()` installs (spec §6
/// `RunOptions.logs.printStrategy`). The renderers themselves are
/// `tracing-subscriber`'s, not hand-rolled — only the selection is ours.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrintStrategy {
    Pretty,
    Plain,
    Json,
    JsonPretty,
}

static SUBSCRIBER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Installs a process-global `tracing-subscriber`, mirroring the teacher's
/// `lifecycle::tracing::setup_tracing` (env-filter driven, compact by
/// default) but selectable by [`PrintStrategy`]. Idempotent: a second call
/// in the same process (e.g. across multiple `run()`s in tests) is a no-op
/// rather than panicking on "subscriber already set".
pub fn install_global_subscriber(strategy: PrintStrategy) {
    if SUBSCRIBER_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    // `tracing-subscriber`'s JSON writer has no indented-pretty mode of its
    // own (that's the "pretty-printer" spec.md §1 places out of scope), so
    // `JsonPretty` reuses the compact JSON formatter; only `Pretty`/`Plain`
    // differ in rendering here.
    let _ = match strategy {
        PrintStrategy::Pretty => builder.pretty().try_init(),
        PrintStrategy::Plain => builder.compact().try_init(),
        PrintStrategy::Json | PrintStrategy::JsonPretty => builder.json().try_init(),
    };
}

pub fn source_id_context(id: &Id) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    map.insert("componentId".to_string(), Value::String(id.to_string()));
    map
}
