//! Process-wide telemetry and logging initialization.
//!
//! Initialization is idempotent: the subscriber is installed once per
//! process, guarded by a flag, and repeat calls are no-ops. Per-run log
//! levels are scoped through a push/pop override stack so concurrent runs
//! cannot clobber each other; while any override is active the most verbose
//! one wins, and when the stack empties the base `FP_LOG` filter applies
//! again.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, Once, OnceLock, PoisonError};

use tracing::Metadata;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::{Context, Filter, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::config::LogLevel;
use crate::constants;

static TELEMETRY_READY: AtomicBool = AtomicBool::new(false);
static GUARD_TOKENS: AtomicU64 = AtomicU64::new(0);

fn level_stack() -> &'static Mutex<Vec<(u64, tracing::Level)>> {
    static STACK: OnceLock<Mutex<Vec<(u64, tracing::Level)>>> = OnceLock::new();
    STACK.get_or_init(|| Mutex::new(Vec::new()))
}

fn override_level() -> Option<tracing::Level> {
    level_stack()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .map(|(_, level)| *level)
        .max()
}

/// Removes its level override from the stack on drop.
#[must_use = "the override is popped when the guard drops"]
pub struct LogLevelGuard {
    token: u64,
}

impl Drop for LogLevelGuard {
    fn drop(&mut self) {
        level_stack()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(token, _)| *token != self.token);
    }
}

/// Installs a scoped log-level override for the lifetime of the returned
/// guard.
pub fn push_log_level(level: LogLevel) -> LogLevelGuard {
    let token = GUARD_TOKENS.fetch_add(1, Ordering::Relaxed);
    level_stack()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push((token, level.as_tracing_level()));
    LogLevelGuard { token }
}

/// The subscriber filter: scoped overrides take precedence, the base
/// `FP_LOG` env filter applies otherwise.
struct ScopedLevelFilter {
    base: EnvFilter,
}

impl<S> Filter<S> for ScopedLevelFilter {
    fn enabled(&self, meta: &Metadata<'_>, cx: &Context<'_, S>) -> bool {
        override_level().map_or_else(
            || Filter::<S>::enabled(&self.base, meta, cx),
            |level| *meta.level() <= level,
        )
    }
}

/// Wrapper type to write logs to file or stderr.
struct FileOrStderr {
    file: Option<Mutex<std::fs::File>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FileOrStderr {
    type Writer = Box<dyn std::io::Write + 'a>;

    fn make_writer(&'a self) -> Self::Writer {
        self.file
            .as_ref()
            .and_then(|mutex| mutex.lock().ok())
            .and_then(|file| file.try_clone().ok())
            .map_or_else(
                || Box::new(std::io::stderr()) as Self::Writer,
                |cloned| Box::new(cloned) as Self::Writer,
            )
    }
}

fn log_writer() -> FileOrStderr {
    std::env::var(constants::ENV_LOG_FILE).ok().map_or_else(
        || FileOrStderr { file: None },
        |path| match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            Ok(file) => FileOrStderr {
                file: Some(Mutex::new(file)),
            },
            Err(e) => {
                // The subscriber is not installed yet; stderr is the only
                // channel available.
                eprintln!("warning: could not open log file '{path}': {e}, using stderr");
                FileOrStderr { file: None }
            }
        },
    )
}

/// Installs the global tracing subscriber once per process.
///
/// `FP_LOG` selects the base filter (default `info`), `FP_LOG_FORMAT`
/// selects `text` or `json` output, and `FP_LOG_FILE` redirects output to a
/// file. Safe to call from any thread, any number of times; if an embedder
/// already installed a subscriber this is a no-op.
pub fn ensure_logging_initialized() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let base = std::env::var(constants::ENV_LOG).unwrap_or_else(|_| "info".to_string());
        let env_filter = EnvFilter::try_new(&base)
            .or_else(|_| EnvFilter::try_new("info"))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let filter = ScopedLevelFilter { base: env_filter };

        let format = std::env::var(constants::ENV_LOG_FORMAT)
            .map_or_else(|_| "text".to_string(), |s| s.to_lowercase());
        if format != "json" && format != "text" {
            eprintln!("warning: unrecognized FP_LOG_FORMAT '{format}', using 'text'");
        }

        if format == "json" {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_line_number(true)
                .with_writer(log_writer())
                .with_filter(filter);
            let _ = tracing_subscriber::registry().with(layer).try_init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(log_writer())
                .with_filter(filter);
            let _ = tracing_subscriber::registry().with(layer).try_init();
        }
    });
}

/// One-time process telemetry initialization. Calling this any number of
/// times has the same observable effect as calling it once.
pub fn initialize_telemetry() {
    if TELEMETRY_READY.swap(true, Ordering::SeqCst) {
        return;
    }
    ensure_logging_initialized();
    tracing::debug!("telemetry initialized");
}

/// Whether [`initialize_telemetry`] has run in this process.
#[must_use]
pub fn telemetry_initialized() -> bool {
    TELEMETRY_READY.load(Ordering::SeqCst)
}
