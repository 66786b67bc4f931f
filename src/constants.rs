//! Centralized string constants for the flowerpower runtime
//!
//! This module contains commonly used string literals to:
//! - Reduce string duplication
//! - Improve maintainability
//! - Ensure consistency across the codebase

// Environment overlay prefixes (double-underscore path into the config tree)
pub const ENV_PIPELINE_PREFIX: &str = "FP_PIPELINE__";
pub const ENV_PROJECT_PREFIX: &str = "FP_PROJECT__";

// Global configuration shims, consulted only when the specific key is unset
pub const ENV_LOG_LEVEL: &str = "FP_LOG_LEVEL";
pub const ENV_EXECUTOR: &str = "FP_EXECUTOR";
pub const ENV_EXECUTOR_MAX_WORKERS: &str = "FP_EXECUTOR_MAX_WORKERS";
pub const ENV_EXECUTOR_NUM_CPUS: &str = "FP_EXECUTOR_NUM_CPUS";
pub const ENV_MAX_RETRIES: &str = "FP_MAX_RETRIES";
pub const ENV_RETRY_DELAY: &str = "FP_RETRY_DELAY";
pub const ENV_JITTER_FACTOR: &str = "FP_JITTER_FACTOR";

// Subscriber controls, read once at logging initialization
pub const ENV_LOG: &str = "FP_LOG";
pub const ENV_LOG_FORMAT: &str = "FP_LOG_FORMAT";
pub const ENV_LOG_FILE: &str = "FP_LOG_FILE";

// Project layout
pub const CONF_DIR: &str = "conf";
pub const PROJECT_CONFIG_FILE: &str = "project.yml";
pub const PIPELINES_CONF_DIR: &str = "pipelines";
pub const PIPELINES_MODULE_DIR: &str = "pipelines";

// Adapter keys recognized by the built-in adapter set
pub const ADAPTER_OPENTELEMETRY: &str = "opentelemetry";
pub const ADAPTER_TRACKER: &str = "tracker";
pub const ADAPTER_PROGRESSBAR: &str = "progressbar";
pub const ADAPTER_MLFLOW: &str = "mlflow";
pub const ADAPTER_RAY: &str = "ray";

// Retry defaults
pub const DEFAULT_MAX_RETRIES: u32 = 0;
pub const DEFAULT_RETRY_DELAY_SECS: f64 = 1.0;
pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Longest error-cause excerpt carried by a structured retry log line.
pub const MAX_LOGGED_CAUSE_CHARS: usize = 200;
