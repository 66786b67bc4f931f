//! Error handling for the flowerpower runtime
//!
//! All runtime errors funnel into a single [`Error`] enum. The design follows
//! these principles:
//!
//! 1. **Typed taxonomy**: every failure maps to one [`ErrorKind`] category
//! 2. **Source attribution**: configuration errors name the layer they came from
//! 3. **Machine-readable surface**: every error serializes to a [`JsonError`]
//! 4. **Helper constructors**: call sites build errors through named helpers,
//!    never by spelling variants out inline

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error as ThisError;

use crate::engine::EngineError;

/// The configuration precedence layer an error was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigLayer {
    /// Hard-coded defaults.
    Defaults,
    /// A `FP_*` global shim variable.
    EnvShim,
    /// The YAML config file (including interpolation of its scalars).
    File,
    /// A `FP_PIPELINE__*` / `FP_PROJECT__*` overlay variable.
    EnvOverlay,
    /// The call-site `RunConfig` argument.
    RunConfig,
    /// Call-site overrides.
    CallSite,
}

impl ConfigLayer {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Defaults => "defaults",
            Self::EnvShim => "environment shim",
            Self::File => "config file",
            Self::EnvOverlay => "environment overlay",
            Self::RunConfig => "run config",
            Self::CallSite => "call site",
        }
    }
}

impl std::fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or missing configuration, interpolation failure, coercion failure.
    #[error("{message}")]
    Config {
        message: Cow<'static, str>,
        /// The precedence layer the bad value came from, when attributable.
        layer: Option<ConfigLayer>,
    },

    /// The pipeline module could not be read from the project.
    #[error("failed to import pipeline '{pipeline}': {message}")]
    PipelineImport {
        pipeline: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// An adapter failed to initialize or tear down.
    #[error("adapter '{adapter}': {message}")]
    Adapter { adapter: String, message: String },

    /// An executor backend failed to start or accept work.
    #[error("executor '{kind}': {message}")]
    Executor { kind: String, message: String },

    /// The engine kept failing until the retry policy was exhausted.
    #[error("pipeline '{pipeline}' failed after {attempts} attempt(s)")]
    PipelineExecution {
        pipeline: String,
        attempts: u32,
        #[source]
        cause: EngineError,
    },

    /// The async run was cancelled by its caller.
    #[error("pipeline '{pipeline}' run was cancelled")]
    Cancelled { pipeline: String },
}

/// Machine-readable error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    Config,
    PipelineImport,
    Adapter,
    Executor,
    PipelineExecution,
    Cancelled,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Io => "Io",
            Self::Parse => "Parse",
            Self::Config => "Config",
            Self::PipelineImport => "PipelineImport",
            Self::Adapter => "Adapter",
            Self::Executor => "Executor",
            Self::PipelineExecution => "PipelineExecution",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON representation of an error for structured output.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonError {
    pub error_type: Cow<'static, str>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<ConfigLayer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Error {
    /// Invalid configuration detected at a call-site boundary, with no single
    /// attributable layer.
    #[must_use]
    pub fn invalid_config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Config {
            message: message.into(),
            layer: None,
        }
    }

    /// Invalid configuration attributed to a specific precedence layer.
    #[must_use]
    pub fn config_in(layer: ConfigLayer, message: impl Into<Cow<'static, str>>) -> Self {
        Self::Config {
            message: message.into(),
            layer: Some(layer),
        }
    }

    /// A `${VAR:?msg}` / `${VAR?msg}` interpolation failure. The message is
    /// surfaced verbatim, attributed to the config file layer.
    #[must_use]
    pub fn interpolation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::config_in(ConfigLayer::File, message)
    }

    #[must_use]
    pub fn pipeline_import(pipeline: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PipelineImport {
            pipeline: pipeline.into(),
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn pipeline_import_io(pipeline: impl Into<String>, source: std::io::Error) -> Self {
        Self::PipelineImport {
            pipeline: pipeline.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    #[must_use]
    pub fn adapter(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Adapter {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn executor(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Executor {
            kind: kind.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn execution(pipeline: impl Into<String>, attempts: u32, cause: EngineError) -> Self {
        Self::PipelineExecution {
            pipeline: pipeline.into(),
            attempts,
            cause,
        }
    }

    #[must_use]
    pub fn cancelled(pipeline: impl Into<String>) -> Self {
        Self::Cancelled {
            pipeline: pipeline.into(),
        }
    }

    /// The machine-readable category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::Yaml(_) | Self::Json(_) => ErrorKind::Parse,
            Self::Config { .. } => ErrorKind::Config,
            Self::PipelineImport { .. } => ErrorKind::PipelineImport,
            Self::Adapter { .. } => ErrorKind::Adapter,
            Self::Executor { .. } => ErrorKind::Executor,
            Self::PipelineExecution { .. } => ErrorKind::PipelineExecution,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Convert the error to its JSON representation for structured output.
    #[must_use]
    pub fn to_json(&self) -> JsonError {
        let (layer, details) = match self {
            Self::Config { layer, .. } => (*layer, None),
            Self::PipelineImport { pipeline, .. } | Self::Cancelled { pipeline } => (
                None,
                Some(serde_json::json!({ "pipeline": pipeline })),
            ),
            Self::Adapter { adapter, .. } => {
                (None, Some(serde_json::json!({ "adapter": adapter })))
            }
            Self::Executor { kind, .. } => (None, Some(serde_json::json!({ "executor": kind }))),
            Self::PipelineExecution {
                pipeline,
                attempts,
                cause,
            } => (
                None,
                Some(serde_json::json!({
                    "pipeline": pipeline,
                    "attempts": attempts,
                    "cause_class": cause.class().as_str(),
                    "cause": cause.to_string(),
                })),
            ),
            _ => (None, None),
        };
        JsonError {
            error_type: Cow::Borrowed(self.kind().as_str()),
            message: self.to_string(),
            layer,
            details,
        }
    }
}
