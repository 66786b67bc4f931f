//! Seam to the external dataflow engine.
//!
//! The engine is a black box to the runtime: given a pipeline module, a set
//! of inputs, and the requested output variables, it resolves the dependency
//! graph and computes those outputs. The runtime owns everything around that
//! call (configuration, executor lifetime, adapters, retry), never the DAG
//! traversal itself.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;
use thiserror::Error;

use crate::config::CachePolicy;
use crate::context::adapter::Adapter;
use crate::context::executor::ExecutorHandle;
use crate::modules::PipelineModule;

/// Output mapping of a run: variable name to computed value, in the order
/// the engine produced them.
pub type RunResult = IndexMap<String, serde_json::Value>;

/// Categories of engine failures a retry policy can match on.
///
/// `Any` is the base class: it matches every failure, and any name the
/// config loader does not recognize resolves to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureClass {
    /// Matches every engine failure.
    Any,
    /// A DAG node raised during computation.
    NodeFailure,
    /// Inputs or overrides were rejected by the engine.
    InvalidInput,
    /// A node or the whole run exceeded an engine-side deadline.
    Timeout,
    /// Workers, memory, or cluster capacity ran out.
    ResourceExhausted,
    /// Values could not cross an executor boundary.
    Serialization,
}

impl FailureClass {
    /// Canonical name, as written in `retry_exceptions` lists.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Any => "Exception",
            Self::NodeFailure => "NodeFailureError",
            Self::InvalidInput => "InvalidInputError",
            Self::Timeout => "TimeoutError",
            Self::ResourceExhausted => "ResourceExhaustedError",
            Self::Serialization => "SerializationError",
        }
    }

    /// Resolves a configured name to a class. Matching is case-insensitive
    /// and tolerates a missing `Error` suffix; unrecognized names resolve to
    /// [`FailureClass::Any`] rather than failing the load.
    #[must_use]
    pub fn resolve(name: &str) -> Self {
        let lowered = name.to_ascii_lowercase();
        let stem = lowered.strip_suffix("error").unwrap_or(&lowered);
        match stem {
            "" | "exception" | "any" => Self::Any,
            "nodefailure" | "node" => Self::NodeFailure,
            "invalidinput" | "valueerror" | "value" => Self::InvalidInput,
            "timeout" => Self::Timeout,
            "resourceexhausted" | "resource" => Self::ResourceExhausted,
            "serialization" | "pickle" => Self::Serialization,
            _ => {
                tracing::debug!(name, "unrecognized retry exception name, matching any failure");
                Self::Any
            }
        }
    }

    /// Whether a policy entry of this class matches a raised failure.
    #[must_use]
    pub fn matches(self, raised: Self) -> bool {
        self == Self::Any || self == raised
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FailureClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FailureClass {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::resolve(&name))
    }
}

/// A failure reported by the engine for one execution attempt.
#[derive(Debug, Error)]
#[error("{class}: {message}")]
pub struct EngineError {
    class: FailureClass,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl EngineError {
    #[must_use]
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(
        class: FailureClass,
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self {
            class,
            message: message.into(),
            source: Some(source),
        }
    }

    #[must_use]
    pub const fn class(&self) -> FailureClass {
        self.class
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Everything one execution attempt needs besides the live context.
///
/// Built once per run and reused across retry attempts; the module is shared
/// with the process-wide cache.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub module: Arc<PipelineModule>,
    pub inputs: Option<serde_json::Map<String, serde_json::Value>>,
    pub final_vars: Option<Vec<String>>,
    pub config: Option<serde_json::Map<String, serde_json::Value>>,
    pub cache: Option<CachePolicy>,
}

/// The dataflow engine contract.
///
/// Implementations resolve the module's dependency graph and compute the
/// requested outputs, scheduling node execution onto the provided executor
/// and notifying the provided adapters. Both entry points must behave
/// identically apart from the suspension model.
#[async_trait]
pub trait DAGEngine: Send + Sync {
    /// File extension of pipeline modules this engine understands, without
    /// the leading dot.
    fn module_extension(&self) -> &str;

    /// Executes one attempt synchronously.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] describing the failed attempt.
    fn execute(
        &self,
        request: &ExecutionRequest,
        adapters: &[Arc<dyn Adapter>],
        executor: &ExecutorHandle,
    ) -> Result<RunResult, EngineError>;

    /// Executes one attempt, suspending at engine-defined await points.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] describing the failed attempt.
    async fn execute_async(
        &self,
        request: &ExecutionRequest,
        adapters: &[Arc<dyn Adapter>],
        executor: &ExecutorHandle,
    ) -> Result<RunResult, EngineError>;
}
