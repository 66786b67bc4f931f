//! flowerpower — a pipeline execution runtime.
//!
//! Given a named pipeline in a project directory, the runtime assembles a
//! merged run configuration from five precedence layers (call-site
//! overrides, call-site config, environment overlays, YAML files with
//! Docker-Compose-style interpolation, and global shims over hard
//! defaults), builds an execution context (executor backend plus adapters),
//! and drives a pluggable dataflow engine over the pipeline's DAG with
//! retry, cancellation, telemetry, and callback semantics — on both a
//! blocking and an async path.
//!
//! The engine itself is a black box behind [`DAGEngine`]: the runtime never
//! walks the DAG, it owns everything around the walk.
//!
//! ```no_run
//! use std::sync::Arc;
//! use flowerpower::{PipelineExecutor, RunConfig, RunOverrides};
//! # fn engine() -> Arc<dyn flowerpower::DAGEngine> { unimplemented!() }
//!
//! # fn main() -> Result<(), flowerpower::Error> {
//! let executor = PipelineExecutor::new(engine(), "/data/projects/metrics");
//! let config = RunConfig::builder()
//!     .with_input("date", serde_json::json!("2026-08-01"))
//!     .with_final_vars(["revenue"])
//!     .build()?;
//! let result = executor.run("daily_metrics", Some(&config), RunOverrides::default())?;
//! println!("revenue = {}", result["revenue"]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod context;
pub mod engine;
pub mod error;
pub mod fs;
pub mod modules;
pub mod pipeline;
pub mod retry;
pub mod telemetry;

mod runner;

pub use config::{
    AdapterConfigSet, CachePolicy, EnvSnapshot, ExecutorConfig, ExecutorKind, LogLevel, OnFailure,
    OnSuccess, PipelineConfig, ProjectConfig, RetryPolicy, RunConfig, RunConfigBuilder,
    RunOverrides, WithAdapterSet,
};
pub use context::executor::{
    register_distributed_backend, DistributedBackend, DistributedHandle, ExecutorHandle,
};
pub use context::Adapter;
pub use engine::{DAGEngine, EngineError, ExecutionRequest, FailureClass, RunResult};
pub use error::{ConfigLayer, Error, ErrorKind, JsonError};
pub use fs::{FileSystem, OsFileSystem};
pub use modules::{ModuleCache, PipelineModule};
pub use pipeline::PipelineExecutor;
pub use retry::RunReport;
pub use telemetry::{
    ensure_logging_initialized, initialize_telemetry, push_log_level, telemetry_initialized,
    LogLevelGuard,
};
