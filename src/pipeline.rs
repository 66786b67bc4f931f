//! The public run facade.
//!
//! [`PipelineExecutor`] owns the project layout, the engine handle, and the
//! module cache, and exposes the `run` / `run_async` entry points. Each run
//! resolves its effective configuration (file, env overlays, call-site
//! config, overrides, shims), delegates to the runner, and dispatches the
//! success/failure callbacks after the context has been released.

use regex::Regex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::config::loader::{
    fold_file_config, load_pipeline_config, load_project_config, resolve_run_config,
};
use crate::config::{EnvSnapshot, RunConfig, RunOverrides};
use crate::constants;
use crate::engine::{DAGEngine, RunResult};
use crate::error::Error;
use crate::fs::{FileSystem, OsFileSystem};
use crate::modules::ModuleCache;
use crate::retry::RunReport;
use crate::runner;

fn pipeline_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("the identifier pattern is valid")
    })
}

fn validate_pipeline_name(name: &str) -> Result<(), Error> {
    if pipeline_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(Error::invalid_config(format!(
            "'{name}' is not a valid pipeline identifier"
        )))
    }
}

/// Executes named pipelines from a project directory.
///
/// The project layout is `conf/project.yml`, `conf/pipelines/<name>.yml`,
/// and module files under `pipelines/`. The environment is snapshotted once
/// per run; embedders may pin a snapshot with [`Self::with_env`] for
/// hermetic behavior.
pub struct PipelineExecutor<F: FileSystem = OsFileSystem> {
    engine: Arc<dyn DAGEngine>,
    fs: F,
    root: PathBuf,
    module_cache: Arc<ModuleCache>,
    pinned_env: Option<EnvSnapshot>,
}

impl PipelineExecutor<OsFileSystem> {
    /// An executor over the OS filesystem and the process-wide module
    /// cache.
    pub fn new(engine: Arc<dyn DAGEngine>, project_root: impl Into<PathBuf>) -> Self {
        Self::with_fs(engine, OsFileSystem, project_root)
    }
}

impl<F: FileSystem> PipelineExecutor<F> {
    pub fn with_fs(engine: Arc<dyn DAGEngine>, fs: F, project_root: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            fs,
            root: project_root.into(),
            module_cache: ModuleCache::global(),
            pinned_env: None,
        }
    }

    /// Pins the environment snapshot used by every subsequent run.
    #[must_use]
    pub fn with_env(mut self, env: EnvSnapshot) -> Self {
        self.pinned_env = Some(env);
        self
    }

    /// Replaces the shared module cache with a private one.
    #[must_use]
    pub fn with_module_cache(mut self, cache: Arc<ModuleCache>) -> Self {
        self.module_cache = cache;
        self
    }

    fn project_config_path(&self) -> PathBuf {
        self.root
            .join(constants::CONF_DIR)
            .join(constants::PROJECT_CONFIG_FILE)
    }

    fn pipeline_config_path(&self, name: &str) -> PathBuf {
        self.root
            .join(constants::CONF_DIR)
            .join(constants::PIPELINES_CONF_DIR)
            .join(format!("{name}.yml"))
    }

    fn modules_dir(&self) -> PathBuf {
        self.root.join(constants::PIPELINES_MODULE_DIR)
    }

    fn snapshot(&self) -> EnvSnapshot {
        self.pinned_env
            .clone()
            .unwrap_or_else(EnvSnapshot::from_process)
    }

    /// Resolves the effective configuration for one run without executing
    /// it. Deprecation notices for legacy fields fire here, before any
    /// execution begins.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for an invalid name, a file that fails to
    /// parse or interpolate, or a merged configuration that fails
    /// validation.
    pub fn resolve_config(
        &self,
        name: &str,
        run_config: Option<&RunConfig>,
        overrides: RunOverrides,
    ) -> Result<RunConfig, Error> {
        validate_pipeline_name(name)?;
        let env = self.snapshot();
        let project = load_project_config(&self.fs, &self.project_config_path(), &env)?;
        let pipeline = load_pipeline_config(&self.fs, &self.pipeline_config_path(name), &env)?;
        let file_run = fold_file_config(pipeline, &project);
        let effective = resolve_run_config(file_run, run_config, overrides, &env)?;
        tracing::debug!(pipeline = name, "run configuration resolved");
        Ok(effective)
    }

    /// Runs a pipeline synchronously and returns its output mapping.
    ///
    /// # Errors
    ///
    /// Surfaces configuration, import, adapter, executor, and execution
    /// errors; execution failures are retried per the merged retry policy
    /// first.
    pub fn run(
        &self,
        name: &str,
        run_config: Option<&RunConfig>,
        overrides: RunOverrides,
    ) -> Result<RunResult, Error> {
        self.run_with_report(name, run_config, overrides)
            .map(|(result, _)| result)
    }

    /// As [`Self::run`], also returning the run's attempt/delay report.
    ///
    /// # Errors
    ///
    /// As [`Self::run`].
    pub fn run_with_report(
        &self,
        name: &str,
        run_config: Option<&RunConfig>,
        overrides: RunOverrides,
    ) -> Result<(RunResult, RunReport), Error> {
        let cfg = self.resolve_config(name, run_config, overrides)?;
        let outcome = runner::execute_run(
            &self.engine,
            &self.fs,
            &self.modules_dir(),
            &self.module_cache,
            name,
            &cfg,
        );
        dispatch_callbacks(&cfg, &outcome);
        outcome
    }

    /// Runs a pipeline on the async path.
    ///
    /// # Errors
    ///
    /// As [`Self::run`].
    pub async fn run_async(
        &self,
        name: &str,
        run_config: Option<&RunConfig>,
        overrides: RunOverrides,
    ) -> Result<RunResult, Error> {
        self.run_async_cancellable(name, run_config, overrides, &CancellationToken::new())
            .await
    }

    /// Runs a pipeline on the async path under a cancellation token.
    /// Cancelling interrupts the in-flight attempt or pending retry delay;
    /// the execution context is released before `Cancelled` is returned.
    ///
    /// # Errors
    ///
    /// As [`Self::run`], plus `Cancelled` when the token fires.
    pub async fn run_async_cancellable(
        &self,
        name: &str,
        run_config: Option<&RunConfig>,
        overrides: RunOverrides,
        cancel: &CancellationToken,
    ) -> Result<RunResult, Error> {
        let cfg = self.resolve_config(name, run_config, overrides)?;
        let outcome = runner::execute_run_async(
            &self.engine,
            &self.fs,
            &self.modules_dir(),
            &self.module_cache,
            name,
            &cfg,
            cancel,
        )
        .await;
        dispatch_callbacks(&cfg, &outcome);
        outcome.map(|(result, _)| result)
    }
}

/// Dispatches the configured callback for the outcome. Callback panics are
/// caught and logged; they never alter the run's result.
fn dispatch_callbacks(cfg: &RunConfig, outcome: &Result<(RunResult, RunReport), Error>) {
    match outcome {
        Ok((result, _)) => {
            if let Some(callback) = &cfg.on_success {
                if catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
                    tracing::warn!("on_success callback panicked");
                }
            }
        }
        Err(error) => {
            if let Some(callback) = &cfg.on_failure {
                if catch_unwind(AssertUnwindSafe(|| callback(error))).is_err() {
                    tracing::warn!("on_failure callback panicked");
                }
            }
        }
    }
}
