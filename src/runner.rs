//! Per-run orchestration.
//!
//! One run: ensure telemetry, scope the log level, resolve the module,
//! build the execution context, drive the retry loop around the engine, and
//! release the context exactly once before the outcome is surfaced.
//! Callbacks are the facade's business and fire after release.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::context::ExecutionContext;
use crate::engine::{DAGEngine, ExecutionRequest, RunResult};
use crate::error::Error;
use crate::fs::FileSystem;
use crate::modules::ModuleCache;
use crate::retry::{run_with_retry, run_with_retry_async, RetryError, RetrySchedule, RunReport};
use crate::telemetry;

fn build_request<F: FileSystem>(
    engine: &Arc<dyn DAGEngine>,
    fs: &F,
    modules_dir: &Path,
    cache: &ModuleCache,
    pipeline: &str,
    cfg: &RunConfig,
) -> Result<ExecutionRequest, Error> {
    let module = cache.load(
        fs,
        modules_dir,
        pipeline,
        engine.module_extension(),
        cfg.reload(),
    )?;
    tracing::debug!(pipeline, "module loaded");
    Ok(ExecutionRequest {
        module,
        inputs: cfg.inputs.clone(),
        final_vars: cfg.final_vars.clone(),
        config: cfg.config.clone(),
        cache: cfg.cache.clone(),
    })
}

fn notify_attempt_start(context: &ExecutionContext, pipeline: &str, attempt: u32) {
    for adapter in context.adapters() {
        adapter.on_attempt_start(pipeline, attempt);
    }
}

fn notify_attempt_end(context: &ExecutionContext, pipeline: &str, attempt: u32, succeeded: bool) {
    for adapter in context.adapters() {
        adapter.on_attempt_end(pipeline, attempt, succeeded);
    }
}

/// Executes one run on the blocking path.
///
/// # Errors
///
/// Returns import, context, execution, or configuration errors; the context
/// is released on every path before the error is surfaced.
pub(crate) fn execute_run<F: FileSystem>(
    engine: &Arc<dyn DAGEngine>,
    fs: &F,
    modules_dir: &Path,
    cache: &ModuleCache,
    pipeline: &str,
    cfg: &RunConfig,
) -> Result<(RunResult, RunReport), Error> {
    telemetry::initialize_telemetry();
    let _level_guard = cfg.log_level.map(telemetry::push_log_level);

    let request = build_request(engine, fs, modules_dir, cache, pipeline, cfg)?;
    let schedule = RetrySchedule::from_policy(&cfg.retry);
    let mut context = ExecutionContext::build(cfg)?;

    let (outcome, report) = run_with_retry(&schedule, pipeline, |attempt| {
        notify_attempt_start(&context, pipeline, attempt);
        let result = engine.execute(&request, context.adapters(), context.executor());
        notify_attempt_end(&context, pipeline, attempt, result.is_ok());
        result
    });
    context.release();

    match outcome {
        Ok(result) => {
            tracing::info!(pipeline, attempts = report.attempts, "pipeline run succeeded");
            Ok((result, report))
        }
        Err(RetryError::Exhausted { cause, attempts }) => {
            Err(Error::execution(pipeline, attempts, cause))
        }
        // The blocking path has no cancellation points; this arm is
        // unreachable but harmless.
        Err(RetryError::Cancelled) => Err(Error::cancelled(pipeline)),
    }
}

/// Executes one run on the async path. Cancelling the token interrupts the
/// in-flight attempt or pending delay; the context is still released before
/// `Cancelled` is surfaced.
///
/// # Errors
///
/// As [`execute_run`], plus `Cancelled`.
pub(crate) async fn execute_run_async<F: FileSystem>(
    engine: &Arc<dyn DAGEngine>,
    fs: &F,
    modules_dir: &Path,
    cache: &ModuleCache,
    pipeline: &str,
    cfg: &RunConfig,
    cancel: &CancellationToken,
) -> Result<(RunResult, RunReport), Error> {
    telemetry::initialize_telemetry();
    let _level_guard = cfg.log_level.map(telemetry::push_log_level);

    let request = build_request(engine, fs, modules_dir, cache, pipeline, cfg)?;
    let schedule = RetrySchedule::from_policy(&cfg.retry);
    let mut context = ExecutionContext::build(cfg)?;

    let context_ref = &context;
    let request_ref = &request;
    let (outcome, report) = run_with_retry_async(&schedule, pipeline, cancel, move |attempt| {
        let engine = Arc::clone(engine);
        Box::pin(async move {
            notify_attempt_start(context_ref, pipeline, attempt);
            let result = engine
                .execute_async(request_ref, context_ref.adapters(), context_ref.executor())
                .await;
            notify_attempt_end(context_ref, pipeline, attempt, result.is_ok());
            result
        })
    })
    .await;
    context.release();

    match outcome {
        Ok(result) => {
            tracing::info!(pipeline, attempts = report.attempts, "pipeline run succeeded");
            Ok((result, report))
        }
        Err(RetryError::Exhausted { cause, attempts }) => {
            Err(Error::execution(pipeline, attempts, cause))
        }
        Err(RetryError::Cancelled) => {
            tracing::info!(pipeline, "pipeline run cancelled");
            Err(Error::cancelled(pipeline))
        }
    }
}
