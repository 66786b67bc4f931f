//! The per-run execution context: executor backend plus adapter set.
//!
//! A context is built at the start of a run, handed to the engine for every
//! attempt, and released exactly once on every exit path. Release tears the
//! adapters down in reverse construction order, then shuts the executor
//! down; teardown failures are logged and never mask the run's outcome.

pub mod adapter;
pub mod executor;

use std::sync::Arc;

use crate::config::RunConfig;
use crate::error::Error;

pub use adapter::Adapter;
pub use executor::ExecutorHandle;

#[derive(Debug)]
pub struct ExecutionContext {
    executor: ExecutorHandle,
    adapters: Vec<Arc<dyn Adapter>>,
    released: bool,
}

impl ExecutionContext {
    /// Builds the context for one run from the merged configuration.
    ///
    /// # Errors
    ///
    /// Propagates executor acquisition and adapter construction failures;
    /// on adapter failure the already-acquired executor is released.
    pub(crate) fn build(cfg: &RunConfig) -> Result<Self, Error> {
        let mut executor = ExecutorHandle::acquire(&cfg.executor)?;
        match adapter::build_adapters(
            &cfg.with_adapter,
            &cfg.pipeline_adapter_cfg,
            &cfg.project_adapter_cfg,
            &cfg.adapter,
        ) {
            Ok(adapters) => {
                tracing::debug!(
                    executor = %executor.kind(),
                    adapters = adapters.len(),
                    "execution context built"
                );
                Ok(Self {
                    executor,
                    adapters,
                    released: false,
                })
            }
            Err(e) => {
                executor.release();
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn adapters(&self) -> &[Arc<dyn Adapter>] {
        &self.adapters
    }

    #[must_use]
    pub const fn executor(&self) -> &ExecutorHandle {
        &self.executor
    }

    /// Releases adapters (reverse order) and the executor. Idempotent; the
    /// drop guard invokes it on paths that unwind or cancel.
    pub(crate) fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for adapter in self.adapters.iter().rev() {
            if let Err(e) = adapter.shutdown() {
                tracing::warn!(adapter = adapter.name(), error = %e, "adapter teardown failed");
            }
        }
        self.executor.release();
        tracing::debug!("execution context released");
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.release();
    }
}
