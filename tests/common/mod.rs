//! Shared test utilities: a scriptable mock engine, on-disk project
//! scaffolding, and a warn-counting subscriber for notice assertions.
#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing_subscriber::layer::SubscriberExt;

use flowerpower::{
    Adapter, DAGEngine, EngineError, EnvSnapshot, ExecutionRequest, ExecutorHandle, ExecutorKind,
    FailureClass, ModuleCache, PipelineExecutor, RunResult,
};

/// Engine scripted to fail the first `fail_times` attempts, then return a
/// fixed result. Records attempt counts and the executor kind it saw.
pub struct MockEngine {
    fail_times: u32,
    failure_class: FailureClass,
    result: RunResult,
    calls: AtomicU32,
    seen_executors: Mutex<Vec<ExecutorKind>>,
}

impl MockEngine {
    pub fn succeeding(result: RunResult) -> Arc<Self> {
        Self::failing_then(0, FailureClass::NodeFailure, result)
    }

    pub fn failing_then(fail_times: u32, class: FailureClass, result: RunResult) -> Arc<Self> {
        Arc::new(Self {
            fail_times,
            failure_class: class,
            result,
            calls: AtomicU32::new(0),
            seen_executors: Mutex::new(Vec::new()),
        })
    }

    /// An engine that never stops failing.
    pub fn always_failing(class: FailureClass) -> Arc<Self> {
        Self::failing_then(u32::MAX, class, RunResult::new())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_executors(&self) -> Vec<ExecutorKind> {
        self.seen_executors.lock().unwrap().clone()
    }

    fn attempt(&self, executor: &ExecutorHandle) -> Result<RunResult, EngineError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_executors.lock().unwrap().push(executor.kind());
        if attempt < self.fail_times {
            Err(EngineError::new(self.failure_class, "scripted failure"))
        } else {
            Ok(self.result.clone())
        }
    }
}

#[async_trait]
impl DAGEngine for MockEngine {
    fn module_extension(&self) -> &str {
        "py"
    }

    fn execute(
        &self,
        _request: &ExecutionRequest,
        _adapters: &[Arc<dyn Adapter>],
        executor: &ExecutorHandle,
    ) -> Result<RunResult, EngineError> {
        self.attempt(executor)
    }

    async fn execute_async(
        &self,
        _request: &ExecutionRequest,
        _adapters: &[Arc<dyn Adapter>],
        executor: &ExecutorHandle,
    ) -> Result<RunResult, EngineError> {
        self.attempt(executor)
    }
}

/// Engine that reads input `x` and returns `{"y": 2 * x}`, for end-to-end
/// checks that inputs actually flow through.
pub struct DoublingEngine;

impl DoublingEngine {
    fn compute(request: &ExecutionRequest) -> Result<RunResult, EngineError> {
        let x = request
            .inputs
            .as_ref()
            .and_then(|inputs| inputs.get("x"))
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| EngineError::new(FailureClass::InvalidInput, "input 'x' missing"))?;
        let mut result = RunResult::new();
        result.insert("y".to_string(), serde_json::json!(2 * x));
        Ok(result)
    }
}

#[async_trait]
impl DAGEngine for DoublingEngine {
    fn module_extension(&self) -> &str {
        "py"
    }

    fn execute(
        &self,
        request: &ExecutionRequest,
        _adapters: &[Arc<dyn Adapter>],
        _executor: &ExecutorHandle,
    ) -> Result<RunResult, EngineError> {
        Self::compute(request)
    }

    async fn execute_async(
        &self,
        request: &ExecutionRequest,
        _adapters: &[Arc<dyn Adapter>],
        _executor: &ExecutorHandle,
    ) -> Result<RunResult, EngineError> {
        Self::compute(request)
    }
}

/// Adapter that appends labeled lifecycle events to a shared log.
#[derive(Debug)]
pub struct EventLogAdapter {
    label: &'static str,
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLogAdapter {
    pub fn new(label: &'static str, events: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self { label, events })
    }
}

impl Adapter for EventLogAdapter {
    fn name(&self) -> &str {
        self.label
    }

    fn on_attempt_start(&self, _pipeline: &str, attempt: u32) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:start:{attempt}", self.label));
    }

    fn shutdown(&self) -> Result<(), flowerpower::Error> {
        self.events.lock().unwrap().push(format!("{}:shutdown", self.label));
        Ok(())
    }
}

/// An on-disk project with the standard layout, rooted in a temp dir.
pub struct TestProject {
    pub dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::create_dir_all(dir.path().join("conf/pipelines")).unwrap();
        std::fs::create_dir_all(dir.path().join("pipelines")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_project_config(&self, yaml: &str) {
        std::fs::write(self.root().join("conf/project.yml"), yaml).unwrap();
    }

    pub fn write_pipeline_config(&self, name: &str, yaml: &str) {
        std::fs::write(
            self.root().join(format!("conf/pipelines/{name}.yml")),
            yaml,
        )
        .unwrap();
    }

    pub fn write_module(&self, name: &str, body: &str) {
        std::fs::write(self.root().join(format!("pipelines/{name}.py")), body).unwrap();
    }

    /// An executor over this project with an empty pinned environment and a
    /// private module cache, so tests stay hermetic.
    pub fn executor(&self, engine: Arc<dyn DAGEngine>) -> PipelineExecutor {
        self.executor_with_env(engine, EnvSnapshot::empty())
    }

    pub fn executor_with_env(
        &self,
        engine: Arc<dyn DAGEngine>,
        env: EnvSnapshot,
    ) -> PipelineExecutor {
        PipelineExecutor::new(engine, self.root())
            .with_env(env)
            .with_module_cache(Arc::new(ModuleCache::new()))
    }
}

struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

struct WarnCounter {
    needle: &'static str,
    count: Arc<AtomicUsize>,
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarnCounter {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if *event.metadata().level() == tracing::Level::WARN {
            let mut visitor = MessageVisitor {
                message: String::new(),
            };
            event.record(&mut visitor);
            if visitor.message.contains(self.needle) {
                self.count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

/// Runs `f` under a scoped subscriber and returns how many WARN events with
/// a message containing `needle` it emitted.
pub fn count_warns_containing(needle: &'static str, f: impl FnOnce()) -> usize {
    let count = Arc::new(AtomicUsize::new(0));
    let layer = WarnCounter {
        needle,
        count: Arc::clone(&count),
    };
    let subscriber = tracing_subscriber::registry().with(layer);
    tracing::subscriber::with_default(subscriber, f);
    count.load(Ordering::SeqCst)
}
