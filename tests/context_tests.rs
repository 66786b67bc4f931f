//! Executor backends and adapter lifecycles through the public surface.

mod common;

use common::{MockEngine, TestProject};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use flowerpower::{
    register_distributed_backend, DistributedBackend, DistributedHandle, Error, ErrorKind,
    ExecutorConfig, ExecutorKind, RunOverrides, RunResult,
};

#[derive(Debug)]
struct FakeCluster {
    shutdowns: Arc<AtomicUsize>,
}

impl DistributedHandle for FakeCluster {
    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeRayBackend {
    connects: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

impl DistributedBackend for FakeRayBackend {
    fn connect(&self, _cfg: &ExecutorConfig) -> Result<Arc<dyn DistributedHandle>, Error> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeCluster {
            shutdowns: Arc::clone(&self.shutdowns),
        }))
    }
}

// This test owns the ray registry slot for the binary; the dask slot stays
// unregistered for the test below.
#[test]
fn ray_runs_connect_once_and_shut_down_after_the_run() {
    let connects = Arc::new(AtomicUsize::new(0));
    let shutdowns = Arc::new(AtomicUsize::new(0));
    register_distributed_backend(
        ExecutorKind::Ray,
        Arc::new(FakeRayBackend {
            connects: Arc::clone(&connects),
            shutdowns: Arc::clone(&shutdowns),
        }),
    )
    .unwrap();

    let project = TestProject::new();
    project.write_pipeline_config(
        "p1",
        "run:\n  executor:\n    type: ray\n    num_cpus: 4\n",
    );
    project.write_module("p1", "def v(): ...");
    let engine = MockEngine::succeeding(RunResult::new());
    let executor = project.executor(engine.clone());

    executor.run("p1", None, RunOverrides::default()).unwrap();
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert_eq!(
        shutdowns.load(Ordering::SeqCst),
        1,
        "the cluster shuts down exactly once when the run releases it"
    );
    assert_eq!(engine.seen_executors(), vec![ExecutorKind::Ray]);

    // A second run reconnects; the previous generation was shut down.
    executor.run("p1", None, RunOverrides::default()).unwrap();
    assert_eq!(connects.load(Ordering::SeqCst), 2);
    assert_eq!(shutdowns.load(Ordering::SeqCst), 2);
}

#[test]
fn unregistered_distributed_kind_fails_with_a_config_error() {
    let project = TestProject::new();
    project.write_pipeline_config("p1", "run:\n  executor: dask\n");
    project.write_module("p1", "def v(): ...");
    let engine = MockEngine::succeeding(RunResult::new());
    let executor = project.executor(engine.clone());

    let err = executor.run("p1", None, RunOverrides::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err
        .to_string()
        .starts_with("dask executor requires optional dependency"));
    assert_eq!(engine.calls(), 0);
}

#[test]
fn adapter_init_failure_aborts_the_run_without_retries() {
    let project = TestProject::new();
    // tracker enabled but no project_id anywhere.
    project.write_pipeline_config(
        "p1",
        "run:\n  with_adapter:\n    tracker: true\n  retry:\n    max_retries: 5\n",
    );
    project.write_module("p1", "def v(): ...");
    let engine = MockEngine::succeeding(RunResult::new());
    let executor = project.executor(engine.clone());

    let err = executor.run("p1", None, RunOverrides::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Adapter);
    assert_eq!(engine.calls(), 0, "adapter failures are never retried");
}

#[test]
fn builtin_adapters_initialize_from_merged_config() {
    let project = TestProject::new();
    project.write_project_config(
        "name: metrics\nadapter:\n  tracker:\n    project_id: shared\n",
    );
    project.write_pipeline_config(
        "p1",
        "run:\n  with_adapter:\n    tracker: true\n    progressbar: true\n",
    );
    project.write_module("p1", "def v(): ...");
    let engine = MockEngine::succeeding(RunResult::new());
    let executor = project.executor(engine.clone());

    // The project-level project_id satisfies the tracker's requirement.
    executor.run("p1", None, RunOverrides::default()).unwrap();
    assert_eq!(engine.calls(), 1);
}
