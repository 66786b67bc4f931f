//! Executor backend acquisition and release.
//!
//! The runtime owns the executor's lifetime; the engine only schedules onto
//! it. `synchronous` runs in-process, `threadpool` owns a real worker pool,
//! `processpool` carries sizing for engine-side process workers, and the
//! distributed kinds (`ray`, `dask`) resolve through a process-global
//! registry of backend factories. Distributed cluster handles are
//! reference-counted: the first acquirer connects, the last release shuts
//! the cluster down, exactly once per connect generation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, OnceLock, PoisonError};
use std::thread::JoinHandle;

use crate::config::{ExecutorConfig, ExecutorKind};
use crate::error::Error;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of OS worker threads the engine may schedule onto.
#[derive(Debug)]
pub struct WorkerPool {
    size: usize,
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn spawn(size: usize) -> Result<Self, Error> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let receiver = Arc::clone(&receiver);
            let handle = std::thread::Builder::new()
                .name(format!("fp-worker-{index}"))
                .spawn(move || loop {
                    let job = {
                        let guard = receiver.lock().unwrap_or_else(PoisonError::into_inner);
                        guard.recv()
                    };
                    match job {
                        Ok(job) => job(),
                        Err(_) => break,
                    }
                })
                .map_err(|e| {
                    Error::executor("threadpool", format!("failed to spawn worker: {e}"))
                })?;
            workers.push(handle);
        }
        Ok(Self {
            size,
            sender: Some(sender),
            workers,
        })
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Submits a job to the pool.
    ///
    /// # Errors
    ///
    /// Returns an `Executor` error when the pool has already shut down.
    pub fn submit(&self, job: Job) -> Result<(), Error> {
        self.sender
            .as_ref()
            .ok_or_else(|| Error::executor("threadpool", "pool is shut down"))?
            .send(job)
            .map_err(|_| Error::executor("threadpool", "workers are gone"))
    }

    fn shutdown(&mut self) {
        // Dropping the sender ends every worker's recv loop.
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Factory for an optional distributed backend (`ray` / `dask`).
///
/// The core crate registers none; companion crates (or tests) plug theirs
/// in through [`register_distributed_backend`].
pub trait DistributedBackend: Send + Sync {
    /// Connects to (or starts) the cluster.
    ///
    /// # Errors
    ///
    /// Returns an `Executor` error when the cluster cannot be reached.
    fn connect(&self, cfg: &ExecutorConfig) -> Result<Arc<dyn DistributedHandle>, Error>;
}

/// A live cluster connection owned by the registry.
pub trait DistributedHandle: Send + Sync + std::fmt::Debug {
    /// Tears the cluster connection down. Called exactly once, when the
    /// last lease on this connect generation is released.
    fn shutdown(&self);
}

fn backends() -> &'static Mutex<HashMap<ExecutorKind, Arc<dyn DistributedBackend>>> {
    static BACKENDS: OnceLock<Mutex<HashMap<ExecutorKind, Arc<dyn DistributedBackend>>>> =
        OnceLock::new();
    BACKENDS.get_or_init(|| Mutex::new(HashMap::new()))
}

struct ClusterState {
    handle: Arc<dyn DistributedHandle>,
    refs: usize,
}

fn clusters() -> &'static Mutex<HashMap<ExecutorKind, ClusterState>> {
    static CLUSTERS: OnceLock<Mutex<HashMap<ExecutorKind, ClusterState>>> = OnceLock::new();
    CLUSTERS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registers (or replaces) the backend factory for a distributed executor
/// kind.
///
/// # Errors
///
/// Returns a `Config` error when `kind` is not a distributed kind.
pub fn register_distributed_backend(
    kind: ExecutorKind,
    backend: Arc<dyn DistributedBackend>,
) -> Result<(), Error> {
    if !kind.is_distributed() {
        return Err(Error::invalid_config(format!(
            "'{kind}' is not a distributed executor kind"
        )));
    }
    backends()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(kind, backend);
    Ok(())
}

/// A reference-counted claim on a distributed cluster connection.
#[derive(Debug)]
pub struct DistributedLease {
    kind: ExecutorKind,
    handle: Arc<dyn DistributedHandle>,
    released: AtomicBool,
}

impl DistributedLease {
    fn acquire(kind: ExecutorKind, cfg: &ExecutorConfig) -> Result<Self, Error> {
        let backend = backends()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .ok_or_else(|| {
                Error::invalid_config(format!(
                    "{kind} executor requires optional dependency: \
                     no distributed backend is registered for '{kind}'"
                ))
            })?;

        let mut clusters = clusters().lock().unwrap_or_else(PoisonError::into_inner);
        let handle = match clusters.get_mut(&kind) {
            Some(state) => {
                state.refs += 1;
                Arc::clone(&state.handle)
            }
            None => {
                let handle = backend.connect(cfg)?;
                tracing::debug!(kind = %kind, num_cpus = cfg.num_cpus, "distributed cluster connected");
                clusters.insert(
                    kind,
                    ClusterState {
                        handle: Arc::clone(&handle),
                        refs: 1,
                    },
                );
                handle
            }
        };
        Ok(Self {
            kind,
            handle,
            released: AtomicBool::new(false),
        })
    }

    /// The live cluster handle, for the engine's use.
    #[must_use]
    pub fn handle(&self) -> &Arc<dyn DistributedHandle> {
        &self.handle
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut clusters = clusters().lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = clusters.get_mut(&self.kind) {
            state.refs = state.refs.saturating_sub(1);
            if state.refs == 0 {
                if let Some(state) = clusters.remove(&self.kind) {
                    drop(clusters);
                    tracing::debug!(kind = %self.kind, "shutting distributed cluster down");
                    state.handle.shutdown();
                }
            }
        }
    }
}

impl Drop for DistributedLease {
    fn drop(&mut self) {
        self.release();
    }
}

/// The live executor backend handed to the engine for one run.
#[derive(Debug)]
pub enum ExecutorHandle {
    Sequential,
    ThreadPool(WorkerPool),
    ProcessPool { max_workers: usize },
    Distributed(DistributedLease),
}

impl ExecutorHandle {
    /// Acquires the backend described by the merged executor config.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for an unregistered distributed kind, or an
    /// `Executor` error when the backend fails to start.
    pub(crate) fn acquire(cfg: &ExecutorConfig) -> Result<Self, Error> {
        match cfg.kind() {
            ExecutorKind::Synchronous => Ok(Self::Sequential),
            ExecutorKind::Threadpool => {
                let size = cfg.max_workers.unwrap_or_else(num_cpus::get).max(1);
                WorkerPool::spawn(size).map(Self::ThreadPool)
            }
            ExecutorKind::Processpool => Ok(Self::ProcessPool {
                max_workers: cfg.max_workers.unwrap_or_else(num_cpus::get).max(1),
            }),
            kind @ (ExecutorKind::Ray | ExecutorKind::Dask) => {
                DistributedLease::acquire(kind, cfg).map(Self::Distributed)
            }
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ExecutorKind {
        match self {
            Self::Sequential => ExecutorKind::Synchronous,
            Self::ThreadPool(_) => ExecutorKind::Threadpool,
            Self::ProcessPool { .. } => ExecutorKind::Processpool,
            Self::Distributed(lease) => lease.kind,
        }
    }

    /// Worker count for pooled backends, `None` for the rest.
    #[must_use]
    pub const fn max_workers(&self) -> Option<usize> {
        match self {
            Self::ThreadPool(pool) => Some(pool.size()),
            Self::ProcessPool { max_workers } => Some(*max_workers),
            Self::Sequential | Self::Distributed(_) => None,
        }
    }

    /// Shuts the backend down. Failures are logged, never raised.
    pub(crate) fn release(&mut self) {
        match self {
            Self::ThreadPool(pool) => pool.shutdown(),
            Self::Distributed(lease) => lease.release(),
            Self::Sequential | Self::ProcessPool { .. } => {}
        }
    }
}
