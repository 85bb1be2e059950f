//! # Worker Pool Module
//!
//! A fixed set of `may` coroutines sharing one unbounded channel. The accept loop
//! pushes each connection's request into the channel; whichever worker is free
//! services it end to end (parse, dispatch, single write).
//!
//! ## Configuration
//!
//! - `workers`: number of worker coroutines (`MASTERCHEF_WORKERS`, default 8)
//! - `stack_size`: coroutine stack in bytes (`MASTERCHEF_STACK_SIZE`, default 0x40000)

use may::coroutine::JoinHandle;
use may::sync::mpsc;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Configuration for a worker pool
#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    pub num_workers: usize,
    pub stack_size: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 8,
            stack_size: 0x40000,
        }
    }
}

/// Counters for a worker pool
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    pub queue_depth: AtomicUsize,
    pub dispatched_count: AtomicU64,
    pub completed_count: AtomicU64,
    pub panicked_count: AtomicU64,
}

impl WorkerPoolMetrics {
    pub fn record_dispatch(&self) {
        self.dispatched_count.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.completed_count.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get_queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn get_dispatched_count(&self) -> u64 {
        self.dispatched_count.load(Ordering::Relaxed)
    }

    pub fn get_completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }
}

/// Pool of worker coroutines processing jobs of type `T`.
pub struct WorkerPool<T: Send + 'static> {
    name: String,
    sender: Option<mpsc::Sender<T>>,
    metrics: Arc<WorkerPoolMetrics>,
    handles: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn `config.num_workers` coroutines running `job_fn` for each received job.
    ///
    /// A panicking job is logged and counted; the worker keeps serving.
    pub fn start<F>(name: &str, config: WorkerPoolConfig, job_fn: F) -> io::Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel::<T>();
        let rx = Arc::new(rx);
        let job_fn = Arc::new(job_fn);
        let metrics = Arc::new(WorkerPoolMetrics::default());
        let workers = config.num_workers.max(1);

        info!(
            pool = %name,
            num_workers = workers,
            stack_size = config.stack_size,
            "Creating worker pool"
        );

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let rx = Arc::clone(&rx);
            let job_fn = Arc::clone(&job_fn);
            let metrics = Arc::clone(&metrics);
            let pool_name = name.to_string();

            // SAFETY: may::coroutine::Builder::spawn() is unsafe because the closure
            // must not rely on thread-local state across yields; jobs only use owned data.
            let spawned = unsafe {
                may::coroutine::Builder::new()
                    .name(format!("{name}-{worker_id}"))
                    .stack_size(config.stack_size)
                    .spawn(move || {
                        debug!(pool = %pool_name, worker_id, "Worker coroutine started");
                        while let Ok(job) = rx.recv() {
                            if let Err(panic) = std::panic::catch_unwind(
                                std::panic::AssertUnwindSafe(|| job_fn(job)),
                            ) {
                                metrics.panicked_count.fetch_add(1, Ordering::Relaxed);
                                error!(
                                    pool = %pool_name,
                                    worker_id,
                                    panic_message = ?panic,
                                    "Worker job panicked - CRITICAL"
                                );
                            }
                            metrics.record_completion();
                        }
                        debug!(pool = %pool_name, worker_id, "Worker coroutine exiting");
                    })
            };

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!(pool = %name, worker_id, error = %e, "Failed to spawn worker coroutine");
                    return Err(e);
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            sender: Some(tx),
            metrics,
            handles,
        })
    }

    /// Queue a job; hands it back when the pool is shut down.
    pub fn dispatch(&self, job: T) -> Result<(), T> {
        let Some(sender) = &self.sender else {
            return Err(job);
        };
        self.metrics.record_dispatch();
        sender.send(job).map_err(|e| {
            self.metrics.queue_depth.fetch_sub(1, Ordering::Relaxed);
            error!(pool = %self.name, "Worker pool channel disconnected");
            e.0
        })
    }

    /// Cloneable handle for queueing from another thread; `None` after shutdown.
    pub fn sender(&self) -> Option<PoolSender<T>> {
        self.sender.as_ref().map(|sender| PoolSender {
            sender: sender.clone(),
            metrics: Arc::clone(&self.metrics),
        })
    }

    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.metrics
    }

    /// Close the channel and wait for queued jobs to drain.
    ///
    /// Outstanding [`PoolSender`]s keep the channel open; drop them first.
    pub fn shutdown(mut self) {
        self.sender.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!(pool = %self.name, "Worker coroutine terminated abnormally");
            }
        }
        info!(pool = %self.name, "Worker pool stopped");
    }
}

/// Queue handle detached from the pool's lifetime.
pub struct PoolSender<T: Send + 'static> {
    sender: mpsc::Sender<T>,
    metrics: Arc<WorkerPoolMetrics>,
}

impl<T: Send + 'static> PoolSender<T> {
    pub fn dispatch(&self, job: T) -> Result<(), T> {
        self.metrics.record_dispatch();
        self.sender.send(job).map_err(|e| {
            self.metrics.queue_depth.fetch_sub(1, Ordering::Relaxed);
            e.0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.num_workers, 8);
        assert_eq!(config.stack_size, 0x40000);
    }

    #[test]
    fn test_all_jobs_complete_before_shutdown_returns() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let pool = WorkerPool::start(
            "test",
            WorkerPoolConfig {
                num_workers: 3,
                stack_size: 0x10000,
            },
            move |n: usize| {
                counter.fetch_add(n, Ordering::SeqCst);
            },
        )
        .unwrap();
        for _ in 0..20 {
            pool.dispatch(1).unwrap();
        }
        let metrics = Arc::clone(pool.metrics());
        pool.shutdown();
        assert_eq!(seen.load(Ordering::SeqCst), 20);
        assert_eq!(metrics.get_dispatched_count(), 20);
        assert_eq!(metrics.get_completed_count(), 20);
        assert_eq!(metrics.get_queue_depth(), 0);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let pool = WorkerPool::start(
            "panics",
            WorkerPoolConfig {
                num_workers: 1,
                stack_size: 0x10000,
            },
            move |n: usize| {
                if n == 0 {
                    panic!("boom");
                }
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
        pool.dispatch(0).unwrap();
        pool.dispatch(1).unwrap();
        let metrics = Arc::clone(pool.metrics());
        pool.shutdown();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.panicked_count.load(Ordering::SeqCst), 1);
    }
}
