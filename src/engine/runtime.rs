//! Batch rendering runtime.
//!
//! The pipeline is synchronous. This module runs many cases in parallel on
//! a small, bounded pool of threads sharing one [`ReplyEngine`]. Submission
//! never blocks: a full queue is reported as `QueueFull` so the caller can
//! back off.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::config::EngineConfig;
use crate::engine::{RenderRequest, RenderedReply, ReplyEngine};
use crate::error::{EngineError, EngineResult, ExecutionError};

/// Runtime configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued jobs.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
        }
    }
}

impl From<&EngineConfig> for RuntimeConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            workers: config.workers,
            queue_capacity: config.queue_capacity,
        }
    }
}

enum Job {
    Render {
        request: Box<RenderRequest>,
        reply: Sender<EngineResult<RenderedReply>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start(workers: usize, queue_capacity: usize, engine: &Arc<ReplyEngine>) -> Self {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let engine = Arc::clone(engine);
            let handle = thread::Builder::new()
                .name(format!("replymatrix-render-{idx}"))
                .spawn(move || loop {
                    match rx.recv() {
                        Ok(Job::Render { request, reply }) => {
                            let result = engine.render_request(*request);
                            let _ = reply.send(result);
                        }
                        Err(_) => break,

                        #[cfg(test)]
                        Ok(Job::Sleep { duration, reply }) => {
                            thread::sleep(duration);
                            let _ = reply.send(());
                        }
                    }
                })
                .expect("failed to spawn replymatrix worker");
            handles.push(handle);
        }

        Self {
            tx,
            workers: handles,
            queue_capacity,
        }
    }

    fn try_submit(&self, job: Job) -> Result<(), EngineError> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ExecutionError::QueueFull {
                capacity: self.queue_capacity,
            }
            .into()),
            Err(TrySendError::Disconnected(_)) => Err(ExecutionError::Disconnected.into()),
        }
    }

    fn shutdown(self) {
        // Closing the channel lets workers drain queued jobs, then exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

/// Handle returned by [`BatchRuntime::submit`].
#[derive(Debug)]
pub struct RenderHandle {
    rx: Receiver<EngineResult<RenderedReply>>,
}

impl RenderHandle {
    /// Waits for the reply.
    ///
    /// # Errors
    ///
    /// The pipeline's own error, or `Disconnected` if the worker died.
    pub fn join(self) -> EngineResult<RenderedReply> {
        self.rx.recv().map_err(|_| ExecutionError::Disconnected)?
    }

    /// Waits for the reply for at most `timeout`.
    ///
    /// # Errors
    ///
    /// As [`RenderHandle::join`], plus `Timeout`.
    pub fn join_timeout(self, timeout: Duration) -> EngineResult<RenderedReply> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => ExecutionError::Disconnected,
        })?
    }
}

/// A bounded worker pool over a shared engine.
pub struct BatchRuntime {
    engine: Arc<ReplyEngine>,
    pool: WorkerPool,
}

impl BatchRuntime {
    /// Starts the workers.
    #[must_use]
    pub fn new(engine: Arc<ReplyEngine>, config: RuntimeConfig) -> Self {
        let pool = WorkerPool::start(config.workers, config.queue_capacity, &engine);
        tracing::debug!(
            workers = pool.workers.len(),
            queue_capacity = pool.queue_capacity,
            "batch runtime started"
        );
        Self { engine, pool }
    }

    /// Starts a runtime sized by the engine's own configuration.
    #[must_use]
    pub fn for_engine(engine: Arc<ReplyEngine>) -> Self {
        let config = RuntimeConfig::from(engine.config());
        Self::new(engine, config)
    }

    /// Queues one case.
    ///
    /// # Errors
    ///
    /// `QueueFull` when the queue is saturated.
    pub fn submit(&self, request: RenderRequest) -> EngineResult<RenderHandle> {
        let (tx, rx) = bounded::<EngineResult<RenderedReply>>(1);
        self.pool.try_submit(Job::Render {
            request: Box::new(request),
            reply: tx,
        })?;
        Ok(RenderHandle { rx })
    }

    /// Renders every request and returns the results in input order.
    ///
    /// Requests are fed as the queue frees up, so the batch may be larger
    /// than the queue capacity.
    pub fn render_all(&self, requests: impl IntoIterator<Item = RenderRequest>) -> Vec<EngineResult<RenderedReply>> {
        let mut handles: Vec<Receiver<EngineResult<RenderedReply>>> = Vec::new();
        for request in requests {
            let (tx, rx) = bounded::<EngineResult<RenderedReply>>(1);
            let job = Job::Render {
                request: Box::new(request),
                reply: tx,
            };
            // Blocking send. If the pool is gone the job, and its reply
            // sender, is dropped and `join` reports `Disconnected`.
            let _ = self.pool.tx.send(job);
            handles.push(rx);
        }
        handles
            .into_iter()
            .map(|rx| RenderHandle { rx }.join())
            .collect()
    }

    /// Renders one case on the pool and waits for it.
    ///
    /// # Errors
    ///
    /// As [`BatchRuntime::submit`] and [`RenderHandle::join`].
    pub fn render(&self, request: RenderRequest) -> EngineResult<RenderedReply> {
        self.submit(request)?.join()
    }

    /// The engine shared by the workers.
    #[must_use]
    pub fn engine(&self) -> &ReplyEngine {
        &self.engine
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> Result<Receiver<()>, EngineError> {
        let (tx, rx) = bounded::<()>(1);
        self.pool.try_submit(Job::Sleep { duration, reply: tx })?;
        Ok(rx)
    }
}

impl Drop for BatchRuntime {
    fn drop(&mut self) {
        let pool = std::mem::replace(
            &mut self.pool,
            WorkerPool {
                tx: bounded::<Job>(1).0,
                workers: Vec::new(),
                queue_capacity: 1,
            },
        );
        pool.shutdown();
    }
}
