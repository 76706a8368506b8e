use crate::error::{Error, ErrorKind, Result};
use crate::worker::{Handler, JobSource, Worker};
use crossbeam::channel::{bounded, unbounded, Sender};
use slog::{info, o, Discard, Logger};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

/// A fixed-size pool of worker threads draining one shared FIFO queue.
///
/// Jobs are opaque values of `T`, handed unchanged to the single handler
/// fixed at construction. Submission never blocks and the queue is
/// unbounded. Dropping the pool (or calling [`shutdown`](WorkerPool::shutdown))
/// stops the workers and blocks until they have all exited; jobs still
/// queued at that point are discarded, not executed. Producers that need
/// every job to run must wait for their own completion signal before
/// dropping the pool.
///
/// A panicking handler does not kill its worker: the panic is caught,
/// logged, and counted in [`failed_jobs`](WorkerPool::failed_jobs), and the
/// worker goes back to waiting for work.
pub struct WorkerPool<T> {
    jobs: Sender<T>,
    close: Option<Sender<()>>,
    active: Arc<AtomicBool>,
    failed: Arc<AtomicUsize>,
    workers: Vec<Worker>,
    logger: Logger,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create a pool with one worker per logical CPU.
    pub fn new<F>(handler: F) -> Result<WorkerPool<T>>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::with_workers(handler, num_cpus::get())
    }

    pub fn with_workers<F>(handler: F, size: usize) -> Result<WorkerPool<T>>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::build(handler, size, Logger::root(Discard, o!()))
    }

    /// Same as [`with_workers`](WorkerPool::with_workers), logging through
    /// the given logger instead of discarding.
    pub fn with_logger<F>(handler: F, size: usize, logger: Logger) -> Result<WorkerPool<T>>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::build(handler, size, logger)
    }

    fn build<F>(handler: F, size: usize, logger: Logger) -> Result<WorkerPool<T>>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        if size == 0 {
            return Err(Error::from(ErrorKind::ZeroWorkers));
        }

        let handler: Handler<T> = Arc::new(handler);
        let (job_sender, job_receiver) = unbounded::<T>();
        // never sent on; dropping the sender wakes every idle worker
        let (close_sender, close_receiver) = bounded::<()>(0);
        let active = Arc::new(AtomicBool::new(true));
        let failed = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let source = JobSource::new(
                job_receiver.clone(),
                close_receiver.clone(),
                active.clone(),
                handler.clone(),
                failed.clone(),
            );
            workers.push(Worker::new(id, source, logger.new(o!("worker" => id)))?);
        }
        info!(logger, "worker pool started"; "workers" => size);

        Ok(WorkerPool {
            jobs: job_sender,
            close: Some(close_sender),
            active,
            failed,
            workers,
            logger,
        })
    }
}

impl<T> WorkerPool<T> {
    /// Append a job to the queue and wake one idle worker.
    ///
    /// Fire-and-forget: there is no acknowledgment of that job's completion
    /// or failure. Fails with [`ErrorKind::Closed`] once shutdown has begun.
    pub fn submit(&self, job: T) -> Result<()> {
        if !self.active.load(Ordering::Acquire) {
            return Err(Error::from(ErrorKind::Closed));
        }
        self.jobs
            .send(job)
            .map_err(|_| Error::from(ErrorKind::Closed))
    }

    /// Worker count, fixed at construction.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Number of jobs whose handler invocation panicked.
    pub fn failed_jobs(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    /// Stop the pool and block until every worker thread has exited.
    ///
    /// A worker mid-job finishes that job first; jobs still queued are
    /// discarded. Idempotent, and also run on drop.
    pub fn shutdown(&mut self) {
        if self.close.is_none() {
            return;
        }
        self.active.store(false, Ordering::Release);
        self.close.take();
        for worker in &mut self.workers {
            worker.join(&self.logger);
        }
        info!(self.logger, "worker pool stopped"; "failed_jobs" => self.failed_jobs());
    }
}

// stop workers when the pool goes out of scope, on every exit path
impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
