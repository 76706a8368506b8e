use crate::error::{Error, Result};
use crossbeam::{channel::Receiver, select};
use slog::{debug, error, Logger};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};

// handler is shared read-only by every worker for the pool's lifetime
pub(crate) type Handler<T> = Arc<dyn Fn(T) + Send + Sync + 'static>;

/// Worker-side view of the pool: the job stream, the close signal and the
/// state every dispatch loop reads.
pub(crate) struct JobSource<T> {
    jobs: Receiver<T>,
    close: Receiver<()>,
    active: Arc<AtomicBool>,
    handler: Handler<T>,
    failed: Arc<AtomicUsize>,
}

impl<T> JobSource<T> {
    pub(crate) fn new(
        jobs: Receiver<T>,
        close: Receiver<()>,
        active: Arc<AtomicBool>,
        handler: Handler<T>,
        failed: Arc<AtomicUsize>,
    ) -> Self {
        JobSource {
            jobs,
            close,
            active,
            handler,
            failed,
        }
    }
}

pub(crate) struct Worker {
    id: usize,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn new<T: Send + 'static>(
        id: usize,
        source: JobSource<T>,
        logger: Logger,
    ) -> Result<Worker> {
        let thread = thread::Builder::new()
            .name(format!("jobpool-worker-{}", id))
            .spawn(move || dispatch(source, logger))
            .map_err(Error::from)?;

        Ok(Worker {
            id,
            thread: Some(thread),
        })
    }

    pub(crate) fn join(&mut self, logger: &Logger) {
        if let Some(thread) = self.thread.take() {
            // handler panics are caught in the loop, so the thread itself
            // never unwinds
            let _ = thread.join();
            debug!(logger, "worker joined"; "id" => self.id);
        }
    }
}

// dispatch loop: wait for work or shutdown, dequeue, execute, repeat
fn dispatch<T>(source: JobSource<T>, logger: Logger) {
    debug!(logger, "worker started");
    loop {
        if !source.active.load(Ordering::Acquire) {
            break;
        }
        select! {
            recv(source.jobs) -> msg => match msg {
                Ok(job) => {
                    // shutdown may have begun while this job sat in the
                    // queue; queued jobs are discarded, not executed
                    if !source.active.load(Ordering::Acquire) {
                        debug!(logger, "discarding queued job at shutdown");
                        break;
                    }
                    execute(&source, job, &logger);
                }
                // all producers gone
                Err(_) => break,
            },
            recv(source.close) -> _ => break,
        }
    }
    debug!(logger, "worker exiting");
}

fn execute<T>(source: &JobSource<T>, job: T, logger: &Logger) {
    let handler = &source.handler;
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(job))) {
        source.failed.fetch_add(1, Ordering::Relaxed);
        error!(logger, "job handler panicked"; "payload" => panic_message(payload.as_ref()));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "opaque panic payload"
    }
}
