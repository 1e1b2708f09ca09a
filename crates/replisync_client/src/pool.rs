//! Bounded worker pool and cooperative cancellation.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Errors from submitting work to a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The bounded queue is full. The submission was rejected, not queued.
    #[error("worker pool queue is full")]
    Saturated,
    /// The pool has been shut down.
    #[error("worker pool has been shut down")]
    Terminated,
}

/// A fixed-size thread pool with a bounded submission queue.
///
/// Submissions beyond the queue capacity are rejected with
/// [`PoolError::Saturated`]; nothing is ever silently dropped. The pool is
/// shared by all sessions of one context.
pub struct WorkerPool {
    sender: Mutex<Option<SyncSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Creates a pool with `workers` threads and room for `queue_depth`
    /// queued jobs.
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        let (sender, receiver) = mpsc::sync_channel::<Job>(queue_depth);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|i| {
                let receiver = Arc::clone(&receiver);
                thread::Builder::new()
                    .name(format!("replisync-worker-{i}"))
                    .spawn(move || loop {
                        let job = receiver.lock().recv();
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// Submits a job, failing fast if the queue is full or the pool is
    /// shut down.
    pub fn try_execute(
        &self,
        job: impl FnOnce() + Send + 'static,
    ) -> Result<(), PoolError> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(PoolError::Terminated)?;
        sender.try_send(Box::new(job)).map_err(|e| match e {
            TrySendError::Full(_) => PoolError::Saturated,
            TrySendError::Disconnected(_) => PoolError::Terminated,
        })
    }

    /// Shuts the pool down: queued jobs still run, then workers exit and
    /// are joined. Idempotent.
    ///
    /// Must not be called from a worker thread (a job would join itself).
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A cancellation token with an interruptible sleep.
///
/// Clones share one flag: cancelling any clone wakes every sleeper and
/// makes the token permanently cancelled. Cancellation is idempotent.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token, waking any thread sleeping in
    /// [`CancelToken::wait_timeout`].
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock();
        self.inner.condvar.notify_all();
    }

    /// Returns true once the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Sleeps for up to `duration` or until cancelled, whichever comes
    /// first. Returns true if the token is cancelled.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.inner.lock.lock();
        while !self.inner.cancelled.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.inner.condvar.wait_for(&mut guard, deadline - now);
        }
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}
