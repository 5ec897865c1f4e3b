// Bounded worker pool for background tasks.
//
// A fixed number of named threads pull boxed jobs from a bounded crossbeam
// channel. The scheduler submits with `try_submit`, which never blocks: when
// the queue is full the invocation is dropped with a warning, so a backlog of
// slow tasks can delay later task runs but never the clock.
//
// Each job runs under `catch_unwind`. A panicking job is logged and the worker
// carries on with the next one.
//
// Stopping is split in two so the caller is never held hostage by user code.
// `request_stop()` returns at once: new jobs are refused and queued ones are
// discarded, but a job already running is left to finish on its own.
// `shutdown(grace)` then joins the workers that exit within `grace` and
// detaches the rest; a detached worker exits as soon as its job returns.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::{debug, warn};

use crate::error::{ConfigError, panic_message};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// How often `shutdown` checks for workers that have exited.
const JOIN_POLL: Duration = Duration::from_millis(2);

pub struct WorkerPool {
    sender: Option<Sender<(String, Job)>>,
    workers: Vec<JoinHandle<()>>,
    cancelled: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(threads: usize, queue_capacity: usize) -> Result<Self, ConfigError> {
        if threads == 0 || queue_capacity == 0 {
            return Err(ConfigError::InvalidWorkerPool);
        }
        let (sender, receiver) = bounded::<(String, Job)>(queue_capacity);
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let receiver = receiver.clone();
            let cancelled = Arc::clone(&cancelled);
            let handle = std::thread::Builder::new()
                .name(format!("subsequence-worker-{i}"))
                .spawn(move || worker_loop(receiver, cancelled))
                .map_err(ConfigError::Spawn)?;
            workers.push(handle);
        }
        Ok(Self {
            sender: Some(sender),
            workers,
            cancelled,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Queue a job without blocking. Returns `false` if it was dropped
    /// because the queue is full or the pool is shut down.
    pub fn try_submit(&self, name: &str, job: Job) -> bool {
        let Some(sender) = &self.sender else {
            debug!(task = name, "worker pool is shut down; invocation dropped");
            return false;
        };
        match sender.try_send((name.to_string(), job)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(task = name, "worker queue full; invocation dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(task = name, "worker pool has no running workers; invocation dropped");
                false
            }
        }
    }

    /// Invocations dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.sender.is_some()
    }

    /// Refuse new jobs and discard queued ones without waiting for anything.
    /// Idempotent.
    pub fn request_stop(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// `request_stop`, then join every worker that exits within `grace`.
    /// Workers still running a job after that are detached. Returns how many
    /// were detached.
    pub fn shutdown(&mut self, grace: Duration) -> usize {
        self.request_stop();
        let deadline = Instant::now() + grace;
        loop {
            let (finished, busy): (Vec<_>, Vec<_>) =
                self.workers.drain(..).partition(|h| h.is_finished());
            for handle in finished {
                if handle.join().is_err() {
                    warn!("worker thread exited abnormally");
                }
            }
            self.workers = busy;
            if self.workers.is_empty() || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(JOIN_POLL);
        }
        let detached = self.workers.len();
        if detached > 0 {
            warn!(detached, "workers still busy at shutdown; detached");
            self.workers.clear();
        }
        detached
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown(Duration::ZERO);
    }
}

fn worker_loop(receiver: Receiver<(String, Job)>, cancelled: Arc<AtomicBool>) {
    while let Ok((name, job)) = receiver.recv() {
        if cancelled.load(Ordering::SeqCst) {
            continue;
        }
        if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
            warn!(task = %name, panic = %panic_message(payload.as_ref()), "background job panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const GRACE: Duration = Duration::from_secs(5);

    #[test]
    fn runs_submitted_jobs() {
        let mut pool = WorkerPool::new(2, 16).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let count = Arc::clone(&count);
            assert!(pool.try_submit(
                "count",
                Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            ));
        }
        // Wait for the queue to empty before shutting down, since shutdown
        // discards anything still queued.
        for _ in 0..200 {
            if count.load(Ordering::SeqCst) == 10 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        pool.shutdown(GRACE);
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let mut pool = WorkerPool::new(1, 1).unwrap();
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
        pool.try_submit(
            "blocker",
            Box::new(move || {
                let _ = started_tx.send(());
                let _ = release_rx.recv();
            }),
        );
        started_rx.recv().unwrap();
        assert!(pool.try_submit("queued", Box::new(|| {})));
        assert!(!pool.try_submit("overflow", Box::new(|| {})));
        assert_eq!(pool.dropped(), 1);
        drop(release_tx);
        pool.shutdown(GRACE);
    }

    #[test]
    fn panicking_job_does_not_kill_the_worker() {
        let mut pool = WorkerPool::new(1, 4).unwrap();
        let (tx, rx) = crossbeam_channel::bounded::<u32>(1);
        pool.try_submit("bad", Box::new(|| panic!("task blew up")));
        pool.try_submit(
            "good",
            Box::new(move || {
                let _ = tx.send(7);
            }),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(7));
        pool.shutdown(GRACE);
    }

    #[test]
    fn shutdown_is_idempotent_and_rejects_new_jobs() {
        let mut pool = WorkerPool::new(2, 4).unwrap();
        assert_eq!(pool.shutdown(GRACE), 0);
        assert_eq!(pool.shutdown(GRACE), 0);
        assert!(!pool.is_running());
        assert!(!pool.try_submit("late", Box::new(|| {})));
    }

    #[test]
    fn busy_workers_do_not_hold_up_shutdown() {
        let mut pool = WorkerPool::new(1, 4).unwrap();
        let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
        let ran_late = Arc::new(AtomicBool::new(false));
        pool.try_submit(
            "slow",
            Box::new(move || {
                let _ = started_tx.send(());
                std::thread::sleep(Duration::from_secs(2));
            }),
        );
        let flag = Arc::clone(&ran_late);
        pool.try_submit(
            "queued",
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );
        started_rx.recv().unwrap();

        let began = Instant::now();
        pool.request_stop();
        assert!(!pool.is_running());
        assert_eq!(pool.shutdown(Duration::from_millis(20)), 1);
        assert!(began.elapsed() < Duration::from_secs(1));
        // The queued job is discarded once the slow one returns.
        std::thread::sleep(Duration::from_millis(2200));
        assert!(!ran_late.load(Ordering::SeqCst));
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert!(matches!(
            WorkerPool::new(0, 4),
            Err(ConfigError::InvalidWorkerPool)
        ));
        assert!(WorkerPool::new(1, 0).is_err());
    }
}
