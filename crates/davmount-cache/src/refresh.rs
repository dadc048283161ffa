//! Single-flight background refresh.
//!
//! The coordinator keeps the set of paths currently being refreshed and a
//! bounded pool of named worker threads fed through a crossbeam channel.
//! `schedule` is a no-op for a path that is already in flight, and drops the
//! request when the queue is full: the next foreground access schedules it
//! again.
//!
//! # Leak guard
//!
//! An in-flight entry older than the configured timeout is considered leaked
//! (its worker is stuck in a repository call that never returns) and may be
//! scheduled again. Each entry carries a ticket so a late completion of the
//! stuck job does not clear the entry of its replacement.
//!
//! # Shutdown
//!
//! [`RefreshCoordinator::close`] sets the cancellation flag, closes the
//! channel and waits up to [`SHUTDOWN_TIMEOUT`] for the workers to exit.
//! Queued jobs observe the flag and exit without touching the cache. A worker
//! still blocked in a repository call after the deadline is detached; its job
//! checks the same flag before publishing anything.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::CacheError;

/// How long `close` waits for busy workers before detaching them.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

/// A job executed by a refresh worker.
type BoxedTask = Box<dyn FnOnce() + Send + 'static>;

/// Outcome of a schedule request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    Accepted,
    AlreadyInFlight,
    /// The worker queue was full.
    Dropped,
    /// The coordinator has been closed.
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    ticket: u64,
    started: Instant,
}

type InFlightSet = Arc<Mutex<HashMap<String, InFlight>>>;

/// Clears the in-flight entry when the job finishes, panics, or is dropped
/// unexecuted.
struct InFlightGuard {
    in_flight: InFlightSet,
    path: String,
    ticket: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(&self.path)
            .is_some_and(|entry| entry.ticket == self.ticket)
        {
            in_flight.remove(&self.path);
        }
    }
}

/// Bounded worker pool that refreshes each path at most once at a time.
pub struct RefreshCoordinator {
    in_flight: InFlightSet,
    sender: Mutex<Option<Sender<BoxedTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Disconnects once every worker thread has exited.
    exited: Receiver<()>,
    cancelled: Arc<AtomicBool>,
    timeout: Duration,
    next_ticket: AtomicU64,
}

impl RefreshCoordinator {
    /// Starts `num_workers` threads consuming a queue of `queue_depth` jobs.
    pub fn start(
        num_workers: usize,
        queue_depth: usize,
        timeout: Duration,
    ) -> Result<Self, CacheError> {
        let (sender, receiver) = bounded::<BoxedTask>(queue_depth.max(1));
        let (exit_tx, exited) = bounded::<()>(0);

        let mut workers = Vec::with_capacity(num_workers);
        for i in 0..num_workers.max(1) {
            let receiver = receiver.clone();
            let exit_tx = exit_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("dav-refresh-{i}"))
                .spawn(move || {
                    worker_loop(&receiver);
                    drop(exit_tx);
                })
                .map_err(CacheError::WorkerSpawn)?;
            workers.push(handle);
        }

        debug!(
            num_workers,
            queue_depth,
            timeout_secs = timeout.as_secs(),
            "RefreshCoordinator started"
        );

        Ok(Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            exited,
            cancelled: Arc::new(AtomicBool::new(false)),
            timeout,
            next_ticket: AtomicU64::new(0),
        })
    }

    /// Queues `work` for `path` unless a refresh of that path is in flight.
    ///
    /// Never blocks on the queue.
    pub fn schedule<F>(&self, path: &str, work: F) -> Scheduled
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_cancelled() {
            return Scheduled::Closed;
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        {
            let mut in_flight = self.in_flight.lock();
            if let Some(entry) = in_flight.get(path) {
                let age = entry.started.elapsed();
                if age < self.timeout {
                    trace!(path, "refresh already in flight");
                    return Scheduled::AlreadyInFlight;
                }
                warn!(
                    path,
                    age_secs = age.as_secs(),
                    "in-flight refresh exceeded timeout, rescheduling"
                );
            }
            in_flight.insert(
                path.to_string(),
                InFlight {
                    ticket,
                    started: Instant::now(),
                },
            );
        }

        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            path: path.to_string(),
            ticket,
        };
        let cancelled = Arc::clone(&self.cancelled);
        let task: BoxedTask = Box::new(move || {
            let guard = guard;
            if cancelled.load(Ordering::Acquire) {
                trace!(path = %guard.path, "refresh skipped after close");
                return;
            }
            work();
            drop(guard);
        });

        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Scheduled::Closed;
        };
        // A rejected task is dropped here, which clears its in-flight entry.
        match sender.try_send(task) {
            Ok(()) => Scheduled::Accepted,
            Err(TrySendError::Full(_)) => {
                debug!(path, "refresh queue full, dropping request");
                Scheduled::Dropped
            }
            Err(TrySendError::Disconnected(_)) => Scheduled::Closed,
        }
    }

    /// True while a refresh of `path` is queued or running.
    pub fn is_in_flight(&self, path: &str) -> bool {
        self.in_flight.lock().contains_key(path)
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Shared cancellation flag, checked by jobs before they mutate state.
    pub fn cancellation(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Cancels queued work and joins the workers. Idempotent.
    ///
    /// Waits at most [`SHUTDOWN_TIMEOUT`]; workers still running a job after
    /// that are detached.
    pub fn close(&self) {
        self.close_within(SHUTDOWN_TIMEOUT);
    }

    fn close_within(&self, timeout: Duration) {
        self.cancelled.store(true, Ordering::Release);
        drop(self.sender.lock().take());

        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }

        let deadline = Instant::now() + timeout;
        let all_exited = loop {
            match self.exited.recv_deadline(deadline) {
                Ok(()) => {}
                Err(RecvTimeoutError::Disconnected) => break true,
                Err(RecvTimeoutError::Timeout) => break false,
            }
        };

        let mut detached = 0;
        for (i, handle) in workers.into_iter().enumerate() {
            if !all_exited && !handle.is_finished() {
                detached += 1;
                continue;
            }
            if let Err(e) = handle.join() {
                warn!(worker = i, error = ?e, "refresh worker panicked during shutdown");
            }
        }
        if detached > 0 {
            warn!(
                detached,
                timeout_ms = timeout.as_millis(),
                "refresh workers still busy at shutdown, detaching"
            );
        }
        debug!("RefreshCoordinator shut down");
    }
}

impl Drop for RefreshCoordinator {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(receiver: &Receiver<BoxedTask>) {
    while let Ok(task) = receiver.recv() {
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            warn!(error = ?e, "refresh task panicked");
        }
    }
    trace!("refresh worker exiting");
}
