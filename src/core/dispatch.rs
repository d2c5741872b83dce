//! Non-dropping dispatch queue
//!
//! A fixed pool of workers draining an unbounded channel. `submit` never
//! blocks and never drops: once shutdown has begun (or completed), jobs run
//! synchronously on the calling thread instead. Shutdown drains everything
//! already queued before returning, so a record accepted by `submit` is
//! always executed exactly once, by a worker or by the submitting side.

use crate::core::diag;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    sender: RwLock<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    draining: AtomicBool,
}

/// Worker pool over an unbounded channel; see module docs for the
/// submit/shutdown contract.
pub struct DispatchQueue {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DispatchQueue {
    /// Spawn a pool of `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let shared = Arc::new(Shared {
            sender: RwLock::new(Some(sender)),
            receiver: receiver.clone(),
            draining: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("logspool-dispatch-{}", i))
                .spawn(move || {
                    // Ends when the producer side is dropped and the
                    // channel is empty.
                    for job in rx.iter() {
                        run_isolated(job);
                    }
                });
            match handle {
                Ok(h) => workers.push(h),
                Err(e) => diag::diag_failure("spawning dispatch worker", &e),
            }
        }

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Queue a job; runs it synchronously if the pool is draining or gone.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let job: Job = Box::new(job);
        if self.shared.draining.load(Ordering::Acquire) {
            run_isolated(job);
            return;
        }
        let guard = self.shared.sender.read();
        match guard.as_ref() {
            Some(sender) => {
                if let Err(e) = sender.send(job) {
                    // Lost the race with shutdown; execute here instead.
                    run_isolated(e.into_inner());
                }
            }
            None => {
                drop(guard);
                run_isolated(job);
            }
        }
    }

    /// True once shutdown has started.
    pub fn is_draining(&self) -> bool {
        self.shared.draining.load(Ordering::Acquire)
    }

    /// Number of jobs queued but not yet picked up by a worker.
    pub fn backlog(&self) -> usize {
        self.shared.receiver.len()
    }

    /// Drain and stop the pool. Idempotent; returns once every job queued
    /// before (or racing with) the call has run.
    pub fn shutdown(&self) {
        if self.shared.draining.swap(true, Ordering::AcqRel) {
            return;
        }
        // Close the producer side so workers exit after the backlog.
        *self.shared.sender.write() = None;

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            // Workers only block on the channel, which is now closed, so
            // this terminates once the backlog is drained.
            while !handle.is_finished() {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.join().is_err() {
                diag::diag_error("dispatch worker panicked during shutdown");
            }
        }

        // Sweep anything that slipped in through the submit race: keep
        // passing until a pass observes nothing after a short grace sleep.
        loop {
            let mut saw_job = false;
            while let Ok(job) = self.shared.receiver.try_recv() {
                saw_job = true;
                run_isolated(job);
            }
            if !saw_job {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        diag::diag("dispatch queue drained and stopped");
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run one job with panic isolation; a panicking job must never take down
/// a worker or the submitting thread.
fn run_isolated(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        diag::diag_error("dispatched job panicked");
    }
}
