//! Spool-and-forward delivery
//!
//! [`DiskSink`] is the accept path: it frames each record onto the spool
//! and nudges the forwarder. [`SpoolForwarder`] drains the spool toward a
//! caller-supplied [`RemoteSink`] over a single-worker queue, with exactly
//! one send in flight: the cursor only advances on acknowledgement, so a
//! crash or a failed send re-delivers (at-least-once, never lost).
//!
//! The forwarder must stay single-threaded. The spool reader hands out the
//! same frame until it is advanced, so two concurrent drain steps would
//! send the same record twice and then advance past an unsent one.

use crate::core::diag;
use crate::core::dispatch::DispatchQueue;
use crate::core::encoder::Envelope;
use crate::core::error::{LogError, Result};
use crate::spool::frame::BufferPool;
use crate::spool::storage::{SpoolReader, SpoolStorage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Caller-supplied delivery endpoint. Completion is signalled through the
/// callbacks, which may fire on any thread.
pub trait RemoteSink: Send + Sync + 'static {
    /// Establish the connection; call `on_ready` exactly once.
    fn open(&self, on_ready: Box<dyn FnOnce(Result<()>) + Send>);

    /// Deliver one encoded record; call `on_done` exactly once. An `Err`
    /// means the record was not delivered and will be retried.
    fn send(&self, record: Vec<u8>, on_done: Box<dyn FnOnce(Result<()>) + Send>);

    /// Tear down the connection. Called once, after the final drain.
    fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Opening,
    Ready,
}

/// Bounded retry for a read that came up empty right after a touch: the
/// producer may still be mid-append.
const EMPTY_READ_RETRIES: u32 = 5;
const EMPTY_READ_SLEEP: Duration = Duration::from_millis(20);

struct ForwardShared {
    remote: Arc<dyn RemoteSink>,
    queue: DispatchQueue,
    reader: Mutex<SpoolReader>,
    pool: Arc<BufferPool>,
    phase: Mutex<Phase>,
    /// Exactly-one-send-in-flight latch.
    busy: AtomicBool,
    /// Coalescing wakeup counter; compared against `handled` so a burst of
    /// touches costs one drain pass.
    touches: AtomicU64,
    handled: AtomicU64,
    shutting_down: AtomicBool,
}

pub struct SpoolForwarder {
    shared: Arc<ForwardShared>,
}

impl SpoolForwarder {
    pub fn new(storage: &Arc<SpoolStorage>, remote: Arc<dyn RemoteSink>) -> Result<Self> {
        let pool = Arc::new(BufferPool::default());
        let reader = storage.reader(Arc::clone(&pool))?;
        Ok(Self {
            shared: Arc::new(ForwardShared {
                remote,
                queue: DispatchQueue::new(1),
                reader: Mutex::new(reader),
                pool,
                phase: Mutex::new(Phase::Idle),
                busy: AtomicBool::new(false),
                touches: AtomicU64::new(0),
                handled: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
            }),
        })
    }

    /// Signal that the spool may have new content. Cheap and coalescing;
    /// called once per appended record.
    pub fn touch(&self) {
        self.shared.touches.fetch_add(1, Ordering::AcqRel);
        schedule(&self.shared);
    }

    pub fn has_unread(&self) -> bool {
        self.shared.reader.lock().has_unread()
    }

    /// Final touch, bounded wait for the spool to drain, then close the
    /// remote and release pooled buffers. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.touches.fetch_add(1, Ordering::AcqRel);
        schedule(&self.shared);

        // Give in-flight sends and the last drain passes a chance; do not
        // wait forever on a dead remote.
        for _ in 0..250 {
            if !self.has_unread() && !self.shared.busy.load(Ordering::Acquire) {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
            // Parked in Idle with nothing queued or in flight: the remote
            // is down and no progress will be made. The spool keeps the
            // backlog for the next run.
            if *self.shared.phase.lock() == Phase::Idle
                && !self.shared.busy.load(Ordering::Acquire)
                && self.shared.queue.backlog() == 0
            {
                break;
            }
        }
        self.shared.queue.shutdown();
        self.shared.remote.close();
        self.shared.pool.drain();
    }
}

impl Drop for SpoolForwarder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn schedule(shared: &Arc<ForwardShared>) {
    let cloned = Arc::clone(shared);
    shared.queue.submit(move || step(&cloned));
}

/// One drain step; runs on the single worker (or, after queue shutdown,
/// synchronously on the toucher).
fn step(shared: &Arc<ForwardShared>) {
    {
        let mut phase = shared.phase.lock();
        match *phase {
            Phase::Ready => {}
            Phase::Opening => return,
            Phase::Idle => {
                *phase = Phase::Opening;
                drop(phase);
                let cloned = Arc::clone(shared);
                shared.remote.open(Box::new(move |result| {
                    match result {
                        Ok(()) => {
                            *cloned.phase.lock() = Phase::Ready;
                            schedule(&cloned);
                        }
                        Err(e) => {
                            *cloned.phase.lock() = Phase::Idle;
                            diag::diag_failure("opening remote sink", &e);
                        }
                    }
                }));
                return;
            }
        }
    }

    if shared.busy.swap(true, Ordering::AcqRel) {
        // A send is in flight; its completion reschedules.
        return;
    }

    let snapshot = shared.touches.load(Ordering::Acquire);
    let payload = match read_with_retry(shared, snapshot) {
        Ok(Some(payload)) => payload,
        Ok(None) => {
            shared.handled.store(snapshot, Ordering::Release);
            if let Err(e) = shared.reader.lock().delete_if_all_read() {
                diag::diag_failure("compacting spool", &e);
            }
            shared.busy.store(false, Ordering::Release);
            if shared.touches.load(Ordering::Acquire) > snapshot {
                schedule(shared);
            }
            return;
        }
        Err(e) => {
            // Corruption is not repaired in place: the cursor stays just
            // before the bad frame, everything before it was delivered,
            // and an operator can inspect the file.
            diag::diag_failure("reading spool", &e);
            if matches!(e, LogError::SpoolCorrupt { .. }) {
                *shared.phase.lock() = Phase::Idle;
            }
            shared.busy.store(false, Ordering::Release);
            return;
        }
    };

    let cloned = Arc::clone(shared);
    shared.remote.send(
        payload,
        Box::new(move |result| {
            match result {
                Ok(()) => {
                    if let Err(e) = cloned.reader.lock().advance() {
                        diag::diag_failure("advancing spool cursor", &e);
                    }
                    cloned.busy.store(false, Ordering::Release);
                    let more = cloned.reader.lock().has_unread()
                        || cloned.touches.load(Ordering::Acquire) > snapshot;
                    if more {
                        schedule(&cloned);
                    } else if let Err(e) = cloned.reader.lock().delete_if_all_read() {
                        diag::diag_failure("compacting spool", &e);
                    }
                }
                Err(e) => {
                    diag::diag_failure("sending spooled record", &e);
                    // Not advanced: the frame will be re-read. Drop back
                    // to Idle so the next touch reopens the remote.
                    cloned.reader.lock().rewind();
                    *cloned.phase.lock() = Phase::Idle;
                    cloned.busy.store(false, Ordering::Release);
                }
            }
        }),
    );
}

fn read_with_retry(shared: &Arc<ForwardShared>, snapshot: u64) -> Result<Option<Vec<u8>>> {
    let expecting = snapshot > shared.handled.load(Ordering::Acquire);
    let attempts = if expecting { EMPTY_READ_RETRIES } else { 1 };
    for attempt in 0..attempts {
        if let Some(payload) = shared.reader.lock().read()? {
            return Ok(Some(payload));
        }
        if attempt + 1 < attempts {
            std::thread::sleep(EMPTY_READ_SLEEP);
        }
    }
    Ok(None)
}

/// Local accept path: frame-append then touch. Append failures never reach
/// the caller; after the first disk failure the sink degrades to a silent
/// drop so a broken disk cannot stall the process.
pub struct DiskSink {
    storage: Arc<SpoolStorage>,
    forwarder: SpoolForwarder,
    degraded: AtomicBool,
}

impl DiskSink {
    pub fn new(storage: Arc<SpoolStorage>, remote: Arc<dyn RemoteSink>) -> Result<Self> {
        let forwarder = SpoolForwarder::new(&storage, remote)?;
        Ok(Self {
            storage,
            forwarder,
            degraded: AtomicBool::new(false),
        })
    }

    pub fn dir(&self) -> &std::path::Path {
        self.storage.dir()
    }

    pub fn push(&self, envelope: &Arc<Envelope>) {
        if self.degraded.load(Ordering::Acquire) {
            return;
        }
        let bytes = match envelope.encoded_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                diag::diag_failure("encoding record", &e);
                return;
            }
        };
        match self.storage.append(bytes) {
            Ok(()) => self.forwarder.touch(),
            Err(e) => {
                self.degraded.store(true, Ordering::Release);
                diag::diag_failure(
                    &format!("appending to spool '{}'", self.storage.dir().display()),
                    &e,
                );
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Drain the spool toward the remote, then close it. Idempotent.
    pub fn shutdown(&self) {
        self.forwarder.shutdown();
    }
}

impl std::fmt::Debug for DiskSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskSink")
            .field("dir", &self.storage.dir())
            .finish()
    }
}
