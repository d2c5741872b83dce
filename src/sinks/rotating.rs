//! Size-based file rotation
//!
//! Wraps a [`FileSink`] and swaps it for a successor once the active file
//! crosses the size threshold. The size check runs every 50th write, so
//! the threshold can be overshot by at most one batch. Rotated files keep
//! the base name with an `_N` suffix before the extension; files that are
//! already full at startup are skipped rather than appended to.

use crate::core::diag;
use crate::core::dispatch::DispatchQueue;
use crate::core::encoder::Envelope;
use crate::core::error::{LogError, Result};
use crate::sinks::file::FileSink;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SIZE_CHECK_INTERVAL: u32 = 50;

struct RotState {
    active: Arc<FileSink>,
    index: u32,
    writes_since_check: u32,
}

pub struct RotatingSink {
    base: PathBuf,
    max_bytes: u64,
    queue: Option<Arc<DispatchQueue>>,
    state: Mutex<RotState>,
}

impl RotatingSink {
    /// `queue`, when present, is used to close the previous file behind
    /// any writes still in flight for it.
    pub fn new(
        base: impl Into<PathBuf>,
        max_bytes: u64,
        queue: Option<Arc<DispatchQueue>>,
    ) -> Result<Self> {
        let base = base.into();
        if max_bytes == 0 {
            return Err(LogError::config(
                "rotating sink",
                "rotation size must be positive",
            ));
        }
        FileSink::validate_path(&base)?;
        let index = first_open_index(&base, max_bytes);
        let active = Arc::new(FileSink::new(suffixed_path(&base, index)));
        Ok(Self {
            base,
            max_bytes,
            queue,
            state: Mutex::new(RotState {
                active,
                index,
                writes_since_check: 0,
            }),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Path the next record will be appended to.
    pub fn active_path(&self) -> PathBuf {
        self.state.lock().active.path().to_path_buf()
    }

    pub fn push(&self, envelope: &Arc<Envelope>) {
        let sink = {
            let mut state = self.state.lock();
            state.writes_since_check += 1;
            if state.writes_since_check >= SIZE_CHECK_INTERVAL {
                state.writes_since_check = 0;
                if state.active.size() >= self.max_bytes {
                    self.rotate(&mut state);
                }
            }
            // Registered under the rotation lock: a rotation after this
            // point defers the old file's close until this write ends.
            state.active.begin_write();
            Arc::clone(&state.active)
        };
        // Write outside the rotation lock; the sink has its own.
        sink.push(envelope);
        sink.end_write();
    }

    fn rotate(&self, state: &mut RotState) {
        let next = first_open_index_from(&self.base, self.max_bytes, state.index + 1);
        let fresh = Arc::new(FileSink::new(suffixed_path(&self.base, next)));
        let old = std::mem::replace(&mut state.active, fresh);
        state.index = next;
        diag::diag(format!(
            "rotating '{}' -> '{}'",
            old.path().display(),
            suffixed_path(&self.base, next).display()
        ));
        // Close the old file once its in-flight writes have ended; on a
        // queue the close also waits behind jobs already submitted.
        match &self.queue {
            Some(queue) => queue.submit(move || old.close_when_idle()),
            None => old.close_when_idle(),
        }
    }

    pub fn close(&self) {
        self.state.lock().active.close();
    }
}

impl std::fmt::Debug for RotatingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingSink")
            .field("base", &self.base)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}

/// `app.log` with index 2 becomes `app_2.log`; index 0 is the base itself.
fn suffixed_path(base: &Path, index: u32) -> PathBuf {
    if index == 0 {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{}_{}.{}", stem, index, ext.to_string_lossy()),
        None => format!("{}_{}", stem, index),
    };
    match base.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

fn first_open_index(base: &Path, max_bytes: u64) -> u32 {
    first_open_index_from(base, max_bytes, 0)
}

/// Smallest index at or after `from` whose file is absent or still has
/// room. Existing full files are never reopened.
fn first_open_index_from(base: &Path, max_bytes: u64, from: u32) -> u32 {
    let mut index = from;
    loop {
        let path = suffixed_path(base, index);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.len() >= max_bytes => index += 1,
            _ => return index,
        }
    }
}
