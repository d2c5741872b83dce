//! Append-only file sink
//!
//! The file is opened lazily on the first push so that building a
//! configuration never touches the filesystem beyond validation. The first
//! I/O failure marks the sink permanently dead: one diagnostic is emitted,
//! then every later push is a silent no-op. A process writing thousands of
//! records per second must not spam stderr for a full disk.

use crate::core::diag;
use crate::core::encoder::Envelope;
use crate::core::error::{LogError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct FileState {
    file: Option<File>,
    dead: bool,
    bytes_written: u64,
}

pub struct FileSink {
    path: PathBuf,
    state: Mutex<FileState>,
    /// Writes registered through `begin_write` but not yet ended.
    writers: AtomicUsize,
    close_on_idle: AtomicBool,
}

impl FileSink {
    /// Does not touch the filesystem; the file opens on the first push.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(FileState {
                file: None,
                dead: false,
                bytes_written: 0,
            }),
            writers: AtomicUsize::new(0),
            close_on_idle: AtomicBool::new(false),
        }
    }

    /// Check that the file's parent directory exists or can be created.
    /// Used at configuration build time so bad paths fail synchronously.
    pub fn validate_path(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LogError::config(
                        "file sink",
                        format!("cannot create directory '{}': {}", parent.display(), e),
                    )
                })?;
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn push(&self, envelope: &Arc<Envelope>) {
        let line = match envelope.encoded_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                diag::diag_failure("encoding record", &e);
                return;
            }
        };

        let mut state = self.state.lock();
        if state.dead {
            return;
        }
        if state.file.is_none() {
            match self.open() {
                Ok((file, existing)) => {
                    state.bytes_written = existing;
                    state.file = Some(file);
                }
                Err(e) => {
                    state.dead = true;
                    diag::diag_failure(
                        &format!("opening log file '{}'", self.path.display()),
                        &e,
                    );
                    return;
                }
            }
        }
        // Checked above.
        let file = match state.file.as_mut() {
            Some(f) => f,
            None => return,
        };
        let written = file
            .write_all(line)
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.flush());
        match written {
            Ok(()) => {
                state.bytes_written += line.len() as u64 + 1;
            }
            Err(e) => {
                state.dead = true;
                state.file = None;
                diag::diag_failure(
                    &format!("writing log file '{}'", self.path.display()),
                    &e,
                );
            }
        }
    }

    fn open(&self) -> std::io::Result<(File, u64)> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let existing = file.metadata()?.len();
        Ok((file, existing))
    }

    /// Bytes written through this sink plus whatever the file held when it
    /// was opened. Zero before the first push.
    pub fn size(&self) -> u64 {
        self.state.lock().bytes_written
    }

    pub fn is_dead(&self) -> bool {
        self.state.lock().dead
    }

    /// Close the file and refuse further writes. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.file = None;
        state.dead = true;
    }

    /// Register an in-flight write; pairs with [`end_write`](Self::end_write).
    /// The caller must prevent new registrations once a deferred close has
    /// been requested (the rotation lock does).
    pub(crate) fn begin_write(&self) {
        self.writers.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn end_write(&self) {
        if self.writers.fetch_sub(1, Ordering::SeqCst) == 1
            && self.close_on_idle.load(Ordering::SeqCst)
        {
            self.close();
        }
    }

    /// Close now if no write is in flight, otherwise when the last one
    /// ends.
    pub(crate) fn close_when_idle(&self) {
        self.close_on_idle.store(true, Ordering::SeqCst);
        if self.writers.load(Ordering::SeqCst) == 0 {
            self.close();
        }
    }
}

impl std::fmt::Debug for FileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSink")
            .field("path", &self.path)
            .finish()
    }
}
