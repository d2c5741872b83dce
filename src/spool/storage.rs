//! On-disk spool storage and the cursor protocol
//!
//! One spool directory per endpoint, holding an append-only data file
//! (`records.spool`) and a cursor file (`records.cursor`, 8-byte BE offset
//! of the next unread frame). The cursor is persisted only on explicit
//! advance: a crash between a read and its advance re-delivers the frame,
//! which is the at-least-once guarantee.
//!
//! The appender side is multi-producer; the reader side is exclusive and
//! enforces the unadvanced-read protocol: `read` returns the frame at the
//! cursor without moving it, a second read while one is outstanding is an
//! error, and `advance` commits exactly the outstanding read.

use crate::core::diag;
use crate::core::error::{LogError, Result};
use crate::spool::frame::{self, BufferPool};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DATA_FILE: &str = "records.spool";
pub const CURSOR_FILE: &str = "records.cursor";

pub struct SpoolStorage {
    dir: PathBuf,
    data_path: PathBuf,
    cursor_path: PathBuf,
    appender: Mutex<Option<File>>,
}

impl SpoolStorage {
    /// Open (creating if needed) the spool directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            LogError::io_operation(
                "opening spool",
                format!("cannot create spool directory '{}'", dir.display()),
                e,
            )
        })?;
        let data_path = dir.join(DATA_FILE);
        let cursor_path = dir.join(CURSOR_FILE);
        Ok(Arc::new(Self {
            dir,
            data_path,
            cursor_path,
            appender: Mutex::new(None),
        }))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one framed payload and flush it to the data file.
    pub fn append(&self, payload: &[u8]) -> Result<()> {
        let mut guard = self.appender.lock();
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.data_path)
                .map_err(|e| {
                    LogError::io_operation(
                        "opening spool",
                        format!("cannot open '{}'", self.data_path.display()),
                        e,
                    )
                })?;
            *guard = Some(file);
        }
        let file = guard.as_mut().ok_or_else(|| {
            LogError::SinkClosed(format!("spool '{}'", self.dir.display()))
        })?;
        frame::write_frame(file, payload)?;
        file.flush()?;
        Ok(())
    }

    /// Bytes currently in the data file.
    pub fn data_len(&self) -> u64 {
        std::fs::metadata(&self.data_path).map(|m| m.len()).unwrap_or(0)
    }

    /// Next-unread offset persisted by the last advance, clamped to the
    /// current data length. A missing or malformed cursor file reads as 0.
    pub fn load_cursor(&self) -> u64 {
        let raw = match std::fs::read(&self.cursor_path) {
            Ok(raw) => raw,
            Err(_) => return 0,
        };
        if raw.len() != 8 {
            diag::diag_error(format!(
                "malformed cursor file '{}'; restarting from offset 0",
                self.cursor_path.display()
            ));
            return 0;
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&raw);
        u64::from_be_bytes(bytes).min(self.data_len())
    }

    fn store_cursor(&self, offset: u64) -> Result<()> {
        let mut file = File::create(&self.cursor_path).map_err(|e| {
            LogError::io_operation(
                "persisting cursor",
                format!("cannot write '{}'", self.cursor_path.display()),
                e,
            )
        })?;
        file.write_all(&offset.to_be_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Truncate the data file and reset the cursor, but only if the file
    /// still ends exactly at `read_to`. The length re-check runs under the
    /// appender lock: an append racing the truncate either lands before
    /// the check (the truncate is refused) or blocks until the file is
    /// empty again, so an accepted frame is never wiped.
    fn truncate_if_fully_read(&self, read_to: u64) -> Result<bool> {
        let mut guard = self.appender.lock();
        if self.data_len() != read_to {
            return Ok(false);
        }
        *guard = None;
        let file = OpenOptions::new().write(true).open(&self.data_path)?;
        file.set_len(0)?;
        self.store_cursor(0)?;
        Ok(true)
    }

    /// Exclusive reader over this spool. The caller owns single-reader
    /// discipline; a second live reader would violate the cursor protocol.
    pub fn reader(self: &Arc<Self>, pool: Arc<BufferPool>) -> Result<SpoolReader> {
        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&self.data_path)
            .map_err(|e| {
                LogError::io_operation(
                    "opening spool",
                    format!("cannot open '{}' for reading", self.data_path.display()),
                    e,
                )
            })?;
        let cursor = self.load_cursor();
        Ok(SpoolReader {
            storage: Arc::clone(self),
            file,
            pool,
            cursor,
            in_flight: None,
        })
    }
}

pub struct SpoolReader {
    storage: Arc<SpoolStorage>,
    file: File,
    pool: Arc<BufferPool>,
    cursor: u64,
    /// End offset of the outstanding read, if any.
    in_flight: Option<u64>,
}

impl SpoolReader {
    /// Read the frame at the cursor without advancing. Returns `Ok(None)`
    /// when no complete frame is available. While a read is outstanding a
    /// second read is refused; after `rewind` (or a process restart) the
    /// same frame is delivered again.
    pub fn read(&mut self) -> Result<Option<Vec<u8>>> {
        if self.in_flight.is_some() {
            return Err(LogError::ReadOutstanding);
        }
        self.file.seek(SeekFrom::Start(self.cursor))?;
        let mut buf = self.pool.acquire(0);
        match frame::read_frame(&mut self.file, &mut buf) {
            Ok(true) => {
                self.in_flight = Some(self.file.stream_position()?);
                Ok(Some(buf))
            }
            Ok(false) => {
                self.pool.release(buf);
                Ok(None)
            }
            Err(e) => {
                self.pool.release(buf);
                Err(e)
            }
        }
    }

    /// Commit the outstanding read: move the cursor past it and persist.
    pub fn advance(&mut self) -> Result<()> {
        let end = self.in_flight.take().ok_or(LogError::ReadOutstanding)?;
        self.cursor = end;
        self.storage.store_cursor(end)
    }

    /// Abandon the outstanding read; the next read returns the same frame.
    pub fn rewind(&mut self) {
        self.in_flight = None;
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// True when frames exist past the cursor (outstanding read included).
    pub fn has_unread(&self) -> bool {
        let committed = match self.in_flight {
            Some(end) => end,
            None => self.cursor,
        };
        committed < self.storage.data_len()
    }

    /// When everything has been read and advanced, truncate the data file
    /// and reset the cursor so the spool does not grow forever. Returns
    /// whether the truncate happened.
    pub fn delete_if_all_read(&mut self) -> Result<bool> {
        if self.in_flight.is_some() || self.cursor == 0 {
            return Ok(false);
        }
        if !self.storage.truncate_if_fully_read(self.cursor)? {
            return Ok(false);
        }
        self.cursor = 0;
        Ok(true)
    }

    /// Return a payload buffer to the pool once the caller is done with it.
    pub fn recycle(&self, buf: Vec<u8>) {
        self.pool.release(buf);
    }
}
