//! Length-prefixed spool framing
//!
//! On-disk frame layout:
//!
//! ```text
//! [u32 BE: payload length + 1][b'\n'][payload bytes][b'\n']
//! ```
//!
//! The length prefix is authoritative and counts the trailing newline; the
//! reserved byte after the prefix and the trailing newline keep the raw
//! file readable as JSON lines by external tools. A declared length below
//! one or a short read is corruption; the reader restores its position to
//! the frame start so the caller can decide what to do with the file.

use crate::core::error::{LogError, Result};
use parking_lot::Mutex;
use std::io::{Read, Seek, SeekFrom, Write};

pub const RESERVED_BYTE: u8 = b'\n';
pub const HEADER_LEN: u64 = 5;

/// Total on-disk size of a frame holding `payload_len` bytes.
pub fn frame_len(payload_len: usize) -> u64 {
    HEADER_LEN + payload_len as u64 + 1
}

/// Append one frame. The caller is responsible for flushing.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let declared = payload.len() as u32 + 1;
    writer.write_all(&declared.to_be_bytes())?;
    writer.write_all(&[RESERVED_BYTE])?;
    writer.write_all(payload)?;
    writer.write_all(&[RESERVED_BYTE])?;
    Ok(())
}

/// Read the frame at the current position into `buf` (cleared first).
///
/// Returns `Ok(false)` at clean end-of-file. On corruption the position is
/// restored to the frame start before the error is returned.
pub fn read_frame<R: Read + Seek>(reader: &mut R, buf: &mut Vec<u8>) -> Result<bool> {
    let start = reader.stream_position()?;

    let mut header = [0u8; HEADER_LEN as usize];
    match read_full(reader, &mut header) {
        Ok(0) => return Ok(false),
        Ok(n) if n < header.len() => {
            reader.seek(SeekFrom::Start(start))?;
            return Err(LogError::spool_corrupt(
                start,
                format!("short header: wanted {} bytes, got {}", header.len(), n),
            ));
        }
        Ok(_) => {}
        Err(e) => {
            reader.seek(SeekFrom::Start(start))?;
            return Err(e.into());
        }
    }

    let declared = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if declared < 1 {
        reader.seek(SeekFrom::Start(start))?;
        return Err(LogError::spool_corrupt(
            start,
            format!("declared length {} below minimum", declared),
        ));
    }
    // Declared length counts the trailing newline.
    let body_len = declared as usize;

    buf.clear();
    buf.resize(body_len, 0);
    match read_full(reader, buf) {
        Ok(n) if n == body_len => {}
        Ok(n) => {
            reader.seek(SeekFrom::Start(start))?;
            return Err(LogError::spool_corrupt(
                start,
                format!("short body: wanted {} bytes, got {}", body_len, n),
            ));
        }
        Err(e) => {
            reader.seek(SeekFrom::Start(start))?;
            return Err(e.into());
        }
    }
    // Strip the trailing newline; the payload is what remains.
    buf.pop();
    Ok(true)
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Fixed-size buffer pool for frame payloads. Buffers larger than the
/// pool's slot size are handed out ad hoc and dropped on release instead
/// of being retained.
pub struct BufferPool {
    slot_size: usize,
    max_pooled: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new(slot_size: usize, max_pooled: usize) -> Self {
        Self {
            slot_size,
            max_pooled,
            free: Mutex::new(Vec::new()),
        }
    }

    pub fn acquire(&self, wanted: usize) -> Vec<u8> {
        if wanted <= self.slot_size {
            if let Some(buf) = self.free.lock().pop() {
                return buf;
            }
            Vec::with_capacity(self.slot_size)
        } else {
            Vec::with_capacity(wanted)
        }
    }

    pub fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.slot_size {
            return;
        }
        buf.clear();
        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }

    /// Drop every retained buffer.
    pub fn drain(&self) {
        self.free.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn pooled(&self) -> usize {
        self.free.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        // Slot size comfortably above a typical encoded record.
        Self::new(8 * 1024, 16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_round_trip() {
        let payload = br#"{"msg":"hello"}"#;
        let mut file = Cursor::new(Vec::new());
        write_frame(&mut file, payload).unwrap();
        write_frame(&mut file, b"{}").unwrap();

        file.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = Vec::new();
        assert!(read_frame(&mut file, &mut buf).unwrap());
        assert_eq!(buf, payload);
        assert!(read_frame(&mut file, &mut buf).unwrap());
        assert_eq!(buf, b"{}");
        assert!(!read_frame(&mut file, &mut buf).unwrap());
    }

    #[test]
    fn test_frame_is_line_readable() {
        let mut file = Cursor::new(Vec::new());
        write_frame(&mut file, br#"{"a":1}"#).unwrap();
        let raw = file.into_inner();
        // Payload sits on its own line between the reserved byte and the
        // trailing newline.
        let text = String::from_utf8_lossy(&raw);
        assert!(text.contains("{\"a\":1}\n"));
    }

    #[test]
    fn test_truncated_body_restores_position() {
        let mut file = Cursor::new(Vec::new());
        write_frame(&mut file, br#"{"msg":"cut short"}"#).unwrap();
        let mut raw = file.into_inner();
        raw.truncate(raw.len() - 5);

        let mut file = Cursor::new(raw);
        let mut buf = Vec::new();
        let err = read_frame(&mut file, &mut buf).unwrap_err();
        assert!(matches!(err, LogError::SpoolCorrupt { offset: 0, .. }));
        assert_eq!(file.stream_position().unwrap(), 0);
    }

    #[test]
    fn test_zero_length_rejected() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&0u32.to_be_bytes());
        raw.push(RESERVED_BYTE);
        let mut file = Cursor::new(raw);
        let mut buf = Vec::new();
        let err = read_frame(&mut file, &mut buf).unwrap_err();
        assert!(matches!(err, LogError::SpoolCorrupt { .. }));
        assert_eq!(file.stream_position().unwrap(), 0);
    }

    #[test]
    fn test_buffer_pool_reuses_small_buffers() {
        let pool = BufferPool::new(64, 4);
        let buf = pool.acquire(16);
        assert!(buf.capacity() >= 16);
        pool.release(buf);
        assert_eq!(pool.pooled(), 1);

        let oversized = pool.acquire(1024);
        assert!(oversized.capacity() >= 1024);
        pool.release(oversized);
        // Ad-hoc buffers are not retained.
        assert_eq!(pool.pooled(), 1);
    }
}
