//! Record destinations
//!
//! [`Sink`] is a closed union rather than a trait object: the set of
//! destinations is part of the pipeline's contract, and a closed type lets
//! the combinators (`and`, `into_async`) normalize compositions. Nested
//! async wrappers collapse and null absorbs; fanout children are
//! de-asynced before the whole fanout is made async.
//!
//! Sinks are shared as `Arc<Sink>`; `push` takes `&Arc<Envelope>` so a
//! record fanned out to many destinations is never re-encoded.

pub mod console;
pub mod file;
pub mod rotating;

pub use console::{ConsoleSink, ConsoleTarget};
pub use file::FileSink;
pub use rotating::RotatingSink;

use crate::core::diag;
use crate::core::dispatch::DispatchQueue;
use crate::core::encoder::Envelope;
use crate::spool::forward::DiskSink;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub enum Sink {
    /// Accepts and discards everything.
    Null,
    Console(ConsoleSink),
    File(Arc<FileSink>),
    Rotating(Arc<RotatingSink>),
    Fanout(Arc<Sink>, Arc<Sink>),
    Async {
        inner: Arc<Sink>,
        queue: Arc<DispatchQueue>,
    },
    Spool(Arc<DiskSink>),
}

impl Sink {
    pub fn null() -> Arc<Self> {
        Arc::new(Sink::Null)
    }

    pub fn console(target: ConsoleSink) -> Arc<Self> {
        Arc::new(Sink::Console(target))
    }

    pub fn file(sink: FileSink) -> Arc<Self> {
        Arc::new(Sink::File(Arc::new(sink)))
    }

    pub fn rotating(sink: RotatingSink) -> Arc<Self> {
        Arc::new(Sink::Rotating(Arc::new(sink)))
    }

    pub fn spool(sink: DiskSink) -> Arc<Self> {
        Arc::new(Sink::Spool(Arc::new(sink)))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Sink::Null)
    }

    pub fn push(&self, envelope: &Arc<Envelope>) {
        match self {
            Sink::Null => {}
            Sink::Console(console) => console.push(envelope),
            Sink::File(file) => file.push(envelope),
            Sink::Rotating(rotating) => rotating.push(envelope),
            Sink::Fanout(a, b) => {
                // B still gets the record if A panics.
                if catch_unwind(AssertUnwindSafe(|| a.push(envelope))).is_err() {
                    diag::diag_error("sink panicked during fanout");
                }
                b.push(envelope);
            }
            Sink::Async { inner, queue } => {
                let inner = Arc::clone(inner);
                let envelope = Arc::clone(envelope);
                queue.submit(move || inner.push(&envelope));
            }
            Sink::Spool(disk) => disk.push(envelope),
        }
    }

    /// Combine two sinks; null absorbs so `x.and(null)` is `x`, not a
    /// fanout with a dead leg.
    pub fn and(self: &Arc<Self>, other: &Arc<Sink>) -> Arc<Sink> {
        if self.is_null() {
            return Arc::clone(other);
        }
        if other.is_null() {
            return Arc::clone(self);
        }
        Arc::new(Sink::Fanout(Arc::clone(self), Arc::clone(other)))
    }

    /// Wrap in the async adapter. Normalizes first: an already-async sink
    /// is unwrapped (one hop through the queue, not two), fanout children
    /// are de-asynced, and null is never wrapped.
    pub fn into_async(self: &Arc<Self>, queue: &Arc<DispatchQueue>) -> Arc<Sink> {
        if self.is_null() {
            return Arc::clone(self);
        }
        Arc::new(Sink::Async {
            inner: self.de_async(),
            queue: Arc::clone(queue),
        })
    }

    /// Strip async wrappers, recursively through fanouts.
    pub fn de_async(self: &Arc<Self>) -> Arc<Sink> {
        match self.as_ref() {
            Sink::Async { inner, .. } => inner.de_async(),
            Sink::Fanout(a, b) => {
                let da = a.de_async();
                let db = b.de_async();
                if Arc::ptr_eq(&da, a) && Arc::ptr_eq(&db, b) {
                    Arc::clone(self)
                } else {
                    Arc::new(Sink::Fanout(da, db))
                }
            }
            _ => Arc::clone(self),
        }
    }

    /// Release held resources. File handles close; spools drain toward
    /// their remote first.
    pub fn close(&self) {
        match self {
            Sink::Null | Sink::Console(_) => {}
            Sink::File(file) => file.close(),
            Sink::Rotating(rotating) => rotating.close(),
            Sink::Fanout(a, b) => {
                a.close();
                b.close();
            }
            Sink::Async { inner, .. } => inner.close(),
            Sink::Spool(disk) => disk.shutdown(),
        }
    }
}

/// Stable structural identity; two resolutions to the same composition
/// render identically.
impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sink::Null => write!(f, "null"),
            Sink::Console(console) => write!(f, "{}", console),
            Sink::File(file) => write!(f, "file({})", file.path().display()),
            Sink::Rotating(rotating) => write!(f, "rotating({})", rotating.base().display()),
            Sink::Fanout(a, b) => write!(f, "fanout({}, {})", a, b),
            Sink::Async { inner, .. } => write!(f, "async({})", inner),
            Sink::Spool(disk) => write!(f, "spool({})", disk.dir().display()),
        }
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::encoder::EncodePolicy;
    use crate::core::field::{FieldMap, FieldValue};
    use crate::core::level::Level;
    use tempfile::TempDir;

    fn envelope(msg: &str) -> Arc<Envelope> {
        let mut fields = FieldMap::new();
        fields.insert("msg", FieldValue::Str(msg.to_string()));
        Arc::new(Envelope::new(
            "test".to_string(),
            Level::Info,
            fields,
            EncodePolicy::Adaptive,
        ))
    }

    #[test]
    fn test_and_absorbs_null() {
        let dir = TempDir::new().unwrap();
        let file = Sink::file(FileSink::new(dir.path().join("a.log")));
        let null = Sink::null();

        assert!(Arc::ptr_eq(&file.and(&null), &file));
        assert!(Arc::ptr_eq(&null.and(&file), &file));
        assert!(null.and(&null).is_null());
    }

    #[test]
    fn test_into_async_collapses_nesting() {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(DispatchQueue::new(1));
        let file = Sink::file(FileSink::new(dir.path().join("a.log")));

        let once = file.into_async(&queue);
        let twice = once.into_async(&queue);
        assert_eq!(once.to_string(), twice.to_string());
        assert!(matches!(
            twice.as_ref(),
            Sink::Async { inner, .. } if matches!(inner.as_ref(), Sink::File(_))
        ));
        queue.shutdown();
    }

    #[test]
    fn test_into_async_never_wraps_null() {
        let queue = Arc::new(DispatchQueue::new(1));
        let wrapped = Sink::null().into_async(&queue);
        assert!(wrapped.is_null());
        queue.shutdown();
    }

    #[test]
    fn test_async_fanout_children_are_de_asynced() {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(DispatchQueue::new(1));
        let a = Sink::file(FileSink::new(dir.path().join("a.log"))).into_async(&queue);
        let b = Sink::file(FileSink::new(dir.path().join("b.log")));

        let combined = a.and(&b).into_async(&queue);
        let rendered = combined.to_string();
        assert_eq!(rendered.matches("async(").count(), 1);
        assert!(rendered.starts_with("async(fanout("));
        queue.shutdown();
    }

    #[test]
    fn test_fanout_reaches_both() {
        let dir = TempDir::new().unwrap();
        let pa = dir.path().join("a.log");
        let pb = dir.path().join("b.log");
        let a = Sink::file(FileSink::new(&pa));
        let b = Sink::file(FileSink::new(&pb));

        a.and(&b).push(&envelope("both"));
        assert!(std::fs::read_to_string(&pa).unwrap().contains("both"));
        assert!(std::fs::read_to_string(&pb).unwrap().contains("both"));
    }

    #[test]
    fn test_async_push_delivered_after_drain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        let queue = Arc::new(DispatchQueue::new(2));
        let sink = Sink::file(FileSink::new(&path)).into_async(&queue);

        for i in 0..100 {
            sink.push(&envelope(&format!("r{}", i)));
        }
        queue.shutdown();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 100);
    }

    #[test]
    fn test_display_identity_is_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        let one = Sink::file(FileSink::new(&path));
        let two = Sink::file(FileSink::new(&path));
        assert_eq!(one.to_string(), two.to_string());
    }
}
