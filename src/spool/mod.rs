//! Disk-backed spool-and-forward delivery toward a remote endpoint.

pub mod forward;
pub mod frame;
pub mod storage;

pub use forward::{DiskSink, RemoteSink, SpoolForwarder};
pub use frame::BufferPool;
pub use storage::{SpoolReader, SpoolStorage};
