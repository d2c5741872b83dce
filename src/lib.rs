//! # logspool
//!
//! A structured-logging pipeline: records are built with a fluent
//! builder, encoded once as JSON lines, routed by `(name, level)` to
//! composable sinks, and optionally spooled to disk for at-least-once
//! forwarding to a remote endpoint.
//!
//! ## Features
//!
//! - **Record builder**: message fragments, typed fields, lazy fields,
//!   and structured error capture, finalized on scope exit
//! - **Level escalation**: attaching an error promotes the record per a
//!   configurable policy
//! - **Adaptive encoding**: a fast hand-rolled JSON writer with a
//!   `serde_json` fallback, cached per record across sinks
//! - **Routing**: per-name levels, file routes, and sink overrides with
//!   a dedicated severe channel for `error`/`fatal` records
//! - **Non-dropping async dispatch**: an unbounded worker queue whose
//!   shutdown drains instead of discarding
//! - **Spool-and-forward**: length-prefixed frames on disk, a persisted
//!   read cursor, and at-least-once delivery to a caller-supplied remote
//!
//! ## Quick start
//!
//! ```no_run
//! use logspool::prelude::*;
//!
//! fn main() -> logspool::Result<()> {
//!     let config = Config::builder()
//!         .min_level(Level::Info)
//!         .default_file("logs/app.log")
//!         .severe_file("logs/severe.log")
//!         .async_mode(true)
//!         .build()?;
//!
//!     let logs = Logs::named("orders");
//!     logs.info()
//!         .msg("order accepted")
//!         .field("order_id", 42)
//!         .emit();
//!
//!     config.shutdown();
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod sinks;
pub mod spool;

pub use crate::core::{
    Config, ConfigBuilder, DefaultPolicy, DispatchQueue, EncodePolicy, Envelope, ErrorInfo,
    EscalationPolicy, FieldMap, FieldValue, Level, LogError, Logs, Record, Registry, Result,
};
pub use crate::sinks::{ConsoleSink, FileSink, RotatingSink, Sink};
pub use crate::spool::{DiskSink, RemoteSink, SpoolStorage};

/// Common imports for pipeline users.
pub mod prelude {
    pub use crate::core::{
        Config, DefaultPolicy, EncodePolicy, EscalationPolicy, FieldValue, Level, Logs, Record,
        Result,
    };
    pub use crate::sinks::{ConsoleSink, FileSink, RotatingSink, Sink};
    pub use crate::spool::{DiskSink, RemoteSink, SpoolStorage};
}
