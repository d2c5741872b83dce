//! Engine core: data model, encoding, dispatch, configuration, routing.

pub mod config;
pub mod diag;
pub mod dispatch;
pub mod encoder;
pub mod error;
pub mod field;
pub mod level;
pub mod record;
pub mod registry;
pub mod router;

pub use config::{Config, ConfigBuilder, DefaultPolicy};
pub use dispatch::DispatchQueue;
pub use encoder::{EncodePolicy, Envelope};
pub use error::{LogError, Result};
pub use field::{ErrorInfo, FieldMap, FieldValue};
pub use level::{EscalationPolicy, Level};
pub use record::{Logs, Record};
pub use registry::Registry;
pub use router::{Router, RouterSettings};
