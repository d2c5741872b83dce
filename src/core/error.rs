//! Error types for the logging pipeline

pub type Result<T> = std::result::Result<T, LogError>;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// IO error with context
    #[error("IO error while {operation}: {message}")]
    IoOperation {
        operation: String,
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (fallback writer)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A value the fast writer cannot render under the current policy
    #[error("Encoding failed under {policy} policy: {message}")]
    Encoding { policy: String, message: String },

    /// Invalid configuration, raised synchronously at build time
    #[error("Invalid configuration for {component}: {message}")]
    Config { component: String, message: String },

    /// A spool frame whose declared length or body cannot be read
    #[error("Corrupt spool frame at offset {offset}: {detail}")]
    SpoolCorrupt { offset: u64, detail: String },

    /// A second spool read was attempted before the first was advanced
    #[error("Spool read already outstanding; advance it before reading again")]
    ReadOutstanding,

    /// Push to a sink that has shut down or marked itself dead
    #[error("Sink closed: {0}")]
    SinkClosed(String),
}

impl LogError {
    /// Create an IO operation error with context
    pub fn io_operation(
        operation: impl Into<String>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        LogError::IoOperation {
            operation: operation.into(),
            message: message.into(),
            source,
        }
    }

    /// Create an invalid configuration error
    pub fn config(component: impl Into<String>, message: impl Into<String>) -> Self {
        LogError::Config {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create an encoding error
    pub fn encoding(policy: impl Into<String>, message: impl Into<String>) -> Self {
        LogError::Encoding {
            policy: policy.into(),
            message: message.into(),
        }
    }

    /// Create a spool corruption error
    pub fn spool_corrupt(offset: u64, detail: impl Into<String>) -> Self {
        LogError::SpoolCorrupt {
            offset,
            detail: detail.into(),
        }
    }
}
