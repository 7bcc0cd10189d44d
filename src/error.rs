//! Error types for the care gateway.
//!
//! Verification outcomes are never errors; they are returned as
//! [`crate::verification::Outcome`] values. The types here cover the ambient
//! failures around the core: configuration, the patient directory backend and
//! delivery to the external collaborators.

/// Top-level error type for the gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Patient directory errors.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Failed to read directory file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse directory file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid patient record {patient_id}: {reason}")]
    InvalidRecord { patient_id: String, reason: String },

    #[error("Duplicate {field} in directory: {value}")]
    Duplicate { field: &'static str, value: String },

    #[error("Directory backend unavailable: {0}")]
    Unavailable(String),
}

/// Failures delivering intents to the external collaborators.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Security event sink rejected event {event_type}: {reason}")]
    Sink { event_type: String, reason: String },

    #[error("Call control rejected {action} for call {call_id}: {reason}")]
    CallControl {
        call_id: String,
        action: String,
        reason: String,
    },
}

/// Malformed inbound call events.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {source}")]
    InvalidArgs {
        tool: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type alias for the gateway.
pub type Result<T> = std::result::Result<T, Error>;
