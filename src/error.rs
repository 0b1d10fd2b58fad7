//! Databox error types

/// Databox error types.
///
/// The enum is `Clone` because terminal errors are delivered to every
/// subscriber of a shared run through a broadcast channel.
#[derive(Debug, Clone)]
pub enum DataboxError {
    /// Key failed validation. Raised at build time, never retried.
    InvalidKey { key: String },

    /// Remote fetch failed. Retried per the configured strategy, then
    /// propagated.
    Fetch(String),

    /// A converter ran and produced no value. Fatal for that emission,
    /// not retried.
    Conversion { type_tag: &'static str },

    /// No converter registered and the source type differs from the
    /// output type, so the identity path cannot apply.
    NoConverter {
        from: &'static str,
        to: &'static str,
    },

    /// A local source signalled a fatal condition.
    Storage { source: String, message: String },

    Serialization(String),

    Configuration(String),
}

// Display/Error are implemented by hand because the `Storage` variant's
// `source` field would otherwise be picked up by thiserror as an error
// source, and `String` is not an `Error`.
impl std::fmt::Display for DataboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataboxError::InvalidKey { key } => {
                write!(f, "invalid key {key:?}: keys must match [a-z0-9_-]{{1,120}}")
            }
            DataboxError::Fetch(msg) => write!(f, "fetch failed: {msg}"),
            DataboxError::Conversion { type_tag } => {
                write!(f, "converter for `{type_tag}` produced no value")
            }
            DataboxError::NoConverter { from, to } => {
                write!(
                    f,
                    "no converter registered for `{from}` and output type `{to}` differs"
                )
            }
            DataboxError::Storage { source, message } => {
                write!(f, "storage `{source}` error: {message}")
            }
            DataboxError::Serialization(msg) => write!(f, "serialization error: {msg}"),
            DataboxError::Configuration(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for DataboxError {}

impl From<serde_json::Error> for DataboxError {
    fn from(err: serde_json::Error) -> Self {
        DataboxError::Serialization(err.to_string())
    }
}

/// Result type alias for Databox operations
pub type Result<T> = std::result::Result<T, DataboxError>;
