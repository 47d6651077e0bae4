//! Crate-wide error types.

use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DatagenError>;

/// Errors produced during dataset generation.
///
/// Two classes are fatal and abort a run immediately: `Config` (a bad or
/// unreadable configuration) and `DataInconsistency` (NaN target values
/// coinciding with nonzero loss weight). Everything else wraps an ambient
/// failure from file or serialization layers.
#[derive(Debug, thiserror::Error)]
pub enum DatagenError {
    /// Invalid or unreadable configuration
    #[error("configuration error: {reason}")]
    Config {
        /// Description of what is wrong
        reason: String,
    },

    /// NaN target values paired with nonzero loss weight
    #[error("data inconsistency for {date}: {reason}")]
    DataInconsistency {
        /// Forecast date of the offending sample
        date: String,
        /// Description of the inconsistency
        reason: String,
    },

    /// Underlying filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Failed to read a .npy array file
    #[error("npy read error: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    /// Failed to write a .npy array file
    #[error("npy write error: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    /// Failed to read a shard (.npz) file
    #[error("npz read error: {0}")]
    NpzRead(#[from] ndarray_npy::ReadNpzError),

    /// Failed to write a shard (.npz) file
    #[error("npz write error: {0}")]
    NpzWrite(#[from] ndarray_npy::WriteNpzError),

    /// A date string did not match the expected format
    #[error("failed to parse date '{value}': {source}")]
    DateParse {
        /// The offending date string
        value: String,
        /// Parser error
        source: chrono::ParseError,
    },

    /// An array on disk did not have the configured grid shape
    #[error("array {path} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        /// File that was loaded
        path: PathBuf,
        /// Shape found on disk
        actual: Vec<usize>,
        /// Shape required by the configuration
        expected: Vec<usize>,
    },
}

impl DatagenError {
    /// Construct a configuration error from any displayable reason.
    pub fn config<S: Into<String>>(reason: S) -> Self {
        DatagenError::Config {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = DatagenError::config("loader.json not found");
        assert_eq!(
            err.to_string(),
            "configuration error: loader.json not found"
        );
    }

    #[test]
    fn test_inconsistency_error_display() {
        let err = DatagenError::DataInconsistency {
            date: "2020_01_01".to_string(),
            reason: "NaN target with nonzero weight".to_string(),
        };
        assert!(err.to_string().contains("2020_01_01"));
    }
}
