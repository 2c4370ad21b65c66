//! Error types for the rollup engine

use thiserror::Error;

/// Main error type for bucketing, aggregation and store access
#[derive(Error, Debug)]
pub enum Error {
    /// A required input was missing, out of range, or otherwise unusable
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An aggregation rule was applied to incompatible value types
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The value kind the rule requires
        expected: String,
        /// The value kind that was supplied
        found: String,
    },

    /// A serialized running average or a store response could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// The aggregation rule name is not recognised
    #[error("Unsupported aggregation: {0}")]
    UnsupportedAggregation(String),

    /// The external time-series store failed or returned non-success
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for [`Error::InvalidArgument`]
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Shorthand for [`Error::TypeMismatch`]
    pub fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Error::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// True for failures of the external store
    pub fn is_upstream(&self) -> bool {
        matches!(self, Error::Upstream(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Configuration(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Configuration(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        // Strip the URL so credentials embedded in it never reach logs
        Error::Upstream(e.without_url().to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_display() {
        let err = Error::mismatch("integer", "float");
        assert_eq!(
            err.to_string(),
            "Type mismatch: expected integer, found float"
        );
    }

    #[test]
    fn test_json_error_maps_to_parse() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_is_upstream() {
        assert!(Error::Upstream("down".into()).is_upstream());
        assert!(!Error::invalid("x").is_upstream());
    }
}
