//! Error types for the metric core.
//!
//! Collaborator traits (sources, sinks, listeners, discovery providers)
//! return `anyhow::Result`; everything the core itself can reject is
//! described here.

use crate::metric::MetricKind;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, MetricsError>;

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Availability can only be signalled for metrics that are pushed.
    #[error("cannot set availability of '{metric}': metric kind is {kind}, not push")]
    InvalidAvailabilityTarget { metric: String, kind: MetricKind },

    #[error("unknown metric source: {0}")]
    UnknownSource(String),

    #[error("metric '{0}' does not have a supported value type")]
    UnsupportedType(String),

    #[error("duplicate metric settings entry: {0}")]
    DuplicateSetting(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl MetricsError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_error_message() {
        let err = MetricsError::InvalidAvailabilityTarget {
            metric: "Bench \\ Voltage".into(),
            kind: MetricKind::POLL,
        };
        assert_eq!(
            err.to_string(),
            "cannot set availability of 'Bench \\ Voltage': metric kind is Poll, not push"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = MetricsError::from(io_err);
        assert!(matches!(err, MetricsError::Io(_)));
    }
}
