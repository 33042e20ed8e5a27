//! Error types for the Pulse Panel core.

use thiserror::Error;

use crate::snapshot::Metric;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the sampler, the probe and the coordinator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The host could not report one metric for this tick.
    #[error("{metric} unavailable: {reason}")]
    MetricUnavailable { metric: Metric, reason: String },

    /// A speed test run failed.
    #[error("speed test failed: {0}")]
    ProbeFailed(String),

    /// A speed test was requested while another one is in flight.
    #[error("a speed test is already running")]
    ProbeAlreadyRunning,

    /// The coordinator loop has stopped.
    #[error("coordinator has shut down")]
    Shutdown,
}

impl Error {
    /// Builds a `MetricUnavailable` error from anything displayable.
    pub fn unavailable(metric: Metric, reason: impl std::fmt::Display) -> Self {
        Error::MetricUnavailable {
            metric,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::unavailable(Metric::Disk, "mount vanished");
        assert_eq!(err.to_string(), "disk unavailable: mount vanished");
        assert_eq!(
            Error::ProbeFailed("timeout".into()).to_string(),
            "speed test failed: timeout"
        );
    }
}
