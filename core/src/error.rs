//! Error types for memstress-core

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::traits::Phase;

/// Core error type
///
/// Task failures never show up here: a failing task is recorded into its
/// [`ExecutionResult`](crate::task::ExecutionResult) instead. These variants
/// cover structural problems that stop a distribution, a worker or a run.
#[derive(Error, Debug)]
pub enum StressError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A required component was not supplied to a builder
    #[error("missing required component: {0}")]
    MissingComponent(&'static str),

    /// A finite distribution ran out of descriptors
    #[error("distribution '{name}' exhausted after {produced} descriptors")]
    Exhausted {
        /// Distribution name
        name: String,
        /// Number of descriptors handed out before exhaustion
        produced: u64,
    },

    /// A worker did not acknowledge a stop request within its grace period
    #[error("worker {worker_id} forcibly terminated after {grace:?} grace period")]
    ForcedTermination {
        /// Worker identifier
        worker_id: usize,
        /// Grace period that expired
        grace: Duration,
    },

    /// A runnable phase failed
    #[error("{phase} phase failed: {message}")]
    Phase {
        /// Phase that failed
        phase: Phase,
        /// Error message
        message: String,
    },

    /// Executor misuse or pool misconfiguration
    #[error("executor error: {0}")]
    Executor(String),

    /// A worker did not reach a terminal state in time
    #[error("worker {worker_id} did not finish within {timeout:?}")]
    JoinTimeout {
        /// Worker identifier
        worker_id: usize,
        /// Time waited
        timeout: Duration,
    },

    /// Error reported by the tool manager
    #[error("tool error: {0}")]
    Tool(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StressError {
    /// Configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Missing builder component
    pub fn missing(component: &'static str) -> Self {
        Self::MissingComponent(component)
    }

    /// Executor error
    pub fn executor(message: impl Into<String>) -> Self {
        Self::Executor(message.into())
    }

    /// Tool manager error
    pub fn tool(message: impl Into<String>) -> Self {
        Self::Tool(message.into())
    }

    /// Wrap an error as a failure of the given phase
    ///
    /// Errors that already carry a phase keep it.
    pub fn in_phase(self, phase: Phase) -> Self {
        match self {
            err @ Self::Phase { .. } => err,
            other => Self::Phase {
                phase,
                message: other.to_string(),
            },
        }
    }

    /// Whether this error means a distribution has no more descriptors
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

impl From<ConfigError> for StressError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias
pub type StressResult<T> = std::result::Result<T, StressError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_phase_wraps_message() {
        let err = StressError::tool("no memory regions").in_phase(Phase::Setup);
        assert_eq!(
            err.to_string(),
            "SETUP phase failed: tool error: no memory regions"
        );
    }

    #[test]
    fn test_in_phase_keeps_original_phase() {
        let err = StressError::tool("boom")
            .in_phase(Phase::Initialization)
            .in_phase(Phase::Execution);
        assert!(matches!(
            err,
            StressError::Phase {
                phase: Phase::Initialization,
                ..
            }
        ));
    }

    #[test]
    fn test_config_error_conversion() {
        let err: StressError = ConfigError::InvalidWorkers("must be at least 1".into()).into();
        assert!(matches!(err, StressError::Config(_)));
        assert!(err.to_string().contains("must be at least 1"));
    }

    #[test]
    fn test_is_exhausted() {
        let err = StressError::Exhausted {
            name: "seq".into(),
            produced: 3,
        };
        assert!(err.is_exhausted());
        assert!(!StressError::executor("x").is_exhausted());
    }
}
