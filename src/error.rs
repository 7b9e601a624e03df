//! Error types for the consolidation controller

use thiserror::Error;

/// Main error type for consolidation operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Scheduling simulation error; the candidate is skipped for this tick
    #[error("simulation error: {0}")]
    Simulation(String),

    /// Replacement launch error; surfaced before any destructive step
    #[error("launch error: {0}")]
    Launch(String),

    /// A replacement node never reported readiness.
    ///
    /// Carries the outcome of the best-effort uncordon of the old node so a
    /// single error surfaces both failures.
    #[error("timed out waiting for {node} readiness: {message}")]
    ReadinessTimeout {
        /// Name of the replacement node that never initialized
        node: String,
        /// Combined description of the timeout and any uncordon failure
        message: String,
    },

    /// Internal/operational error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a simulation error with the given message
    pub fn simulation(msg: impl Into<String>) -> Self {
        Self::Simulation(msg.into())
    }

    /// Create a launch error with the given message
    pub fn launch(msg: impl Into<String>) -> Self {
        Self::Launch(msg.into())
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error may resolve on a later tick without operator action.
    ///
    /// The loop driver never exits on errors either way; this only informs
    /// logging severity at the call sites.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(source) => {
                !matches!(source, kube::Error::Api(ae) if (400..500).contains(&ae.code))
            }
            Error::Simulation(_) => true,
            Error::Launch(_) => true,
            Error::ReadinessTimeout { .. } => true,
            Error::Internal(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: simulation failures mark a candidate unknown and move on; the
    /// message names the failing stage so the skip is explainable from logs.
    #[test]
    fn story_simulation_errors_name_the_stage() {
        let err = Error::simulation("solving placement for node-a: no capacity data");
        assert!(err.to_string().contains("simulation error"));
        assert!(err.to_string().contains("node-a"));
        assert!(err.is_retryable());
    }

    /// Story: a launch failure must abort the action before anything was
    /// destroyed, so it surfaces as its own category.
    #[test]
    fn story_launch_errors_are_their_own_category() {
        let err = Error::launch("provisioning subsystem rejected the node shape");
        match &err {
            Error::Launch(msg) => assert!(msg.contains("rejected")),
            _ => panic!("Expected Launch variant"),
        }
    }

    /// Story: a readiness timeout reports both the stuck replacement and the
    /// outcome of the uncordon in one error.
    #[test]
    fn story_readiness_timeout_combines_uncordon_outcome() {
        let err = Error::ReadinessTimeout {
            node: "replacement-1".to_string(),
            message: "node is not initialized; uncordon of old-1 failed: conflict".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("replacement-1"));
        assert!(rendered.contains("uncordon of old-1"));
        assert!(err.is_retryable());
    }

    #[test]
    fn internal_errors_are_not_retryable() {
        assert!(!Error::internal("invalid action variant").is_retryable());
    }
}
