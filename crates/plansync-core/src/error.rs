//! Error types for plansync
//!
//! Provides error handling for:
//! - Single remote calls (transport, missing rows, duplicate keys)
//! - Aggregate loads whose root fields cannot be obtained
//! - Submissions whose root step failed
//! - Configuration loading
//!
//! Item-level failures during reconciliation are not errors here: they are
//! converted into [`crate::diff_sync::ItemOutcome`] entries and reported.

use crate::state_machine::SubmissionPhase;
use crate::types::PlanId;
use std::path::PathBuf;

/// Result of a single remote call
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Failure of one remote call
///
/// Retried zero times by this crate; retry policy belongs to the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Network or HTTP failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Target resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Target resource already exists (duplicate key)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Remote system rejected the request
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl RemoteError {
    /// Create a rejection error
    #[inline]
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Check if the remote reported a duplicate key
    #[inline]
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Rejected { status: 409, .. })
    }

    /// Check if the remote reported a missing resource
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Rejected { status: 404, .. })
    }
}

/// Aggregate load errors
///
/// Only root-level failures are errors; a failed collection is reported
/// inside [`crate::loader::LoadedAggregate`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// Neither the plan detail nor a cached summary row was available
    #[error("plan {plan_id} unavailable: {source}")]
    RootUnavailable {
        plan_id: PlanId,
        #[source]
        source: RemoteError,
    },
}

impl LoadError {
    /// Plan the failed load was for
    #[inline]
    #[must_use]
    pub fn plan_id(&self) -> &PlanId {
        match self {
            Self::RootUnavailable { plan_id, .. } => plan_id,
        }
    }
}

/// Submission errors
///
/// Every variant means the submission failed entirely; partial association
/// failures are reported through [`crate::orchestrator::SubmissionReport`].
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    /// Creating or updating the root plan resource failed
    #[error("root plan step failed: {source}")]
    RootFailed {
        #[source]
        source: RemoteError,
        /// Phases visited before failing
        phases: Vec<SubmissionPhase>,
    },

    /// Root creation succeeded but the response carried no plan id
    #[error("root plan created but no plan id in response: {0}")]
    MissingPlanId(String),

    /// Phase machine was driven through a transition it does not allow
    #[error("illegal submission transition: {from:?} -> {to:?}")]
    IllegalTransition {
        from: SubmissionPhase,
        to: SubmissionPhase,
    },
}

impl SubmissionError {
    /// Check if the root resource may exist remotely despite the failure
    #[inline]
    #[must_use]
    pub fn root_may_exist(&self) -> bool {
        matches!(self, Self::MissingPlanId(_))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration text is not valid TOML for this schema
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration values are out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_display() {
        let err = RemoteError::Transport("connection reset".to_string());
        assert!(err.to_string().contains("transport error"));

        let err = RemoteError::rejected(422, "bad payload");
        assert_eq!(err.to_string(), "rejected with status 422: bad payload");
    }

    #[test]
    fn remote_error_classification() {
        assert!(RemoteError::Conflict("dept 7".into()).is_duplicate());
        assert!(RemoteError::rejected(409, "exists").is_duplicate());
        assert!(!RemoteError::Transport("x".into()).is_duplicate());

        assert!(RemoteError::NotFound("dept 7".into()).is_not_found());
        assert!(RemoteError::rejected(404, "gone").is_not_found());
        assert!(!RemoteError::rejected(500, "boom").is_not_found());
    }

    #[test]
    fn load_error_carries_plan() {
        let err = LoadError::RootUnavailable {
            plan_id: PlanId::from("42"),
            source: RemoteError::NotFound("plan 42".into()),
        };
        assert_eq!(err.plan_id().as_str(), "42");
        assert!(err.to_string().contains("plan 42 unavailable"));
    }

    #[test]
    fn submission_error_root_may_exist() {
        let root = SubmissionError::RootFailed {
            source: RemoteError::Transport("timeout".into()),
            phases: vec![SubmissionPhase::Idle, SubmissionPhase::RootPersisting],
        };
        assert!(!root.root_may_exist());
        assert!(SubmissionError::MissingPlanId("{}".into()).root_may_exist());
    }
}
