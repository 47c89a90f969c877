//! Submission phase machine
//!
//! `Idle -> RootPersisting -> { RootFailed | AssociationsSyncing -> Completed }`

use crate::error::SubmissionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of one plan submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPhase {
    /// Nothing issued yet
    Idle,
    /// Root plan create/update in flight
    RootPersisting,
    /// Root step failed; terminal
    RootFailed,
    /// Association kinds being reconciled
    AssociationsSyncing,
    /// Every kind reported; terminal
    Completed,
}

impl SubmissionPhase {
    /// Check if no further transition is allowed
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        allowed_transitions(self).is_empty()
    }
}

impl fmt::Display for SubmissionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::RootPersisting => "root_persisting",
            Self::RootFailed => "root_failed",
            Self::AssociationsSyncing => "associations_syncing",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Validate a phase transition
pub fn validate_transition(from: SubmissionPhase, to: SubmissionPhase) -> Result<(), SubmissionError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(SubmissionError::IllegalTransition { from, to })
    }
}

/// Phases reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: SubmissionPhase) -> Vec<SubmissionPhase> {
    use SubmissionPhase::*;
    match from {
        Idle => vec![RootPersisting],
        RootPersisting => vec![RootFailed, AssociationsSyncing],
        AssociationsSyncing => vec![Completed],
        RootFailed | Completed => vec![],
    }
}

/// Phase tracker that records every visited phase
#[derive(Debug, Clone)]
pub struct PhaseTrail {
    current: SubmissionPhase,
    visited: Vec<SubmissionPhase>,
}

impl PhaseTrail {
    /// Start in `Idle`
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: SubmissionPhase::Idle,
            visited: vec![SubmissionPhase::Idle],
        }
    }

    /// Current phase
    #[inline]
    #[must_use]
    pub fn current(&self) -> SubmissionPhase {
        self.current
    }

    /// Every phase visited so far, in order
    #[inline]
    #[must_use]
    pub fn visited(&self) -> &[SubmissionPhase] {
        &self.visited
    }

    /// Move to the next phase
    pub fn advance(&mut self, to: SubmissionPhase) -> Result<(), SubmissionError> {
        validate_transition(self.current, to)?;
        tracing::info!("Submission phase {} -> {}", self.current, to);
        self.current = to;
        self.visited.push(to);
        Ok(())
    }

    /// Consume into the visited list
    #[inline]
    #[must_use]
    pub fn into_visited(self) -> Vec<SubmissionPhase> {
        self.visited
    }
}

impl Default for PhaseTrail {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SubmissionPhase::*;

    #[test]
    fn happy_path_transitions() {
        assert!(validate_transition(Idle, RootPersisting).is_ok());
        assert!(validate_transition(RootPersisting, AssociationsSyncing).is_ok());
        assert!(validate_transition(AssociationsSyncing, Completed).is_ok());
    }

    #[test]
    fn root_failure_is_terminal() {
        assert!(validate_transition(RootPersisting, RootFailed).is_ok());
        assert!(RootFailed.is_terminal());
        assert!(Completed.is_terminal());
        assert!(!Idle.is_terminal());
    }

    #[test]
    fn illegal_transitions_rejected() {
        let err = validate_transition(Idle, AssociationsSyncing).unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::IllegalTransition {
                from: Idle,
                to: AssociationsSyncing
            }
        ));
        assert!(validate_transition(RootFailed, AssociationsSyncing).is_err());
        assert!(validate_transition(Completed, Idle).is_err());
    }

    #[test]
    fn trail_records_phases() {
        let mut trail = PhaseTrail::new();
        trail.advance(RootPersisting).unwrap();
        trail.advance(AssociationsSyncing).unwrap();
        assert!(trail.advance(RootFailed).is_err());
        trail.advance(Completed).unwrap();

        assert_eq!(trail.current(), Completed);
        assert_eq!(
            trail.into_visited(),
            vec![Idle, RootPersisting, AssociationsSyncing, Completed]
        );
    }
}
