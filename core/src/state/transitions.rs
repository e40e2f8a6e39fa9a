//! Session state machine rules.

use super::session::SessionStatus;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
    #[error("Cannot transition from terminal state {state:?}")]
    FromTerminalState { state: SessionStatus },
}

pub struct StateTransition;

impl StateTransition {
    /// `Initializing -> Running -> {Paused, Completed, Failed}`,
    /// `Paused -> {Running, Failed}`. An initializing session may also be
    /// aborted straight to `Failed`.
    pub fn validate(from: SessionStatus, to: SessionStatus) -> Result<(), TransitionError> {
        if from.is_terminal() {
            return Err(TransitionError::FromTerminalState { state: from });
        }

        let is_valid = matches!(
            (from, to),
            (SessionStatus::Initializing, SessionStatus::Running)
                | (SessionStatus::Initializing, SessionStatus::Failed)
                | (SessionStatus::Running, SessionStatus::Paused)
                | (SessionStatus::Running, SessionStatus::Completed)
                | (SessionStatus::Running, SessionStatus::Failed)
                | (SessionStatus::Paused, SessionStatus::Running)
                | (SessionStatus::Paused, SessionStatus::Failed)
        );

        if is_valid {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition { from, to })
        }
    }

    pub fn can_transition(from: SessionStatus, to: SessionStatus) -> bool {
        Self::validate(from, to).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(StateTransition::can_transition(
            SessionStatus::Initializing,
            SessionStatus::Running
        ));
        assert!(StateTransition::can_transition(
            SessionStatus::Running,
            SessionStatus::Paused
        ));
        assert!(StateTransition::can_transition(
            SessionStatus::Paused,
            SessionStatus::Running
        ));
        assert!(StateTransition::can_transition(
            SessionStatus::Paused,
            SessionStatus::Failed
        ));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!StateTransition::can_transition(
            SessionStatus::Initializing,
            SessionStatus::Paused
        ));
        // Paused sessions must resume before they can complete.
        assert!(!StateTransition::can_transition(
            SessionStatus::Paused,
            SessionStatus::Completed
        ));
    }

    #[test]
    fn test_terminal_states() {
        let result = StateTransition::validate(SessionStatus::Completed, SessionStatus::Running);
        assert!(matches!(
            result,
            Err(TransitionError::FromTerminalState { .. })
        ));

        let result = StateTransition::validate(SessionStatus::Failed, SessionStatus::Running);
        assert!(result.is_err());
    }
}
