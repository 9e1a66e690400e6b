//! Repair session state table

use super::SessionStatus;
use crate::error::EngineError;

/// Validates a session state transition.
///
/// Illegal transitions surface as `INTERNAL`: callers check the
/// user-facing preconditions first, so reaching this is an engine bug.
pub fn validate_transition(from: SessionStatus, to: SessionStatus) -> Result<(), EngineError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(EngineError::Internal(format!(
            "illegal repair session transition {from:?} -> {to:?}"
        )))
    }
}

/// States reachable from `from` in one step
pub fn allowed_transitions(from: SessionStatus) -> Vec<SessionStatus> {
    use SessionStatus::*;
    match from {
        Open => vec![Applied, Expired],
        Applied => vec![Open, Expired],
        Expired => vec![],
    }
}

fn allowed(from: SessionStatus, to: SessionStatus) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_is_terminal() {
        assert!(allowed_transitions(SessionStatus::Expired).is_empty());
        assert!(validate_transition(SessionStatus::Expired, SessionStatus::Open).is_err());
    }

    #[test]
    fn apply_undo_cycle_is_legal() {
        assert!(validate_transition(SessionStatus::Open, SessionStatus::Applied).is_ok());
        assert!(validate_transition(SessionStatus::Applied, SessionStatus::Open).is_ok());
        assert!(validate_transition(SessionStatus::Open, SessionStatus::Open).is_err());
    }
}
