//! Error types for the roster engine
//!
//! One closed taxonomy: every failure maps to exactly one [`ErrorCode`] with a
//! fixed HTTP-style status. Callers branch on the code, never on message text.

use chrono::{DateTime, Utc};
use roster_evidence::EvidenceError;
use serde::{Deserialize, Serialize};

use crate::compliance::{Severity, Violation};
use crate::pins::PinConflict;
use crate::repair::SessionStatus;
use crate::types::{PlanVersionId, Role, SessionId, SnapshotId};

/// Machine-readable error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed input or context
    ValidationError,
    /// A destructive call was made without `confirm`
    ConfirmationRequired,
    /// A keyed operation arrived without a key
    IdempotencyKeyRequired,
    /// Undo with no applied action
    NothingToUndo,
    /// Role too low for the operation
    Forbidden,
    /// Missing, or owned by another tenant or site
    NotFound,
    /// Session is not in OPEN
    SessionNotOpen,
    /// Target version is LOCKED
    PlanLocked,
    /// Change set breaks active pins
    PinConflicts,
    /// Applied version was published after the session opened
    SnapshotAlreadyPublished,
    /// Undo would touch a LOCKED version
    PlanLockedNoUndo,
    /// Snapshot scope is frozen
    DayFrozen,
    /// Publish refused by BLOCK violations
    ComplianceBlocked,
    /// Key reused with a different request
    IdempotencyConflict,
    /// Session TTL has passed
    SessionExpired,
    /// Invariant breach inside the engine
    Internal,
}

impl ErrorCode {
    /// HTTP-style status for this code
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::ValidationError
            | Self::ConfirmationRequired
            | Self::IdempotencyKeyRequired
            | Self::NothingToUndo => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::SessionNotOpen
            | Self::PlanLocked
            | Self::PinConflicts
            | Self::SnapshotAlreadyPublished
            | Self::PlanLockedNoUndo
            | Self::DayFrozen
            | Self::ComplianceBlocked
            | Self::IdempotencyConflict => 409,
            Self::SessionExpired => 410,
            Self::Internal => 500,
        }
    }

    /// Wire name, e.g. `PLAN_LOCKED`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ConfirmationRequired => "CONFIRMATION_REQUIRED",
            Self::IdempotencyKeyRequired => "IDEMPOTENCY_KEY_REQUIRED",
            Self::NothingToUndo => "NOTHING_TO_UNDO",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::SessionNotOpen => "SESSION_NOT_OPEN",
            Self::PlanLocked => "PLAN_LOCKED",
            Self::PinConflicts => "PIN_CONFLICTS",
            Self::SnapshotAlreadyPublished => "SNAPSHOT_ALREADY_PUBLISHED",
            Self::PlanLockedNoUndo => "PLAN_LOCKED_NO_UNDO",
            Self::DayFrozen => "DAY_FROZEN",
            Self::ComplianceBlocked => "COMPLIANCE_BLOCKED",
            Self::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main engine error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Malformed input or missing context
    #[error("validation failed: {0}")]
    Validation(String),

    /// Destructive action called without `confirm=true`
    #[error("confirmation required: pass confirm=true to {action}")]
    ConfirmationRequired {
        /// What the caller tried to do
        action: &'static str,
    },

    /// Mutating call without an idempotency key
    #[error("idempotency key required for {operation}")]
    IdempotencyKeyRequired {
        /// Operation that needs the key
        operation: &'static str,
    },

    /// Undo with no applied action pending
    #[error("nothing to undo in session {session_id}")]
    NothingToUndo {
        /// Session asked to undo
        session_id: SessionId,
    },

    /// Caller role too low
    #[error("role {actual:?} may not {action} (requires {required:?})")]
    Forbidden {
        /// What the caller tried to do
        action: &'static str,
        /// Lowest role allowed to do it
        required: Role,
        /// Role the caller holds
        actual: Role,
    },

    /// Row missing or owned by another tenant/site
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Row kind, e.g. `plan version`
        kind: &'static str,
        /// Requested id
        id: String,
    },

    /// Session is not in OPEN state
    #[error("session {session_id} is {status:?}, expected OPEN")]
    SessionNotOpen {
        /// Session addressed
        session_id: SessionId,
        /// State it is in
        status: SessionStatus,
    },

    /// Target plan version is LOCKED
    #[error("plan version {plan_version_id} is locked")]
    PlanLocked {
        /// The locked version
        plan_version_id: PlanVersionId,
    },

    /// Change set would break active pins
    #[error("change set conflicts with {} active pin(s)", .conflicts.len())]
    PinConflicts {
        /// Every broken (pin, change) pair
        conflicts: Vec<PinConflict>,
    },

    /// A snapshot was published from the applied version
    #[error("snapshot {snapshot_id} was published from plan version {plan_version_id}; undo refused")]
    SnapshotAlreadyPublished {
        /// The blocking snapshot
        snapshot_id: SnapshotId,
        /// Applied version it was published from
        plan_version_id: PlanVersionId,
    },

    /// Plan locked after the repair was applied
    #[error("plan version {plan_version_id} was locked; undo refused")]
    PlanLockedNoUndo {
        /// The locked version
        plan_version_id: PlanVersionId,
    },

    /// Write against a frozen snapshot's scope
    #[error("snapshot {snapshot_id} is frozen")]
    DayFrozen {
        /// The frozen snapshot
        snapshot_id: SnapshotId,
    },

    /// Publish refused by blocking violations
    #[error(
        "publish blocked by {} blocking violation(s)",
        .violations.iter().filter(|v| v.severity == Severity::Block).count()
    )]
    ComplianceBlocked {
        /// Full evaluation, WARN rows included
        violations: Vec<Violation>,
    },

    /// Key reused with a different request body
    #[error("idempotency key {key:?} was already used for a different {operation} request")]
    IdempotencyConflict {
        /// Keyed operation
        operation: &'static str,
        /// The reused key
        key: String,
    },

    /// Session past `expires_at` or closed
    #[error("session {session_id} expired at {expires_at}")]
    SessionExpired {
        /// Session addressed
        session_id: SessionId,
        /// When its TTL ran out
        expires_at: DateTime<Utc>,
    },

    /// Invariant breach or serialization failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Closed error code
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::ConfirmationRequired { .. } => ErrorCode::ConfirmationRequired,
            Self::IdempotencyKeyRequired { .. } => ErrorCode::IdempotencyKeyRequired,
            Self::NothingToUndo { .. } => ErrorCode::NothingToUndo,
            Self::Forbidden { .. } => ErrorCode::Forbidden,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::SessionNotOpen { .. } => ErrorCode::SessionNotOpen,
            Self::PlanLocked { .. } => ErrorCode::PlanLocked,
            Self::PinConflicts { .. } => ErrorCode::PinConflicts,
            Self::SnapshotAlreadyPublished { .. } => ErrorCode::SnapshotAlreadyPublished,
            Self::PlanLockedNoUndo { .. } => ErrorCode::PlanLockedNoUndo,
            Self::DayFrozen { .. } => ErrorCode::DayFrozen,
            Self::ComplianceBlocked { .. } => ErrorCode::ComplianceBlocked,
            Self::IdempotencyConflict { .. } => ErrorCode::IdempotencyConflict,
            Self::SessionExpired { .. } => ErrorCode::SessionExpired,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// HTTP-style status
    #[inline]
    #[must_use]
    pub fn status(&self) -> u16 {
        self.code().status()
    }

    /// Worth retrying with the same idempotency key?
    ///
    /// The engine never retries on its own; this only advises the caller.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    /// Not-found helper
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Serializable error body
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        let details = match self {
            Self::PinConflicts { conflicts } => serde_json::to_value(conflicts).ok(),
            Self::ComplianceBlocked { violations } => serde_json::to_value(violations).ok(),
            _ => None,
        };
        ErrorBody {
            error_code: self.code(),
            status: self.status(),
            message: self.to_string(),
            details,
        }
    }
}

impl From<EvidenceError> for EngineError {
    fn from(value: EvidenceError) -> Self {
        Self::Internal(format!("evidence: {value}"))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(format!("serialization: {value}"))
    }
}

/// Wire form of an error: `{error_code, status, message, details?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Closed error code
    pub error_code: ErrorCode,
    /// HTTP-style status of the code
    pub status: u16,
    /// Display text of the error
    pub message: String,
    /// Structured payload for PIN_CONFLICTS and COMPLIANCE_BLOCKED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(ErrorCode::ConfirmationRequired.status(), 400);
        assert_eq!(ErrorCode::NothingToUndo.status(), 400);
        assert_eq!(ErrorCode::PlanLocked.status(), 409);
        assert_eq!(ErrorCode::DayFrozen.status(), 409);
        assert_eq!(ErrorCode::PlanLockedNoUndo.status(), 409);
        assert_eq!(ErrorCode::SessionExpired.status(), 410);
    }

    #[test]
    fn code_serializes_to_wire_name() {
        for code in [
            ErrorCode::ValidationError,
            ErrorCode::IdempotencyKeyRequired,
            ErrorCode::SnapshotAlreadyPublished,
            ErrorCode::SessionExpired,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn body_carries_code_and_status() {
        let err = EngineError::PlanLocked {
            plan_version_id: PlanVersionId::new(),
        };
        let body = err.to_body();
        assert_eq!(body.error_code, ErrorCode::PlanLocked);
        assert_eq!(body.status, 409);
        assert!(body.message.contains("locked"));
        assert!(body.details.is_none());

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error_code"], "PLAN_LOCKED");
    }

    #[test]
    fn only_internal_is_retryable() {
        assert!(EngineError::Internal("x".into()).is_retryable());
        assert!(!EngineError::Validation("x".into()).is_retryable());
    }
}
