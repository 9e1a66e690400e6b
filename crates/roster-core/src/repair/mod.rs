//! Repair session orchestration
//!
//! Emergency edits run inside a bounded session over one base plan version:
//!
//! ```text
//! OPEN --prepare--> OPEN(draft) --apply--> APPLIED --undo--> OPEN
//!   \                                        |
//!    `------------ expire / close ----------> EXPIRED (terminal)
//! ```
//!
//! Apply never edits the base; it writes a new DRAFT version descended from
//! it. Undo is one step deep and is refused once the applied version has
//! been published or either version locked.

mod strategy;
mod transitions;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use roster_evidence::Sha256Digest;
use serde::{Deserialize, Serialize};

pub use strategy::{LeastLoadedStrategy, RepairCandidate, RepairStrategy};
pub use transitions::{allowed_transitions, validate_transition};

use crate::compliance::{ComplianceGate, Violation};
use crate::error::EngineError;
use crate::idempotency::IdempotencyKey;
use crate::pins::{ensure_no_conflicts, inherit_pins};
use crate::store::Tables;
use crate::types::{
    DriverId, PlanStatus, PlanVersion, PlanVersionId, RequestContext, ScheduleUnit, SessionId,
    SiteId, TenantId, UnitId,
};

/// Repair session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Accepting preview, prepare and apply
    Open,
    /// An apply is pending; undo reopens
    Applied,
    /// TTL ran out or closed; terminal
    Expired,
}

/// One edit to a unit's driver set
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentChange {
    /// Take a driver off a unit
    Remove {
        /// Unit edited
        unit_id: UnitId,
        /// Driver removed
        driver_id: DriverId,
    },
    /// Put a driver on a unit
    Add {
        /// Unit edited
        unit_id: UnitId,
        /// Driver added
        driver_id: DriverId,
    },
}

impl AssignmentChange {
    /// Unit the change edits
    #[must_use]
    pub fn unit_id(&self) -> &UnitId {
        match self {
            Self::Remove { unit_id, .. } | Self::Add { unit_id, .. } => unit_id,
        }
    }
}

/// Apply `changes` to a unit set
///
/// # Errors
/// `VALIDATION_ERROR` if a change names a unit that is not in the set
pub fn apply_changes(
    units: &[ScheduleUnit],
    changes: &[AssignmentChange],
) -> Result<Vec<ScheduleUnit>, EngineError> {
    let mut by_id: BTreeMap<UnitId, ScheduleUnit> = units
        .iter()
        .map(|u| (u.unit_id.clone(), u.clone()))
        .collect();
    for change in changes {
        let unit = by_id.get_mut(change.unit_id()).ok_or_else(|| {
            EngineError::Validation(format!("change targets unknown unit {}", change.unit_id()))
        })?;
        match change {
            AssignmentChange::Remove { driver_id, .. } => {
                unit.drivers.remove(driver_id);
            }
            AssignmentChange::Add { driver_id, .. } => {
                unit.drivers.insert(driver_id.clone());
            }
        }
    }
    Ok(by_id.into_values().collect())
}

/// Sick call / no-show report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    /// Drivers who will not show
    pub absences: Vec<DriverId>,
    /// Units to repair; derived from the absences when empty
    #[serde(default)]
    pub affected_units: Vec<UnitId>,
    /// Replacement pool; every present plan driver when empty
    #[serde(default)]
    pub available_drivers: Vec<DriverId>,
}

/// Ranked repair option returned by preview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairProposal {
    /// Content digest of the change set
    pub proposal_id: String,
    /// Position in the ranking, from 1
    pub rank: usize,
    /// Strategy score, lower is better
    pub score: u64,
    /// Changes against the base units
    pub changes: Vec<AssignmentChange>,
    /// Vacancies left open
    pub unfilled: usize,
    /// BLOCK violations the result would carry
    pub blocking_violations: Vec<Violation>,
    /// Strategy explanation
    pub rationale: String,
}

/// Concrete change set chosen for apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairDraft {
    /// Proposal the draft came from
    pub proposal_id: String,
    /// Changes to apply
    pub changes: Vec<AssignmentChange>,
    /// Base units with the changes applied
    pub resulting_units: Vec<ScheduleUnit>,
    /// Attached for review; publish is where they block
    pub violations: Vec<Violation>,
    /// False while any BLOCK violation remains
    pub can_publish: bool,
    /// Engine time of prepare
    pub prepared_at: DateTime<Utc>,
}

/// Enough state to reverse exactly one apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedAction {
    /// Version created by apply
    pub applied_version_id: PlanVersionId,
    /// Version the changes were applied to
    pub base_version_id: PlanVersionId,
    /// Changes that were applied
    pub changes: Vec<AssignmentChange>,
    /// Engine time of apply
    pub applied_at: DateTime<Utc>,
}

/// Bounded-lifetime repair workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairSession {
    /// Session id
    pub id: SessionId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Owning site
    pub site_id: SiteId,
    /// Version the session repairs
    pub base_plan_version_id: PlanVersionId,
    /// Lifecycle state
    pub status: SessionStatus,
    /// Engine time of creation
    pub created_at: DateTime<Utc>,
    /// End of the TTL
    pub expires_at: DateTime<Utc>,
    /// Actor id that opened the session
    pub created_by: String,
    /// Prepared change set, if any
    pub draft: Option<RepairDraft>,
    /// Set while APPLIED; cleared by undo
    pub last_applied_action: Option<AppliedAction>,
    /// Keys used on this session
    pub idempotency_keys_seen: BTreeSet<String>,
}

impl RepairSession {
    fn ensure_not_expired(&self) -> Result<(), EngineError> {
        if self.status == SessionStatus::Expired {
            return Err(EngineError::SessionExpired {
                session_id: self.id,
                expires_at: self.expires_at,
            });
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        self.ensure_not_expired()?;
        if self.status != SessionStatus::Open {
            return Err(EngineError::SessionNotOpen {
                session_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    fn transition(&mut self, to: SessionStatus) -> Result<(), EngineError> {
        validate_transition(self.status, to)?;
        self.status = to;
        Ok(())
    }
}

/// Drives preview, prepare, apply and undo
pub struct RepairOrchestrator {
    strategy: Box<dyn RepairStrategy>,
    top_k: usize,
    ttl: Duration,
}

impl std::fmt::Debug for RepairOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepairOrchestrator")
            .field("strategy", &self.strategy.name())
            .field("top_k", &self.top_k)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl RepairOrchestrator {
    /// Orchestrator ranking with `strategy`, returning up to `top_k` proposals
    #[must_use]
    pub fn new(strategy: Box<dyn RepairStrategy>, top_k: usize, ttl: Duration) -> Self {
        Self {
            strategy,
            top_k,
            ttl,
        }
    }

    pub(crate) fn create_session(
        &self,
        tx: &mut Tables,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        base_plan_version_id: PlanVersionId,
        key: &IdempotencyKey,
    ) -> Result<RepairSession, EngineError> {
        let base = tx.plan(ctx, base_plan_version_id)?;
        if base.is_locked() {
            return Err(EngineError::PlanLocked {
                plan_version_id: base_plan_version_id,
            });
        }
        let session = RepairSession {
            id: SessionId::new(),
            tenant_id: ctx.tenant_id.clone(),
            site_id: ctx.site_id.clone(),
            base_plan_version_id,
            status: SessionStatus::Open,
            created_at: now,
            expires_at: now + self.ttl,
            created_by: ctx.actor.id.clone(),
            draft: None,
            last_applied_action: None,
            idempotency_keys_seen: BTreeSet::from([key.as_str().to_string()]),
        };
        tx.insert_session(session.clone());
        tx.audit_mut().append(
            ctx,
            now,
            "repair.session_created",
            session.id,
            serde_json::json!({ "base_plan_version_id": base_plan_version_id }),
        );
        tracing::info!(session_id = %session.id, base = %base_plan_version_id, "repair session opened");
        Ok(session)
    }

    pub(crate) fn preview(
        &self,
        tx: &mut Tables,
        ctx: &RequestContext,
        gate: &ComplianceGate,
        session_id: SessionId,
        incident: &Incident,
    ) -> Result<Vec<RepairProposal>, EngineError> {
        let session = tx.session(ctx, session_id)?;
        session.ensure_open()?;
        if incident.absences.is_empty() {
            return Err(EngineError::Validation(
                "incident must name at least one absence".into(),
            ));
        }
        let base_id = session.base_plan_version_id;
        for unit_id in &incident.affected_units {
            tx.unit(ctx, base_id, unit_id)?;
        }
        let units = tx.units(ctx, base_id)?;

        let candidates = self.strategy.propose(&units, incident, self.top_k);
        let mut proposals = Vec::with_capacity(candidates.len());
        for (i, candidate) in candidates.into_iter().enumerate() {
            let resulting = apply_changes(&units, &candidate.changes)?;
            let report = gate.evaluate_units(base_id, &resulting);
            let digest = Sha256Digest::compute_json(&(base_id, &candidate.changes))?;
            proposals.push(RepairProposal {
                proposal_id: format!("rp-{}", digest.short()),
                rank: i + 1,
                score: candidate.score,
                changes: candidate.changes,
                unfilled: candidate.unfilled,
                blocking_violations: report.blocking(),
                rationale: candidate.rationale,
            });
        }

        // ids are content digests, so earlier previews stay preparable
        for proposal in &proposals {
            tx.remember_proposal(session_id, proposal.clone());
        }
        tracing::debug!(
            session_id = %session_id,
            strategy = self.strategy.name(),
            proposals = proposals.len(),
            "repair preview"
        );
        Ok(proposals)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn prepare(
        &self,
        tx: &mut Tables,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        gate: &ComplianceGate,
        session_id: SessionId,
        proposal_id: &str,
        key: &IdempotencyKey,
    ) -> Result<RepairDraft, EngineError> {
        let mut session = tx.session(ctx, session_id)?.clone();
        session.ensure_open()?;
        let proposal = tx
            .proposal(session_id, proposal_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("repair proposal", proposal_id))?;

        let base_id = session.base_plan_version_id;
        if tx.plan(ctx, base_id)?.is_locked() {
            return Err(EngineError::PlanLocked {
                plan_version_id: base_id,
            });
        }
        ensure_no_conflicts(tx, base_id, &proposal.changes)?;

        let resulting_units = apply_changes(&tx.units(ctx, base_id)?, &proposal.changes)?;
        let report = gate.evaluate_units(base_id, &resulting_units);
        let draft = RepairDraft {
            proposal_id: proposal.proposal_id,
            changes: proposal.changes,
            resulting_units,
            violations: report.violations,
            can_publish: report.can_publish,
            prepared_at: now,
        };

        session.draft = Some(draft.clone());
        session.idempotency_keys_seen.insert(key.as_str().to_string());
        tx.put_session(session)?;
        tx.audit_mut().append(
            ctx,
            now,
            "repair.prepared",
            session_id,
            serde_json::json!({ "proposal_id": draft.proposal_id, "can_publish": draft.can_publish }),
        );
        Ok(draft)
    }

    pub(crate) fn apply(
        &self,
        tx: &mut Tables,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        session_id: SessionId,
        key: &IdempotencyKey,
    ) -> Result<PlanVersion, EngineError> {
        let mut session = tx.session(ctx, session_id)?.clone();
        session.ensure_open()?;
        let draft = session
            .draft
            .clone()
            .ok_or_else(|| EngineError::Validation("no prepared draft to apply".into()))?;

        let base = tx.plan(ctx, session.base_plan_version_id)?.clone();
        if base.is_locked() {
            return Err(EngineError::PlanLocked {
                plan_version_id: base.id,
            });
        }
        ensure_no_conflicts(tx, base.id, &draft.changes)?;
        let units = apply_changes(&tx.units(ctx, base.id)?, &draft.changes)?;

        let applied = PlanVersion {
            id: PlanVersionId::new(),
            tenant_id: ctx.tenant_id.clone(),
            site_id: ctx.site_id.clone(),
            version_number: tx.next_version_number(ctx),
            status: PlanStatus::Draft,
            lineage_id: base.lineage_id,
            source_plan_version_id: Some(base.id),
            created_at: now,
            created_by: ctx.actor.id.clone(),
            locked_at: None,
            locked_by: None,
            lock_reason: None,
            reverted_at: None,
        };
        tx.insert_plan(applied.clone(), units)?;
        inherit_pins(tx, ctx, now, base.id, applied.id)?;

        session.transition(SessionStatus::Applied)?;
        session.last_applied_action = Some(AppliedAction {
            applied_version_id: applied.id,
            base_version_id: base.id,
            changes: draft.changes,
            applied_at: now,
        });
        session.idempotency_keys_seen.insert(key.as_str().to_string());
        tx.put_session(session)?;
        tx.audit_mut().append(
            ctx,
            now,
            "repair.applied",
            session_id,
            serde_json::json!({
                "base_plan_version_id": base.id,
                "applied_plan_version_id": applied.id,
            }),
        );
        tracing::info!(
            session_id = %session_id,
            base = %base.id,
            applied = %applied.id,
            version = applied.version_number,
            "repair applied"
        );
        Ok(applied)
    }

    pub(crate) fn undo(
        &self,
        tx: &mut Tables,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        session_id: SessionId,
        key: &IdempotencyKey,
    ) -> Result<PlanVersion, EngineError> {
        let mut session = tx.session(ctx, session_id)?.clone();
        session.ensure_not_expired()?;
        let action = session
            .last_applied_action
            .clone()
            .ok_or(EngineError::NothingToUndo { session_id })?;

        if let Some(published) = tx
            .snapshots_of_plan(action.applied_version_id)
            .find(|s| s.published_at >= session.created_at)
        {
            return Err(EngineError::SnapshotAlreadyPublished {
                snapshot_id: published.id,
                plan_version_id: action.applied_version_id,
            });
        }
        for id in [action.applied_version_id, action.base_version_id] {
            if tx.plan(ctx, id)?.is_locked() {
                return Err(EngineError::PlanLockedNoUndo {
                    plan_version_id: id,
                });
            }
        }

        let mut applied = tx.plan(ctx, action.applied_version_id)?.clone();
        applied.reverted_at = Some(now);
        tx.put_plan(applied)?;

        session.transition(SessionStatus::Open)?;
        session.last_applied_action = None;
        session.draft = None;
        session.idempotency_keys_seen.insert(key.as_str().to_string());
        tx.put_session(session)?;
        tx.audit_mut().append(
            ctx,
            now,
            "repair.undone",
            session_id,
            serde_json::json!({
                "reverted_plan_version_id": action.applied_version_id,
                "restored_plan_version_id": action.base_version_id,
            }),
        );
        tracing::info!(
            session_id = %session_id,
            reverted = %action.applied_version_id,
            "repair undone"
        );
        Ok(tx.plan(ctx, action.base_version_id)?.clone())
    }

    pub(crate) fn close(
        &self,
        tx: &mut Tables,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        session_id: SessionId,
    ) -> Result<RepairSession, EngineError> {
        let mut session = tx.session(ctx, session_id)?.clone();
        if session.status == SessionStatus::Expired {
            return Ok(session);
        }
        session.transition(SessionStatus::Expired)?;
        tx.put_session(session.clone())?;
        tx.audit_mut()
            .append(ctx, now, "repair.session_closed", session_id, serde_json::Value::Null);
        tracing::info!(session_id = %session_id, "repair session closed");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_changes_edits_driver_sets() {
        let units = vec![ScheduleUnit::new("U1", 2).with_driver("d1").with_driver("d2")];
        let out = apply_changes(
            &units,
            &[
                AssignmentChange::Remove {
                    unit_id: "U1".into(),
                    driver_id: "d1".into(),
                },
                AssignmentChange::Add {
                    unit_id: "U1".into(),
                    driver_id: "d9".into(),
                },
            ],
        )
        .unwrap();
        let drivers: Vec<&str> = out[0].drivers.iter().map(DriverId::as_str).collect();
        assert_eq!(drivers, vec!["d2", "d9"]);
    }

    #[test]
    fn apply_changes_rejects_unknown_unit() {
        let err = apply_changes(
            &[],
            &[AssignmentChange::Add {
                unit_id: "nope".into(),
                driver_id: "d1".into(),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn change_serializes_with_op_tag() {
        let json = serde_json::to_value(AssignmentChange::Remove {
            unit_id: "U1".into(),
            driver_id: "d1".into(),
        })
        .unwrap();
        assert_eq!(json["op"], "REMOVE");
        assert_eq!(json["unit_id"], "U1");
    }
}
