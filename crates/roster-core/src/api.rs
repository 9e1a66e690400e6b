//! Operation surface of the engine
//!
//! Grouped by component. Every call takes the caller's [`RequestContext`];
//! keyed operations take the raw idempotency key so a missing key is reported
//! as `IDEMPOTENCY_KEY_REQUIRED` rather than being impossible to express.

use std::collections::BTreeMap;

use roster_evidence::{EvidenceManifest, EvidencePack, VerificationReport};

use crate::audit::AuditRecord;
use crate::compliance::ComplianceReport;
use crate::error::EngineError;
use crate::freeze::{
    LateTelemetryAnomaly, MutationDecision, MutationSource, MutationTarget, TelemetryEvent,
    TelemetryOutcome,
};
use crate::pins::{Pin, PinTarget};
use crate::plan_store::AssignmentSolver;
use crate::repair::{Incident, RepairDraft, RepairProposal, RepairSession};
use crate::types::{
    DriverId, PinId, PlanVersion, PlanVersionId, RequestContext, ScheduleUnit, SessionId,
    Snapshot, SnapshotId, SolveRequest, UnitId,
};

/// Plan version creation, reads and assignment edits
pub trait PlanLifecycle {
    /// New DRAFT version, optionally copying a source version's units
    fn create_plan(
        &self,
        ctx: &RequestContext,
        source: Option<PlanVersionId>,
    ) -> Result<PlanVersion, EngineError>;

    /// New DRAFT version holding the solver's candidate assignments
    fn create_plan_from_solver(
        &self,
        ctx: &RequestContext,
        solver: &dyn AssignmentSolver,
        request: &SolveRequest,
    ) -> Result<PlanVersion, EngineError>;

    /// One version of the caller's tenant and site
    fn plan(&self, ctx: &RequestContext, id: PlanVersionId) -> Result<PlanVersion, EngineError>;
    /// Every version in scope, oldest first
    fn plans(&self, ctx: &RequestContext) -> Result<Vec<PlanVersion>, EngineError>;
    /// Assignment units of a version
    fn plan_units(
        &self,
        ctx: &RequestContext,
        id: PlanVersionId,
    ) -> Result<Vec<ScheduleUnit>, EngineError>;

    /// Insert or replace a unit while the version is editable
    fn upsert_unit(
        &self,
        ctx: &RequestContext,
        id: PlanVersionId,
        unit: ScheduleUnit,
    ) -> Result<ScheduleUnit, EngineError>;

    /// Add a driver to a unit
    fn assign_driver(
        &self,
        ctx: &RequestContext,
        id: PlanVersionId,
        unit_id: &UnitId,
        driver_id: &DriverId,
    ) -> Result<ScheduleUnit, EngineError>;

    /// Remove a driver from a unit
    fn unassign_driver(
        &self,
        ctx: &RequestContext,
        id: PlanVersionId,
        unit_id: &UnitId,
        driver_id: &DriverId,
    ) -> Result<ScheduleUnit, EngineError>;

    /// Irreversibly lock a version; repeated calls return the locked row
    fn lock_plan(
        &self,
        ctx: &RequestContext,
        id: PlanVersionId,
        reason: &str,
        confirm: bool,
    ) -> Result<PlanVersion, EngineError>;
}

/// Snapshot publish, freeze and late telemetry
pub trait FreezeControl {
    /// Seal the version's content into an ACTIVE snapshot
    ///
    /// Keyed: a replay returns the stored snapshot.
    fn publish(
        &self,
        ctx: &RequestContext,
        plan_version_id: PlanVersionId,
        idempotency_key: Option<&str>,
        reason: Option<&str>,
    ) -> Result<Snapshot, EngineError>;

    /// Freeze an open snapshot now; needs approver
    fn manual_freeze(
        &self,
        ctx: &RequestContext,
        snapshot_id: SnapshotId,
        reason: &str,
    ) -> Result<Snapshot, EngineError>;

    /// One snapshot in scope
    fn snapshot(&self, ctx: &RequestContext, id: SnapshotId) -> Result<Snapshot, EngineError>;

    /// ACTIVE snapshot of the lineage `plan_version_id` belongs to
    fn active_snapshot(
        &self,
        ctx: &RequestContext,
        plan_version_id: PlanVersionId,
    ) -> Result<Option<Snapshot>, EngineError>;

    /// Denied telemetry checks are recorded as anomalies
    fn check_mutation(
        &self,
        ctx: &RequestContext,
        target: &MutationTarget,
        source: MutationSource,
    ) -> Result<MutationDecision, EngineError>;

    /// Apply actuals, or quarantine them when the day is frozen
    fn ingest_telemetry(
        &self,
        ctx: &RequestContext,
        event: &TelemetryEvent,
    ) -> Result<TelemetryOutcome, EngineError>;

    /// Quarantined telemetry in scope
    fn anomalies(&self, ctx: &RequestContext) -> Result<Vec<LateTelemetryAnomaly>, EngineError>;
}

/// Pure compliance evaluation
pub trait ComplianceCheck {
    /// Violations of a version and whether it may publish
    fn evaluate(
        &self,
        ctx: &RequestContext,
        plan_version_id: PlanVersionId,
    ) -> Result<ComplianceReport, EngineError>;
}

/// Manual pins that automated repair must respect
pub trait PinManager {
    /// Pin a unit or one driver on it
    fn add_pin(
        &self,
        ctx: &RequestContext,
        plan_version_id: PlanVersionId,
        target: PinTarget,
        reason: &str,
        idempotency_key: Option<&str>,
    ) -> Result<Pin, EngineError>;

    /// Deactivate a pin; removing twice is a no-op
    fn remove_pin(&self, ctx: &RequestContext, pin_id: PinId) -> Result<Pin, EngineError>;

    /// Every pin of a version, active or not
    fn pins(
        &self,
        ctx: &RequestContext,
        plan_version_id: PlanVersionId,
    ) -> Result<Vec<Pin>, EngineError>;
}

/// Preview, prepare, apply and undo of emergency repairs
pub trait RepairControl {
    /// Open a session over a base version; a replay returns that session
    fn create_repair_session(
        &self,
        ctx: &RequestContext,
        base_plan_version_id: PlanVersionId,
        idempotency_key: Option<&str>,
    ) -> Result<RepairSession, EngineError>;

    /// Rank candidate repairs for an incident without touching the plan
    fn preview_repair(
        &self,
        ctx: &RequestContext,
        session_id: SessionId,
        incident: &Incident,
    ) -> Result<Vec<RepairProposal>, EngineError>;

    /// Pin-check a previewed proposal and keep it as the session's draft
    fn prepare_repair(
        &self,
        ctx: &RequestContext,
        session_id: SessionId,
        proposal_id: &str,
        idempotency_key: Option<&str>,
    ) -> Result<RepairDraft, EngineError>;

    /// Write the draft as a new DRAFT version descended from the base
    fn apply_repair(
        &self,
        ctx: &RequestContext,
        session_id: SessionId,
        idempotency_key: Option<&str>,
    ) -> Result<PlanVersion, EngineError>;

    /// Revert the last apply and return the base
    fn undo_repair(
        &self,
        ctx: &RequestContext,
        session_id: SessionId,
        idempotency_key: Option<&str>,
    ) -> Result<PlanVersion, EngineError>;

    /// Expire the session now
    fn close_repair_session(
        &self,
        ctx: &RequestContext,
        session_id: SessionId,
    ) -> Result<RepairSession, EngineError>;

    /// Session as it is now
    fn repair_session(
        &self,
        ctx: &RequestContext,
        session_id: SessionId,
    ) -> Result<RepairSession, EngineError>;
}

/// Evidence packs and the audit trail
pub trait EvidenceExport {
    /// Pack sealed when the snapshot was published
    fn snapshot_evidence(
        &self,
        ctx: &RequestContext,
        snapshot_id: SnapshotId,
    ) -> Result<EvidencePack, EngineError>;

    /// Seal snapshot, assignments, violations, audit log and anomalies
    /// into one signed pack; needs approver
    fn export_audit_pack(
        &self,
        ctx: &RequestContext,
        snapshot_id: SnapshotId,
    ) -> Result<EvidencePack, EngineError>;

    /// Per-file, aggregate and signature check with the engine's key
    fn verify_evidence(
        &self,
        manifest: &EvidenceManifest,
        files: &BTreeMap<String, Vec<u8>>,
    ) -> VerificationReport;

    /// The caller's audit chain, in order
    fn audit_trail(&self, ctx: &RequestContext) -> Result<Vec<AuditRecord>, EngineError>;

    /// Walk the caller's audit chain; needs approver
    fn verify_audit_chain(&self, ctx: &RequestContext) -> Result<(), EngineError>;
}
