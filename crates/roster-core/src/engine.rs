//! `RosterEngine`: the facade that validates context, checks roles and runs
//! every mutation as one ledger transaction

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use roster_evidence::{
    verify_signed, EvidenceManifest, EvidencePack, EvidencePackBuilder, EvidenceSigner,
    VerificationReport,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::api::*;
use crate::audit::AuditRecord;
use crate::clock::{Clock, SystemClock};
use crate::compliance::{ComplianceGate, ComplianceReport};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::freeze::{
    FreezeGuard, LateTelemetryAnomaly, MutationDecision, MutationSource, MutationTarget,
    TelemetryEvent, TelemetryOutcome,
};
use crate::idempotency::{run_keyed, IdempotencyKey};
use crate::pins::{self, Pin, PinTarget};
use crate::plan_store::{AssignmentSolver, PlanVersionStore};
use crate::repair::{
    Incident, LeastLoadedStrategy, RepairDraft, RepairOrchestrator, RepairProposal,
    RepairSession, RepairStrategy,
};
use crate::store::{Ledger, Tables};
use crate::types::*;

/// Audit pack file names
pub const AUDIT_PACK_FILES: [&str; 6] = [
    "snapshot.json",
    "assignments.json",
    "violations.json",
    "audit_log.json",
    "anomalies.json",
    "snapshot_manifest.json",
];

/// Main engine handle that implements all operational traits
pub struct RosterEngine {
    config: EngineConfig,
    ledger: Ledger,
    clock: Arc<dyn Clock>,
    signer: EvidenceSigner,
    plans: PlanVersionStore,
    freeze: FreezeGuard,
    compliance: ComplianceGate,
    repairs: RepairOrchestrator,
}

impl std::fmt::Debug for RosterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RosterEngine")
            .field("config", &self.config)
            .field("signer", &self.signer)
            .field("compliance", &self.compliance)
            .field("repairs", &self.repairs)
            .finish_non_exhaustive()
    }
}

impl RosterEngine {
    /// Engine on the wall clock with the default rules and strategy
    #[must_use]
    pub fn new(config: EngineConfig, signer: EvidenceSigner) -> Self {
        let freeze = FreezeGuard::new(config.freeze_horizon());
        let repairs = RepairOrchestrator::new(
            Box::new(LeastLoadedStrategy),
            config.proposal_top_k,
            config.session_ttl(),
        );
        Self {
            config,
            ledger: Ledger::default(),
            clock: Arc::new(SystemClock),
            signer,
            plans: PlanVersionStore,
            freeze,
            compliance: ComplianceGate::default(),
            repairs,
        }
    }

    /// Replace the time source
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the preview ranking strategy
    #[must_use]
    pub fn with_repair_strategy(mut self, strategy: impl RepairStrategy + 'static) -> Self {
        self.repairs = RepairOrchestrator::new(
            Box::new(strategy),
            self.config.proposal_top_k,
            self.config.session_ttl(),
        );
        self
    }

    /// Replace the compliance rule set
    #[must_use]
    pub fn with_compliance_gate(mut self, gate: ComplianceGate) -> Self {
        self.compliance = gate;
        self
    }

    /// Configuration the engine was built with
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current time on the engine's clock
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn run<R>(
        &self,
        ctx: &RequestContext,
        f: impl FnOnce(&mut Tables, DateTime<Utc>) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        ctx.validate()?;
        let now = self.clock.now();
        self.ledger.transaction(ctx, now, |tx| f(tx, now))
    }

    fn view<R>(
        &self,
        ctx: &RequestContext,
        f: impl FnOnce(&Tables) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        ctx.validate()?;
        self.ledger.read(ctx, self.clock.now(), f)
    }

    fn run_idempotent<Req, Resp>(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        raw_key: Option<&str>,
        request: &Req,
        f: impl FnOnce(&mut Tables, DateTime<Utc>, &IdempotencyKey) -> Result<Resp, EngineError>,
    ) -> Result<Resp, EngineError>
    where
        Req: Serialize,
        Resp: Serialize + DeserializeOwned,
    {
        ctx.validate()?;
        let key = IdempotencyKey::parse(raw_key, operation, self.config.max_idempotency_key_len)?;
        let now = self.clock.now();
        self.ledger.transaction(ctx, now, |tx| {
            run_keyed(tx, ctx, operation, &key, request, |tx| f(tx, now, &key))
        })
    }
}

impl PlanLifecycle for RosterEngine {
    fn create_plan(
        &self,
        ctx: &RequestContext,
        source: Option<PlanVersionId>,
    ) -> Result<PlanVersion, EngineError> {
        ctx.require_role(Role::Dispatcher, "create plan version")?;
        self.run(ctx, |tx, now| self.plans.create(tx, ctx, now, source))
    }

    fn create_plan_from_solver(
        &self,
        ctx: &RequestContext,
        solver: &dyn AssignmentSolver,
        request: &SolveRequest,
    ) -> Result<PlanVersion, EngineError> {
        ctx.validate()?;
        ctx.require_role(Role::Dispatcher, "create plan version")?;
        let units = solver.propose(request)?;
        self.run(ctx, |tx, now| {
            self.plans.create_from_units(tx, ctx, now, request, units)
        })
    }

    fn plan(&self, ctx: &RequestContext, id: PlanVersionId) -> Result<PlanVersion, EngineError> {
        self.view(ctx, |tx| tx.plan(ctx, id).cloned())
    }

    fn plans(&self, ctx: &RequestContext) -> Result<Vec<PlanVersion>, EngineError> {
        self.view(ctx, |tx| Ok(tx.plans_for(ctx)))
    }

    fn plan_units(
        &self,
        ctx: &RequestContext,
        id: PlanVersionId,
    ) -> Result<Vec<ScheduleUnit>, EngineError> {
        self.view(ctx, |tx| tx.units(ctx, id))
    }

    fn upsert_unit(
        &self,
        ctx: &RequestContext,
        id: PlanVersionId,
        unit: ScheduleUnit,
    ) -> Result<ScheduleUnit, EngineError> {
        ctx.require_role(Role::Dispatcher, "edit assignments")?;
        self.run(ctx, |tx, now| {
            self.plans.upsert_unit(tx, ctx, now, &self.freeze, id, unit)
        })
    }

    fn assign_driver(
        &self,
        ctx: &RequestContext,
        id: PlanVersionId,
        unit_id: &UnitId,
        driver_id: &DriverId,
    ) -> Result<ScheduleUnit, EngineError> {
        ctx.require_role(Role::Dispatcher, "edit assignments")?;
        self.run(ctx, |tx, now| {
            self.plans
                .assign_driver(tx, ctx, now, &self.freeze, id, unit_id, driver_id.clone())
        })
    }

    fn unassign_driver(
        &self,
        ctx: &RequestContext,
        id: PlanVersionId,
        unit_id: &UnitId,
        driver_id: &DriverId,
    ) -> Result<ScheduleUnit, EngineError> {
        ctx.require_role(Role::Dispatcher, "edit assignments")?;
        self.run(ctx, |tx, now| {
            self.plans
                .unassign_driver(tx, ctx, now, &self.freeze, id, unit_id, driver_id)
        })
    }

    fn lock_plan(
        &self,
        ctx: &RequestContext,
        id: PlanVersionId,
        reason: &str,
        confirm: bool,
    ) -> Result<PlanVersion, EngineError> {
        if !confirm {
            return Err(EngineError::ConfirmationRequired {
                action: "lock plan version",
            });
        }
        ctx.require_role(Role::Approver, "lock plan version")?;
        self.run(ctx, |tx, now| self.plans.lock(tx, ctx, now, id, reason))
    }
}

impl FreezeControl for RosterEngine {
    fn publish(
        &self,
        ctx: &RequestContext,
        plan_version_id: PlanVersionId,
        idempotency_key: Option<&str>,
        reason: Option<&str>,
    ) -> Result<Snapshot, EngineError> {
        ctx.require_role(Role::Dispatcher, "publish snapshot")?;
        let request = serde_json::json!({ "plan_version_id": plan_version_id, "reason": reason });
        self.run_idempotent(ctx, "publish", idempotency_key, &request, |tx, now, _| {
            self.freeze.publish(
                tx,
                ctx,
                now,
                &self.compliance,
                &self.signer,
                plan_version_id,
                reason,
            )
        })
    }

    fn manual_freeze(
        &self,
        ctx: &RequestContext,
        snapshot_id: SnapshotId,
        reason: &str,
    ) -> Result<Snapshot, EngineError> {
        ctx.require_role(Role::Approver, "freeze snapshot")?;
        self.run(ctx, |tx, now| {
            self.freeze.manual_freeze(tx, ctx, now, snapshot_id, reason)
        })
    }

    fn snapshot(&self, ctx: &RequestContext, id: SnapshotId) -> Result<Snapshot, EngineError> {
        self.view(ctx, |tx| tx.snapshot(ctx, id).cloned())
    }

    fn active_snapshot(
        &self,
        ctx: &RequestContext,
        plan_version_id: PlanVersionId,
    ) -> Result<Option<Snapshot>, EngineError> {
        self.view(ctx, |tx| {
            let lineage = tx.plan(ctx, plan_version_id)?.lineage_id;
            Ok(tx.active_snapshot(lineage).cloned())
        })
    }

    fn check_mutation(
        &self,
        ctx: &RequestContext,
        target: &MutationTarget,
        source: MutationSource,
    ) -> Result<MutationDecision, EngineError> {
        self.run(ctx, |tx, now| {
            self.freeze
                .check_mutation(tx, ctx, now, target, source, serde_json::Value::Null)
        })
    }

    fn ingest_telemetry(
        &self,
        ctx: &RequestContext,
        event: &TelemetryEvent,
    ) -> Result<TelemetryOutcome, EngineError> {
        self.run(ctx, |tx, now| self.freeze.ingest_telemetry(tx, ctx, now, event))
    }

    fn anomalies(&self, ctx: &RequestContext) -> Result<Vec<LateTelemetryAnomaly>, EngineError> {
        self.view(ctx, |tx| Ok(tx.anomalies_for(ctx)))
    }
}

impl ComplianceCheck for RosterEngine {
    fn evaluate(
        &self,
        ctx: &RequestContext,
        plan_version_id: PlanVersionId,
    ) -> Result<ComplianceReport, EngineError> {
        self.view(ctx, |tx| self.compliance.evaluate(tx, ctx, plan_version_id))
    }
}

impl PinManager for RosterEngine {
    fn add_pin(
        &self,
        ctx: &RequestContext,
        plan_version_id: PlanVersionId,
        target: PinTarget,
        reason: &str,
        idempotency_key: Option<&str>,
    ) -> Result<Pin, EngineError> {
        ctx.require_role(Role::Dispatcher, "add pin")?;
        let request = serde_json::json!({
            "plan_version_id": plan_version_id,
            "target": target,
            "reason": reason,
        });
        self.run_idempotent(ctx, "add_pin", idempotency_key, &request, |tx, now, _| {
            pins::add_pin(tx, ctx, now, plan_version_id, target, reason)
        })
    }

    fn remove_pin(&self, ctx: &RequestContext, pin_id: PinId) -> Result<Pin, EngineError> {
        ctx.require_role(Role::Dispatcher, "remove pin")?;
        self.run(ctx, |tx, now| pins::remove_pin(tx, ctx, now, pin_id))
    }

    fn pins(
        &self,
        ctx: &RequestContext,
        plan_version_id: PlanVersionId,
    ) -> Result<Vec<Pin>, EngineError> {
        self.view(ctx, |tx| {
            tx.plan(ctx, plan_version_id)?;
            Ok(tx.pins_of_plan(plan_version_id))
        })
    }
}

impl RepairControl for RosterEngine {
    fn create_repair_session(
        &self,
        ctx: &RequestContext,
        base_plan_version_id: PlanVersionId,
        idempotency_key: Option<&str>,
    ) -> Result<RepairSession, EngineError> {
        ctx.require_role(Role::Dispatcher, "open repair session")?;
        let request = serde_json::json!({ "base_plan_version_id": base_plan_version_id });
        ctx.validate()?;
        let key = IdempotencyKey::parse(
            idempotency_key,
            "create_repair_session",
            self.config.max_idempotency_key_len,
        )?;
        let now = self.clock.now();
        self.ledger.transaction(ctx, now, |tx| {
            let created: RepairSession =
                run_keyed(tx, ctx, "create_repair_session", &key, &request, |tx| {
                    self.repairs
                        .create_session(tx, ctx, now, base_plan_version_id, &key)
                })?;
            // a replay reports the session as it is now
            tx.session(ctx, created.id).cloned()
        })
    }

    fn preview_repair(
        &self,
        ctx: &RequestContext,
        session_id: SessionId,
        incident: &Incident,
    ) -> Result<Vec<RepairProposal>, EngineError> {
        ctx.require_role(Role::Dispatcher, "preview repair")?;
        self.run(ctx, |tx, _| {
            self.repairs
                .preview(tx, ctx, &self.compliance, session_id, incident)
        })
    }

    fn prepare_repair(
        &self,
        ctx: &RequestContext,
        session_id: SessionId,
        proposal_id: &str,
        idempotency_key: Option<&str>,
    ) -> Result<RepairDraft, EngineError> {
        ctx.require_role(Role::Dispatcher, "prepare repair")?;
        let request = serde_json::json!({ "session_id": session_id, "proposal_id": proposal_id });
        self.run_idempotent(ctx, "prepare_repair", idempotency_key, &request, |tx, now, key| {
            self.repairs.prepare(
                tx,
                ctx,
                now,
                &self.compliance,
                session_id,
                proposal_id,
                key,
            )
        })
    }

    fn apply_repair(
        &self,
        ctx: &RequestContext,
        session_id: SessionId,
        idempotency_key: Option<&str>,
    ) -> Result<PlanVersion, EngineError> {
        ctx.require_role(Role::Dispatcher, "apply repair")?;
        let request = serde_json::json!({ "session_id": session_id });
        self.run_idempotent(ctx, "apply_repair", idempotency_key, &request, |tx, now, key| {
            self.repairs.apply(tx, ctx, now, session_id, key)
        })
    }

    fn undo_repair(
        &self,
        ctx: &RequestContext,
        session_id: SessionId,
        idempotency_key: Option<&str>,
    ) -> Result<PlanVersion, EngineError> {
        ctx.require_role(Role::Dispatcher, "undo repair")?;
        let request = serde_json::json!({ "session_id": session_id });
        self.run_idempotent(ctx, "undo_repair", idempotency_key, &request, |tx, now, key| {
            self.repairs.undo(tx, ctx, now, session_id, key)
        })
    }

    fn close_repair_session(
        &self,
        ctx: &RequestContext,
        session_id: SessionId,
    ) -> Result<RepairSession, EngineError> {
        ctx.require_role(Role::Dispatcher, "close repair session")?;
        self.run(ctx, |tx, now| self.repairs.close(tx, ctx, now, session_id))
    }

    fn repair_session(
        &self,
        ctx: &RequestContext,
        session_id: SessionId,
    ) -> Result<RepairSession, EngineError> {
        self.view(ctx, |tx| tx.session(ctx, session_id).cloned())
    }
}

impl EvidenceExport for RosterEngine {
    fn snapshot_evidence(
        &self,
        ctx: &RequestContext,
        snapshot_id: SnapshotId,
    ) -> Result<EvidencePack, EngineError> {
        self.view(ctx, |tx| {
            let snapshot = tx.snapshot(ctx, snapshot_id)?;
            snapshot
                .evidence_ref
                .as_deref()
                .and_then(|pack_id| tx.evidence(pack_id))
                .cloned()
                .ok_or_else(|| EngineError::not_found("evidence pack", snapshot_id))
        })
    }

    fn export_audit_pack(
        &self,
        ctx: &RequestContext,
        snapshot_id: SnapshotId,
    ) -> Result<EvidencePack, EngineError> {
        ctx.require_role(Role::Approver, "export audit pack")?;
        self.run(ctx, |tx, now| {
            let snapshot = tx.snapshot(ctx, snapshot_id)?.clone();
            let units = tx.units(ctx, snapshot.plan_version_id)?;
            let report = self.compliance.evaluate_units(snapshot.plan_version_id, &units);
            let anomalies: Vec<LateTelemetryAnomaly> = tx
                .anomalies_for(ctx)
                .into_iter()
                .filter(|a| a.snapshot_id == snapshot_id)
                .collect();
            let publish_manifest = snapshot
                .evidence_ref
                .as_deref()
                .and_then(|pack_id| tx.evidence(pack_id))
                .map(|pack| pack.manifest.clone());

            let [snapshot_f, assignments_f, violations_f, audit_f, anomalies_f, manifest_f] =
                AUDIT_PACK_FILES;
            let pack = EvidencePackBuilder::new(format!(
                "audit-{snapshot_id}-{}",
                now.timestamp_millis()
            ))
            .json_file(snapshot_f, &snapshot)?
            .json_file(assignments_f, &units)?
            .json_file(violations_f, &report.violations)?
            .json_file(audit_f, &tx.audit().records_for(ctx))?
            .json_file(anomalies_f, &anomalies)?
            .json_file(manifest_f, &publish_manifest)?
            .build(&self.signer, now)?;

            tx.audit_mut().append(
                ctx,
                now,
                "evidence.exported",
                snapshot_id,
                serde_json::json!({
                    "pack_id": pack.manifest.pack_id,
                    "overall_hash": pack.manifest.overall_hash,
                }),
            );
            tracing::info!(
                snapshot_id = %snapshot_id,
                pack_id = %pack.manifest.pack_id,
                "audit pack exported"
            );
            Ok(pack)
        })
    }

    fn verify_evidence(
        &self,
        manifest: &EvidenceManifest,
        files: &BTreeMap<String, Vec<u8>>,
    ) -> VerificationReport {
        verify_signed(manifest, files, &self.signer)
    }

    fn audit_trail(&self, ctx: &RequestContext) -> Result<Vec<AuditRecord>, EngineError> {
        self.view(ctx, |tx| Ok(tx.audit().records_for(ctx)))
    }

    fn verify_audit_chain(&self, ctx: &RequestContext) -> Result<(), EngineError> {
        ctx.require_role(Role::Approver, "verify audit chain")?;
        self.view(ctx, |tx| tx.audit().verify_integrity())
    }
}
