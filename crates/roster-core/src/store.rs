//! Transactional in-memory ledger
//!
//! Stands in for the relational store. Rows are sharded by tenant+site, and
//! each shard has its own lock, so scopes never wait on each other. A
//! mutating call runs as one transaction on its shard: the shard's write
//! lock is taken, a working copy is made, due freezes and session expiries
//! are materialized, and the copy is committed only if the operation
//! succeeds. Reads share the shard's read lock and copy nothing.
//!
//! Row writes go through guarded setters that refuse to edit LOCKED plans or
//! frozen snapshots, so the immutability rules hold even if an operation
//! forgets to check them.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use roster_evidence::EvidencePack;

use crate::audit::AuditLog;
use crate::error::EngineError;
use crate::freeze::{LateTelemetryAnomaly, UnitActual};
use crate::idempotency::IdempotencyTable;
use crate::pins::Pin;
use crate::repair::{RepairProposal, RepairSession, SessionStatus};
use crate::types::{
    PlanStatus, PlanVersion, PlanVersionId, RequestContext, ScheduleUnit, SessionId, SiteId,
    Snapshot, SnapshotId, SnapshotStatus, TenantId, UnitId, HORIZON_FREEZE_REASON,
};
use crate::types::PinId;

#[derive(Debug, Clone)]
struct PlanRow {
    version: PlanVersion,
    units: BTreeMap<UnitId, ScheduleUnit>,
}

/// All rows of one tenant+site
#[derive(Debug, Clone, Default)]
pub struct Tables {
    plans: BTreeMap<PlanVersionId, PlanRow>,
    snapshots: BTreeMap<SnapshotId, Snapshot>,
    pins: BTreeMap<PinId, Pin>,
    sessions: BTreeMap<SessionId, RepairSession>,
    proposals: BTreeMap<(SessionId, String), RepairProposal>,
    idempotency: IdempotencyTable,
    audit: AuditLog,
    anomalies: Vec<LateTelemetryAnomaly>,
    actuals: BTreeMap<(PlanVersionId, UnitId), UnitActual>,
    evidence: BTreeMap<String, Arc<EvidencePack>>,
    version_seq: BTreeMap<(TenantId, SiteId), u64>,
    snapshot_seq: BTreeMap<PlanVersionId, u64>,
}

impl Tables {
    // -- cross-cutting ---------------------------------------------------

    pub(crate) fn idempotency(&self) -> &IdempotencyTable {
        &self.idempotency
    }

    pub(crate) fn idempotency_mut(&mut self) -> &mut IdempotencyTable {
        &mut self.idempotency
    }

    pub(crate) fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub(crate) fn audit_mut(&mut self) -> &mut AuditLog {
        &mut self.audit
    }

    /// True if [`Tables::materialize`] would change anything at `now`
    pub(crate) fn has_due(&self, now: DateTime<Utc>) -> bool {
        self.snapshots
            .values()
            .any(|s| !s.is_frozen && now >= s.freeze_until)
            || self
                .sessions
                .values()
                .any(|s| s.status != SessionStatus::Expired && now >= s.expires_at)
    }

    /// Apply time-driven transitions that are due at `now`
    pub(crate) fn materialize(&mut self, now: DateTime<Utc>) {
        for snapshot in self.snapshots.values_mut() {
            if !snapshot.is_frozen && now >= snapshot.freeze_until {
                snapshot.is_frozen = true;
                snapshot.frozen_at = Some(snapshot.freeze_until);
                snapshot.freeze_reason = Some(HORIZON_FREEZE_REASON.to_string());
                tracing::info!(snapshot_id = %snapshot.id, "snapshot frozen by horizon");
            }
        }
        for session in self.sessions.values_mut() {
            if session.status != SessionStatus::Expired && now >= session.expires_at {
                session.status = SessionStatus::Expired;
                tracing::debug!(session_id = %session.id, "repair session expired");
            }
        }
    }

    // -- plan versions ---------------------------------------------------

    pub(crate) fn next_version_number(&mut self, ctx: &RequestContext) -> u64 {
        let seq = self
            .version_seq
            .entry((ctx.tenant_id.clone(), ctx.site_id.clone()))
            .or_insert(0);
        *seq += 1;
        *seq
    }

    pub(crate) fn insert_plan(
        &mut self,
        version: PlanVersion,
        units: Vec<ScheduleUnit>,
    ) -> Result<(), EngineError> {
        if self.plans.contains_key(&version.id) {
            return Err(EngineError::Internal(format!(
                "plan version {} already exists",
                version.id
            )));
        }
        let units = units.into_iter().map(|u| (u.unit_id.clone(), u)).collect();
        self.plans.insert(version.id, PlanRow { version, units });
        Ok(())
    }

    fn plan_row(&self, ctx: &RequestContext, id: PlanVersionId) -> Result<&PlanRow, EngineError> {
        self.plans
            .get(&id)
            .filter(|row| ctx.owns(&row.version.tenant_id, &row.version.site_id))
            .ok_or_else(|| EngineError::not_found("plan version", id))
    }

    pub(crate) fn plan(
        &self,
        ctx: &RequestContext,
        id: PlanVersionId,
    ) -> Result<&PlanVersion, EngineError> {
        self.plan_row(ctx, id).map(|row| &row.version)
    }

    pub(crate) fn plans_for(&self, ctx: &RequestContext) -> Vec<PlanVersion> {
        let mut plans: Vec<PlanVersion> = self
            .plans
            .values()
            .filter(|row| ctx.owns(&row.version.tenant_id, &row.version.site_id))
            .map(|row| row.version.clone())
            .collect();
        plans.sort_by_key(|p| p.version_number);
        plans
    }

    pub(crate) fn units(
        &self,
        ctx: &RequestContext,
        id: PlanVersionId,
    ) -> Result<Vec<ScheduleUnit>, EngineError> {
        Ok(self.plan_row(ctx, id)?.units.values().cloned().collect())
    }

    pub(crate) fn unit(
        &self,
        ctx: &RequestContext,
        id: PlanVersionId,
        unit_id: &UnitId,
    ) -> Result<&ScheduleUnit, EngineError> {
        self.plan_row(ctx, id)?
            .units
            .get(unit_id)
            .ok_or_else(|| EngineError::not_found("unit", unit_id))
    }

    /// Replace a plan version row
    ///
    /// LOCKED rows are immutable and the status can never go back to DRAFT.
    pub(crate) fn put_plan(&mut self, updated: PlanVersion) -> Result<(), EngineError> {
        let row = self
            .plans
            .get_mut(&updated.id)
            .ok_or_else(|| EngineError::not_found("plan version", updated.id))?;
        if row.version.status == PlanStatus::Locked && row.version != updated {
            return Err(EngineError::PlanLocked {
                plan_version_id: updated.id,
            });
        }
        row.version = updated;
        Ok(())
    }

    /// Replace one unit's assignments
    pub(crate) fn put_unit(
        &mut self,
        plan_id: PlanVersionId,
        unit: ScheduleUnit,
    ) -> Result<(), EngineError> {
        if let Some(frozen) = self.frozen_snapshot_of_plan(plan_id) {
            return Err(EngineError::DayFrozen {
                snapshot_id: frozen.id,
            });
        }
        let row = self
            .plans
            .get_mut(&plan_id)
            .ok_or_else(|| EngineError::not_found("plan version", plan_id))?;
        if row.version.status == PlanStatus::Locked {
            return Err(EngineError::PlanLocked {
                plan_version_id: plan_id,
            });
        }
        row.units.insert(unit.unit_id.clone(), unit);
        Ok(())
    }

    // -- snapshots -------------------------------------------------------

    pub(crate) fn next_snapshot_number(&mut self, lineage_id: PlanVersionId) -> u64 {
        let seq = self.snapshot_seq.entry(lineage_id).or_insert(0);
        *seq += 1;
        *seq
    }

    pub(crate) fn insert_snapshot(&mut self, snapshot: Snapshot) -> Result<(), EngineError> {
        if snapshot.status == SnapshotStatus::Active
            && self.active_snapshot(snapshot.lineage_id).is_some()
        {
            return Err(EngineError::Internal(format!(
                "lineage {} already has an ACTIVE snapshot",
                snapshot.lineage_id
            )));
        }
        self.snapshots.insert(snapshot.id, snapshot);
        Ok(())
    }

    pub(crate) fn snapshot(
        &self,
        ctx: &RequestContext,
        id: SnapshotId,
    ) -> Result<&Snapshot, EngineError> {
        self.snapshots
            .get(&id)
            .filter(|s| ctx.owns(&s.tenant_id, &s.site_id))
            .ok_or_else(|| EngineError::not_found("snapshot", id))
    }

    /// Replace a snapshot row
    ///
    /// Once frozen, only the lifecycle status may move forward; the freeze
    /// itself, the hashes and the horizon are permanent.
    pub(crate) fn put_snapshot(&mut self, updated: Snapshot) -> Result<(), EngineError> {
        let current = self
            .snapshots
            .get(&updated.id)
            .ok_or_else(|| EngineError::not_found("snapshot", updated.id))?;
        if current.is_frozen {
            let mut expected = current.clone();
            expected.status = updated.status;
            let status_forward = current.status == updated.status
                || current.status == SnapshotStatus::Active
                || updated.status == SnapshotStatus::Archived;
            if expected != updated || !status_forward {
                return Err(EngineError::DayFrozen {
                    snapshot_id: updated.id,
                });
            }
        }
        self.snapshots.insert(updated.id, updated);
        Ok(())
    }

    pub(crate) fn active_snapshot(&self, lineage_id: PlanVersionId) -> Option<&Snapshot> {
        self.snapshots
            .values()
            .find(|s| s.lineage_id == lineage_id && s.status == SnapshotStatus::Active)
    }

    pub(crate) fn snapshots_of_plan(
        &self,
        plan_id: PlanVersionId,
    ) -> impl Iterator<Item = &Snapshot> {
        self.snapshots
            .values()
            .filter(move |s| s.plan_version_id == plan_id)
    }

    pub(crate) fn frozen_snapshot_of_plan(&self, plan_id: PlanVersionId) -> Option<&Snapshot> {
        self.snapshots_of_plan(plan_id).find(|s| s.is_frozen)
    }

    // -- evidence --------------------------------------------------------

    pub(crate) fn insert_evidence(&mut self, pack: EvidencePack) {
        self.evidence
            .insert(pack.manifest.pack_id.clone(), Arc::new(pack));
    }

    pub(crate) fn evidence(&self, pack_id: &str) -> Option<&EvidencePack> {
        self.evidence.get(pack_id).map(Arc::as_ref)
    }

    // -- pins ------------------------------------------------------------

    fn guard_plan_content(&self, plan_id: PlanVersionId) -> Result<(), EngineError> {
        let row = self
            .plans
            .get(&plan_id)
            .ok_or_else(|| EngineError::not_found("plan version", plan_id))?;
        if row.version.status == PlanStatus::Locked {
            return Err(EngineError::PlanLocked {
                plan_version_id: plan_id,
            });
        }
        if let Some(frozen) = self.frozen_snapshot_of_plan(plan_id) {
            return Err(EngineError::DayFrozen {
                snapshot_id: frozen.id,
            });
        }
        Ok(())
    }

    pub(crate) fn insert_pin(&mut self, pin: Pin) -> Result<(), EngineError> {
        self.guard_plan_content(pin.plan_version_id)?;
        self.pins.insert(pin.id, pin);
        Ok(())
    }

    pub(crate) fn put_pin(&mut self, pin: Pin) -> Result<(), EngineError> {
        self.guard_plan_content(pin.plan_version_id)?;
        self.pins.insert(pin.id, pin);
        Ok(())
    }

    pub(crate) fn pin(&self, ctx: &RequestContext, id: PinId) -> Result<&Pin, EngineError> {
        self.pins
            .get(&id)
            .filter(|p| ctx.owns(&p.tenant_id, &p.site_id))
            .ok_or_else(|| EngineError::not_found("pin", id))
    }

    pub(crate) fn pins_of_plan(&self, plan_id: PlanVersionId) -> Vec<Pin> {
        self.pins
            .values()
            .filter(|p| p.plan_version_id == plan_id)
            .cloned()
            .collect()
    }

    pub(crate) fn active_pins(&self, plan_id: PlanVersionId) -> Vec<Pin> {
        self.pins
            .values()
            .filter(|p| p.plan_version_id == plan_id && p.active)
            .cloned()
            .collect()
    }

    // -- repair sessions -------------------------------------------------

    pub(crate) fn insert_session(&mut self, session: RepairSession) {
        self.sessions.insert(session.id, session);
    }

    pub(crate) fn put_session(&mut self, session: RepairSession) -> Result<(), EngineError> {
        let current = self
            .sessions
            .get(&session.id)
            .ok_or_else(|| EngineError::not_found("repair session", session.id))?;
        if current.status == SessionStatus::Expired && session.status != SessionStatus::Expired {
            return Err(EngineError::SessionExpired {
                session_id: current.id,
                expires_at: current.expires_at,
            });
        }
        self.sessions.insert(session.id, session);
        Ok(())
    }

    pub(crate) fn session(
        &self,
        ctx: &RequestContext,
        id: SessionId,
    ) -> Result<&RepairSession, EngineError> {
        self.sessions
            .get(&id)
            .filter(|s| ctx.owns(&s.tenant_id, &s.site_id))
            .ok_or_else(|| EngineError::not_found("repair session", id))
    }

    /// Keep a previewed proposal; an id already present is left as is
    pub(crate) fn remember_proposal(&mut self, session_id: SessionId, proposal: RepairProposal) {
        self.proposals
            .entry((session_id, proposal.proposal_id.clone()))
            .or_insert(proposal);
    }

    pub(crate) fn proposal(
        &self,
        session_id: SessionId,
        proposal_id: &str,
    ) -> Option<&RepairProposal> {
        self.proposals.get(&(session_id, proposal_id.to_string()))
    }

    // -- telemetry -------------------------------------------------------

    pub(crate) fn push_anomaly(&mut self, anomaly: LateTelemetryAnomaly) {
        self.anomalies.push(anomaly);
    }

    pub(crate) fn anomalies_for(&self, ctx: &RequestContext) -> Vec<LateTelemetryAnomaly> {
        self.anomalies
            .iter()
            .filter(|a| ctx.owns(&a.tenant_id, &a.site_id))
            .cloned()
            .collect()
    }

    pub(crate) fn put_actual(&mut self, actual: UnitActual) -> Result<(), EngineError> {
        if let Some(frozen) = self.frozen_snapshot_of_plan(actual.plan_version_id) {
            return Err(EngineError::DayFrozen {
                snapshot_id: frozen.id,
            });
        }
        self.actuals
            .insert((actual.plan_version_id, actual.unit_id.clone()), actual);
        Ok(())
    }

    pub(crate) fn actuals_of_plan(&self, plan_id: PlanVersionId) -> Vec<UnitActual> {
        self.actuals
            .values()
            .filter(|a| a.plan_version_id == plan_id)
            .cloned()
            .collect()
    }
}

type Shard = Arc<RwLock<Tables>>;

/// [`Tables`] sharded by tenant+site, one writer per shard
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    shards: RwLock<BTreeMap<(TenantId, SiteId), Shard>>,
}

impl Ledger {
    fn shard(&self, ctx: &RequestContext) -> Option<Shard> {
        self.shards
            .read()
            .get(&(ctx.tenant_id.clone(), ctx.site_id.clone()))
            .cloned()
    }

    fn shard_or_create(&self, ctx: &RequestContext) -> Shard {
        if let Some(shard) = self.shard(ctx) {
            return shard;
        }
        Arc::clone(
            self.shards
                .write()
                .entry((ctx.tenant_id.clone(), ctx.site_id.clone()))
                .or_default(),
        )
    }

    /// Run `f` against a working copy of the caller's shard; commit only on `Ok`
    pub(crate) fn transaction<R>(
        &self,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut Tables) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let shard = self.shard_or_create(ctx);
        let mut guard = shard.write();
        let mut working = guard.clone();
        working.materialize(now);
        let out = f(&mut working)?;
        *guard = working;
        Ok(out)
    }

    /// Read the caller's shard as of `now`
    ///
    /// Due freezes and expiries are written through first; that only takes
    /// the write lock when something is actually due.
    pub(crate) fn read<R>(
        &self,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        f: impl FnOnce(&Tables) -> R,
    ) -> R {
        let Some(shard) = self.shard(ctx) else {
            return f(&Tables::default());
        };
        {
            let guard = shard.read();
            if !guard.has_due(now) {
                return f(&*guard);
            }
        }
        let mut guard = shard.write();
        guard.materialize(now);
        f(&*guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Actor, Role, SnapshotHashes};
    use chrono::Duration;
    use roster_evidence::Sha256Digest;

    fn ctx() -> RequestContext {
        RequestContext::new("t", "s", Actor::new("a", Role::Admin)).unwrap()
    }

    fn plan(ctx: &RequestContext, status: PlanStatus) -> PlanVersion {
        let id = PlanVersionId::new();
        PlanVersion {
            id,
            tenant_id: ctx.tenant_id.clone(),
            site_id: ctx.site_id.clone(),
            version_number: 1,
            status,
            lineage_id: id,
            source_plan_version_id: None,
            created_at: Utc::now(),
            created_by: "a".into(),
            locked_at: None,
            locked_by: None,
            lock_reason: None,
            reverted_at: None,
        }
    }

    fn snapshot(plan: &PlanVersion, freeze_until: DateTime<Utc>) -> Snapshot {
        let digest = Sha256Digest::compute(b"x");
        Snapshot {
            id: SnapshotId::new(),
            tenant_id: plan.tenant_id.clone(),
            site_id: plan.site_id.clone(),
            lineage_id: plan.lineage_id,
            plan_version_id: plan.id,
            version_number: 1,
            status: SnapshotStatus::Active,
            published_at: Utc::now(),
            published_by: "a".into(),
            publish_reason: None,
            freeze_until,
            is_frozen: false,
            frozen_at: None,
            frozen_by: None,
            freeze_reason: None,
            hashes: SnapshotHashes {
                input: digest,
                matrix: digest,
                output: digest,
                evidence: digest,
            },
            evidence_ref: None,
        }
    }

    #[test]
    fn locked_plan_rejects_unit_and_status_writes() {
        let ctx = ctx();
        let mut tables = Tables::default();
        let locked = plan(&ctx, PlanStatus::Locked);
        tables.insert_plan(locked.clone(), vec![]).unwrap();

        let err = tables
            .put_unit(locked.id, ScheduleUnit::new("u1", 1))
            .unwrap_err();
        assert!(matches!(err, EngineError::PlanLocked { .. }));

        let mut reopened = locked.clone();
        reopened.status = PlanStatus::Draft;
        assert!(matches!(
            tables.put_plan(reopened),
            Err(EngineError::PlanLocked { .. })
        ));
        assert!(tables.put_plan(locked).is_ok());
    }

    #[test]
    fn frozen_snapshot_fields_are_permanent() {
        let ctx = ctx();
        let mut tables = Tables::default();
        let p = plan(&ctx, PlanStatus::Draft);
        tables.insert_plan(p.clone(), vec![]).unwrap();
        let mut s = snapshot(&p, Utc::now() + Duration::minutes(60));
        s.is_frozen = true;
        tables.insert_snapshot(s.clone()).unwrap();

        let mut unfrozen = s.clone();
        unfrozen.is_frozen = false;
        assert!(matches!(
            tables.put_snapshot(unfrozen),
            Err(EngineError::DayFrozen { .. })
        ));

        let mut extended = s.clone();
        extended.freeze_until += Duration::minutes(5);
        assert!(tables.put_snapshot(extended).is_err());

        let mut archived = s.clone();
        archived.status = SnapshotStatus::Archived;
        assert!(tables.put_snapshot(archived.clone()).is_ok());

        let mut revived = archived;
        revived.status = SnapshotStatus::Active;
        assert!(tables.put_snapshot(revived).is_err());
    }

    #[test]
    fn materialize_freezes_due_snapshots() {
        let ctx = ctx();
        let mut tables = Tables::default();
        let p = plan(&ctx, PlanStatus::Draft);
        tables.insert_plan(p.clone(), vec![]).unwrap();
        let horizon = Utc::now();
        let s = snapshot(&p, horizon);
        tables.insert_snapshot(s.clone()).unwrap();

        tables.materialize(horizon - Duration::seconds(1));
        assert!(!tables.snapshot(&ctx, s.id).unwrap().is_frozen);

        tables.materialize(horizon);
        let frozen = tables.snapshot(&ctx, s.id).unwrap();
        assert!(frozen.is_frozen);
        assert_eq!(frozen.frozen_at, Some(horizon));
        assert!(matches!(
            tables.put_unit(p.id, ScheduleUnit::new("u", 1)),
            Err(EngineError::DayFrozen { .. })
        ));
    }

    #[test]
    fn rows_are_tenant_scoped() {
        let ctx = ctx();
        let other = RequestContext::new("t2", "s", Actor::new("a", Role::Admin)).unwrap();
        let mut tables = Tables::default();
        let p = plan(&ctx, PlanStatus::Draft);
        tables.insert_plan(p.clone(), vec![]).unwrap();
        assert!(tables.plan(&ctx, p.id).is_ok());
        assert!(matches!(
            tables.plan(&other, p.id),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let ledger = Ledger::default();
        let ctx = ctx();
        let p = plan(&ctx, PlanStatus::Draft);
        let result: Result<(), EngineError> = ledger.transaction(&ctx, Utc::now(), |tx| {
            tx.insert_plan(p.clone(), vec![])?;
            Err(EngineError::Validation("abort".into()))
        });
        assert!(result.is_err());
        assert!(ledger.read(&ctx, Utc::now(), |t| t.plans_for(&ctx).is_empty()));
    }

    #[test]
    fn read_materializes_a_due_horizon() {
        let ledger = Ledger::default();
        let ctx = ctx();
        let p = plan(&ctx, PlanStatus::Draft);
        let horizon = Utc::now();
        let s = snapshot(&p, horizon);
        ledger
            .transaction(&ctx, horizon - Duration::minutes(1), |tx| {
                tx.insert_plan(p.clone(), vec![])?;
                tx.insert_snapshot(s.clone())
            })
            .unwrap();

        let before = ledger.read(&ctx, horizon - Duration::seconds(1), |t| {
            t.snapshot(&ctx, s.id).map(|s| s.is_frozen)
        });
        assert!(!before.unwrap());

        let after = ledger.read(&ctx, horizon, |t| t.snapshot(&ctx, s.id).cloned()).unwrap();
        assert!(after.is_frozen);
        assert_eq!(after.frozen_at, Some(horizon));
        assert!(!ledger.read(&ctx, horizon, |t| t.has_due(horizon)));
    }

    #[test]
    fn scopes_live_in_separate_shards() {
        let ledger = Ledger::default();
        let a = ctx();
        let b = RequestContext::new("t2", "s", Actor::new("a", Role::Admin)).unwrap();
        let pa = plan(&a, PlanStatus::Draft);
        ledger
            .transaction(&a, Utc::now(), |tx| tx.insert_plan(pa.clone(), vec![]))
            .unwrap();

        assert_eq!(ledger.read(&a, Utc::now(), |t| t.plans_for(&a).len()), 1);
        assert!(ledger.read(&b, Utc::now(), |t| t.plans_for(&b).is_empty()));
        assert_eq!(ledger.shards.read().len(), 1);
    }

    #[test]
    fn transactions_on_different_scopes_run_in_parallel() {
        let ledger = std::sync::Arc::new(Ledger::default());
        let a = ctx();
        let b = RequestContext::new("t2", "s", Actor::new("a", Role::Admin)).unwrap();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        // holds scope a's write lock until released
        let held = {
            let ledger = std::sync::Arc::clone(&ledger);
            let a = a.clone();
            std::thread::spawn(move || {
                ledger.transaction(&a, Utc::now(), |tx| {
                    tx.insert_plan(plan(&a, PlanStatus::Draft), vec![])?;
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(())
                })
            })
        };
        entered_rx.recv().unwrap();

        let pb = plan(&b, PlanStatus::Draft);
        ledger
            .transaction(&b, Utc::now(), |tx| tx.insert_plan(pb.clone(), vec![]))
            .unwrap();
        assert_eq!(ledger.read(&b, Utc::now(), |t| t.plans_for(&b).len()), 1);

        release_tx.send(()).unwrap();
        held.join().unwrap().unwrap();
        assert_eq!(ledger.read(&a, Utc::now(), |t| t.plans_for(&a).len()), 1);
    }
}
