//! Plan version store
//!
//! Versions are created DRAFT, edited only while DRAFT and unfrozen, and
//! locked once. Lock has no inverse.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::freeze::{FreezeGuard, MutationDecision, MutationSource, MutationTarget};
use crate::pins;
use crate::store::Tables;
use crate::types::{
    DriverId, PlanStatus, PlanVersion, PlanVersionId, RequestContext, ScheduleUnit, SolveRequest,
    UnitId,
};

/// External assignment solver
///
/// The engine treats it as opaque: demand in, candidate units out.
pub trait AssignmentSolver: Send + Sync {
    /// Propose assignments for `request`
    ///
    /// # Errors
    /// Any failure is surfaced to the caller unchanged
    fn propose(&self, request: &SolveRequest) -> Result<Vec<ScheduleUnit>, EngineError>;
}

/// Plan version lifecycle
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanVersionStore;

impl PlanVersionStore {
    pub(crate) fn create(
        self,
        tx: &mut Tables,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        source: Option<PlanVersionId>,
    ) -> Result<PlanVersion, EngineError> {
        let id = PlanVersionId::new();
        let (lineage_id, units) = match source {
            Some(source_id) => {
                let src = tx.plan(ctx, source_id)?;
                (src.lineage_id, tx.units(ctx, source_id)?)
            }
            None => (id, Vec::new()),
        };
        let version = self.insert(tx, ctx, now, id, lineage_id, source, units)?;
        if let Some(source_id) = source {
            pins::inherit_pins(tx, ctx, now, source_id, version.id)?;
        }
        Ok(version)
    }

    pub(crate) fn create_from_units(
        self,
        tx: &mut Tables,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        request: &SolveRequest,
        units: Vec<ScheduleUnit>,
    ) -> Result<PlanVersion, EngineError> {
        let requested: BTreeSet<&UnitId> = request.units.iter().map(|u| &u.unit_id).collect();
        let mut seen = BTreeSet::new();
        for unit in &units {
            if !requested.contains(&unit.unit_id) {
                return Err(EngineError::Validation(format!(
                    "solver returned unrequested unit {}",
                    unit.unit_id
                )));
            }
            if !seen.insert(&unit.unit_id) {
                return Err(EngineError::Validation(format!(
                    "solver returned unit {} twice",
                    unit.unit_id
                )));
            }
        }
        let id = PlanVersionId::new();
        self.insert(tx, ctx, now, id, id, None, units)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert(
        self,
        tx: &mut Tables,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        id: PlanVersionId,
        lineage_id: PlanVersionId,
        source: Option<PlanVersionId>,
        units: Vec<ScheduleUnit>,
    ) -> Result<PlanVersion, EngineError> {
        let version = PlanVersion {
            id,
            tenant_id: ctx.tenant_id.clone(),
            site_id: ctx.site_id.clone(),
            version_number: tx.next_version_number(ctx),
            status: PlanStatus::Draft,
            lineage_id,
            source_plan_version_id: source,
            created_at: now,
            created_by: ctx.actor.id.clone(),
            locked_at: None,
            locked_by: None,
            lock_reason: None,
            reverted_at: None,
        };
        let unit_count = units.len();
        tx.insert_plan(version.clone(), units)?;
        tx.audit_mut().append(
            ctx,
            now,
            "plan.created",
            version.id,
            serde_json::json!({
                "version_number": version.version_number,
                "source_plan_version_id": source,
                "units": unit_count,
            }),
        );
        tracing::info!(
            plan_version_id = %version.id,
            version = version.version_number,
            "plan version created"
        );
        Ok(version)
    }

    pub(crate) fn lock(
        self,
        tx: &mut Tables,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        id: PlanVersionId,
        reason: &str,
    ) -> Result<PlanVersion, EngineError> {
        let mut version = tx.plan(ctx, id)?.clone();
        if version.is_locked() {
            tracing::debug!(plan_version_id = %id, "plan already locked");
            return Ok(version);
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::Validation("lock reason is required".into()));
        }
        version.status = PlanStatus::Locked;
        version.locked_at = Some(now);
        version.locked_by = Some(ctx.actor.id.clone());
        version.lock_reason = Some(reason.to_string());
        tx.put_plan(version.clone())?;
        tx.audit_mut().append(
            ctx,
            now,
            "plan.locked",
            id,
            serde_json::json!({ "reason": reason }),
        );
        tracing::info!(plan_version_id = %id, "plan version locked");
        Ok(version)
    }

    /// Write one unit after re-checking lock and freeze
    fn write_unit(
        self,
        tx: &mut Tables,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        guard: &FreezeGuard,
        plan_version_id: PlanVersionId,
        unit: ScheduleUnit,
    ) -> Result<ScheduleUnit, EngineError> {
        if tx.plan(ctx, plan_version_id)?.is_locked() {
            tracing::warn!(plan_version_id = %plan_version_id, "write refused: plan locked");
            return Err(EngineError::PlanLocked { plan_version_id });
        }
        let target = MutationTarget::Unit {
            plan_version_id,
            unit_id: unit.unit_id.clone(),
        };
        if let MutationDecision::Deny { snapshot_id, .. } = guard.check_mutation(
            tx,
            ctx,
            now,
            &target,
            MutationSource::Manual,
            serde_json::Value::Null,
        )? {
            return Err(EngineError::DayFrozen { snapshot_id });
        }
        tx.put_unit(plan_version_id, unit.clone())?;
        tx.audit_mut().append(
            ctx,
            now,
            "plan.unit_written",
            plan_version_id,
            serde_json::to_value(&unit)?,
        );
        Ok(unit)
    }

    pub(crate) fn upsert_unit(
        self,
        tx: &mut Tables,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        guard: &FreezeGuard,
        plan_version_id: PlanVersionId,
        unit: ScheduleUnit,
    ) -> Result<ScheduleUnit, EngineError> {
        if unit.unit_id.as_str().trim().is_empty() {
            return Err(EngineError::Validation("unit id is required".into()));
        }
        self.write_unit(tx, ctx, now, guard, plan_version_id, unit)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assign_driver(
        self,
        tx: &mut Tables,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        guard: &FreezeGuard,
        plan_version_id: PlanVersionId,
        unit_id: &UnitId,
        driver_id: DriverId,
    ) -> Result<ScheduleUnit, EngineError> {
        let mut unit = tx.unit(ctx, plan_version_id, unit_id)?.clone();
        unit.drivers.insert(driver_id);
        self.write_unit(tx, ctx, now, guard, plan_version_id, unit)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn unassign_driver(
        self,
        tx: &mut Tables,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        guard: &FreezeGuard,
        plan_version_id: PlanVersionId,
        unit_id: &UnitId,
        driver_id: &DriverId,
    ) -> Result<ScheduleUnit, EngineError> {
        let mut unit = tx.unit(ctx, plan_version_id, unit_id)?.clone();
        unit.drivers.remove(driver_id);
        self.write_unit(tx, ctx, now, guard, plan_version_id, unit)
    }
}
