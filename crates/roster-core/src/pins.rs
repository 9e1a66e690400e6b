//! Manual pins
//!
//! A pin is a dispatcher's promise that automated repair will leave part of
//! the plan alone: either one driver on one unit, or a whole unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::repair::AssignmentChange;
use crate::store::Tables;
use crate::types::{DriverId, PinId, PlanVersionId, RequestContext, SiteId, TenantId, UnitId};

/// What a pin protects
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PinTarget {
    /// Unit the pin protects
    pub unit_id: UnitId,
    /// `None` pins the unit's whole assignment set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<DriverId>,
}

impl PinTarget {
    /// Pin every assignment on a unit
    #[must_use]
    pub fn unit(unit_id: impl Into<UnitId>) -> Self {
        Self {
            unit_id: unit_id.into(),
            driver_id: None,
        }
    }

    /// Pin one driver to a unit
    #[must_use]
    pub fn driver(unit_id: impl Into<UnitId>, driver_id: impl Into<DriverId>) -> Self {
        Self {
            unit_id: unit_id.into(),
            driver_id: Some(driver_id.into()),
        }
    }

    fn is_broken_by(&self, change: &AssignmentChange) -> bool {
        if change.unit_id() != &self.unit_id {
            return false;
        }
        match (&self.driver_id, change) {
            (None, _) => true,
            (Some(pinned), AssignmentChange::Remove { driver_id, .. }) => pinned == driver_id,
            (Some(_), AssignmentChange::Add { .. }) => false,
        }
    }
}

/// Manual constraint on a plan version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin {
    /// Pin id
    pub id: PinId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Owning site
    pub site_id: SiteId,
    /// Version the pin constrains
    pub plan_version_id: PlanVersionId,
    /// What is protected
    pub target: PinTarget,
    /// Free-text reason from the caller
    pub reason: String,
    /// False once removed
    pub active: bool,
    /// Actor id that added the pin
    pub created_by: String,
    /// Engine time of creation
    pub created_at: DateTime<Utc>,
}

/// A change that would break an active pin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinConflict {
    /// Pin that would break
    pub pin_id: PinId,
    /// Its target
    pub target: PinTarget,
    /// The offending change
    pub change: AssignmentChange,
}

/// Every (pin, change) pair where the change breaks an active pin
#[must_use]
pub fn find_conflicts(pins: &[Pin], changes: &[AssignmentChange]) -> Vec<PinConflict> {
    pins.iter()
        .filter(|pin| pin.active)
        .flat_map(|pin| {
            changes
                .iter()
                .filter(|change| pin.target.is_broken_by(change))
                .map(|change| PinConflict {
                    pin_id: pin.id,
                    target: pin.target.clone(),
                    change: change.clone(),
                })
        })
        .collect()
}

/// Fail with `PIN_CONFLICTS` if `changes` break any active pin of the plan
pub(crate) fn ensure_no_conflicts(
    tx: &Tables,
    plan_version_id: PlanVersionId,
    changes: &[AssignmentChange],
) -> Result<(), EngineError> {
    let conflicts = find_conflicts(&tx.active_pins(plan_version_id), changes);
    if conflicts.is_empty() {
        Ok(())
    } else {
        tracing::warn!(
            plan_version_id = %plan_version_id,
            conflicts = conflicts.len(),
            "change set refused by pins"
        );
        Err(EngineError::PinConflicts { conflicts })
    }
}

pub(crate) fn add_pin(
    tx: &mut Tables,
    ctx: &RequestContext,
    now: DateTime<Utc>,
    plan_version_id: PlanVersionId,
    target: PinTarget,
    reason: &str,
) -> Result<Pin, EngineError> {
    if reason.trim().is_empty() {
        return Err(EngineError::Validation("pin reason is required".into()));
    }
    let plan = tx.plan(ctx, plan_version_id)?;
    if plan.is_locked() {
        return Err(EngineError::PlanLocked { plan_version_id });
    }
    tx.unit(ctx, plan_version_id, &target.unit_id)?;

    let pin = Pin {
        id: PinId::new(),
        tenant_id: ctx.tenant_id.clone(),
        site_id: ctx.site_id.clone(),
        plan_version_id,
        target,
        reason: reason.trim().to_string(),
        active: true,
        created_by: ctx.actor.id.clone(),
        created_at: now,
    };
    tx.insert_pin(pin.clone())?;
    tx.audit_mut().append(
        ctx,
        now,
        "pin.added",
        pin.id,
        serde_json::json!({ "plan_version_id": plan_version_id, "target": pin.target }),
    );
    tracing::info!(pin_id = %pin.id, plan_version_id = %plan_version_id, "pin added");
    Ok(pin)
}

/// Copy the active pins of `from` onto the new version `to`
///
/// Runs whenever a version is derived from another, so a pin keeps holding
/// across repair applies and source copies.
pub(crate) fn inherit_pins(
    tx: &mut Tables,
    ctx: &RequestContext,
    now: DateTime<Utc>,
    from: PlanVersionId,
    to: PlanVersionId,
) -> Result<usize, EngineError> {
    let inherited = tx.active_pins(from);
    for parent in &inherited {
        let pin = Pin {
            id: PinId::new(),
            tenant_id: ctx.tenant_id.clone(),
            site_id: ctx.site_id.clone(),
            plan_version_id: to,
            target: parent.target.clone(),
            reason: parent.reason.clone(),
            active: true,
            created_by: parent.created_by.clone(),
            created_at: now,
        };
        tx.insert_pin(pin.clone())?;
        tx.audit_mut().append(
            ctx,
            now,
            "pin.inherited",
            pin.id,
            serde_json::json!({
                "from_pin_id": parent.id,
                "plan_version_id": to,
                "target": pin.target,
            }),
        );
    }
    if !inherited.is_empty() {
        tracing::debug!(from = %from, to = %to, pins = inherited.len(), "pins inherited");
    }
    Ok(inherited.len())
}

pub(crate) fn remove_pin(
    tx: &mut Tables,
    ctx: &RequestContext,
    now: DateTime<Utc>,
    pin_id: PinId,
) -> Result<Pin, EngineError> {
    let mut pin = tx.pin(ctx, pin_id)?.clone();
    if !pin.active {
        return Ok(pin);
    }
    pin.active = false;
    tx.put_pin(pin.clone())?;
    tx.audit_mut()
        .append(ctx, now, "pin.removed", pin.id, serde_json::Value::Null);
    tracing::info!(pin_id = %pin.id, "pin removed");
    Ok(pin)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin(target: PinTarget, active: bool) -> Pin {
        Pin {
            id: PinId::new(),
            tenant_id: "t".into(),
            site_id: "s".into(),
            plan_version_id: PlanVersionId::new(),
            target,
            reason: "customer request".into(),
            active,
            created_by: "d".into(),
            created_at: Utc::now(),
        }
    }

    fn remove(unit: &str, driver: &str) -> AssignmentChange {
        AssignmentChange::Remove {
            unit_id: unit.into(),
            driver_id: driver.into(),
        }
    }

    fn add(unit: &str, driver: &str) -> AssignmentChange {
        AssignmentChange::Add {
            unit_id: unit.into(),
            driver_id: driver.into(),
        }
    }

    #[test]
    fn driver_pin_only_blocks_its_removal() {
        let pins = vec![pin(PinTarget::driver("U1", "d1"), true)];
        assert_eq!(find_conflicts(&pins, &[remove("U1", "d1")]).len(), 1);
        assert!(find_conflicts(&pins, &[remove("U1", "d2"), add("U1", "d3")]).is_empty());
        assert!(find_conflicts(&pins, &[remove("U2", "d1")]).is_empty());
    }

    #[test]
    fn unit_pin_blocks_any_change() {
        let pins = vec![pin(PinTarget::unit("U1"), true)];
        let conflicts = find_conflicts(&pins, &[add("U1", "d9"), add("U2", "d9")]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].change, add("U1", "d9"));
    }

    #[test]
    fn inactive_pins_are_ignored() {
        let pins = vec![pin(PinTarget::unit("U1"), false)];
        assert!(find_conflicts(&pins, &[remove("U1", "d1")]).is_empty());
    }
}
