//! Testing utilities for the roster engine workspace
//!
//! Shared contexts, engines on a manual clock, a deterministic solver and
//! unit fixtures.

#![allow(missing_docs)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use roster_core::{
    Actor, AssignmentSolver, EngineConfig, EngineError, ManualClock, PlanLifecycle,
    PlanVersion, RequestContext, Role, RosterEngine, ScheduleUnit, SolveRequest, UnitDemand,
};
use roster_evidence::EvidenceSigner;

pub const TENANT: &str = "acme";
pub const SITE: &str = "depot-1";

/// Fixed start time: 2026-03-02 06:00 UTC
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap()
}

pub fn test_signer() -> EvidenceSigner {
    EvidenceSigner::new(&[7u8; 32]).unwrap()
}

pub fn ctx(role: Role) -> RequestContext {
    ctx_for(TENANT, SITE, role)
}

pub fn ctx_for(tenant: &str, site: &str, role: Role) -> RequestContext {
    RequestContext::new(tenant, site, Actor::new(format!("{role:?}").to_lowercase(), role))
        .unwrap()
}

pub fn dispatcher() -> RequestContext {
    ctx(Role::Dispatcher)
}

pub fn approver() -> RequestContext {
    ctx(Role::Approver)
}

/// Engine with default config on a manual clock at [`start_time`]
pub fn engine() -> (RosterEngine, Arc<ManualClock>) {
    engine_with(EngineConfig::default())
}

pub fn engine_with(config: EngineConfig) -> (RosterEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_time()));
    let engine = RosterEngine::new(config, test_signer()).with_clock(clock.clone());
    (engine, clock)
}

/// T-001 needs 2 (d1, d2), T-002 needs 1 (d3), T-005 needs 1 (d4)
pub fn standard_units() -> Vec<ScheduleUnit> {
    vec![
        ScheduleUnit::new("T-001", 2).with_driver("d1").with_driver("d2"),
        ScheduleUnit::new("T-002", 1).with_driver("d3"),
        ScheduleUnit::new("T-005", 1).with_driver("d4"),
    ]
}

/// New DRAFT version holding `units`
pub fn seeded_plan(
    engine: &RosterEngine,
    ctx: &RequestContext,
    units: Vec<ScheduleUnit>,
) -> PlanVersion {
    let plan = engine.create_plan(ctx, None).unwrap();
    for unit in units {
        engine.upsert_unit(ctx, plan.id, unit).unwrap();
    }
    plan
}

/// Deals drivers to units in request order until each team is full
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobinSolver;

impl AssignmentSolver for RoundRobinSolver {
    fn propose(&self, request: &SolveRequest) -> Result<Vec<ScheduleUnit>, EngineError> {
        let mut drivers = request.drivers.iter().cycle();
        let mut units = Vec::with_capacity(request.units.len());
        for demand in &request.units {
            let mut unit = ScheduleUnit::new(demand.unit_id.clone(), demand.required_team_size);
            for _ in 0..demand.required_team_size {
                match drivers.next() {
                    Some(driver) => unit = unit.with_driver(driver.clone()),
                    None => break,
                }
            }
            units.push(unit);
        }
        Ok(units)
    }
}

/// Solver that always fails
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingSolver;

impl AssignmentSolver for FailingSolver {
    fn propose(&self, _request: &SolveRequest) -> Result<Vec<ScheduleUnit>, EngineError> {
        Err(EngineError::Internal("solver unavailable".into()))
    }
}

pub fn demand(unit_id: &str, required_team_size: u8) -> UnitDemand {
    UnitDemand {
        unit_id: unit_id.into(),
        required_team_size,
    }
}
