//! Roster Core - Plan Lifecycle & Repair Orchestration Engine
//!
//! Governs how a generated schedule moves through its states:
//! - DRAFT plan versions, irreversibly LOCKED on approval
//! - published snapshots that freeze by horizon or by hand
//! - compliance gating of every publish
//! - preview → prepare → apply → undo emergency repair sessions
//! - idempotency-keyed mutations and a hash-chained audit trail
//!
//! # Example
//!
//! ```rust
//! use roster_core::prelude::*;
//! use roster_evidence::EvidenceSigner;
//!
//! let signer = EvidenceSigner::new(&[7u8; 32]).unwrap();
//! let engine = RosterEngine::new(EngineConfig::default(), signer);
//! let ctx = RequestContext::new("acme", "depot-1", Actor::new("dana", Role::Approver)).unwrap();
//!
//! let v1 = engine.create_plan(&ctx, None).unwrap();
//! engine
//!     .upsert_unit(&ctx, v1.id, ScheduleUnit::new("T-001", 1).with_driver("d1"))
//!     .unwrap();
//! let snapshot = engine.publish(&ctx, v1.id, Some("K-1"), None).unwrap();
//! assert!(!snapshot.is_frozen);
//! ```

#![warn(unreachable_pub)]

pub mod api;
pub mod audit;
pub mod clock;
pub mod compliance;
pub mod config;
pub mod engine;
pub mod error;
pub mod freeze;
pub mod idempotency;
pub mod pins;
pub mod plan_store;
pub mod repair;
pub mod simulation;
mod store;
pub mod types;

pub use api::{
    ComplianceCheck, EvidenceExport, FreezeControl, PinManager, PlanLifecycle, RepairControl,
};
pub use audit::{verify_chain, AuditRecord};
pub use clock::{Clock, ManualClock, SystemClock};
pub use compliance::{
    ComplianceGate, ComplianceReport, ComplianceRule, Severity, TeamSizeRule, Violation,
    ViolationType,
};
pub use config::{ConfigError, EngineConfig, SIGNING_KEY_ENV};
pub use engine::{RosterEngine, AUDIT_PACK_FILES};
pub use error::{EngineError, ErrorBody, ErrorCode};
pub use freeze::{
    LateTelemetryAnomaly, MutationDecision, MutationSource, MutationTarget, TelemetryEvent,
    TelemetryOutcome,
};
pub use pins::{Pin, PinConflict, PinTarget};
pub use plan_store::AssignmentSolver;
pub use repair::{
    AssignmentChange, Incident, LeastLoadedStrategy, RepairDraft, RepairProposal, RepairSession,
    RepairStrategy, SessionStatus,
};
pub use simulation::{run_scenarios, ScenarioOutcome, SimulationReport};
pub use types::{
    Actor, DriverId, PinId, PlanStatus, PlanVersion, PlanVersionId, RequestContext, Role,
    ScheduleUnit, SessionId, SiteId, Snapshot, SnapshotId, SnapshotStatus, SolveRequest,
    TenantId, UnitDemand, UnitId,
};

/// Prelude module for common imports
pub mod prelude {
    //! Engine, context and the operation traits
    pub use crate::{
        Actor, ComplianceCheck, EngineConfig, EngineError, ErrorCode, EvidenceExport,
        FreezeControl, Incident, PinManager, PinTarget, PlanLifecycle, RepairControl,
        RequestContext, Role, RosterEngine, ScheduleUnit,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
