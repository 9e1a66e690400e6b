//! Core types for the roster engine
//!
//! Defines identifiers, the caller context and the plan/snapshot rows:
//! - tenant/site scoped request context
//! - plan versions and their assignment units
//! - published snapshots and their freeze state

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use roster_evidence::Sha256Digest;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random id
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// The raw value
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

uuid_id!(
    /// Plan version identifier
    PlanVersionId
);
uuid_id!(
    /// Published snapshot identifier
    SnapshotId
);
uuid_id!(
    /// Repair session identifier
    SessionId
);
uuid_id!(
    /// Pin identifier
    PinId
);
uuid_id!(
    /// Late telemetry anomaly identifier
    AnomalyId
);

string_id!(
    /// Tenant (customer organisation)
    TenantId
);
string_id!(
    /// Site (depot) within a tenant
    SiteId
);
string_id!(
    /// Scheduling unit, e.g. a stop or tour
    UnitId
);
string_id!(
    /// Driver / workforce resource
    DriverId
);

/// Caller roles, ordered by privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Read-only access
    Viewer,
    /// Day-to-day edits, publish and repair
    Dispatcher,
    /// Lock, manual freeze and audit export
    Approver,
    /// Everything
    Admin,
}

/// Authenticated principal making the call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Stable actor id written to audit rows
    pub id: String,
    /// Granted role
    pub role: Role,
}

impl Actor {
    /// Actor with `role`
    #[must_use]
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

/// Explicit tenant/site/actor context passed into every engine call
///
/// Transport and authentication happen upstream; the engine only trusts
/// what it is handed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Owning site
    pub site_id: SiteId,
    /// Caller
    pub actor: Actor,
}

impl RequestContext {
    /// Build and validate a context
    ///
    /// # Errors
    /// `VALIDATION_ERROR` if tenant, site or actor id is blank
    pub fn new(
        tenant_id: impl Into<TenantId>,
        site_id: impl Into<SiteId>,
        actor: Actor,
    ) -> Result<Self, EngineError> {
        let ctx = Self {
            tenant_id: tenant_id.into(),
            site_id: site_id.into(),
            actor,
        };
        ctx.validate()?;
        Ok(ctx)
    }

    /// Reject blank scope fields
    ///
    /// # Errors
    /// `VALIDATION_ERROR` naming the missing field
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.tenant_id.as_str().trim().is_empty() {
            return Err(EngineError::Validation("tenant context is missing".into()));
        }
        if self.site_id.as_str().trim().is_empty() {
            return Err(EngineError::Validation("site context is missing".into()));
        }
        if self.actor.id.trim().is_empty() {
            return Err(EngineError::Validation("actor id is missing".into()));
        }
        Ok(())
    }

    /// Require at least `required` privilege
    ///
    /// # Errors
    /// `FORBIDDEN` when the actor's role is lower
    pub fn require_role(&self, required: Role, action: &'static str) -> Result<(), EngineError> {
        if self.actor.role >= required {
            Ok(())
        } else {
            Err(EngineError::Forbidden {
                action,
                required,
                actual: self.actor.role,
            })
        }
    }

    /// Does a row with this tenant/site belong to the caller?
    #[inline]
    #[must_use]
    pub fn owns(&self, tenant_id: &TenantId, site_id: &SiteId) -> bool {
        &self.tenant_id == tenant_id && &self.site_id == site_id
    }
}

/// Plan version status; LOCKED is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    /// Editable
    Draft,
    /// Approved and immutable
    Locked,
}

/// One candidate schedule for a tenant/site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanVersion {
    /// Version id
    pub id: PlanVersionId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Owning site
    pub site_id: SiteId,
    /// Per tenant+site counter, from 1
    pub version_number: u64,
    /// Lifecycle state
    pub status: PlanStatus,
    /// Root version this lineage started from
    pub lineage_id: PlanVersionId,
    /// Version this one was copied from
    pub source_plan_version_id: Option<PlanVersionId>,
    /// Engine time of creation
    pub created_at: DateTime<Utc>,
    /// Actor id that created it
    pub created_by: String,
    /// Engine time of lock
    pub locked_at: Option<DateTime<Utc>>,
    /// Actor id that locked it
    pub locked_by: Option<String>,
    /// Reason given at lock
    pub lock_reason: Option<String>,
    /// Set when an undo reverted the repair that produced this version
    pub reverted_at: Option<DateTime<Utc>>,
}

impl PlanVersion {
    /// True once LOCKED
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.status == PlanStatus::Locked
    }
}

/// A scheduling unit and the drivers assigned to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleUnit {
    /// Unit id
    pub unit_id: UnitId,
    /// Drivers the unit needs
    pub required_team_size: u8,
    /// Drivers assigned
    pub drivers: BTreeSet<DriverId>,
}

impl ScheduleUnit {
    /// Unit with no drivers yet
    #[must_use]
    pub fn new(unit_id: impl Into<UnitId>, required_team_size: u8) -> Self {
        Self {
            unit_id: unit_id.into(),
            required_team_size,
            drivers: BTreeSet::new(),
        }
    }

    /// Builder-style driver assignment
    #[must_use]
    pub fn with_driver(mut self, driver: impl Into<DriverId>) -> Self {
        self.drivers.insert(driver.into());
        self
    }

    /// Number of drivers assigned
    #[inline]
    #[must_use]
    pub fn assigned_count(&self) -> usize {
        self.drivers.len()
    }
}

/// Snapshot status within its lineage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotStatus {
    /// Current snapshot of its lineage
    Active,
    /// Replaced by a newer publish
    Superseded,
    /// Retired; terminal
    Archived,
}

/// Hashes sealed into a snapshot at publish time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHashes {
    /// Solver input
    pub input: Sha256Digest,
    /// Unit by driver matrix
    pub matrix: Sha256Digest,
    /// Published units
    pub output: Sha256Digest,
    /// Overall hash of the evidence pack
    pub evidence: Sha256Digest,
}

/// Published, eventually frozen view of a plan version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot id
    pub id: SnapshotId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Owning site
    pub site_id: SiteId,
    /// Lineage it belongs to
    pub lineage_id: PlanVersionId,
    /// Version published
    pub plan_version_id: PlanVersionId,
    /// Version number of the published version
    pub version_number: u64,
    /// Lineage state
    pub status: SnapshotStatus,
    /// Engine time of publish
    pub published_at: DateTime<Utc>,
    /// Actor id that published
    pub published_by: String,
    /// Reason given at publish
    pub publish_reason: Option<String>,
    /// Horizon after which the snapshot is frozen
    pub freeze_until: DateTime<Utc>,
    /// Set by manual freeze or once the horizon passes
    pub is_frozen: bool,
    /// Engine time of freeze
    pub frozen_at: Option<DateTime<Utc>>,
    /// Actor id of a manual freeze; `None` for the horizon
    pub frozen_by: Option<String>,
    /// Why it froze
    pub freeze_reason: Option<String>,
    /// Hashes sealed at publish
    pub hashes: SnapshotHashes,
    /// Pack id of the evidence pack
    pub evidence_ref: Option<String>,
}

/// Reason recorded when the freeze horizon elapses
pub const HORIZON_FREEZE_REASON: &str = "freeze horizon elapsed";

impl Snapshot {
    /// Frozen by flag or by elapsed horizon
    #[inline]
    #[must_use]
    pub fn is_frozen_at(&self, now: DateTime<Utc>) -> bool {
        self.is_frozen || now >= self.freeze_until
    }
}

/// Input handed to the external assignment solver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveRequest {
    /// Units to staff
    pub units: Vec<UnitDemand>,
    /// Available drivers
    pub drivers: Vec<DriverId>,
}

/// Team-size demand of one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDemand {
    /// Unit id
    pub unit_id: UnitId,
    /// Drivers the unit needs
    pub required_team_size: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: Role) -> Actor {
        Actor::new("u-1", role)
    }

    #[test]
    fn context_rejects_blank_scope() {
        assert!(matches!(
            RequestContext::new("", "site", actor(Role::Dispatcher)),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            RequestContext::new("t", "  ", actor(Role::Dispatcher)),
            Err(EngineError::Validation(_))
        ));
        assert!(RequestContext::new("t", "s", actor(Role::Dispatcher)).is_ok());
    }

    #[test]
    fn roles_are_ordered() {
        assert!(Role::Admin > Role::Approver);
        assert!(Role::Approver > Role::Dispatcher);
        assert!(Role::Dispatcher > Role::Viewer);

        let ctx = RequestContext::new("t", "s", actor(Role::Dispatcher)).unwrap();
        assert!(ctx.require_role(Role::Dispatcher, "edit").is_ok());
        assert!(matches!(
            ctx.require_role(Role::Approver, "lock"),
            Err(EngineError::Forbidden { .. })
        ));
    }

    #[test]
    fn snapshot_status_serializes_screaming_case() {
        assert_eq!(
            serde_json::to_string(&SnapshotStatus::Superseded).unwrap(),
            "\"SUPERSEDED\""
        );
        assert_eq!(serde_json::to_string(&PlanStatus::Locked).unwrap(), "\"LOCKED\"");
    }

    #[test]
    fn unit_builder_counts_drivers() {
        let unit = ScheduleUnit::new("T-003", 2).with_driver("d1").with_driver("d1");
        assert_eq!(unit.assigned_count(), 1);
    }
}
