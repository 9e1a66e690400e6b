//! Snapshot publish and freeze
//!
//! A publish seals the plan's content into an evidence pack and starts the
//! freeze horizon. Once frozen (by horizon or by hand) a snapshot's scope
//! accepts no writes from any source. Late telemetry is quarantined as an
//! anomaly instead of being applied or dropped.

use chrono::{DateTime, Duration, Utc};
use roster_evidence::{EvidencePackBuilder, EvidenceSigner, Sha256Digest};
use serde::{Deserialize, Serialize};

use crate::compliance::ComplianceGate;
use crate::error::{EngineError, ErrorCode};
use crate::store::Tables;
use crate::types::{
    AnomalyId, PlanVersionId, RequestContext, SiteId, Snapshot, SnapshotHashes, SnapshotId,
    SnapshotStatus, TenantId, UnitDemand, UnitId,
};

/// Evidence file holding the plan identity
pub const INPUT_FILE: &str = "input.json";
/// Evidence file holding unit requirements
pub const MATRIX_FILE: &str = "matrix.json";
/// Evidence file holding the assignments
pub const OUTPUT_FILE: &str = "output.json";

/// Who is attempting a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationSource {
    /// A dispatcher or API caller
    Manual,
    /// An automated feed; denied writes are quarantined
    Telemetry,
}

/// What a write would touch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationTarget {
    /// Any content of a version
    PlanVersion {
        /// Version being written
        plan_version_id: PlanVersionId,
    },
    /// One unit of a version
    Unit {
        /// Version holding the unit
        plan_version_id: PlanVersionId,
        /// Unit being written
        unit_id: UnitId,
    },
    /// A snapshot row itself
    Snapshot {
        /// Snapshot being written
        snapshot_id: SnapshotId,
    },
}

/// Verdict of [`FreezeGuard::check_mutation`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationDecision {
    /// Nothing frozen covers the target
    Allow,
    /// A frozen snapshot covers the target
    Deny {
        /// Always `DAY_FROZEN`
        code: ErrorCode,
        /// The frozen snapshot
        snapshot_id: SnapshotId,
        /// Set when a telemetry write was quarantined
        #[serde(default, skip_serializing_if = "Option::is_none")]
        anomaly_id: Option<AnomalyId>,
    },
}

impl MutationDecision {
    /// True for [`MutationDecision::Allow`]
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Observation pushed by an automated source, e.g. a tour completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Version the unit belongs to
    pub plan_version_id: PlanVersionId,
    /// Unit observed
    pub unit_id: UnitId,
    /// Free-form event kind, e.g. `tour.completed`
    pub kind: String,
    /// Source time of the observation
    pub observed_at: DateTime<Utc>,
    /// Source-specific body
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Actual recorded for a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitActual {
    /// Version the unit belongs to
    pub plan_version_id: PlanVersionId,
    /// Unit observed
    pub unit_id: UnitId,
    /// Event kind
    pub kind: String,
    /// Source time of the observation
    pub observed_at: DateTime<Utc>,
    /// Engine time the event was accepted
    pub received_at: DateTime<Utc>,
    /// Source-specific body
    pub payload: serde_json::Value,
}

/// Result of ingesting one telemetry event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TelemetryOutcome {
    /// Stored as the unit's actual
    Applied {
        /// Unit the actual was recorded for
        unit_id: UnitId,
    },
    /// The day was frozen; kept as an anomaly instead
    Quarantined {
        /// Row in the anomaly list
        anomaly_id: AnomalyId,
        /// Snapshot whose freeze refused the write
        snapshot_id: SnapshotId,
    },
}

/// A write that arrived after its day froze
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LateTelemetryAnomaly {
    /// Anomaly id
    pub id: AnomalyId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Owning site
    pub site_id: SiteId,
    /// Frozen snapshot that refused the write
    pub snapshot_id: SnapshotId,
    /// Version the write targeted
    pub plan_version_id: PlanVersionId,
    /// Unit the write targeted, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<UnitId>,
    /// Engine time the write arrived
    pub received_at: DateTime<Utc>,
    /// The refused event, verbatim
    pub payload: serde_json::Value,
}

#[derive(Serialize)]
struct PublishInput<'a> {
    plan_version_id: PlanVersionId,
    tenant_id: &'a TenantId,
    site_id: &'a SiteId,
    lineage_id: PlanVersionId,
    version_number: u64,
}

/// Publish, freeze and write veto
#[derive(Debug, Clone)]
pub struct FreezeGuard {
    horizon: Duration,
}

impl FreezeGuard {
    /// Guard whose snapshots freeze `horizon` after publish
    #[must_use]
    pub fn new(horizon: Duration) -> Self {
        Self { horizon }
    }

    /// Time from publish to automatic freeze
    #[must_use]
    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn publish(
        &self,
        tx: &mut Tables,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        gate: &ComplianceGate,
        signer: &EvidenceSigner,
        plan_version_id: PlanVersionId,
        reason: Option<&str>,
    ) -> Result<Snapshot, EngineError> {
        let plan = tx.plan(ctx, plan_version_id)?.clone();
        if plan.is_locked() {
            return Err(EngineError::PlanLocked { plan_version_id });
        }
        let previous = tx.active_snapshot(plan.lineage_id).cloned();
        if let Some(prev) = previous.as_ref().filter(|s| s.is_frozen) {
            tracing::warn!(snapshot_id = %prev.id, "publish refused: lineage frozen");
            return Err(EngineError::DayFrozen {
                snapshot_id: prev.id,
            });
        }

        let report = gate.evaluate(tx, ctx, plan_version_id)?;
        if !report.can_publish {
            tracing::warn!(
                plan_version_id = %plan_version_id,
                blocks = report.block_count,
                "publish refused by compliance"
            );
            return Err(EngineError::ComplianceBlocked {
                violations: report.violations,
            });
        }

        let units = tx.units(ctx, plan_version_id)?;
        let input = PublishInput {
            plan_version_id,
            tenant_id: &plan.tenant_id,
            site_id: &plan.site_id,
            lineage_id: plan.lineage_id,
            version_number: plan.version_number,
        };
        let matrix: Vec<UnitDemand> = units
            .iter()
            .map(|u| UnitDemand {
                unit_id: u.unit_id.clone(),
                required_team_size: u.required_team_size,
            })
            .collect();

        let snapshot_id = SnapshotId::new();
        let pack = EvidencePackBuilder::new(format!("snapshot-{snapshot_id}"))
            .json_file(INPUT_FILE, &input)?
            .json_file(MATRIX_FILE, &matrix)?
            .json_file(OUTPUT_FILE, &units)?
            .build(signer, now)?;
        let hashes = SnapshotHashes {
            input: Sha256Digest::compute_json(&input)?,
            matrix: Sha256Digest::compute_json(&matrix)?,
            output: Sha256Digest::compute_json(&units)?,
            evidence: pack.manifest.overall_hash.parse()?,
        };

        if let Some(mut prev) = previous {
            prev.status = SnapshotStatus::Superseded;
            tracing::debug!(snapshot_id = %prev.id, "snapshot superseded");
            tx.put_snapshot(prev)?;
        }

        let snapshot = Snapshot {
            id: snapshot_id,
            tenant_id: ctx.tenant_id.clone(),
            site_id: ctx.site_id.clone(),
            lineage_id: plan.lineage_id,
            plan_version_id,
            version_number: tx.next_snapshot_number(plan.lineage_id),
            status: SnapshotStatus::Active,
            published_at: now,
            published_by: ctx.actor.id.clone(),
            publish_reason: reason.map(str::trim).filter(|r| !r.is_empty()).map(String::from),
            freeze_until: now + self.horizon,
            is_frozen: false,
            frozen_at: None,
            frozen_by: None,
            freeze_reason: None,
            hashes,
            evidence_ref: Some(pack.manifest.pack_id.clone()),
        };
        tx.insert_snapshot(snapshot.clone())?;
        tx.insert_evidence(pack);
        tx.audit_mut().append(
            ctx,
            now,
            "snapshot.published",
            snapshot.id,
            serde_json::json!({
                "plan_version_id": plan_version_id,
                "version_number": snapshot.version_number,
                "freeze_until": snapshot.freeze_until,
                "evidence_hash": snapshot.hashes.evidence,
            }),
        );
        tracing::info!(
            snapshot_id = %snapshot.id,
            plan_version_id = %plan_version_id,
            freeze_until = %snapshot.freeze_until,
            "snapshot published"
        );
        Ok(snapshot)
    }

    pub(crate) fn manual_freeze(
        &self,
        tx: &mut Tables,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        snapshot_id: SnapshotId,
        reason: &str,
    ) -> Result<Snapshot, EngineError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::Validation("freeze reason is required".into()));
        }
        let mut snapshot = tx.snapshot(ctx, snapshot_id)?.clone();
        if snapshot.is_frozen {
            return Err(EngineError::DayFrozen { snapshot_id });
        }
        if snapshot.status != SnapshotStatus::Active {
            return Err(EngineError::Validation(format!(
                "snapshot {snapshot_id} is {:?}; only the ACTIVE snapshot can be frozen",
                snapshot.status
            )));
        }
        snapshot.is_frozen = true;
        snapshot.frozen_at = Some(now);
        snapshot.frozen_by = Some(ctx.actor.id.clone());
        snapshot.freeze_reason = Some(reason.to_string());
        tx.put_snapshot(snapshot.clone())?;
        tx.audit_mut().append(
            ctx,
            now,
            "snapshot.frozen",
            snapshot_id,
            serde_json::json!({ "reason": reason, "horizon": snapshot.freeze_until }),
        );
        tracing::info!(snapshot_id = %snapshot_id, reason, "snapshot frozen manually");
        Ok(snapshot)
    }

    pub(crate) fn check_mutation(
        &self,
        tx: &mut Tables,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        target: &MutationTarget,
        source: MutationSource,
        payload: serde_json::Value,
    ) -> Result<MutationDecision, EngineError> {
        let (plan_version_id, unit_id, frozen) = match target {
            MutationTarget::PlanVersion { plan_version_id } => {
                tx.plan(ctx, *plan_version_id)?;
                let frozen = tx.frozen_snapshot_of_plan(*plan_version_id).map(|s| s.id);
                (*plan_version_id, None, frozen)
            }
            MutationTarget::Unit {
                plan_version_id,
                unit_id,
            } => {
                tx.plan(ctx, *plan_version_id)?;
                let frozen = tx.frozen_snapshot_of_plan(*plan_version_id).map(|s| s.id);
                (*plan_version_id, Some(unit_id.clone()), frozen)
            }
            MutationTarget::Snapshot { snapshot_id } => {
                let snapshot = tx.snapshot(ctx, *snapshot_id)?;
                let plan_version_id = snapshot.plan_version_id;
                let frozen = if snapshot.is_frozen {
                    Some(snapshot.id)
                } else {
                    tx.frozen_snapshot_of_plan(plan_version_id).map(|s| s.id)
                };
                (plan_version_id, None, frozen)
            }
        };

        let Some(snapshot_id) = frozen else {
            return Ok(MutationDecision::Allow);
        };

        let anomaly_id = match source {
            MutationSource::Manual => {
                tracing::warn!(snapshot_id = %snapshot_id, ?target, "manual write denied: day frozen");
                None
            }
            MutationSource::Telemetry => {
                let anomaly = LateTelemetryAnomaly {
                    id: AnomalyId::new(),
                    tenant_id: ctx.tenant_id.clone(),
                    site_id: ctx.site_id.clone(),
                    snapshot_id,
                    plan_version_id,
                    unit_id,
                    received_at: now,
                    payload,
                };
                tracing::warn!(
                    snapshot_id = %snapshot_id,
                    anomaly_id = %anomaly.id,
                    "late telemetry quarantined"
                );
                let id = anomaly.id;
                tx.push_anomaly(anomaly);
                Some(id)
            }
        };
        Ok(MutationDecision::Deny {
            code: ErrorCode::DayFrozen,
            snapshot_id,
            anomaly_id,
        })
    }

    pub(crate) fn ingest_telemetry(
        &self,
        tx: &mut Tables,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        event: &TelemetryEvent,
    ) -> Result<TelemetryOutcome, EngineError> {
        tx.unit(ctx, event.plan_version_id, &event.unit_id)?;
        let target = MutationTarget::Unit {
            plan_version_id: event.plan_version_id,
            unit_id: event.unit_id.clone(),
        };
        let payload = serde_json::to_value(event)?;
        match self.check_mutation(tx, ctx, now, &target, MutationSource::Telemetry, payload)? {
            MutationDecision::Deny {
                snapshot_id,
                anomaly_id: Some(anomaly_id),
                ..
            } => Ok(TelemetryOutcome::Quarantined {
                anomaly_id,
                snapshot_id,
            }),
            MutationDecision::Deny { .. } => Err(EngineError::Internal(
                "telemetry denial without anomaly record".into(),
            )),
            MutationDecision::Allow => {
                tx.put_actual(UnitActual {
                    plan_version_id: event.plan_version_id,
                    unit_id: event.unit_id.clone(),
                    kind: event.kind.clone(),
                    observed_at: event.observed_at,
                    received_at: now,
                    payload: event.payload.clone(),
                })?;
                tracing::debug!(unit_id = %event.unit_id, kind = %event.kind, "telemetry applied");
                Ok(TelemetryOutcome::Applied {
                    unit_id: event.unit_id.clone(),
                })
            }
        }
    }
}
