//! Compliance gate
//!
//! Evaluates the assignment content of a plan version against a set of
//! pluggable rules. BLOCK violations refuse publish; WARN ones are advisory.
//! Evaluation is pure: the same units always give the same violations, ids
//! included.

use std::fmt;

use roster_evidence::Sha256Digest;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::store::Tables;
use crate::types::{PlanVersionId, RequestContext, ScheduleUnit, UnitId};

/// How hard a violation bites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Refuses publish
    Block,
    /// Advisory only
    Warn,
}

/// Kind of detected breach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationType {
    /// Fewer drivers than the unit requires
    MismatchUnder,
    /// More drivers than the unit requires
    MismatchOver,
}

impl ViolationType {
    /// Wire name of the type
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MismatchUnder => "MISMATCH_UNDER",
            Self::MismatchOver => "MISMATCH_OVER",
        }
    }
}

/// One detected constraint breach
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Content digest of the violation, stable across evaluations
    pub id: String,
    /// Version the violation was found in
    pub plan_version_id: PlanVersionId,
    /// Serialized as `type`
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    /// BLOCK or WARN
    pub severity: Severity,
    /// Unit at fault, when the rule is per unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<UnitId>,
    /// Human-readable explanation
    pub details: String,
}

impl Violation {
    /// Build a violation with a content-derived id
    #[must_use]
    pub fn new(
        plan_version_id: PlanVersionId,
        violation_type: ViolationType,
        severity: Severity,
        unit_id: Option<UnitId>,
        details: String,
    ) -> Self {
        let seed = format!(
            "{plan_version_id}:{}:{}",
            violation_type.as_str(),
            unit_id.as_ref().map_or("", UnitId::as_str)
        );
        Self {
            id: format!("v-{}", Sha256Digest::compute(seed.as_bytes()).short()),
            plan_version_id,
            violation_type,
            severity,
            unit_id,
            details,
        }
    }

    /// True for BLOCK severity
    #[inline]
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Block
    }
}

/// Result of evaluating one plan version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReport {
    /// Version that was evaluated
    pub plan_version_id: PlanVersionId,
    /// Sorted by id
    pub violations: Vec<Violation>,
    /// No BLOCK violation present
    pub can_publish: bool,
    /// Number of BLOCK violations
    pub block_count: usize,
    /// Number of WARN violations
    pub warn_count: usize,
}

impl ComplianceReport {
    fn from_violations(plan_version_id: PlanVersionId, violations: Vec<Violation>) -> Self {
        let block_count = violations.iter().filter(|v| v.is_blocking()).count();
        let warn_count = violations.len() - block_count;
        Self {
            plan_version_id,
            violations,
            can_publish: block_count == 0,
            block_count,
            warn_count,
        }
    }

    /// BLOCK violations only
    #[must_use]
    pub fn blocking(&self) -> Vec<Violation> {
        self.violations
            .iter()
            .filter(|v| v.is_blocking())
            .cloned()
            .collect()
    }
}

/// A scheduling constraint checked before publish
pub trait ComplianceRule: Send + Sync {
    /// Stable rule name, used in logs
    fn name(&self) -> &'static str;

    /// Violations found in `units`
    fn check(&self, plan_version_id: PlanVersionId, units: &[ScheduleUnit]) -> Vec<Violation>;
}

/// Assigned team size must match the unit's requirement
#[derive(Debug, Clone, Copy, Default)]
pub struct TeamSizeRule;

impl ComplianceRule for TeamSizeRule {
    fn name(&self) -> &'static str {
        "team_size"
    }

    fn check(&self, plan_version_id: PlanVersionId, units: &[ScheduleUnit]) -> Vec<Violation> {
        units
            .iter()
            .filter_map(|unit| {
                let assigned = unit.assigned_count();
                let required = usize::from(unit.required_team_size);
                let (kind, severity) = match assigned.cmp(&required) {
                    std::cmp::Ordering::Less => (ViolationType::MismatchUnder, Severity::Block),
                    std::cmp::Ordering::Greater => (ViolationType::MismatchOver, Severity::Warn),
                    std::cmp::Ordering::Equal => return None,
                };
                Some(Violation::new(
                    plan_version_id,
                    kind,
                    severity,
                    Some(unit.unit_id.clone()),
                    format!(
                        "unit {} requires {required} driver(s), {assigned} assigned",
                        unit.unit_id
                    ),
                ))
            })
            .collect()
    }
}

/// Runs every registered rule
pub struct ComplianceGate {
    rules: Vec<Box<dyn ComplianceRule>>,
}

impl ComplianceGate {
    /// Gate with no rules
    #[must_use]
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Register a rule
    #[must_use]
    pub fn with_rule(mut self, rule: impl ComplianceRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Pure evaluation over a unit set
    #[must_use]
    pub fn evaluate_units(
        &self,
        plan_version_id: PlanVersionId,
        units: &[ScheduleUnit],
    ) -> ComplianceReport {
        let mut violations: Vec<Violation> = self
            .rules
            .iter()
            .flat_map(|rule| rule.check(plan_version_id, units))
            .collect();
        violations.sort_by(|a, b| a.id.cmp(&b.id));
        ComplianceReport::from_violations(plan_version_id, violations)
    }

    pub(crate) fn evaluate(
        &self,
        tx: &Tables,
        ctx: &RequestContext,
        plan_version_id: PlanVersionId,
    ) -> Result<ComplianceReport, EngineError> {
        let units = tx.units(ctx, plan_version_id)?;
        let report = self.evaluate_units(plan_version_id, &units);
        tracing::debug!(
            plan_version_id = %plan_version_id,
            blocks = report.block_count,
            warns = report.warn_count,
            "compliance evaluated"
        );
        Ok(report)
    }
}

impl Default for ComplianceGate {
    fn default() -> Self {
        Self::empty().with_rule(TeamSizeRule)
    }
}

impl fmt::Debug for ComplianceGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComplianceGate")
            .field("rules", &self.rules.iter().map(|r| r.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_blocks_over_warns() {
        let plan = PlanVersionId::new();
        let units = vec![
            ScheduleUnit::new("T-003", 2).with_driver("d1"),
            ScheduleUnit::new("T-004", 1).with_driver("d2").with_driver("d3"),
            ScheduleUnit::new("T-005", 1).with_driver("d4"),
        ];
        let report = ComplianceGate::default().evaluate_units(plan, &units);
        assert_eq!(report.violations.len(), 2);
        assert_eq!(report.block_count, 1);
        assert_eq!(report.warn_count, 1);
        assert!(!report.can_publish);
        let under = &report.blocking()[0];
        assert_eq!(under.violation_type, ViolationType::MismatchUnder);
        assert_eq!(under.unit_id.as_ref().map(UnitId::as_str), Some("T-003"));
    }

    #[test]
    fn over_only_can_publish() {
        let units = vec![ScheduleUnit::new("T-1", 1).with_driver("a").with_driver("b")];
        let report = ComplianceGate::default().evaluate_units(PlanVersionId::new(), &units);
        assert!(report.can_publish);
        assert_eq!(report.violations[0].severity, Severity::Warn);
    }

    #[test]
    fn violation_ids_are_deterministic() {
        let plan = PlanVersionId::new();
        let units = vec![ScheduleUnit::new("T-1", 2)];
        let gate = ComplianceGate::default();
        assert_eq!(
            gate.evaluate_units(plan, &units),
            gate.evaluate_units(plan, &units)
        );
    }

    #[test]
    fn violation_serializes_type_field() {
        let v = Violation::new(
            PlanVersionId::new(),
            ViolationType::MismatchUnder,
            Severity::Block,
            None,
            "x".into(),
        );
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["type"], "MISMATCH_UNDER");
        assert_eq!(json["severity"], "BLOCK");
        assert!(json.get("unit_id").is_none());
    }
}
