use proptest::prelude::*;
use roster_core::{ComplianceGate, PlanVersionId, ScheduleUnit, Severity, ViolationType};

fn unit(idx: usize, required: u8, assigned: u8) -> ScheduleUnit {
    (0..assigned).fold(ScheduleUnit::new(format!("T-{idx:03}"), required), |u, d| {
        u.with_driver(format!("d{idx}-{d}"))
    })
}

proptest! {
    #[test]
    fn prop_publishable_iff_no_unit_is_short(
        shape in proptest::collection::vec((1..5u8, 0..7u8), 0..12)
    ) {
        let units: Vec<ScheduleUnit> = shape
            .iter()
            .enumerate()
            .map(|(i, (required, assigned))| unit(i, *required, *assigned))
            .collect();
        let report = ComplianceGate::default().evaluate_units(PlanVersionId::new(), &units);

        let short = shape.iter().filter(|(r, a)| a < r).count();
        let over = shape.iter().filter(|(r, a)| a > r).count();
        prop_assert_eq!(report.block_count, short);
        prop_assert_eq!(report.warn_count, over);
        prop_assert_eq!(report.can_publish, short == 0);
        prop_assert_eq!(report.violations.len(), short + over);

        for v in &report.violations {
            match v.violation_type {
                ViolationType::MismatchUnder => prop_assert_eq!(v.severity, Severity::Block),
                ViolationType::MismatchOver => prop_assert_eq!(v.severity, Severity::Warn),
            }
        }
    }

    #[test]
    fn prop_evaluation_is_deterministic(
        shape in proptest::collection::vec((1..5u8, 0..7u8), 0..8)
    ) {
        let units: Vec<ScheduleUnit> = shape
            .iter()
            .enumerate()
            .map(|(i, (required, assigned))| unit(i, *required, *assigned))
            .collect();
        let plan = PlanVersionId::new();
        let gate = ComplianceGate::default();
        prop_assert_eq!(gate.evaluate_units(plan, &units), gate.evaluate_units(plan, &units));
    }
}

#[test]
fn empty_plan_is_publishable() {
    let report = ComplianceGate::default().evaluate_units(PlanVersionId::new(), &[]);
    assert!(report.can_publish);
    assert!(report.violations.is_empty());
}
