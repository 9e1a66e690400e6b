//! Repair ranking strategies

use std::collections::{BTreeMap, BTreeSet};

use super::{AssignmentChange, Incident};
use crate::types::{DriverId, ScheduleUnit, UnitId};

/// One unranked repair option produced by a strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairCandidate {
    /// Changes to apply to the base units
    pub changes: Vec<AssignmentChange>,
    /// Vacancies left open
    pub unfilled: usize,
    /// Lower is better
    pub score: u64,
    /// Short human-readable explanation
    pub rationale: String,
}

/// Produces ranked repair candidates for an incident
///
/// Implementations must be deterministic: the same units and incident give
/// the same candidates in the same order.
pub trait RepairStrategy: Send + Sync {
    /// Stable strategy name, logged with each preview
    fn name(&self) -> &'static str;

    /// Up to `top_k` candidates, best first
    fn propose(
        &self,
        units: &[ScheduleUnit],
        incident: &Incident,
        top_k: usize,
    ) -> Vec<RepairCandidate>;
}

/// Fills vacancies with the drivers carrying the fewest assignments
///
/// Each candidate rotates the starting point in the load-ordered driver
/// list, so the top-k options differ in who covers the gap.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastLoadedStrategy;

struct Vacancy<'a> {
    unit: &'a ScheduleUnit,
    removed: Vec<DriverId>,
    slots: usize,
}

impl LeastLoadedStrategy {
    fn vacancies<'a>(
        units: &'a [ScheduleUnit],
        incident: &Incident,
        absent: &BTreeSet<DriverId>,
    ) -> Vec<Vacancy<'a>> {
        let affected: BTreeSet<&UnitId> = incident.affected_units.iter().collect();
        units
            .iter()
            .filter(|u| {
                if affected.is_empty() {
                    u.drivers.iter().any(|d| absent.contains(d))
                } else {
                    affected.contains(&u.unit_id)
                }
            })
            .map(|unit| {
                let removed: Vec<DriverId> = unit
                    .drivers
                    .iter()
                    .filter(|d| absent.contains(*d))
                    .cloned()
                    .collect();
                let remaining = unit.assigned_count() - removed.len();
                let slots = usize::from(unit.required_team_size).saturating_sub(remaining);
                Vacancy {
                    unit,
                    removed,
                    slots,
                }
            })
            .collect()
    }

    fn loads(units: &[ScheduleUnit], absent: &BTreeSet<DriverId>) -> BTreeMap<DriverId, usize> {
        let mut loads = BTreeMap::new();
        for driver in units.iter().flat_map(|u| u.drivers.iter()) {
            if !absent.contains(driver) {
                *loads.entry(driver.clone()).or_insert(0) += 1;
            }
        }
        loads
    }
}

impl RepairStrategy for LeastLoadedStrategy {
    fn name(&self) -> &'static str {
        "least_loaded"
    }

    fn propose(
        &self,
        units: &[ScheduleUnit],
        incident: &Incident,
        top_k: usize,
    ) -> Vec<RepairCandidate> {
        let absent: BTreeSet<DriverId> = incident.absences.iter().cloned().collect();
        let vacancies = Self::vacancies(units, incident, &absent);
        let loads = Self::loads(units, &absent);

        let pool: BTreeSet<DriverId> = if incident.available_drivers.is_empty() {
            loads.keys().cloned().collect()
        } else {
            incident.available_drivers.iter().cloned().collect()
        };
        let mut candidates: Vec<(usize, DriverId)> = pool
            .into_iter()
            .filter(|d| !absent.contains(d))
            .map(|d| (loads.get(&d).copied().unwrap_or(0), d))
            .collect();
        candidates.sort();

        let rounds = top_k.min(candidates.len()).max(1);
        let mut out: Vec<RepairCandidate> = Vec::with_capacity(rounds);
        for offset in 0..rounds {
            let mut used: BTreeSet<&DriverId> = BTreeSet::new();
            let mut changes = Vec::new();
            let mut added = Vec::new();
            let mut load_cost = 0usize;
            let mut unfilled = 0usize;

            for vacancy in &vacancies {
                for driver in &vacancy.removed {
                    changes.push(AssignmentChange::Remove {
                        unit_id: vacancy.unit.unit_id.clone(),
                        driver_id: driver.clone(),
                    });
                }
                for _ in 0..vacancy.slots {
                    let pick = candidates
                        .iter()
                        .cycle()
                        .skip(offset)
                        .take(candidates.len())
                        .find(|(_, d)| !used.contains(d) && !vacancy.unit.drivers.contains(d));
                    match pick {
                        Some((load, driver)) => {
                            used.insert(driver);
                            load_cost += load;
                            added.push(driver.as_str());
                            changes.push(AssignmentChange::Add {
                                unit_id: vacancy.unit.unit_id.clone(),
                                driver_id: driver.clone(),
                            });
                        }
                        None => unfilled += 1,
                    }
                }
            }

            let score = (unfilled * 1000 + load_cost * 10 + changes.len()) as u64;
            let rationale = if added.is_empty() {
                format!("remove absent drivers; {unfilled} vacancy(ies) left open")
            } else {
                format!(
                    "cover vacancies with {}; {unfilled} left open",
                    added.join(", ")
                )
            };
            let candidate = RepairCandidate {
                changes,
                unfilled,
                score,
                rationale,
            };
            if !out.iter().any(|c| c.changes == candidate.changes) {
                out.push(candidate);
            }
        }

        out.sort_by(|a, b| a.score.cmp(&b.score).then_with(|| a.changes.cmp(&b.changes)));
        out.truncate(top_k);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Vec<ScheduleUnit> {
        vec![
            ScheduleUnit::new("U1", 2).with_driver("d1").with_driver("d2"),
            ScheduleUnit::new("U2", 1).with_driver("d3"),
            ScheduleUnit::new("U3", 1).with_driver("d3"),
            ScheduleUnit::new("U4", 1).with_driver("d4"),
        ]
    }

    fn incident(absent: &[&str]) -> Incident {
        Incident {
            absences: absent.iter().map(|d| DriverId::from(*d)).collect(),
            affected_units: vec![],
            available_drivers: vec![],
        }
    }

    #[test]
    fn best_candidate_uses_least_loaded_driver() {
        let out = LeastLoadedStrategy.propose(&plan(), &incident(&["d1"]), 3);
        assert!(!out.is_empty());
        let best = &out[0];
        assert_eq!(best.unfilled, 0);
        assert!(best.changes.contains(&AssignmentChange::Remove {
            unit_id: "U1".into(),
            driver_id: "d1".into(),
        }));
        // d4 has one unit, d3 has two, d2 is already on U1
        assert!(best.changes.contains(&AssignmentChange::Add {
            unit_id: "U1".into(),
            driver_id: "d4".into(),
        }));
    }

    #[test]
    fn candidates_are_distinct_and_ordered() {
        let out = LeastLoadedStrategy.propose(&plan(), &incident(&["d1"]), 3);
        for pair in out.windows(2) {
            assert!(pair[0].score <= pair[1].score);
            assert_ne!(pair[0].changes, pair[1].changes);
        }
        assert!(out.len() <= 3);
    }

    #[test]
    fn no_replacements_leaves_vacancy_open() {
        let units = vec![ScheduleUnit::new("U1", 1).with_driver("d1")];
        let out = LeastLoadedStrategy.propose(&units, &incident(&["d1"]), 3);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].unfilled, 1);
        assert_eq!(out[0].changes.len(), 1);
    }

    #[test]
    fn deterministic() {
        let a = LeastLoadedStrategy.propose(&plan(), &incident(&["d3"]), 2);
        let b = LeastLoadedStrategy.propose(&plan(), &incident(&["d3"]), 2);
        assert_eq!(a, b);
    }
}
