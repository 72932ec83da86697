//! Plan comparison, consistency checks and determinism checking.
//!
//! [`diff_plans`] compares two plans by entity name and operationplan id,
//! so plans built independently can be compared. [`check_plan`] walks the
//! internal indexes and timelines of a single plan.

use crate::error::PlanResult;
use crate::flowplan::EventRef;
use crate::id::OperationPlanId;
use crate::plan::Plan;
use crate::timeline::TimelineError;

// ---------------------------------------------------------------------------
// Plan diff types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum OperationPlanDiff {
    OnlyInA(OperationPlanId),
    OnlyInB(OperationPlanId),
    Mismatch { id: OperationPlanId, description: String },
}

/// Difference on a named buffer, resource or demand.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityDiff {
    OnlyInA(String),
    OnlyInB(String),
    Mismatch { name: String, description: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsystemDiff {
    pub operationplans_match: bool,
    pub buffers_match: bool,
    pub resources_match: bool,
    pub demands_match: bool,
}

#[derive(Debug, Clone)]
pub struct PlanDiff {
    pub is_identical: bool,
    pub subsystem_diffs: SubsystemDiff,
    pub operationplan_diffs: Vec<OperationPlanDiff>,
    pub buffer_diffs: Vec<EntityDiff>,
}

// ---------------------------------------------------------------------------
// Quick compare (subsystem-level only)
// ---------------------------------------------------------------------------

pub fn quick_compare(a: &Plan, b: &Plan) -> SubsystemDiff {
    let ha = a.plan_hashes();
    let hb = b.plan_hashes();
    SubsystemDiff {
        operationplans_match: ha.operationplans == hb.operationplans,
        buffers_match: ha.buffers == hb.buffers,
        resources_match: ha.resources == hb.resources,
        demands_match: ha.demands == hb.demands,
    }
}

// ---------------------------------------------------------------------------
// Full diff
// ---------------------------------------------------------------------------

pub fn diff_plans(a: &Plan, b: &Plan) -> PlanDiff {
    let subsystem_diffs = quick_compare(a, b);
    let mut operationplan_diffs = Vec::new();
    let mut buffer_diffs = Vec::new();

    for (&id, &ka) in &a.ids {
        let Some(&kb) = b.ids.get(&id) else {
            operationplan_diffs.push(OperationPlanDiff::OnlyInA(id));
            continue;
        };
        let (pa, pb) = (&a.operationplans[ka], &b.operationplans[kb]);
        let mut mismatches = Vec::new();
        if a.operations[pa.operation].name != b.operations[pb.operation].name {
            mismatches.push("operation");
        }
        if pa.quantity != pb.quantity {
            mismatches.push("quantity");
        }
        if pa.dates != pb.dates {
            mismatches.push("dates");
        }
        if pa.status != pb.status {
            mismatches.push("status");
        }
        if !mismatches.is_empty() {
            operationplan_diffs
                .push(OperationPlanDiff::Mismatch { id, description: mismatches.join(", ") });
        }
    }
    for &id in b.ids.keys() {
        if !a.ids.contains_key(&id) {
            operationplan_diffs.push(OperationPlanDiff::OnlyInB(id));
        }
    }

    for (_, ba) in a.buffers() {
        let Some(kb) = b.buffer_by_name(&ba.name) else {
            buffer_diffs.push(EntityDiff::OnlyInA(ba.name.clone()));
            continue;
        };
        let bb = &b.buffers[kb];
        let rows = |t: &crate::timeline::Timeline<EventRef>| {
            t.iter().map(|(_, e)| (e.date(), e.kind(), e.quantity())).collect::<Vec<_>>()
        };
        if rows(&ba.timeline) != rows(&bb.timeline) {
            let at = ba
                .timeline
                .iter()
                .zip(bb.timeline.iter())
                .find(|((_, x), (_, y))| x.date() != y.date() || x.onhand() != y.onhand())
                .map(|((_, x), _)| x.date());
            let description = match at {
                Some(d) => format!("timelines differ from {d}"),
                None => "timelines differ in length".to_string(),
            };
            buffer_diffs.push(EntityDiff::Mismatch { name: ba.name.clone(), description });
        }
    }
    for (_, bb) in b.buffers() {
        if a.buffer_by_name(&bb.name).is_none() {
            buffer_diffs.push(EntityDiff::OnlyInB(bb.name.clone()));
        }
    }

    let is_identical = operationplan_diffs.is_empty()
        && buffer_diffs.is_empty()
        && subsystem_diffs.operationplans_match
        && subsystem_diffs.buffers_match
        && subsystem_diffs.resources_match
        && subsystem_diffs.demands_match;

    PlanDiff { is_identical, subsystem_diffs, operationplan_diffs, buffer_diffs }
}

// ---------------------------------------------------------------------------
// Consistency checks
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum Inconsistency {
    #[error("buffer '{name}': {source}")]
    BufferTimeline { name: String, source: TimelineError },
    #[error("resource '{name}': {source}")]
    ResourceTimeline { name: String, source: TimelineError },
    #[error("operationplan {0} is indexed but not activated")]
    InactiveIndexed(OperationPlanId),
    #[error("flowplan of operationplan {0} points at a missing event")]
    DanglingFlowPlan(OperationPlanId),
    #[error("demand '{0}' lists a delivery that is not activated")]
    StaleDelivery(String),
    #[error("operationplan {0} lies outside its owner")]
    OutsideOwner(OperationPlanId),
}

/// Walk the whole plan and report everything that contradicts the internal
/// bookkeeping. An empty result means the plan is consistent.
pub fn check_plan(plan: &Plan) -> Vec<Inconsistency> {
    let mut issues = Vec::new();
    for (_, b) in plan.buffers() {
        if let Err(source) = b.timeline.check() {
            issues.push(Inconsistency::BufferTimeline { name: b.name.clone(), source });
        }
    }
    for (_, r) in plan.resources() {
        if let Err(source) = r.timeline.check() {
            issues.push(Inconsistency::ResourceTimeline { name: r.name.clone(), source });
        }
    }
    for (&id, &key) in &plan.ids {
        let Some(p) = plan.operationplans.get(key) else {
            issues.push(Inconsistency::InactiveIndexed(id));
            continue;
        };
        if !p.activated {
            issues.push(Inconsistency::InactiveIndexed(id));
        }
        let dangling = p.flowplans.iter().any(|&fp| {
            plan.flowplans
                .get(fp)
                .is_none_or(|f| plan.buffers[f.buffer].timeline.get(f.event).is_none())
        });
        if dangling {
            issues.push(Inconsistency::DanglingFlowPlan(id));
        }
        if let Some(owner) = p.owner.and_then(|o| plan.operationplans.get(o)) {
            if p.dates.start < owner.dates.start || p.dates.end > owner.dates.end {
                issues.push(Inconsistency::OutsideOwner(id));
            }
        }
    }
    for (_, d) in plan.demands() {
        let stale = d
            .deliveries
            .iter()
            .any(|&k| plan.operationplans.get(k).is_none_or(|p| !p.activated));
        if stale {
            issues.push(Inconsistency::StaleDelivery(d.name.clone()));
        }
    }
    issues
}

// ---------------------------------------------------------------------------
// Determinism validation
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct DeterminismResult {
    pub is_deterministic: bool,
    /// Index of the first run whose hash differs from the first run.
    pub divergent_run: Option<usize>,
    pub hashes: Vec<u64>,
}

/// Build the same plan `runs` times and compare the state hashes.
pub fn validate_determinism<F>(mut build: F, runs: usize) -> PlanResult<DeterminismResult>
where
    F: FnMut() -> PlanResult<Plan>,
{
    let mut hashes = Vec::with_capacity(runs);
    for _ in 0..runs {
        hashes.push(build()?.state_hash());
    }
    let divergent_run = hashes.iter().position(|&h| Some(&h) != hashes.first());
    Ok(DeterminismResult { is_deterministic: divergent_run.is_none(), divergent_run, hashes })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::qty;
    use crate::test_utils::*;
    use crate::time::Duration;

    fn make_test_plan() -> Plan {
        let mut f = Fixture::new();
        let steel = f.buffer("steel");
        let frame = f.buffer("frame");
        let weld = f.fixed_op("weld", Duration::days(2));
        f.consume(weld, steel, 2.0);
        f.produce(weld, frame, 1.0);
        f.place(weld, 3.0, day(5));
        f.place(weld, 1.0, day(9));
        f.plan
    }

    // -----------------------------------------------------------------------
    // Test 1: Identical plans have identical diff
    // -----------------------------------------------------------------------
    #[test]
    fn diff_identical_plans() {
        let diff = diff_plans(&make_test_plan(), &make_test_plan());
        assert!(diff.is_identical);
        assert!(diff.operationplan_diffs.is_empty());
        assert!(diff.buffer_diffs.is_empty());
    }

    // -----------------------------------------------------------------------
    // Test 2: Moved operationplan detected
    // -----------------------------------------------------------------------
    #[test]
    fn diff_detects_moved_plan() {
        let a = make_test_plan();
        let mut b = make_test_plan();
        let key = b.operationplan_by_id(OperationPlanId(1)).unwrap();
        b.set_end(key, day(7), false).unwrap();

        let diff = diff_plans(&a, &b);
        assert!(!diff.is_identical);
        assert_eq!(
            diff.operationplan_diffs,
            vec![OperationPlanDiff::Mismatch { id: OperationPlanId(1), description: "dates".into() }]
        );
        assert_eq!(diff.buffer_diffs.len(), 2);
        assert!(diff.subsystem_diffs.resources_match);
    }

    // -----------------------------------------------------------------------
    // Test 3: Plan only in one side detected
    // -----------------------------------------------------------------------
    #[test]
    fn diff_detects_plan_only_in_b() {
        let a = make_test_plan();
        let mut b = make_test_plan();
        let weld = b.operation_by_name("weld").unwrap();
        let key = b
            .create_operationplan(crate::operationplan::NewPlan::new(weld, qty(1.0)).ending(day(20)))
            .unwrap();
        b.activate(key).unwrap();

        let diff = diff_plans(&a, &b);
        assert_eq!(diff.operationplan_diffs, vec![OperationPlanDiff::OnlyInB(OperationPlanId(3))]);
        assert!(!diff.subsystem_diffs.operationplans_match);
    }

    // -----------------------------------------------------------------------
    // Test 4: Consistent plan passes the checks
    // -----------------------------------------------------------------------
    #[test]
    fn check_plan_passes_on_consistent_plan() {
        let plan = make_test_plan();
        let issues = check_plan(&plan);
        assert!(issues.is_empty(), "{issues:?}");
    }

    // -----------------------------------------------------------------------
    // Test 5: Determinism over repeated builds
    // -----------------------------------------------------------------------
    #[test]
    fn validate_determinism_passes() {
        let result = validate_determinism(|| Ok(make_test_plan()), 4).unwrap();
        assert!(result.is_deterministic);
        assert_eq!(result.divergent_run, None);
        assert_eq!(result.hashes.len(), 4);
    }

    // -----------------------------------------------------------------------
    // Test 6: Divergent build reported
    // -----------------------------------------------------------------------
    #[test]
    fn validate_determinism_reports_divergence() {
        let mut run = 0;
        let result = validate_determinism(
            || {
                run += 1;
                let mut plan = make_test_plan();
                if run == 3 {
                    let key = plan.operationplan_by_id(OperationPlanId(2)).unwrap();
                    plan.set_quantity(key, qty(2.0), false, true, true)?;
                }
                Ok(plan)
            },
            4,
        )
        .unwrap();
        assert!(!result.is_deterministic);
        assert_eq!(result.divergent_run, Some(2));
    }

    // -----------------------------------------------------------------------
    // Test 7: Empty plans are identical
    // -----------------------------------------------------------------------
    #[test]
    fn diff_empty_plans() {
        let diff = diff_plans(&Plan::default(), &Plan::default());
        assert!(diff.is_identical);
    }
}
