//! Lazy problem detection.
//!
//! Edits mark the touched demand, buffer, resource or operation changed.
//! The next problem query drains the change set, computes the desired
//! problems of every affected owner and reconciles them against the stored
//! chains. Owners with detection switched off reconcile to nothing.
//!
//! Detection runs under the write lock of the problem store, so concurrent
//! readers arriving mid-pass wait and then find the change set empty.

use std::ops::Deref;
use std::sync::{PoisonError, RwLockReadGuard};

use tracing::trace;

use crate::fixed::{Quantity, ROUNDING_ERROR, qty_to_f64};
use crate::flowplan::EventRef;
use crate::id::{BufferId, DemandId, OperationPlanKey, ResourceId};
use crate::operation::OperationKind;
use crate::plan::Plan;
use crate::problem::{ChangeKey, Problem, ProblemKind, ProblemOwner, ProblemSpec, ProblemStore};
use crate::resource::ResourceKind;
use crate::time::{Date, DateRange};
use crate::timeline::{EventKind, Timeline};

/// Read access to the problem store after detection has caught up.
pub struct ProblemsView<'a> {
    guard: RwLockReadGuard<'a, ProblemStore>,
}

impl Deref for ProblemsView<'_> {
    type Target = ProblemStore;

    fn deref(&self) -> &ProblemStore {
        &self.guard
    }
}

impl Plan {
    /// Run detection for everything changed since the last pass. Returns
    /// the number of owners evaluated.
    pub fn compute_problems(&self) -> usize {
        {
            let store = self.problems.read().unwrap_or_else(PoisonError::into_inner);
            if store.changed.is_empty() {
                return 0;
            }
        }
        let mut store = self.problems.write().unwrap_or_else(PoisonError::into_inner);
        let changed = store.changed.drain();
        if changed.is_empty() {
            return 0;
        }

        let owners = self.expand_owners(&changed);

        #[cfg(feature = "parallel")]
        let desired: Vec<(ProblemOwner, Vec<ProblemSpec>)> = {
            use rayon::prelude::*;
            owners.par_iter().map(|&o| (o, self.desired_problems(o))).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let desired: Vec<(ProblemOwner, Vec<ProblemSpec>)> =
            owners.iter().map(|&o| (o, self.desired_problems(o))).collect();

        let evaluated = desired.len();
        for (owner, specs) in desired {
            let (created, deleted) = store.reconcile(owner, specs);
            if created + deleted > 0 {
                trace!(?owner, created, deleted, "problems updated");
            }
        }
        evaluated
    }

    /// All problems, detecting first when anything changed.
    pub fn problems(&self) -> ProblemsView<'_> {
        self.compute_problems();
        ProblemsView { guard: self.problems.read().unwrap_or_else(PoisonError::into_inner) }
    }

    /// Problems of one owner, detecting first when anything changed.
    pub fn problems_of(&self, owner: ProblemOwner) -> Vec<Problem> {
        self.problems().for_owner(owner).map(|(_, p)| p.clone()).collect()
    }

    /// Owners affected by a set of changes. An operation expands to its
    /// activated plans.
    fn expand_owners(&self, changed: &[ChangeKey]) -> Vec<ProblemOwner> {
        let mut owners = Vec::with_capacity(changed.len());
        for &key in changed {
            match key {
                ChangeKey::Demand(d) => owners.push(ProblemOwner::Demand(d)),
                ChangeKey::Buffer(b) => owners.push(ProblemOwner::Buffer(b)),
                ChangeKey::Resource(r) => owners.push(ProblemOwner::Resource(r)),
                ChangeKey::Operation(op) => owners.extend(
                    self.operationplans_of(op).map(ProblemOwner::OperationPlan),
                ),
            }
        }
        owners
    }

    fn desired_problems(&self, owner: ProblemOwner) -> Vec<ProblemSpec> {
        match owner {
            ProblemOwner::Demand(d) => self.demand_problems(d),
            ProblemOwner::Buffer(b) => self.buffer_problems(b),
            ProblemOwner::Resource(r) => self.resource_problems(r),
            ProblemOwner::OperationPlan(k) => self.operationplan_problems(k),
        }
    }

    // -- demands ---------------------------------------------------------------

    fn demand_problems(&self, id: DemandId) -> Vec<ProblemSpec> {
        let Some(d) = self.demands.get(id).filter(|d| d.detect_problems) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let due_range = DateRange::new(d.due, d.due);

        let deliveries: Vec<_> =
            d.deliveries.iter().filter_map(|&k| self.operationplans.get(k)).collect();
        if deliveries.is_empty() {
            if d.quantity > Quantity::ZERO {
                out.push(ProblemSpec::new(
                    ProblemKind::DemandNotPlanned,
                    due_range,
                    qty_to_f64(d.quantity),
                    format!("Demand '{}' is not planned", d.name),
                ));
            }
            return out;
        }

        let problems = &self.config.problems;
        let latest = deliveries.iter().map(|p| p.dates.end).max().unwrap_or(d.due);
        let earliest = deliveries.iter().map(|p| p.dates.end).min().unwrap_or(d.due);
        if latest - d.due > problems.late_tolerance() {
            let delay = latest - d.due;
            out.push(ProblemSpec::new(
                ProblemKind::Late,
                DateRange::new(d.due, latest),
                delay.as_days(),
                format!("Demand '{}' planned {} after its due date", d.name, delay),
            ));
        }
        if d.due - earliest > problems.early_tolerance() {
            let lead = d.due - earliest;
            out.push(ProblemSpec::new(
                ProblemKind::Early,
                DateRange::new(earliest, d.due),
                lead.as_days(),
                format!("Demand '{}' planned {} before its due date", d.name, lead),
            ));
        }

        let planned: Quantity = deliveries.iter().map(|p| p.quantity).sum();
        if planned + ROUNDING_ERROR < d.quantity {
            out.push(ProblemSpec::new(
                ProblemKind::Short,
                due_range,
                qty_to_f64(d.quantity - planned),
                format!("Demand '{}' planned {} units short", d.name, d.quantity - planned),
            ));
        }
        if planned - ROUNDING_ERROR > d.quantity {
            out.push(ProblemSpec::new(
                ProblemKind::Excess,
                due_range,
                qty_to_f64(planned - d.quantity),
                format!("Demand '{}' planned {} units excess", d.name, planned - d.quantity),
            ));
        }
        out
    }

    // -- buffers ---------------------------------------------------------------

    fn buffer_problems(&self, id: BufferId) -> Vec<ProblemSpec> {
        let Some(b) = self.buffers.get(id).filter(|b| b.detect_problems) else {
            return Vec::new();
        };
        let (short, excess) = scan_targets(&b.timeline);
        let mut out: Vec<ProblemSpec> = short
            .into_iter()
            .map(|(range, q)| {
                ProblemSpec::new(
                    ProblemKind::MaterialShortage,
                    range,
                    qty_to_f64(q),
                    format!("Buffer '{}' has material shortage of {}", b.name, q),
                )
            })
            .collect();
        out.extend(excess.into_iter().map(|(range, q)| {
            ProblemSpec::new(
                ProblemKind::MaterialExcess,
                range,
                qty_to_f64(q),
                format!("Buffer '{}' has material excess of {}", b.name, q),
            )
        }));
        out
    }

    // -- resources -------------------------------------------------------------

    fn resource_problems(&self, id: ResourceId) -> Vec<ProblemSpec> {
        let Some(r) = self.resources.get(id).filter(|r| r.detect_problems) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        match r.kind {
            ResourceKind::Default => {
                let (under, over) = scan_targets(&r.timeline);
                out.extend(over.into_iter().map(|(range, q)| {
                    ProblemSpec::new(
                        ProblemKind::CapacityOverload,
                        range,
                        qty_to_f64(q),
                        format!("Resource '{}' has capacity shortage of {}", r.name, q),
                    )
                }));
                out.extend(under.into_iter().map(|(range, q)| {
                    ProblemSpec::new(
                        ProblemKind::CapacityUnderload,
                        range,
                        qty_to_f64(q),
                        format!("Resource '{}' has excess capacity of {}", r.name, q),
                    )
                }));
            }
            ResourceKind::Buckets => {
                out.extend(scan_buckets(&r.timeline).into_iter().map(|(range, q)| {
                    ProblemSpec::new(
                        ProblemKind::CapacityOverload,
                        range,
                        qty_to_f64(q),
                        format!("Resource '{}' bucket overloaded by {}", r.name, q),
                    )
                }));
            }
        }

        for (_, e) in r.timeline.iter() {
            let EventRef::Setup(key) = *e.payload() else { continue };
            let undefined = self
                .operationplans
                .get(key)
                .and_then(|p| p.setups.iter().find(|s| s.resource == id))
                .filter(|s| s.value.undefined);
            if let Some(slot) = undefined {
                out.push(ProblemSpec::new(
                    ProblemKind::InvalidData,
                    DateRange::new(e.date(), e.date() + slot.value.duration),
                    1.0,
                    format!(
                        "Resource '{}' has no setup rule for changeover to '{}'",
                        r.name,
                        slot.value.setup.as_deref().unwrap_or("")
                    ),
                ));
            }
        }
        out
    }

    // -- operationplans --------------------------------------------------------

    fn operationplan_problems(&self, key: OperationPlanKey) -> Vec<ProblemSpec> {
        let Some(p) = self.operationplans.get(key).filter(|p| p.activated) else {
            return Vec::new();
        };
        let op = &self.operations[p.operation];
        if !op.detect_problems {
            return Vec::new();
        }
        let mut out = Vec::new();
        let current = self.config.current;
        let weight = qty_to_f64(p.quantity);

        if p.owner.is_none() && !p.is_confirmed() {
            let fence = current + op.fence;
            if p.dates.start < current {
                out.push(ProblemSpec::new(
                    ProblemKind::BeforeCurrent,
                    DateRange::new(p.dates.start, p.dates.end.min(current)),
                    weight,
                    format!("Operation '{}' planned in the past", op.name),
                ));
            } else if p.dates.start < fence {
                out.push(ProblemSpec::new(
                    ProblemKind::BeforeFence,
                    DateRange::new(p.dates.start, p.dates.end.min(fence)),
                    weight,
                    format!("Operation '{}' planned before fence", op.name),
                ));
            }
        }

        if op.kind == OperationKind::Routing {
            for pair in p.children.windows(2) {
                let (Some(a), Some(b)) =
                    (self.operationplans.get(pair[0]), self.operationplans.get(pair[1]))
                else {
                    continue;
                };
                if a.dates.end > b.dates.start {
                    out.push(ProblemSpec::new(
                        ProblemKind::Precedence,
                        DateRange::new(b.dates.start, a.dates.end),
                        1.0,
                        format!(
                            "Operation '{}' starts before operation '{}' ends",
                            self.operations[b.operation].name, self.operations[a.operation].name
                        ),
                    ));
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Timeline scans
// ---------------------------------------------------------------------------

type Violations = Vec<(DateRange, Quantity)>;

/// A violation interval being tracked while walking a timeline.
#[derive(Default)]
struct Open {
    start: Option<Date>,
    worst: Quantity,
}

impl Open {
    fn observe(&mut self, date: Date, excess: Option<Quantity>, out: &mut Violations) {
        match (excess, self.start) {
            (Some(q), None) => {
                self.start = Some(date);
                self.worst = q;
            }
            (Some(q), Some(_)) => self.worst = self.worst.max(q),
            (None, Some(start)) => {
                if date != start {
                    out.push((DateRange::new(start, date), self.worst));
                }
                self.start = None;
            }
            (None, None) => {}
        }
    }

    fn finish(self, out: &mut Violations) {
        if let Some(start) = self.start {
            out.push((DateRange::new(start, Date::INFINITE_FUTURE), self.worst));
        }
    }
}

/// Intervals where the running on-hand is below the minimum target and
/// above the maximum target, evaluated after the last event of each date.
/// Unresolved intervals run to the end of the horizon.
fn scan_targets(timeline: &Timeline<EventRef>) -> (Violations, Violations) {
    let mut below = Vec::new();
    let mut above = Vec::new();
    let (mut low, mut high) = (Open::default(), Open::default());
    let mut minimum = Quantity::ZERO;
    let mut maximum: Option<Quantity> = None;

    let mut events = timeline.iter().peekable();
    while let Some((_, e)) = events.next() {
        match e.kind() {
            EventKind::SetMin => minimum = e.target(),
            EventKind::SetMax => maximum = Some(e.target()),
            _ => {}
        }
        if events.peek().is_some_and(|(_, n)| n.date() == e.date()) {
            continue;
        }
        let onhand = e.onhand();
        let short = minimum - onhand;
        low.observe(e.date(), (short > ROUNDING_ERROR).then_some(short), &mut below);
        let over = maximum.map(|m| onhand - m).filter(|&x| x > ROUNDING_ERROR);
        high.observe(e.date(), over, &mut above);
    }
    low.finish(&mut below);
    high.finish(&mut above);
    (below, above)
}

/// Per-bucket overloads. Each boundary event opens a bucket with the
/// capacity it carries; consumption inside the bucket is measured relative
/// to the on-hand at the boundary.
fn scan_buckets(timeline: &Timeline<EventRef>) -> Violations {
    let mut out = Vec::new();
    let mut bucket: Option<(Date, Quantity, Quantity)> = None;
    let mut worst = Quantity::ZERO;

    let close = |start: Date, end: Date, worst: Quantity, out: &mut Violations| {
        if worst > ROUNDING_ERROR {
            out.push((DateRange::new(start, end), worst));
        }
    };

    for (_, e) in timeline.iter() {
        if e.kind() == EventKind::BucketBoundary {
            if let Some((start, _, _)) = bucket {
                close(start, e.date(), worst, &mut out);
            }
            bucket = Some((e.date(), e.target(), e.onhand()));
            worst = Quantity::ZERO;
            continue;
        }
        if let Some((_, capacity, base)) = bucket {
            let left = capacity + (e.onhand() - base);
            worst = worst.max(-left);
        }
    }
    if let Some((start, _, _)) = bucket {
        close(start, Date::INFINITE_FUTURE, worst, &mut out);
    }
    out
}
