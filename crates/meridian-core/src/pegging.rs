//! Pegging: tracing material through buffers to the plans it serves.
//!
//! Every buffer is treated as a FIFO pipe. A consuming flowplan takes the
//! slice `[consumed before, consumed after]` of the cumulative consumption
//! and is pegged to the producing flowplans whose slice of the cumulative
//! production overlaps it, and the other way around. Crossing an
//! operationplan switches from its consuming to its producing flowplans
//! (downstream) or back (upstream).
//!
//! Material without a counterpart is reported as an unpegged step so that
//! the quantities of every level add up.

use serde::Serialize;

use crate::error::{PlanError, PlanResult};
use crate::fixed::{Quantity, ROUNDING_ERROR};
use crate::flowplan::EventRef;
use crate::id::{DemandId, FlowPlanId, LoadPlanId, OperationPlanKey};
use crate::plan::Plan;
use crate::time::{Date, Duration};

/// Where a pegging walk starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PegStart {
    Demand(DemandId),
    OperationPlan(OperationPlanKey),
    FlowPlan(FlowPlanId),
    LoadPlan(LoadPlanId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    /// Towards the supplies.
    Upstream,
    /// Towards the demands.
    Downstream,
}

/// One element of a pegging walk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeggingStep {
    pub flowplan: FlowPlanId,
    /// Buffer hops from the start: positive upstream, negative downstream.
    pub level: i32,
    /// Quantity of the starting element that flows through this step.
    pub quantity: Quantity,
    /// Share of this flowplan's own quantity that is involved.
    pub factor: Quantity,
    /// False for material without a producer (upstream) or consumer
    /// (downstream).
    pub pegged: bool,
}

/// Depth-first pegging walk. Steps are yielded parents first.
pub struct PeggingIter<'a> {
    plan: &'a Plan,
    direction: Direction,
    stack: Vec<PeggingStep>,
    max_depth: i32,
}

impl<'a> PeggingIter<'a> {
    fn new(plan: &'a Plan, direction: Direction) -> Self {
        // A path never crosses more buffers than exist without repeating.
        let max_depth = i32::try_from(plan.buffers.len()).unwrap_or(i32::MAX);
        Self { plan, direction, stack: Vec::new(), max_depth }
    }

    /// Push the flowplans of a hierarchy that continue the walk: consumers
    /// when going upstream, producers when going downstream.
    fn push_hierarchy(
        &mut self,
        key: OperationPlanKey,
        level: i32,
        quantity: Quantity,
        factor: Quantity,
        initial: bool,
    ) {
        let plan = self.plan;
        let mut found = Vec::new();
        for member in plan.hierarchy(plan.top_owner(key)) {
            for &fp in &plan.operationplans[member].flowplans {
                let Some(q) = plan.flowplan_quantity(fp) else { continue };
                let wanted = match self.direction {
                    Direction::Upstream => q < Quantity::ZERO,
                    Direction::Downstream => q > Quantity::ZERO,
                };
                if wanted {
                    let quantity = if initial { q.abs() } else { quantity };
                    found.push(PeggingStep { flowplan: fp, level, quantity, factor, pegged: true });
                }
            }
        }
        self.push_all(found);
    }

    fn push_all(&mut self, steps: Vec<PeggingStep>) {
        self.stack.extend(steps.into_iter().filter(|s| s.quantity >= ROUNDING_ERROR).rev());
    }

    fn expand(&mut self, step: &PeggingStep) {
        if !step.pegged || step.level.abs() > self.max_depth {
            return;
        }
        let plan = self.plan;
        let Some(q) = plan.flowplan_quantity(step.flowplan) else { return };
        let hop = match self.direction {
            Direction::Upstream => 1,
            Direction::Downstream => -1,
        };
        let crosses_buffer = match self.direction {
            Direction::Upstream => q < -ROUNDING_ERROR,
            Direction::Downstream => q > ROUNDING_ERROR,
        };
        if crosses_buffer {
            let own = q.abs();
            let (links, unpegged) = plan.peg_links(step.flowplan, self.direction);
            let mut next: Vec<PeggingStep> = links
                .into_iter()
                .map(|(fp, overlap, other)| PeggingStep {
                    flowplan: fp,
                    level: step.level + hop,
                    quantity: share(step.quantity, overlap, own),
                    factor: share(step.factor, overlap, other),
                    pegged: true,
                })
                .collect();
            if unpegged > ROUNDING_ERROR {
                next.push(PeggingStep {
                    flowplan: step.flowplan,
                    level: step.level + hop,
                    quantity: share(step.quantity, unpegged, own),
                    factor: step.factor,
                    pegged: false,
                });
            }
            self.push_all(next);
        } else if let Some(fp) = plan.flowplans.get(step.flowplan) {
            self.push_hierarchy(fp.operationplan, step.level, step.quantity, step.factor, false);
        }
    }
}

/// `value * part / whole`, zero when `whole` is zero.
fn share(value: Quantity, part: Quantity, whole: Quantity) -> Quantity {
    value.saturating_mul(part).checked_div(whole).unwrap_or(Quantity::ZERO)
}

impl Iterator for PeggingIter<'_> {
    type Item = PeggingStep;

    fn next(&mut self) -> Option<PeggingStep> {
        let step = self.stack.pop()?;
        self.expand(&step);
        Some(step)
    }
}

impl Plan {
    /// Walk the pegging network from `start`.
    pub fn pegging(&self, start: PegStart, direction: Direction) -> PlanResult<PeggingIter<'_>> {
        let mut iter = PeggingIter::new(self, direction);
        match start {
            PegStart::Demand(d) => {
                let d = self.demands.get(d).ok_or_else(|| PlanError::logic("unknown demand"))?;
                if direction == Direction::Upstream {
                    for &key in &d.deliveries {
                        iter.push_hierarchy(key, 0, Quantity::ZERO, Quantity::ONE, true);
                    }
                }
            }
            PegStart::OperationPlan(key) => {
                self.plan_checked(key)?;
                iter.push_hierarchy(key, 0, Quantity::ZERO, Quantity::ONE, true);
            }
            PegStart::LoadPlan(lp) => {
                let lp = self.loadplans.get(lp).ok_or_else(|| PlanError::logic("unknown loadplan"))?;
                iter.push_hierarchy(lp.operationplan, 0, Quantity::ZERO, Quantity::ONE, true);
            }
            PegStart::FlowPlan(fp) => {
                let q = self.flowplan_quantity(fp).ok_or_else(|| PlanError::logic("unknown flowplan"))?;
                iter.push_all(vec![PeggingStep {
                    flowplan: fp,
                    level: 0,
                    quantity: q.abs(),
                    factor: Quantity::ONE,
                    pegged: true,
                }]);
            }
        }
        Ok(iter)
    }

    /// Flowplans on the other side of the buffer whose cumulative slice
    /// overlaps that of `fp`, with the overlap and their own quantity, plus
    /// the part of `fp` left without a counterpart.
    fn peg_links(
        &self,
        fp: FlowPlanId,
        direction: Direction,
    ) -> (Vec<(FlowPlanId, Quantity, Quantity)>, Quantity) {
        let Some(f) = self.flowplans.get(fp) else { return (Vec::new(), Quantity::ZERO) };
        let timeline = &self.buffers[f.buffer].timeline;
        let Some(e) = timeline.get(f.event) else { return (Vec::new(), Quantity::ZERO) };
        let own = e.quantity().abs();
        // Slice of the cumulative flow taken by `fp` on its own side.
        let (lo, hi) = match direction {
            Direction::Upstream => (e.cumulative_consumed() - own, e.cumulative_consumed()),
            Direction::Downstream => (e.cumulative_produced() - own, e.cumulative_produced()),
        };

        let mut links = Vec::new();
        let mut pegged = Quantity::ZERO;
        for (_, other) in timeline.iter() {
            let EventRef::FlowPlan(ofp) = *other.payload() else { continue };
            let oq = other.quantity();
            let (olo, ohi) = match direction {
                Direction::Upstream if oq > ROUNDING_ERROR => {
                    (other.cumulative_produced() - oq, other.cumulative_produced())
                }
                Direction::Downstream if oq < -ROUNDING_ERROR => {
                    (other.cumulative_consumed() + oq, other.cumulative_consumed())
                }
                _ => continue,
            };
            if olo >= hi {
                break;
            }
            let overlap = hi.min(ohi) - lo.max(olo);
            if overlap > ROUNDING_ERROR {
                pegged += overlap;
                links.push((ofp, overlap, oq.abs()));
            }
        }
        (links, (own - pegged).max(Quantity::ZERO))
    }

    // -----------------------------------------------------------------------
    // Criticality and delay
    // -----------------------------------------------------------------------

    /// Downstream paths from `key` to the demands it serves.
    fn demand_paths(&self, key: OperationPlanKey, depth: usize, out: &mut Vec<DemandPath>) {
        let top = self.top_owner(key);
        let p = &self.operationplans[top];
        if let Some(d) = p.demand.and_then(|d| self.demands.get(d)) {
            out.push(DemandPath {
                slack: d.due - p.dates.end,
                lead: Duration::ZERO,
                due: d.due,
            });
            return;
        }
        if depth > self.buffers.len() {
            return;
        }
        for member in self.hierarchy(top) {
            for &fp in &self.operationplans[member].flowplans {
                let Some(produced) = self.flowplan_event(fp) else { continue };
                if produced.quantity() <= ROUNDING_ERROR {
                    continue;
                }
                let (links, _) = self.peg_links(fp, Direction::Downstream);
                for (cfp, _, _) in links {
                    let Some(consumed) = self.flowplan_event(cfp) else { continue };
                    let consumer = self.top_owner(self.flowplans[cfp].operationplan);
                    let gap = consumed.date() - produced.date();
                    let through = self.operationplans[consumer].dates.end - consumed.date();
                    let mut downstream = Vec::new();
                    self.demand_paths(consumer, depth + 1, &mut downstream);
                    out.extend(downstream.into_iter().map(|path| DemandPath {
                        slack: path.slack + gap,
                        lead: path.lead + through,
                        due: path.due,
                    }));
                }
            }
        }
    }

    /// Days the plan can slip before a demand it serves is delivered late.
    /// 999 when it serves no demand; never negative.
    pub fn criticality(&self, key: OperationPlanKey) -> PlanResult<f64> {
        self.plan_checked(key)?;
        let mut paths = Vec::new();
        self.demand_paths(key, 0, &mut paths);
        Ok(paths
            .iter()
            .map(|p| p.slack)
            .min()
            .map_or(UNPEGGED_CRITICALITY, |s| s.as_days().max(0.0)))
    }

    /// How late the plan ends against the latest end that still meets the
    /// due date of the demands it serves, after subtracting the lead time of
    /// the consuming chain. Negative when early; zero when it serves no
    /// demand.
    pub fn delay(&self, key: OperationPlanKey) -> PlanResult<Duration> {
        let end = self.plan_checked(key)?.dates.end;
        let mut paths = Vec::new();
        self.demand_paths(key, 0, &mut paths);
        Ok(paths
            .iter()
            .map(|p| end - (p.due - p.lead))
            .max()
            .unwrap_or(Duration::ZERO))
    }
}

const UNPEGGED_CRITICALITY: f64 = 999.0;

struct DemandPath {
    slack: Duration,
    lead: Duration,
    due: Date,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::qty;
    use crate::flow::FlowKind;
    use crate::id::{BufferId, OperationId};
    use crate::operation::OperationKind;
    use crate::operationplan::NewPlan;

    fn day(n: u32) -> Date {
        Date::from_ymd(2024, 1, n).unwrap()
    }

    /// buy -> steel -> weld -> frame -> ship
    struct Chain {
        plan: Plan,
        buy: OperationId,
        weld: OperationId,
        ship: OperationId,
        steel: BufferId,
    }

    fn chain() -> Chain {
        let mut plan = Plan::default();
        plan.config.merge_on_activate = false;
        let loc = plan.add_location("plant").unwrap();
        let s = plan.add_item("steel").unwrap();
        let f = plan.add_item("frame").unwrap();
        let steel = plan.add_buffer(s, loc).unwrap();
        let frame = plan.add_buffer(f, loc).unwrap();
        let one_day = OperationKind::FixedTime { duration: Duration::DAY };
        let buy = plan.add_operation("buy", one_day.clone()).unwrap();
        let weld = plan.add_operation("weld", one_day.clone()).unwrap();
        let ship = plan.add_operation("ship", one_day).unwrap();
        plan.add_flow(buy, steel, qty(1.0), FlowKind::End).unwrap();
        plan.add_flow(weld, steel, qty(-2.0), FlowKind::Start).unwrap();
        plan.add_flow(weld, frame, qty(1.0), FlowKind::End).unwrap();
        plan.add_flow(ship, frame, qty(-1.0), FlowKind::Start).unwrap();
        Chain { plan, buy, weld, ship, steel }
    }

    fn place(plan: &mut Plan, op: OperationId, q: f64, end: Date) -> OperationPlanKey {
        let key = plan
            .create_operationplan(NewPlan::new(op, qty(q)).ending(end).with_flowloads())
            .unwrap();
        plan.activate(key).unwrap();
        key
    }

    #[test]
    fn upstream_from_demand_reaches_supplies() {
        let Chain { mut plan, buy, weld, ship, .. } = chain();
        let item = plan.item_by_name("frame").unwrap();
        let d = plan.add_demand("order", item, qty(5.0), day(10)).unwrap();
        let b1 = place(&mut plan, buy, 6.0, day(2));
        let b2 = place(&mut plan, buy, 6.0, day(3));
        place(&mut plan, weld, 5.0, day(6));
        let s = place(&mut plan, ship, 5.0, day(9));
        plan.set_demand(s, Some(d)).unwrap();

        let steps: Vec<PeggingStep> =
            plan.pegging(PegStart::Demand(d), Direction::Upstream).unwrap().collect();
        let levels: Vec<i32> = steps.iter().map(|s| s.level).collect();
        assert_eq!(levels, vec![0, 1, 1, 2, 2]);

        let buys: Vec<(OperationPlanKey, Quantity)> = steps
            .iter()
            .filter(|s| s.level == 2)
            .map(|s| (plan.flowplan(s.flowplan).unwrap().operationplan(), s.quantity))
            .collect();
        // Weld needs 10 steel: 6 from the first purchase, 4 from the second.
        assert_eq!(buys, vec![(b1, qty(3.0)), (b2, qty(2.0))]);
        assert!(steps.iter().all(|s| s.pegged));
    }

    #[test]
    fn unproduced_material_is_unpegged() {
        let Chain { mut plan, buy, weld, .. } = chain();
        place(&mut plan, buy, 4.0, day(2));
        let w = place(&mut plan, weld, 3.0, day(6));
        let steps: Vec<PeggingStep> =
            plan.pegging(PegStart::OperationPlan(w), Direction::Upstream).unwrap().collect();
        let unpegged: Vec<&PeggingStep> = steps.iter().filter(|s| !s.pegged).collect();
        assert_eq!(unpegged.len(), 1);
        assert_eq!(unpegged[0].quantity, qty(2.0));
        assert_eq!(unpegged[0].level, 1);
    }

    #[test]
    fn downstream_from_supply() {
        let Chain { mut plan, buy, weld, steel, .. } = chain();
        let b = place(&mut plan, buy, 10.0, day(2));
        let w1 = place(&mut plan, weld, 2.0, day(6));
        let w2 = place(&mut plan, weld, 2.0, day(8));
        let steps: Vec<PeggingStep> =
            plan.pegging(PegStart::OperationPlan(b), Direction::Downstream).unwrap().collect();
        assert_eq!(plan.flowplan(steps[0].flowplan).unwrap().buffer(), steel);
        let on_steel = |s: &&PeggingStep| plan.flowplan(s.flowplan).unwrap().buffer() == steel;
        let consumers: Vec<OperationPlanKey> = steps
            .iter()
            .filter(|s| s.level == -1 && s.pegged)
            .filter(on_steel)
            .map(|s| plan.flowplan(s.flowplan).unwrap().operationplan())
            .collect();
        assert_eq!(consumers, vec![w1, w2]);
        let leftover: Vec<&PeggingStep> =
            steps.iter().filter(|s| s.level == -1 && !s.pegged).collect();
        assert_eq!(leftover.len(), 1);
        assert_eq!(leftover[0].quantity, qty(2.0));
    }

    #[test]
    fn criticality_and_delay_are_separate() {
        let Chain { mut plan, buy, weld, ship, .. } = chain();
        let item = plan.item_by_name("frame").unwrap();
        let d = plan.add_demand("order", item, qty(1.0), day(10)).unwrap();
        let b = place(&mut plan, buy, 2.0, day(3));
        let w = place(&mut plan, weld, 1.0, day(6));
        let s = place(&mut plan, ship, 1.0, day(8));
        plan.set_demand(s, Some(d)).unwrap();

        // steel waits 2 days, frame waits 1 day, delivery 2 days early.
        assert!((plan.criticality(b).unwrap() - 5.0).abs() < 1e-9);
        assert!((plan.criticality(w).unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(plan.delay(b).unwrap(), -Duration::days(5));

        // Late delivery: no slack left, delay shows by how much.
        plan.set_end(s, day(12), false).unwrap();
        plan.set_end(w, day(11), false).unwrap();
        assert_eq!(plan.criticality(w).unwrap(), 0.0);
        assert_eq!(plan.delay(w).unwrap(), Duration::days(2));

        let lonely = place(&mut plan, buy, 1.0, day(20));
        assert_eq!(plan.criticality(lonely).unwrap(), 999.0);
        assert_eq!(plan.delay(lonely).unwrap(), Duration::ZERO);
    }
}
