//! Entry point for planning algorithms.
//!
//! The core does not plan by itself. A [`Solver`] is handed the plan and one
//! entity at a time and edits operationplans through the plan's API,
//! typically wrapped in [`crate::command`] objects so it can back out.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::error::{PlanError, PlanResult};
use crate::id::{BufferId, DemandId, FlowId, LoadId, OperationId, ResourceId};
use crate::plan::Plan;

// ---------------------------------------------------------------------------
// SolveTarget
// ---------------------------------------------------------------------------

/// Everything a solver can be asked to plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SolveTarget {
    Plan,
    Demand(DemandId),
    Buffer(BufferId),
    Resource(ResourceId),
    Operation(OperationId),
    Flow(FlowId),
    Load(LoadId),
}

// ---------------------------------------------------------------------------
// Solver trait
// ---------------------------------------------------------------------------

pub trait Solver: fmt::Debug {
    fn name(&self) -> &str;

    /// Plan `target`. Called through [`Plan::solve_with`], which has already
    /// checked that the target exists.
    fn solve(&mut self, plan: &mut Plan, target: SolveTarget) -> PlanResult<()>;
}

impl Plan {
    /// Hand `target` to `solver`.
    pub fn solve_with<S: Solver + ?Sized>(&mut self, solver: &mut S, target: SolveTarget) -> PlanResult<()> {
        match target {
            SolveTarget::Plan => {}
            SolveTarget::Demand(d) => {
                self.demand_checked(d)?;
            }
            SolveTarget::Buffer(b) => {
                self.buffer_checked(b)?;
            }
            SolveTarget::Resource(r) => {
                self.resource_checked(r)?;
            }
            SolveTarget::Operation(o) => {
                self.operation_checked(o)?;
            }
            SolveTarget::Flow(f) => {
                self.flows.get(f).ok_or_else(|| PlanError::logic("unknown flow"))?;
            }
            SolveTarget::Load(l) => {
                self.loads.get(l).ok_or_else(|| PlanError::logic("unknown load"))?;
            }
        }
        debug!(solver = solver.name(), ?target, "solving");
        solver.solve(self, target)
    }

    /// Demands in planning order: priority, then due date, then name.
    pub fn demands_in_planning_order(&self) -> Vec<DemandId> {
        let mut ids: Vec<DemandId> = self.demands.keys().collect();
        ids.sort_by(|&a, &b| {
            let (da, db) = (&self.demands[a], &self.demands[b]);
            (da.priority, da.due, &da.name).cmp(&(db.priority, db.due, &db.name))
        });
        ids
    }

    /// Hand every demand to `solver` in planning order.
    pub fn solve_demands<S: Solver + ?Sized>(&mut self, solver: &mut S) -> PlanResult<()> {
        for d in self.demands_in_planning_order() {
            self.solve_with(solver, SolveTarget::Demand(d))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CreateOperationPlan};
    use crate::fixed::qty;
    use crate::flow::FlowKind;
    use crate::operation::OperationKind;
    use crate::operationplan::NewPlan;
    use crate::problem::ProblemOwner;
    use crate::time::{Date, Duration};

    fn day(n: u32) -> Date {
        Date::from_ymd(2024, 1, n).unwrap()
    }

    /// Ships every demand on its due date and buys the material just in time.
    #[derive(Debug, Default)]
    struct JustInTime {
        visited: Vec<SolveTarget>,
        buy: Option<OperationId>,
    }

    impl Solver for JustInTime {
        fn name(&self) -> &str {
            "just in time"
        }

        fn solve(&mut self, plan: &mut Plan, target: SolveTarget) -> PlanResult<()> {
            self.visited.push(target);
            let SolveTarget::Demand(d) = target else {
                return Ok(());
            };
            let Some(deliver) = plan.resolve_delivery_operation(d)? else {
                return Ok(());
            };
            let (q, due) = {
                let demand = plan.demand(d).unwrap();
                (demand.quantity, demand.due)
            };
            if let Some(buy) = self.buy {
                let mut cmd =
                    CreateOperationPlan::new(plan, NewPlan::new(buy, q).ending(due))?;
                cmd.commit(plan)?;
            }
            let mut cmd = CreateOperationPlan::new(
                plan,
                NewPlan::new(deliver, q).ending(due).for_demand(d),
            )?;
            cmd.commit(plan)
        }
    }

    #[test]
    fn demands_are_visited_by_priority_then_due() {
        let mut plan = Plan::default();
        let item = plan.add_item("widget").unwrap();
        let late = plan.add_demand("late", item, qty(1.0), day(9)).unwrap();
        let early = plan.add_demand("early", item, qty(1.0), day(2)).unwrap();
        let urgent = plan.add_demand("urgent", item, qty(1.0), day(20)).unwrap();
        plan.set_demand_priority(urgent, -1).unwrap();

        let mut solver = JustInTime::default();
        plan.solve_demands(&mut solver).unwrap();
        assert_eq!(
            solver.visited,
            vec![
                SolveTarget::Demand(urgent),
                SolveTarget::Demand(early),
                SolveTarget::Demand(late)
            ]
        );
    }

    #[test]
    fn solver_plans_demand_without_shortage() {
        let mut plan = Plan::default();
        let item = plan.add_item("widget").unwrap();
        let loc = plan.add_location("dc").unwrap();
        let buffer = plan.add_buffer(item, loc).unwrap();
        let buy = plan
            .add_operation("buy widget", OperationKind::FixedTime { duration: Duration::days(2) })
            .unwrap();
        plan.add_flow(buy, buffer, qty(1.0), FlowKind::End).unwrap();
        let d = plan.add_demand("order", item, qty(4.0), day(10)).unwrap();

        let mut solver = JustInTime { buy: Some(buy), ..Default::default() };
        plan.solve_with(&mut solver, SolveTarget::Demand(d)).unwrap();

        assert_eq!(plan.demand(d).unwrap().deliveries().len(), 1);
        assert_eq!(plan.buffer(buffer).unwrap().onhand_at(day(20)), qty(0.0));
        plan.compute_problems();
        assert!(plan.problems_of(ProblemOwner::Buffer(buffer)).is_empty());
        assert!(plan.problems_of(ProblemOwner::Demand(d)).is_empty());
    }

    #[test]
    fn unknown_target_is_rejected() {
        let mut plan = Plan::default();
        let item = plan.add_item("widget").unwrap();
        let d = plan.add_demand("order", item, qty(1.0), day(3)).unwrap();
        let mut other = Plan::default();
        let mut solver = JustInTime::default();
        let err = other.solve_with(&mut solver, SolveTarget::Demand(d)).unwrap_err();
        assert!(err.is_logic());
        assert!(solver.visited.is_empty());
        plan.solve_with(&mut solver, SolveTarget::Plan).unwrap();
        assert_eq!(solver.visited, vec![SolveTarget::Plan]);
    }
}
