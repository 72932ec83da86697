//! Resolution of an operationplan's quantity and dates.
//!
//! [`Plan::set_operationplan_parameters`] takes a requested quantity and an
//! optional start and end and computes what the operation actually allows:
//!
//! - fixed-duration kinds place a constant duration against the working
//!   calendar of the operation's location;
//! - time-per operations derive the duration from the quantity, or the
//!   largest quantity fitting a window when both dates are given;
//! - routings lay their steps out back to back, stopping as soon as the
//!   slack between steps absorbs the move;
//! - alternates delegate to their chosen child and splits to every share.
//!
//! With `execute` false nothing is written and only the outcome is
//! returned.

use crate::calendar::Calendar;
use crate::error::{PlanError, PlanResult};
use crate::fixed::{Quantity, ratio_seconds};
use crate::id::{OperationId, OperationPlanKey};
use crate::operation::OperationKind;
use crate::plan::Plan;
use crate::state::OperationPlanState;
use crate::time::{Date, DateRange, Duration};

/// Which anchor drives the placement.
fn anchored_at_end(start: Option<Date>, end: Option<Date>, prefer_end: bool) -> bool {
    match (start, end) {
        (Some(_), Some(_)) => prefer_end,
        (Some(_), None) => false,
        (None, _) => true,
    }
}

// ---------------------------------------------------------------------------
// Working time
// ---------------------------------------------------------------------------

impl Plan {
    /// Calendar restricting when an operation can run.
    pub fn working_calendar(&self, operation: OperationId) -> Option<&Calendar> {
        let loc = self.operations.get(operation)?.location?;
        let cal = self.locations.get(loc)?.available?;
        self.calendars.get(cal)
    }

    /// Earliest `(start, end)` running `duration` from `start`.
    pub fn schedule_forward(
        &self,
        operation: OperationId,
        start: Date,
        duration: Duration,
    ) -> Option<(Date, Date)> {
        match self.working_calendar(operation) {
            Some(cal) => cal.forward(start, duration),
            None => Some((start, start + duration)),
        }
    }

    /// Latest `(start, end)` running `duration` up to `end`.
    pub fn schedule_backward(
        &self,
        operation: OperationId,
        end: Date,
        duration: Duration,
    ) -> Option<(Date, Date)> {
        match self.working_calendar(operation) {
            Some(cal) => cal.backward(end, duration),
            None => Some((end - duration, end)),
        }
    }

    /// Working time available to an operation between two dates.
    pub fn available_time(&self, operation: OperationId, start: Date, end: Date) -> Duration {
        match self.working_calendar(operation) {
            Some(cal) => cal.available_between(start, end),
            None if end > start => end - start,
            None => Duration::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// Parameter resolution
// ---------------------------------------------------------------------------

impl Plan {
    /// Resolve quantity and dates for `key` and, with `execute`, store them.
    ///
    /// When both dates are given `prefer_end` decides which one anchors the
    /// placement; the other only bounds the window.
    pub fn set_operationplan_parameters(
        &mut self,
        key: OperationPlanKey,
        quantity: Quantity,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
        execute: bool,
    ) -> PlanResult<OperationPlanState> {
        if quantity < Quantity::ZERO {
            return Err(PlanError::data("operationplan quantity must not be negative"));
        }
        let op = self.plan_checked(key)?.operation;
        let kind = self.operations[op].kind.clone();
        let state = match kind {
            OperationKind::TimePer { duration, duration_per } => {
                self.time_per(key, quantity, start, end, prefer_end, duration, duration_per)
            }
            OperationKind::Routing => {
                return self.routing(key, quantity, start, end, prefer_end, execute);
            }
            OperationKind::Alternate => {
                return self.alternate(key, quantity, start, end, prefer_end, execute);
            }
            OperationKind::Split => {
                return self.split(key, quantity, start, end, prefer_end, execute);
            }
            other => {
                let duration = other.fixed_duration().unwrap_or(Duration::ZERO);
                self.fixed_time(key, quantity, start, end, prefer_end, duration)
            }
        };
        if execute {
            self.store(key, &state);
        }
        Ok(state)
    }

    fn store(&mut self, key: OperationPlanKey, state: &OperationPlanState) {
        let p = &mut self.operationplans[key];
        p.quantity = state.quantity;
        p.dates = DateRange { start: state.start, end: state.end };
    }

    /// Accept the request as given; used by composites without children.
    fn accept(
        &mut self,
        key: OperationPlanKey,
        quantity: Quantity,
        start: Option<Date>,
        end: Option<Date>,
        execute: bool,
    ) -> OperationPlanState {
        let cur = self.operationplans[key].dates;
        let s = start.or(end).unwrap_or(cur.start);
        let e = end.or(start).unwrap_or(cur.end).max(s);
        let state = OperationPlanState::new(s, e, quantity);
        if execute {
            self.store(key, &state);
        }
        state
    }

    fn fixed_time(
        &self,
        key: OperationPlanKey,
        quantity: Quantity,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
        duration: Duration,
    ) -> OperationPlanState {
        let p = &self.operationplans[key];
        let op = p.operation;
        let (anchor_start, anchor_end) = (start.unwrap_or(p.dates.start), end.unwrap_or(p.dates.end));
        let from_end = anchored_at_end(start, end, prefer_end);

        let minimum = self.size_minimum_at(op, anchor_start);
        let mut q = self.operations[op].size.round(quantity, minimum, false);
        if let (Some(s), Some(e)) = (start, end) {
            if self.available_time(op, s, e) < duration {
                q = Quantity::ZERO;
            }
        }
        let placed = if from_end {
            self.schedule_backward(op, anchor_end, duration)
        } else {
            self.schedule_forward(op, anchor_start, duration)
        };
        match placed {
            Some((s, e)) => OperationPlanState::new(s, e, q),
            None if from_end => OperationPlanState::new(anchor_end, anchor_end, Quantity::ZERO),
            None => OperationPlanState::new(anchor_start, anchor_start, Quantity::ZERO),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn time_per(
        &self,
        key: OperationPlanKey,
        quantity: Quantity,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
        fixed: Duration,
        per: Duration,
    ) -> OperationPlanState {
        let p = &self.operationplans[key];
        let op = p.operation;
        let (anchor_start, anchor_end) = (start.unwrap_or(p.dates.start), end.unwrap_or(p.dates.end));
        let from_end = anchored_at_end(start, end, prefer_end);
        let size = &self.operations[op].size;
        let minimum = self.size_minimum_at(op, anchor_start);
        let run_time = |q: Quantity| fixed + per.scaled(q);

        let q = match (start, end) {
            (Some(s), Some(e)) => {
                let avail = self.available_time(op, s, e);
                if avail < fixed {
                    Quantity::ZERO
                } else {
                    let fits = if per > Duration::ZERO {
                        ratio_seconds((avail - fixed).as_seconds(), per.as_seconds())
                    } else {
                        None
                    };
                    match fits {
                        Some(max_q) if max_q < quantity => size.round(max_q, minimum, true),
                        _ => {
                            let up = size.round(quantity, minimum, false);
                            if run_time(up) > avail {
                                size.round(quantity, minimum, true)
                            } else {
                                up
                            }
                        }
                    }
                }
            }
            _ => size.round(quantity, minimum, false),
        };

        let duration = run_time(q);
        let placed = if from_end {
            self.schedule_backward(op, anchor_end, duration)
        } else {
            self.schedule_forward(op, anchor_start, duration)
        };
        match placed {
            Some((s, e)) => OperationPlanState::new(s, e, q),
            None if from_end => OperationPlanState::new(anchor_end, anchor_end, Quantity::ZERO),
            None => OperationPlanState::new(anchor_start, anchor_start, Quantity::ZERO),
        }
    }

    /// Steps are walked backward from the end (or forward from the start).
    /// A step moves when it is the first one or when it overlaps the step
    /// placed before it; the first step with enough slack stops the walk.
    fn routing(
        &mut self,
        key: OperationPlanKey,
        quantity: Quantity,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
        execute: bool,
    ) -> PlanResult<OperationPlanState> {
        let steps = self.operationplans[key].children.clone();
        let op = self.operationplans[key].operation;
        let cur = self.operationplans[key].dates;
        let minimum = self.size_minimum_at(op, start.unwrap_or(cur.start));
        let q = self.operations[op].size.round(quantity, minimum, false);
        if steps.is_empty() {
            return Ok(self.accept(key, q, start, end, execute));
        }

        let mut placed: Vec<DateRange> =
            steps.iter().map(|&s| self.operationplans[s].dates).collect();
        // The routing runs at the smallest quantity any replanned step accepts.
        let mut routed = q;
        if anchored_at_end(start, end, prefer_end) {
            let mut e = end.unwrap_or(cur.end);
            for (i, &step) in steps.iter().enumerate().rev() {
                if i + 1 < steps.len() && placed[i].end <= e {
                    break;
                }
                let st = self.set_operationplan_parameters(step, q, None, Some(e), true, execute)?;
                placed[i] = DateRange { start: st.start, end: st.end };
                routed = routed.min(st.quantity);
                e = st.start;
            }
        } else {
            let mut s = start.unwrap_or(cur.start);
            for (i, &step) in steps.iter().enumerate() {
                if i > 0 && placed[i].start >= s {
                    break;
                }
                let st = self.set_operationplan_parameters(step, q, Some(s), None, false, execute)?;
                placed[i] = DateRange { start: st.start, end: st.end };
                routed = routed.min(st.quantity);
                s = st.end;
            }
        }

        let envelope_start = placed.iter().map(|r| r.start).min().unwrap_or(cur.start);
        let envelope_end = placed.iter().map(|r| r.end).max().unwrap_or(cur.end);
        let state = OperationPlanState::new(envelope_start, envelope_end, routed);
        if execute {
            for &step in &steps {
                self.apply_quantity(step, routed);
            }
            self.store(key, &state);
        }
        Ok(state)
    }

    fn alternate(
        &mut self,
        key: OperationPlanKey,
        quantity: Quantity,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
        execute: bool,
    ) -> PlanResult<OperationPlanState> {
        let Some(&child) = self.operationplans[key].children.first() else {
            return Ok(self.accept(key, quantity, start, end, execute));
        };
        let state = self.set_operationplan_parameters(child, quantity, start, end, prefer_end, execute)?;
        if execute {
            self.store(key, &state);
        }
        Ok(state)
    }

    fn split(
        &mut self,
        key: OperationPlanKey,
        quantity: Quantity,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
        execute: bool,
    ) -> PlanResult<OperationPlanState> {
        let children = self.operationplans[key].children.clone();
        if children.is_empty() {
            return Ok(self.accept(key, quantity, start, end, execute));
        }
        let mut envelope: Option<DateRange> = None;
        for child in children {
            let share = self.split_share(key, child, quantity);
            let st = self.set_operationplan_parameters(child, share, start, end, prefer_end, execute)?;
            envelope = Some(match envelope {
                None => DateRange { start: st.start, end: st.end },
                Some(r) => DateRange { start: r.start.min(st.start), end: r.end.max(st.end) },
            });
        }
        let r = envelope.unwrap_or(self.operationplans[key].dates);
        let state = OperationPlanState::new(r.start, r.end, quantity);
        if execute {
            self.store(key, &state);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::qty;
    use crate::operation::SizeRules;
    use crate::operationplan::NewPlan;

    fn day(n: u32) -> Date {
        Date::from_ymd(2024, 1, n).unwrap()
    }

    #[test]
    fn fixed_time_forward_from_start() {
        let mut plan = Plan::default();
        let op = plan
            .add_operation("op", OperationKind::FixedTime { duration: Duration::days(2) })
            .unwrap();
        let key = plan.create_operationplan(NewPlan::new(op, qty(1.0)).starting(day(3))).unwrap();
        let p = plan.operationplan(key).unwrap();
        assert_eq!((p.start(), p.end()), (day(3), day(5)));
    }

    #[test]
    fn fixed_time_window_too_small_gives_zero() {
        let mut plan = Plan::default();
        let op = plan
            .add_operation("op", OperationKind::FixedTime { duration: Duration::days(2) })
            .unwrap();
        let key = plan.create_operationplan(NewPlan::new(op, qty(1.0)).ending(day(9))).unwrap();
        let st = plan
            .set_operationplan_parameters(key, qty(5.0), Some(day(3)), Some(day(4)), true, false)
            .unwrap();
        assert_eq!(st.quantity, Quantity::ZERO);
        assert_eq!(plan.operationplan(key).unwrap().quantity(), qty(1.0));
    }

    #[test]
    fn location_calendar_skips_closed_days() {
        let mut plan = Plan::default();
        let loc = plan.add_location("plant").unwrap();
        let mut cal = Calendar::new("open", 1.0);
        cal.add_bucket(day(6), day(8), 0.0, 1);
        let cal = plan.add_calendar(cal).unwrap();
        plan.set_location_calendar(loc, Some(cal)).unwrap();
        let op = plan
            .add_operation("op", OperationKind::FixedTime { duration: Duration::days(2) })
            .unwrap();
        plan.set_operation_location(op, Some(loc)).unwrap();
        let key = plan.create_operationplan(NewPlan::new(op, qty(1.0)).starting(day(5))).unwrap();
        let p = plan.operationplan(key).unwrap();
        assert_eq!((p.start(), p.end()), (day(5), day(9)));

        let key = plan.create_operationplan(NewPlan::new(op, qty(1.0)).ending(day(9))).unwrap();
        let p = plan.operationplan(key).unwrap();
        assert_eq!((p.start(), p.end()), (day(5), day(9)));
    }

    #[test]
    fn time_per_duration_grows_with_quantity() {
        let mut plan = Plan::default();
        let op = plan
            .add_operation(
                "op",
                OperationKind::TimePer { duration: Duration::HOUR, duration_per: Duration::HOUR },
            )
            .unwrap();
        let key = plan.create_operationplan(NewPlan::new(op, qty(5.0)).ending(day(2))).unwrap();
        let p = plan.operationplan(key).unwrap();
        assert_eq!(p.end() - p.start(), Duration::hours(6));
    }

    #[test]
    fn time_per_window_caps_quantity() {
        let mut plan = Plan::default();
        let op = plan
            .add_operation(
                "op",
                OperationKind::TimePer { duration: Duration::hours(2), duration_per: Duration::hours(1) },
            )
            .unwrap();
        let key = plan.create_operationplan(NewPlan::new(op, qty(1.0)).ending(day(2))).unwrap();
        let st = plan
            .set_operationplan_parameters(
                key,
                qty(100.0),
                Some(day(1)),
                Some(day(1) + Duration::hours(12)),
                true,
                true,
            )
            .unwrap();
        assert_eq!(st.quantity, qty(10.0));
        assert_eq!(st.end, day(1) + Duration::hours(12));
        assert_eq!(st.start, day(1));

        let st = plan
            .set_operationplan_parameters(key, qty(4.0), Some(day(1)), Some(day(1) + Duration::HOUR), true, false)
            .unwrap();
        assert_eq!(st.quantity, Quantity::ZERO);
    }

    #[test]
    fn time_per_window_respects_multiples() {
        let mut plan = Plan::default();
        let op = plan
            .add_operation(
                "op",
                OperationKind::TimePer { duration: Duration::ZERO, duration_per: Duration::hours(1) },
            )
            .unwrap();
        plan.set_operation_size(op, SizeRules { multiple: qty(4.0), ..SizeRules::default() })
            .unwrap();
        let key = plan.create_operationplan(NewPlan::new(op, qty(4.0)).ending(day(2))).unwrap();
        let st = plan
            .set_operationplan_parameters(key, qty(20.0), Some(day(1)), Some(day(1) + Duration::hours(10)), true, false)
            .unwrap();
        assert_eq!(st.quantity, qty(8.0));
    }

    #[test]
    fn routing_slack_absorbs_move() {
        let mut plan = Plan::default();
        let routing = plan.add_operation("route", OperationKind::Routing).unwrap();
        let a = plan
            .add_operation("a", OperationKind::FixedTime { duration: Duration::DAY })
            .unwrap();
        let b = plan
            .add_operation("b", OperationKind::FixedTime { duration: Duration::DAY })
            .unwrap();
        plan.add_sub_operation(routing, a, 1, DateRange::unbounded()).unwrap();
        plan.add_sub_operation(routing, b, 2, DateRange::unbounded()).unwrap();
        let key = plan.create_operationplan(NewPlan::new(routing, qty(1.0)).ending(day(10))).unwrap();
        let steps = plan.operationplan(key).unwrap().children().to_vec();
        // Push the last step later: the first step keeps its place.
        plan.set_operationplan_parameters(key, qty(1.0), None, Some(day(12)), true, true)
            .unwrap();
        assert_eq!(plan.operationplan(steps[0]).unwrap().dates(), DateRange::new(day(8), day(9)));
        assert_eq!(plan.operationplan(steps[1]).unwrap().dates(), DateRange::new(day(11), day(12)));
        assert_eq!(plan.operationplan(key).unwrap().dates(), DateRange::new(day(8), day(12)));

        // Pulling it earlier overlaps and drags the first step along.
        plan.set_operationplan_parameters(key, qty(1.0), None, Some(day(6)), true, true)
            .unwrap();
        assert_eq!(plan.operationplan(steps[0]).unwrap().dates(), DateRange::new(day(4), day(5)));
        assert_eq!(plan.operationplan(key).unwrap().dates(), DateRange::new(day(4), day(6)));
    }

    #[test]
    fn routing_forward_from_start() {
        let mut plan = Plan::default();
        let routing = plan.add_operation("route", OperationKind::Routing).unwrap();
        let a = plan
            .add_operation("a", OperationKind::FixedTime { duration: Duration::DAY })
            .unwrap();
        let b = plan
            .add_operation("b", OperationKind::FixedTime { duration: Duration::days(2) })
            .unwrap();
        plan.add_sub_operation(routing, a, 1, DateRange::unbounded()).unwrap();
        plan.add_sub_operation(routing, b, 2, DateRange::unbounded()).unwrap();
        let key = plan
            .create_operationplan(NewPlan::new(routing, qty(1.0)).starting(day(2)))
            .unwrap();
        assert_eq!(plan.operationplan(key).unwrap().dates(), DateRange::new(day(2), day(5)));
    }

    #[test]
    fn routing_runs_at_smallest_step_quantity() {
        let mut plan = Plan::default();
        let routing = plan.add_operation("route", OperationKind::Routing).unwrap();
        let a = plan
            .add_operation("a", OperationKind::FixedTime { duration: Duration::DAY })
            .unwrap();
        let b = plan
            .add_operation("b", OperationKind::FixedTime { duration: Duration::DAY })
            .unwrap();
        plan.set_operation_size(b, SizeRules { maximum: qty(3.0), ..SizeRules::default() })
            .unwrap();
        plan.add_sub_operation(routing, a, 1, DateRange::unbounded()).unwrap();
        plan.add_sub_operation(routing, b, 2, DateRange::unbounded()).unwrap();
        let key = plan.create_operationplan(NewPlan::new(routing, qty(1.0)).ending(day(10))).unwrap();

        let st = plan
            .set_operationplan_parameters(key, qty(5.0), None, Some(day(10)), true, true)
            .unwrap();
        assert_eq!(st.quantity, qty(3.0));
        let p = plan.operationplan(key).unwrap();
        assert_eq!(p.quantity(), qty(3.0));
        for &step in p.children() {
            assert_eq!(plan.operationplan(step).unwrap().quantity(), qty(3.0));
        }
    }

    #[test]
    fn alternate_follows_child() {
        let mut plan = Plan::default();
        let alt = plan.add_operation("alt", OperationKind::Alternate).unwrap();
        let slow = plan
            .add_operation("slow", OperationKind::FixedTime { duration: Duration::days(3) })
            .unwrap();
        plan.set_operation_size(slow, SizeRules { multiple: qty(10.0), ..SizeRules::default() })
            .unwrap();
        plan.add_sub_operation(alt, slow, 1, DateRange::unbounded()).unwrap();
        let key = plan.create_operationplan(NewPlan::new(alt, qty(4.0)).ending(day(10))).unwrap();
        let p = plan.operationplan(key).unwrap();
        assert_eq!(p.quantity(), qty(10.0));
        assert_eq!(p.dates(), DateRange::new(day(7), day(10)));
    }
}
