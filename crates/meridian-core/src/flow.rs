//! Flow and load templates linking operations to buffers and resources.

use serde::{Deserialize, Serialize};

use crate::fixed::Quantity;
use crate::id::{BufferId, OperationId, ResourceId};
use crate::time::{Date, DateRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowKind {
    /// Material moves at the start, proportional to the plan quantity.
    Start,
    /// Material moves at the end, proportional to the plan quantity.
    End,
    /// Fixed quantity at the start, regardless of plan size.
    FixedStart,
    /// Fixed quantity at the end, regardless of plan size.
    FixedEnd,
}

impl FlowKind {
    pub fn at_end(self) -> bool {
        matches!(self, FlowKind::End | FlowKind::FixedEnd)
    }

    pub fn is_fixed(self) -> bool {
        matches!(self, FlowKind::FixedStart | FlowKind::FixedEnd)
    }
}

/// Material consumed (negative) or produced (positive) by an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub operation: OperationId,
    pub buffer: BufferId,
    pub quantity: Quantity,
    pub kind: FlowKind,
    pub effective: DateRange,
}

impl Flow {
    pub fn is_producer(&self) -> bool {
        self.quantity > Quantity::ZERO
    }

    pub fn is_consumer(&self) -> bool {
        self.quantity < Quantity::ZERO
    }

    /// Event quantity for a plan of `plan_quantity` units whose flow date
    /// is `date`. Zero outside the effectivity range or for an empty plan.
    pub fn event_quantity(&self, plan_quantity: Quantity, date: Date) -> Quantity {
        if plan_quantity == Quantity::ZERO || !self.effective.contains_inclusive(date) {
            return Quantity::ZERO;
        }
        if self.kind.is_fixed() {
            self.quantity
        } else {
            self.quantity.saturating_mul(plan_quantity)
        }
    }
}

/// Capacity occupied on a resource by an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Load {
    pub operation: OperationId,
    pub resource: ResourceId,
    pub quantity: Quantity,
    /// Setup the resource must be in while the operation runs.
    pub setup: Option<String>,
    pub effective: DateRange,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::qty;
    use slotmap::SlotMap;

    fn flow(kind: FlowKind, q: f64, effective: DateRange) -> Flow {
        let mut ops = SlotMap::<OperationId, ()>::with_key();
        let mut bufs = SlotMap::<BufferId, ()>::with_key();
        Flow {
            operation: ops.insert(()),
            buffer: bufs.insert(()),
            quantity: qty(q),
            kind,
            effective,
        }
    }

    #[test]
    fn proportional_flow_scales() {
        let f = flow(FlowKind::Start, -2.0, DateRange::unbounded());
        assert_eq!(f.event_quantity(qty(3.0), Date::EPOCH), qty(-6.0));
        assert!(f.is_consumer());
    }

    #[test]
    fn fixed_flow_ignores_size() {
        let f = flow(FlowKind::FixedEnd, 4.0, DateRange::unbounded());
        assert_eq!(f.event_quantity(qty(10.0), Date::EPOCH), qty(4.0));
        assert!(f.kind.at_end());
    }

    #[test]
    fn outside_effectivity_is_zero() {
        let d = Date::from_ymd(2024, 1, 1).unwrap();
        let f = flow(FlowKind::End, 1.0, DateRange::new(d, d + crate::time::Duration::days(1)));
        assert_eq!(f.event_quantity(qty(5.0), d - crate::time::Duration::DAY), Quantity::ZERO);
        assert_eq!(f.event_quantity(qty(5.0), d), qty(5.0));
    }

    #[test]
    fn empty_plan_moves_nothing() {
        let f = flow(FlowKind::FixedStart, -1.0, DateRange::unbounded());
        assert_eq!(f.event_quantity(Quantity::ZERO, Date::EPOCH), Quantity::ZERO);
    }
}
