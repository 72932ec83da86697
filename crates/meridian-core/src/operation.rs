//! Operations: templates for the plans that move material and use capacity.

use serde::{Deserialize, Serialize};

use crate::fixed::{Quantity, ROUNDING_ERROR};
use crate::id::{
    BufferId, CalendarId, DistributionId, FlowId, ItemId, LoadId, LocationId,
    OperationId, OperationPlanKey, SupplierId,
};
use crate::time::{DateRange, Duration};

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Constant duration regardless of size.
    FixedTime { duration: Duration },
    /// `duration + duration_per x quantity`.
    TimePer { duration: Duration, duration_per: Duration },
    /// Sequence of steps executed one after the other.
    Routing,
    /// Exactly one of the sub-operations is used.
    Alternate,
    /// The quantity is spread over all sub-operations by percentage.
    Split,
    /// Generated from an item supplier.
    Purchase { supplier: SupplierId, lead_time: Duration },
    /// Generated from an item distribution.
    Distribution { distribution: DistributionId, lead_time: Duration },
    /// Realises a buffer's initial on-hand.
    Inventory { buffer: BufferId },
    /// Ships a demand from a buffer.
    Delivery { buffer: BufferId },
}

impl OperationKind {
    /// Fixed duration of the single-step kinds; `None` for `TimePer` and
    /// composites.
    pub fn fixed_duration(&self) -> Option<Duration> {
        match self {
            OperationKind::FixedTime { duration } => Some(*duration),
            OperationKind::Purchase { lead_time, .. } => Some(*lead_time),
            OperationKind::Distribution { lead_time, .. } => Some(*lead_time),
            OperationKind::Inventory { .. } | OperationKind::Delivery { .. } => Some(Duration::ZERO),
            OperationKind::TimePer { .. }
            | OperationKind::Routing
            | OperationKind::Alternate
            | OperationKind::Split => None,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, OperationKind::Routing | OperationKind::Alternate | OperationKind::Split)
    }

    /// Whether this kind was generated rather than modelled by the user.
    pub fn is_generated(&self) -> bool {
        matches!(
            self,
            OperationKind::Purchase { .. }
                | OperationKind::Distribution { .. }
                | OperationKind::Inventory { .. }
                | OperationKind::Delivery { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            OperationKind::FixedTime { .. } => "fixed_time",
            OperationKind::TimePer { .. } => "time_per",
            OperationKind::Routing => "routing",
            OperationKind::Alternate => "alternate",
            OperationKind::Split => "split",
            OperationKind::Purchase { .. } => "purchase",
            OperationKind::Distribution { .. } => "distribution",
            OperationKind::Inventory { .. } => "inventory",
            OperationKind::Delivery { .. } => "delivery",
        }
    }
}

/// A child of a routing, alternate or split operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubOperation {
    pub operation: OperationId,
    /// Step order for routings, preference for alternates (0 disables),
    /// percentage for splits.
    pub priority: i32,
    pub effective: DateRange,
}

// ---------------------------------------------------------------------------
// Sizing
// ---------------------------------------------------------------------------

/// Lot sizing rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeRules {
    pub minimum: Quantity,
    /// Overrides `minimum` with the calendar value at the plan's start.
    pub minimum_calendar: Option<CalendarId>,
    /// Zero means any quantity.
    pub multiple: Quantity,
    pub maximum: Quantity,
}

impl Default for SizeRules {
    fn default() -> Self {
        Self {
            minimum: Quantity::ZERO,
            minimum_calendar: None,
            multiple: Quantity::ZERO,
            maximum: Quantity::MAX,
        }
    }
}

impl SizeRules {
    /// Round `requested` to a valid lot size given the minimum in effect.
    ///
    /// The result is either 0 or at least `minimum`. Rounding down picks
    /// the largest valid size not above the request, rounding up the
    /// smallest valid size not below it.
    pub fn round(&self, requested: Quantity, minimum: Quantity, round_down: bool) -> Quantity {
        if requested <= Quantity::ZERO {
            return Quantity::ZERO;
        }
        let minimum = minimum.max(Quantity::ZERO);
        let mut q = requested;
        if q + ROUNDING_ERROR < minimum {
            if round_down {
                return Quantity::ZERO;
            }
            q = minimum;
        }
        if self.multiple > Quantity::ZERO {
            q = round_to_multiple(q, self.multiple, round_down);
            if q < minimum {
                q = if round_down {
                    Quantity::ZERO
                } else {
                    round_to_multiple(minimum, self.multiple, false)
                };
            }
        }
        if q > self.maximum {
            q = if self.multiple > Quantity::ZERO {
                round_to_multiple(self.maximum, self.multiple, true)
            } else {
                self.maximum
            };
            if q < minimum {
                return Quantity::ZERO;
            }
        }
        q
    }
}

fn round_to_multiple(q: Quantity, multiple: Quantity, down: bool) -> Quantity {
    let (qb, mb) = (q.to_bits() as i128, multiple.to_bits() as i128);
    let mut n = qb / mb;
    if !down && qb % mb != 0 {
        n += 1;
    }
    Quantity::from_bits((n * mb).clamp(0, i64::MAX as i128) as i64)
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub kind: OperationKind,
    pub location: Option<LocationId>,
    pub size: SizeRules,
    /// Plans starting before `current + fence` are flagged.
    pub fence: Duration,
    pub detect_problems: bool,
    /// Item delivered by this operation, for delivery lookups.
    pub item: Option<ItemId>,
    pub(crate) flows: Vec<FlowId>,
    pub(crate) loads: Vec<LoadId>,
    pub(crate) sub_operations: Vec<SubOperation>,
    pub(crate) super_operations: Vec<OperationId>,
    pub(crate) first_plan: Option<OperationPlanKey>,
    pub(crate) last_plan: Option<OperationPlanKey>,
}

impl Operation {
    pub(crate) fn new(name: String, kind: OperationKind, detect: bool) -> Self {
        Self {
            name,
            kind,
            location: None,
            size: SizeRules::default(),
            fence: Duration::ZERO,
            detect_problems: detect,
            item: None,
            flows: Vec::new(),
            loads: Vec::new(),
            sub_operations: Vec::new(),
            super_operations: Vec::new(),
            first_plan: None,
            last_plan: None,
        }
    }

    pub fn flows(&self) -> &[FlowId] {
        &self.flows
    }

    pub fn loads(&self) -> &[LoadId] {
        &self.loads
    }

    /// Children ordered by priority.
    pub fn sub_operations(&self) -> &[SubOperation] {
        &self.sub_operations
    }

    pub fn super_operations(&self) -> &[OperationId] {
        &self.super_operations
    }

    /// First plan in the per-operation list (earliest start).
    pub fn first_plan(&self) -> Option<OperationPlanKey> {
        self.first_plan
    }

    pub fn last_plan(&self) -> Option<OperationPlanKey> {
        self.last_plan
    }

    /// An operation with no material, capacity or hierarchy links.
    pub fn is_dangling(&self) -> bool {
        self.flows.is_empty()
            && self.loads.is_empty()
            && self.sub_operations.is_empty()
            && self.super_operations.is_empty()
    }
}
