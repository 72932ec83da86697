use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies an item (product) in the plan.
    pub struct ItemId;

    /// Identifies a location (site).
    pub struct LocationId;

    /// Identifies a calendar.
    pub struct CalendarId;

    /// Identifies a buffer (item at a location).
    pub struct BufferId;

    /// Identifies a capacity resource.
    pub struct ResourceId;

    /// Identifies an operation of any kind.
    pub struct OperationId;

    /// Identifies a flow template (operation to buffer).
    pub struct FlowId;

    /// Identifies a load template (operation to resource).
    pub struct LoadId;

    /// Identifies a customer demand.
    pub struct DemandId;

    /// Identifies a setup matrix.
    pub struct SetupMatrixId;

    /// Identifies an item supplier association.
    pub struct SupplierId;

    /// Identifies an item distribution association.
    pub struct DistributionId;

    /// Arena slot of an operationplan. Stable for the plan's lifetime,
    /// unlike the public [`OperationPlanId`] which is only assigned on
    /// activation.
    pub struct OperationPlanKey;

    /// Identifies a flowplan (material event of an operationplan).
    pub struct FlowPlanId;

    /// Identifies a loadplan (capacity event of an operationplan).
    pub struct LoadPlanId;

    /// Identifies a detected problem.
    pub struct ProblemId;
}

/// Public, monotonically assigned identifier of an activated operationplan.
///
/// `0` and `u64::MAX` are reserved and mean "not assigned yet".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OperationPlanId(pub u64);

impl OperationPlanId {
    pub const UNASSIGNED: OperationPlanId = OperationPlanId(0);
    pub const RESERVED: OperationPlanId = OperationPlanId(u64::MAX);

    /// Whether this is a real identifier rather than a reserved marker.
    pub fn is_assigned(self) -> bool {
        self != Self::UNASSIGNED && self != Self::RESERVED
    }
}

impl std::fmt::Display for OperationPlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_ids_are_unassigned() {
        assert!(!OperationPlanId::UNASSIGNED.is_assigned());
        assert!(!OperationPlanId::RESERVED.is_assigned());
        assert!(OperationPlanId(7).is_assigned());
    }

    #[test]
    fn ids_order_numerically() {
        let mut ids = vec![OperationPlanId(3), OperationPlanId(1), OperationPlanId(2)];
        ids.sort();
        assert_eq!(ids, vec![OperationPlanId(1), OperationPlanId(2), OperationPlanId(3)]);
    }

    #[test]
    fn keys_are_hashable() {
        use std::collections::HashMap;
        let mut sm = slotmap::SlotMap::<ItemId, ()>::with_key();
        let a = sm.insert(());
        let mut map = HashMap::new();
        map.insert(a, "widget");
        assert_eq!(map[&a], "widget");
    }
}
