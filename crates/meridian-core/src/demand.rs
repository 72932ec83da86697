//! Customer demands.

use crate::fixed::Quantity;
use crate::id::{ItemId, LocationId, OperationId, OperationPlanKey};
use crate::problem::ProblemList;
use crate::time::Date;

#[derive(Debug, Clone)]
pub struct Demand {
    pub name: String,
    pub item: ItemId,
    pub location: Option<LocationId>,
    pub quantity: Quantity,
    pub due: Date,
    /// Lower is more important.
    pub priority: i32,
    pub detect_problems: bool,
    /// Explicit delivery operation; falls back to the item default.
    pub(crate) operation: Option<OperationId>,
    /// Delivery plans, latest end first.
    pub(crate) deliveries: Vec<OperationPlanKey>,
    /// Constraints recorded by the solver while planning this demand.
    pub constraints: ProblemList,
}

impl Demand {
    pub(crate) fn new(name: String, item: ItemId, quantity: Quantity, due: Date, detect: bool) -> Self {
        Self {
            name,
            item,
            location: None,
            quantity,
            due,
            priority: 0,
            detect_problems: detect,
            operation: None,
            deliveries: Vec::new(),
            constraints: ProblemList::new(),
        }
    }

    pub fn operation(&self) -> Option<OperationId> {
        self.operation
    }

    /// Delivery plans ordered by end date, latest first.
    pub fn deliveries(&self) -> &[OperationPlanKey] {
        &self.deliveries
    }
}
