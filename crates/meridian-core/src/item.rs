//! Items and their supply associations.

use serde::{Deserialize, Serialize};

use crate::fixed::Quantity;
use crate::id::{BufferId, DemandId, DistributionId, ItemId, LocationId, OperationId, SupplierId};
use crate::time::{DateRange, Duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub description: Option<String>,
    pub cost: f64,
    /// Default delivery operation for demands on this item.
    pub delivery_operation: Option<OperationId>,
    pub(crate) buffers: Vec<BufferId>,
    pub(crate) demands: Vec<DemandId>,
    pub(crate) suppliers: Vec<SupplierId>,
    pub(crate) distributions: Vec<DistributionId>,
}

impl Item {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            description: None,
            cost: 0.0,
            delivery_operation: None,
            buffers: Vec::new(),
            demands: Vec::new(),
            suppliers: Vec::new(),
            distributions: Vec::new(),
        }
    }

    pub fn buffers(&self) -> &[BufferId] {
        &self.buffers
    }

    pub fn demands(&self) -> &[DemandId] {
        &self.demands
    }

    pub fn suppliers(&self) -> &[SupplierId] {
        &self.suppliers
    }

    pub fn distributions(&self) -> &[DistributionId] {
        &self.distributions
    }
}

/// Sizing and timing of a purchase or transfer path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyTerms {
    pub lead_time: Duration,
    pub size_minimum: Quantity,
    pub size_multiple: Quantity,
    pub cost: f64,
    pub effective: DateRange,
    /// Lower is preferred; 0 disables the path.
    pub priority: i32,
}

impl Default for SupplyTerms {
    fn default() -> Self {
        Self {
            lead_time: Duration::ZERO,
            size_minimum: Quantity::ZERO,
            size_multiple: Quantity::ZERO,
            cost: 0.0,
            effective: DateRange::unbounded(),
            priority: 1,
        }
    }
}

/// An item bought from an external supplier into a location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSupplier {
    pub supplier: String,
    pub item: ItemId,
    pub location: LocationId,
    pub terms: SupplyTerms,
    pub(crate) operation: Option<OperationId>,
}

impl ItemSupplier {
    /// The generated purchase operation, once built.
    pub fn operation(&self) -> Option<OperationId> {
        self.operation
    }
}

/// An item transferred between two locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDistribution {
    pub item: ItemId,
    pub origin: LocationId,
    pub destination: LocationId,
    pub terms: SupplyTerms,
    pub(crate) operation: Option<OperationId>,
}

impl ItemDistribution {
    pub fn operation(&self) -> Option<OperationId> {
        self.operation
    }
}
