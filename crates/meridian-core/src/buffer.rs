//! Buffers: an item stocked at a location.

use crate::calendar::Target;
use crate::fixed::Quantity;
use crate::flowplan::EventRef;
use crate::id::{FlowId, ItemId, LocationId, OperationId};
use crate::timeline::{EventId, Timeline};

#[derive(Debug, Clone)]
pub struct Buffer {
    pub name: String,
    pub item: ItemId,
    pub location: LocationId,
    pub detect_problems: bool,
    pub(crate) minimum: Target,
    pub(crate) maximum: Option<Target>,
    /// Explicit replenishing operation.
    pub(crate) producing: Option<OperationId>,
    /// Replenishing operation built from the item's supply paths.
    pub(crate) generated_producing: Option<OperationId>,
    pub(crate) onhand: Quantity,
    pub(crate) inventory: Option<OperationId>,
    pub(crate) flows: Vec<FlowId>,
    pub(crate) timeline: Timeline<EventRef>,
    pub(crate) target_events: Vec<EventId>,
}

impl Buffer {
    pub(crate) fn new(name: String, item: ItemId, location: LocationId, detect: bool) -> Self {
        Self {
            name,
            item,
            location,
            detect_problems: detect,
            minimum: Target::Fixed(Quantity::ZERO),
            maximum: None,
            producing: None,
            generated_producing: None,
            onhand: Quantity::ZERO,
            inventory: None,
            flows: Vec::new(),
            timeline: Timeline::new(),
            target_events: Vec::new(),
        }
    }

    pub fn minimum(&self) -> Target {
        self.minimum
    }

    pub fn maximum(&self) -> Option<Target> {
        self.maximum
    }

    /// Initial on-hand at the start of the horizon.
    pub fn onhand(&self) -> Quantity {
        self.onhand
    }

    pub fn flows(&self) -> &[FlowId] {
        &self.flows
    }

    /// Material events, ordered by date.
    pub fn timeline(&self) -> &Timeline<EventRef> {
        &self.timeline
    }

    /// On-hand after all events up to and including `date`.
    pub fn onhand_at(&self, date: crate::time::Date) -> Quantity {
        self.timeline.onhand_at(date)
    }
}
