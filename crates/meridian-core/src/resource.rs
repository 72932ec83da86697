//! Capacity resources.

use serde::{Deserialize, Serialize};

use crate::calendar::Target;
use crate::fixed::Quantity;
use crate::flowplan::EventRef;
use crate::id::{LoadId, LocationId, SetupMatrixId};
use crate::timeline::{EventId, Timeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Continuous capacity: loads occupy `quantity` units from start to end.
    Default,
    /// Capacity per calendar bucket: loads consume `quantity x plan size`
    /// from the bucket their operationplan starts in.
    Buckets,
}

#[derive(Debug, Clone)]
pub struct Resource {
    pub name: String,
    pub kind: ResourceKind,
    pub location: Option<LocationId>,
    pub detect_problems: bool,
    pub(crate) maximum: Target,
    pub(crate) minimum: Quantity,
    pub(crate) setup_matrix: Option<SetupMatrixId>,
    pub(crate) initial_setup: Option<String>,
    pub(crate) loads: Vec<LoadId>,
    pub(crate) timeline: Timeline<EventRef>,
    pub(crate) target_events: Vec<EventId>,
    /// Set once an undefined changeover has been logged.
    pub(crate) setup_warned: bool,
}

impl Resource {
    pub(crate) fn new(name: String, kind: ResourceKind, maximum: Target, detect: bool) -> Self {
        Self {
            name,
            kind,
            location: None,
            detect_problems: detect,
            maximum,
            minimum: Quantity::ZERO,
            setup_matrix: None,
            initial_setup: None,
            loads: Vec::new(),
            timeline: Timeline::new(),
            target_events: Vec::new(),
            setup_warned: false,
        }
    }

    pub fn maximum(&self) -> Target {
        self.maximum
    }

    pub fn minimum(&self) -> Quantity {
        self.minimum
    }

    pub fn setup_matrix(&self) -> Option<SetupMatrixId> {
        self.setup_matrix
    }

    pub fn initial_setup(&self) -> Option<&str> {
        self.initial_setup.as_deref()
    }

    pub fn loads(&self) -> &[LoadId] {
        &self.loads
    }

    /// Capacity events, ordered by date.
    pub fn timeline(&self) -> &Timeline<EventRef> {
        &self.timeline
    }
}
