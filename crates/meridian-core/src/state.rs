//! Snapshots of an operationplan's quantity, dates and changeovers.

use serde::{Deserialize, Serialize};

use crate::error::PlanResult;
use crate::fixed::Quantity;
use crate::id::{OperationPlanKey, ResourceId};
use crate::plan::Plan;
use crate::setup::SetupEvent;
use crate::time::{Date, DateRange};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationPlanState {
    pub start: Date,
    pub end: Date,
    pub quantity: Quantity,
    pub setups: Vec<(ResourceId, SetupEvent)>,
}

impl OperationPlanState {
    pub fn new(start: Date, end: Date, quantity: Quantity) -> Self {
        Self { start, end, quantity, setups: Vec::new() }
    }

    pub fn dates(&self) -> DateRange {
        DateRange { start: self.start, end: self.end }
    }
}

/// State of every member of a hierarchy, parents first.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyState {
    members: Vec<(OperationPlanKey, OperationPlanState)>,
}

impl HierarchyState {
    pub fn top(&self) -> Option<&OperationPlanState> {
        self.members.first().map(|(_, s)| s)
    }

    pub fn members(&self) -> &[(OperationPlanKey, OperationPlanState)] {
        &self.members
    }
}

impl Plan {
    /// Current state of one operationplan.
    pub fn state(&self, key: OperationPlanKey) -> PlanResult<OperationPlanState> {
        let p = self.plan_checked(key)?;
        Ok(OperationPlanState {
            start: p.dates.start,
            end: p.dates.end,
            quantity: p.quantity,
            setups: p.setups.iter().map(|s| (s.resource, s.value.clone())).collect(),
        })
    }

    /// Current state of the hierarchy `key` belongs to.
    pub fn capture_state(&self, key: OperationPlanKey) -> PlanResult<HierarchyState> {
        self.plan_checked(key)?;
        let top = self.top_owner(key);
        let members = self
            .hierarchy(top)
            .into_iter()
            .map(|k| self.state(k).map(|s| (k, s)))
            .collect::<PlanResult<_>>()?;
        Ok(HierarchyState { members })
    }

    /// Put a hierarchy back exactly as captured, setups included.
    /// Changeover durations and costs are recomputed from the restored
    /// sequence.
    pub fn restore_state(&mut self, state: &HierarchyState) -> PlanResult<()> {
        let mut dropped: Vec<ResourceId> = Vec::new();
        for (key, s) in &state.members {
            let p = self.plan_checked_mut(*key)?;
            p.quantity = s.quantity;
            p.dates = s.dates();
            let (keep, drop): (Vec<_>, Vec<_>) = std::mem::take(&mut p.setups)
                .into_iter()
                .partition(|slot| s.setups.iter().any(|(r, _)| *r == slot.resource));
            p.setups = keep;
            for slot in drop {
                self.resources[slot.resource].timeline.erase(slot.event);
                dropped.push(slot.resource);
            }
        }
        if let Some(&(top, _)) = state.members.first() {
            self.update(top);
        }
        for (key, s) in &state.members {
            for (resource, event) in &s.setups {
                self.set_setup_event(*key, *resource, event.setup.clone())?;
            }
        }
        dropped.sort();
        dropped.dedup();
        for resource in dropped {
            self.refresh_resource_setups(resource);
        }
        Ok(())
    }
}
