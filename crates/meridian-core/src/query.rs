//! Read-only snapshots of plan state for external writers.
//!
//! All types are owned copies with entity references resolved to names, so
//! they serialize on their own. Fields that carry no information (empty
//! lists, absent links, default flags) are skipped. Fields that describe
//! the plan rather than the input data are only filled in
//! [`SnapshotMode::Plan`].

use serde::Serialize;

use crate::calendar::Target;
use crate::error::PlanResult;
use crate::fixed::{Quantity, qty_to_f64};
use crate::flowplan::EventRef;
use crate::id::{BufferId, DemandId, OperationPlanKey, ResourceId};
use crate::operationplan::PlanStatus;
use crate::plan::Plan;
use crate::problem::{Problem, ProblemOwner};
use crate::resource::ResourceKind;
use crate::time::Date;

/// Which fields a snapshot carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotMode {
    /// Input data only.
    #[default]
    Base,
    /// Input data plus plan results (timelines, pegging metrics, deliveries).
    Plan,
}

impl SnapshotMode {
    fn with_plan(self) -> bool {
        self == SnapshotMode::Plan
    }
}

fn is_true(v: &bool) -> bool {
    *v
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

fn is_proposed(v: &PlanStatus) -> bool {
    *v == PlanStatus::Proposed
}

// ---------------------------------------------------------------------------
// Operationplans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetupSnapshot {
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup: Option<String>,
    pub duration_days: f64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationPlanSnapshot {
    pub id: u64,
    pub operation: String,
    pub quantity: f64,
    pub start: Date,
    pub end: Date,
    #[serde(skip_serializing_if = "is_proposed")]
    pub status: PlanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<u64>,
    #[serde(skip_serializing_if = "is_true")]
    pub feasible: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub setups: Vec<SetupSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub criticality: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_days: Option<f64>,
}

// ---------------------------------------------------------------------------
// Buffers and resources
// ---------------------------------------------------------------------------

/// One event of a buffer or resource timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineRow {
    pub date: Date,
    pub quantity: f64,
    pub onhand: f64,
    pub operationplan: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferSnapshot {
    pub name: String,
    pub item: String,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onhand: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producing: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flowplans: Vec<TimelineRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    pub name: String,
    pub kind: ResourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_matrix: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub loadplans: Vec<TimelineRow>,
}

// ---------------------------------------------------------------------------
// Demands and problems
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemandSnapshot {
    pub name: String,
    pub item: String,
    pub quantity: f64,
    pub due: Date,
    #[serde(skip_serializing_if = "is_zero")]
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deliveries: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProblemSnapshot {
    pub kind: String,
    pub owner: String,
    pub start: Date,
    pub end: Date,
    pub weight: f64,
    pub description: String,
}

/// Everything at once, each list in a stable order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSnapshot {
    pub name: String,
    pub current: Date,
    pub buffers: Vec<BufferSnapshot>,
    pub resources: Vec<ResourceSnapshot>,
    pub demands: Vec<DemandSnapshot>,
    pub operationplans: Vec<OperationPlanSnapshot>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<ProblemSnapshot>,
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

impl Plan {
    fn fixed_target(&self, target: Target) -> Option<f64> {
        match target {
            Target::Fixed(q) => Some(qty_to_f64(q)),
            Target::Calendar(_) => None,
        }
    }

    fn event_plan_id(&self, payload: EventRef) -> u64 {
        let key = match payload {
            EventRef::FlowPlan(fp) => self.flowplans.get(fp).map(|f| f.operationplan),
            EventRef::LoadPlan(lp) => self.loadplans.get(lp).map(|l| l.operationplan),
            EventRef::Setup(key) => Some(key),
            EventRef::Target => None,
        };
        key.and_then(|k| self.operationplans.get(k)).map_or(0, |p| p.id.0)
    }

    pub fn operationplan_snapshot(
        &self,
        key: OperationPlanKey,
        mode: SnapshotMode,
    ) -> PlanResult<OperationPlanSnapshot> {
        let p = self.plan_checked(key)?;
        let setups = p
            .setups
            .iter()
            .filter(|s| s.value.rule.is_some() || s.value.undefined)
            .map(|s| SetupSnapshot {
                resource: self.resources[s.resource].name.clone(),
                setup: s.value.setup.clone(),
                duration_days: s.value.duration.as_days(),
                cost: s.value.cost,
            })
            .collect();
        let (criticality, delay_days) = if mode.with_plan() && p.owner.is_none() {
            (Some(self.criticality(key)?), Some(self.delay(key)?.as_days()))
        } else {
            (None, None)
        };
        Ok(OperationPlanSnapshot {
            id: p.id.0,
            operation: self.operations[p.operation].name.clone(),
            quantity: qty_to_f64(p.quantity),
            start: p.dates.start,
            end: p.dates.end,
            status: p.status,
            demand: p.demand.and_then(|d| self.demands.get(d)).map(|d| d.name.clone()),
            owner: p.owner.and_then(|o| self.operationplans.get(o)).map(|o| o.id.0),
            feasible: p.feasible,
            setups,
            criticality,
            delay_days,
        })
    }

    pub fn buffer_snapshot(&self, buffer: BufferId, mode: SnapshotMode) -> PlanResult<BufferSnapshot> {
        let b = self.buffer_checked(buffer)?;
        let flowplans = if mode.with_plan() {
            self.flowplans_of(buffer)
                .map(|(_, e)| TimelineRow {
                    date: e.date(),
                    quantity: qty_to_f64(e.quantity()),
                    onhand: qty_to_f64(e.onhand()),
                    operationplan: self.event_plan_id(*e.payload()),
                })
                .collect()
        } else {
            Vec::new()
        };
        Ok(BufferSnapshot {
            name: b.name.clone(),
            item: self.items[b.item].name.clone(),
            location: self.locations[b.location].name.clone(),
            onhand: (b.onhand != Quantity::ZERO).then(|| qty_to_f64(b.onhand)),
            minimum: self.fixed_target(b.minimum).filter(|&m| m != 0.0),
            maximum: b.maximum.and_then(|m| self.fixed_target(m)),
            producing: b.producing.map(|op| self.operations[op].name.clone()),
            flowplans,
        })
    }

    pub fn resource_snapshot(
        &self,
        resource: ResourceId,
        mode: SnapshotMode,
    ) -> PlanResult<ResourceSnapshot> {
        let r = self.resource_checked(resource)?;
        let loadplans = if mode.with_plan() {
            self.loadplans_of(resource)
                .map(|(_, e)| TimelineRow {
                    date: e.date(),
                    quantity: qty_to_f64(e.quantity()),
                    onhand: qty_to_f64(e.onhand()),
                    operationplan: self.event_plan_id(*e.payload()),
                })
                .collect()
        } else {
            Vec::new()
        };
        Ok(ResourceSnapshot {
            name: r.name.clone(),
            kind: r.kind,
            location: r.location.and_then(|l| self.locations.get(l)).map(|l| l.name.clone()),
            maximum: self.fixed_target(r.maximum),
            setup_matrix: r
                .setup_matrix
                .and_then(|m| self.setup_matrices.get(m))
                .map(|m| m.name.clone()),
            loadplans,
        })
    }

    pub fn demand_snapshot(&self, demand: DemandId, mode: SnapshotMode) -> PlanResult<DemandSnapshot> {
        let d = self.demand_checked(demand)?;
        let deliveries = if mode.with_plan() {
            d.deliveries
                .iter()
                .filter_map(|&k| self.operationplans.get(k))
                .map(|p| p.id.0)
                .collect()
        } else {
            Vec::new()
        };
        Ok(DemandSnapshot {
            name: d.name.clone(),
            item: self.items[d.item].name.clone(),
            quantity: qty_to_f64(d.quantity),
            due: d.due,
            priority: d.priority,
            location: d.location.and_then(|l| self.locations.get(l)).map(|l| l.name.clone()),
            deliveries,
            constraints: if mode.with_plan() {
                d.constraints.iter().map(|c| c.description.clone()).collect()
            } else {
                Vec::new()
            },
        })
    }

    fn owner_name(&self, owner: ProblemOwner) -> String {
        match owner {
            ProblemOwner::Demand(d) => self.demands.get(d).map(|d| d.name.clone()),
            ProblemOwner::Buffer(b) => self.buffers.get(b).map(|b| b.name.clone()),
            ProblemOwner::Resource(r) => self.resources.get(r).map(|r| r.name.clone()),
            ProblemOwner::OperationPlan(k) => self.operationplans.get(k).map(|p| {
                format!("{} #{}", self.operations[p.operation].name, p.id)
            }),
        }
        .unwrap_or_default()
    }

    pub fn problem_snapshot(&self, problem: &Problem) -> ProblemSnapshot {
        ProblemSnapshot {
            kind: problem.kind.name().to_string(),
            owner: self.owner_name(problem.owner),
            start: problem.range.start,
            end: problem.range.end,
            weight: problem.weight,
            description: problem.description.clone(),
        }
    }

    /// Snapshot of the whole plan. In [`SnapshotMode::Plan`] problems are
    /// brought up to date first.
    pub fn snapshot(&self, mode: SnapshotMode) -> PlanResult<PlanSnapshot> {
        let mut buffers = self
            .buffers
            .keys()
            .map(|b| self.buffer_snapshot(b, mode))
            .collect::<PlanResult<Vec<_>>>()?;
        buffers.sort_by(|a, b| a.name.cmp(&b.name));
        let mut resources = self
            .resources
            .keys()
            .map(|r| self.resource_snapshot(r, mode))
            .collect::<PlanResult<Vec<_>>>()?;
        resources.sort_by(|a, b| a.name.cmp(&b.name));
        let mut demands = self
            .demands
            .keys()
            .map(|d| self.demand_snapshot(d, mode))
            .collect::<PlanResult<Vec<_>>>()?;
        demands.sort_by(|a, b| a.name.cmp(&b.name));
        let mut operationplans = self
            .operationplans
            .iter()
            .filter(|(_, p)| p.activated)
            .map(|(k, _)| self.operationplan_snapshot(k, mode))
            .collect::<PlanResult<Vec<_>>>()?;
        operationplans.sort_by_key(|p| p.id);

        let problems = if mode.with_plan() {
            self.compute_problems();
            let mut list: Vec<ProblemSnapshot> =
                self.problems().iter().map(|(_, p)| self.problem_snapshot(p)).collect();
            list.sort_by(|a, b| {
                (&a.owner, &a.kind, a.start).cmp(&(&b.owner, &b.kind, b.start))
            });
            list
        } else {
            Vec::new()
        };

        Ok(PlanSnapshot {
            name: self.config.name.clone(),
            current: self.current(),
            buffers,
            resources,
            demands,
            operationplans,
            problems,
        })
    }
}
