//! Shared test helpers for unit tests, integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`. The helpers
//! panic on errors; they are meant for fixtures only.

use crate::calendar::Target;
use crate::fixed::qty;
use crate::flow::FlowKind;
use crate::id::*;
use crate::operation::OperationKind;
use crate::operationplan::NewPlan;
use crate::plan::Plan;
use crate::resource::ResourceKind;
use crate::time::{Date, Duration};

// ===========================================================================
// Dates
// ===========================================================================

/// Midnight of the `n`-th day of January 2024; days past 31 roll over.
pub fn day(n: u32) -> Date {
    base() + Duration::days(i64::from(n) - 1)
}

fn base() -> Date {
    Date::from_ymd(2024, 1, 1).expect("valid date")
}

// ===========================================================================
// Fixture builder
// ===========================================================================

/// A plan with a single default location and short-hand constructors.
pub struct Fixture {
    pub plan: Plan,
    pub location: LocationId,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    pub fn new() -> Self {
        let mut plan = Plan::default();
        plan.set_current(day(1));
        let location = plan.add_location("plant").expect("location");
        Self { plan, location }
    }

    /// Item `name` and its buffer at the fixture location.
    pub fn buffer(&mut self, name: &str) -> BufferId {
        let item = self.plan.add_item(name).expect("item");
        self.plan.add_buffer(item, self.location).expect("buffer")
    }

    pub fn item_of(&self, buffer: BufferId) -> ItemId {
        self.plan.buffer(buffer).expect("buffer").item
    }

    pub fn fixed_op(&mut self, name: &str, duration: Duration) -> OperationId {
        self.plan
            .add_operation(name, OperationKind::FixedTime { duration })
            .expect("operation")
    }

    pub fn consume(&mut self, op: OperationId, buffer: BufferId, per_unit: f64) -> FlowId {
        self.plan.add_flow(op, buffer, qty(-per_unit), FlowKind::Start).expect("flow")
    }

    pub fn produce(&mut self, op: OperationId, buffer: BufferId, per_unit: f64) -> FlowId {
        self.plan.add_flow(op, buffer, qty(per_unit), FlowKind::End).expect("flow")
    }

    pub fn resource(&mut self, name: &str, capacity: f64) -> ResourceId {
        self.plan
            .add_resource(name, ResourceKind::Default, Target::Fixed(qty(capacity)))
            .expect("resource")
    }

    pub fn load(&mut self, op: OperationId, resource: ResourceId, usage: f64) -> LoadId {
        self.plan.add_load(op, resource, qty(usage), None).expect("load")
    }

    /// Create and activate a plan of `op` ending at `end`.
    pub fn place(&mut self, op: OperationId, quantity: f64, end: Date) -> OperationPlanKey {
        let key = self
            .plan
            .create_operationplan(NewPlan::new(op, qty(quantity)).ending(end))
            .expect("operationplan");
        self.plan.activate(key).expect("activation");
        key
    }

    /// A demand for the item of `buffer`, shipped from the fixture location.
    pub fn demand(&mut self, name: &str, buffer: BufferId, quantity: f64, due: Date) -> DemandId {
        let item = self.item_of(buffer);
        let d = self.plan.add_demand(name, item, qty(quantity), due).expect("demand");
        self.plan.set_demand_location(d, Some(self.location)).expect("demand location");
        d
    }

    /// Plan `demand` on its due date through its delivery operation.
    pub fn deliver(&mut self, demand: DemandId, quantity: f64, end: Date) -> OperationPlanKey {
        let op = self
            .plan
            .resolve_delivery_operation(demand)
            .expect("delivery lookup")
            .expect("delivery operation");
        let key = self
            .plan
            .create_operationplan(NewPlan::new(op, qty(quantity)).ending(end).for_demand(demand))
            .expect("delivery plan");
        self.plan.activate(key).expect("activation");
        key
    }
}

// ===========================================================================
// Larger models
// ===========================================================================

/// A linear bill of material `depth` levels deep: raw material bought at
/// the bottom, one conversion step per level, `plans` operationplans per
/// step spread over the horizon.
pub fn chain_plan(depth: usize, plans: usize) -> Plan {
    let mut f = Fixture::new();
    let mut below = f.buffer("raw");
    let buy = f.fixed_op("buy raw", Duration::days(3));
    f.produce(buy, below, 1.0);
    let machine = f.resource("machine", 4.0);
    let mut steps = vec![buy];
    for level in 0..depth {
        let above = f.buffer(&format!("part {level}"));
        let op = f.fixed_op(&format!("make part {level}"), Duration::DAY);
        f.consume(op, below, 1.0);
        f.produce(op, above, 1.0);
        f.load(op, machine, 1.0);
        steps.push(op);
        below = above;
    }
    for (i, &op) in steps.iter().enumerate() {
        for n in 0..plans {
            let end = day(2 + (i + n * 2) as u32);
            f.place(op, 1.0 + (n % 3) as f64, end);
        }
    }
    f.plan
}
