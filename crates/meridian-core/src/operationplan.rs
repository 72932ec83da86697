//! Operationplans: concrete, dated, sized instances of operations.
//!
//! A plan is created unactivated with [`Plan::create_operationplan`]; its
//! quantity and dates are resolved against the operation's sizing and
//! timing rules. [`Plan::activate`] then gives it an id, links it into its
//! operation's plan list (ordered by start, larger quantity first, then id)
//! and materialises its flowplans and loadplans.
//!
//! Composite operations create a hierarchy: a routing plan owns one child
//! per step, an alternate plan owns the child of the chosen alternative and
//! a split plan owns one child per share. Deleting any member of a
//! hierarchy deletes the whole tree.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PlanError, PlanResult};
use crate::fixed::Quantity;
use crate::id::{
    DemandId, FlowPlanId, LoadPlanId, OperationId, OperationPlanId, OperationPlanKey, ResourceId,
};
use crate::operation::OperationKind;
use crate::plan::Plan;
use crate::problem::{ChangeKey, ProblemOwner};
use crate::setup::SetupEvent;
use crate::time::{Date, DateRange};
use crate::timeline::EventId;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum PlanStatus {
    /// Free for the solver to change.
    #[default]
    Proposed,
    /// Released but still movable.
    Approved,
    /// Locked: quantity and dates only change when forced.
    Confirmed,
}

/// The changeover an operationplan triggers on one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupSlot {
    pub resource: ResourceId,
    pub(crate) event: EventId,
    pub value: SetupEvent,
}

#[derive(Debug, Clone)]
pub struct OperationPlan {
    pub(crate) id: OperationPlanId,
    pub(crate) operation: OperationId,
    pub(crate) quantity: Quantity,
    pub(crate) dates: DateRange,
    pub(crate) status: PlanStatus,
    pub(crate) feasible: bool,
    pub(crate) consume_material: bool,
    pub(crate) produce_material: bool,
    pub(crate) consume_capacity: bool,
    pub(crate) demand: Option<DemandId>,
    pub(crate) owner: Option<OperationPlanKey>,
    /// Routing steps in sequence, or the alternate/split children.
    pub(crate) children: Vec<OperationPlanKey>,
    pub(crate) prev: Option<OperationPlanKey>,
    pub(crate) next: Option<OperationPlanKey>,
    pub(crate) activated: bool,
    pub(crate) has_flowloads: bool,
    pub(crate) flowplans: Vec<FlowPlanId>,
    pub(crate) loadplans: Vec<LoadPlanId>,
    pub(crate) setups: Vec<SetupSlot>,
}

impl OperationPlan {
    fn new(operation: OperationId, anchor: Date) -> Self {
        Self {
            id: OperationPlanId::UNASSIGNED,
            operation,
            quantity: Quantity::ZERO,
            dates: DateRange { start: anchor, end: anchor },
            status: PlanStatus::Proposed,
            feasible: true,
            consume_material: true,
            produce_material: true,
            consume_capacity: true,
            demand: None,
            owner: None,
            children: Vec::new(),
            prev: None,
            next: None,
            activated: false,
            has_flowloads: false,
            flowplans: Vec::new(),
            loadplans: Vec::new(),
            setups: Vec::new(),
        }
    }

    pub fn id(&self) -> OperationPlanId {
        self.id
    }

    pub fn operation(&self) -> OperationId {
        self.operation
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn start(&self) -> Date {
        self.dates.start
    }

    pub fn end(&self) -> Date {
        self.dates.end
    }

    pub fn dates(&self) -> DateRange {
        self.dates
    }

    pub fn status(&self) -> PlanStatus {
        self.status
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == PlanStatus::Confirmed
    }

    pub fn is_feasible(&self) -> bool {
        self.feasible
    }

    pub fn consumes_material(&self) -> bool {
        self.consume_material
    }

    pub fn produces_material(&self) -> bool {
        self.produce_material
    }

    pub fn consumes_capacity(&self) -> bool {
        self.consume_capacity
    }

    pub fn demand(&self) -> Option<DemandId> {
        self.demand
    }

    pub fn owner(&self) -> Option<OperationPlanKey> {
        self.owner
    }

    pub fn children(&self) -> &[OperationPlanKey] {
        &self.children
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }

    pub fn flowplans(&self) -> &[FlowPlanId] {
        &self.flowplans
    }

    pub fn loadplans(&self) -> &[LoadPlanId] {
        &self.loadplans
    }

    pub fn setups(&self) -> &[SetupSlot] {
        &self.setups
    }

    /// Operationplans on the same operation, in list order.
    pub fn next_on_operation(&self) -> Option<OperationPlanKey> {
        self.next
    }

    pub fn prev_on_operation(&self) -> Option<OperationPlanKey> {
        self.prev
    }
}

/// Arguments for [`Plan::create_operationplan`].
#[derive(Debug, Clone)]
pub struct NewPlan {
    pub operation: OperationId,
    pub quantity: Quantity,
    pub start: Option<Date>,
    pub end: Option<Date>,
    pub demand: Option<DemandId>,
    pub owner: Option<OperationPlanKey>,
    /// Explicit public id; 0 lets activation assign one.
    pub id: u64,
    pub status: PlanStatus,
    /// Materialise flowplans and loadplans before activation.
    pub create_flowloads: bool,
}

impl NewPlan {
    pub fn new(operation: OperationId, quantity: Quantity) -> Self {
        Self {
            operation,
            quantity,
            start: None,
            end: None,
            demand: None,
            owner: None,
            id: 0,
            status: PlanStatus::Proposed,
            create_flowloads: false,
        }
    }

    pub fn starting(mut self, start: Date) -> Self {
        self.start = Some(start);
        self
    }

    pub fn ending(mut self, end: Date) -> Self {
        self.end = Some(end);
        self
    }

    pub fn for_demand(mut self, demand: DemandId) -> Self {
        self.demand = Some(demand);
        self
    }

    pub fn owned_by(mut self, owner: OperationPlanKey) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub fn status(mut self, status: PlanStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_flowloads(mut self) -> Self {
        self.create_flowloads = true;
        self
    }
}

/// Result of [`Plan::activate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Activated(OperationPlanKey),
    /// Folded into an identical existing plan, which is returned.
    Merged(OperationPlanKey),
    /// An empty plan was discarded.
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged(OperationPlanKey),
    Kept(OperationPlanKey),
}

/// Walks the plans of one operation in list order.
pub struct OperationPlanIter<'a> {
    plan: &'a Plan,
    cur: Option<OperationPlanKey>,
}

impl Iterator for OperationPlanIter<'_> {
    type Item = OperationPlanKey;

    fn next(&mut self) -> Option<OperationPlanKey> {
        let key = self.cur?;
        self.cur = self.plan.operationplans.get(key).and_then(|p| p.next);
        Some(key)
    }
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

impl Plan {
    pub fn operationplan(&self, key: OperationPlanKey) -> Option<&OperationPlan> {
        self.operationplans.get(key)
    }

    pub fn operationplan_by_id(&self, id: OperationPlanId) -> Option<OperationPlanKey> {
        self.ids.get(&id).copied()
    }

    /// Number of operationplans, activated or not.
    pub fn operationplan_count(&self) -> usize {
        self.operationplans.len()
    }

    /// Activated plans of an operation, ordered by start date.
    pub fn operationplans_of(&self, operation: OperationId) -> OperationPlanIter<'_> {
        OperationPlanIter {
            plan: self,
            cur: self.operations.get(operation).and_then(|o| o.first_plan),
        }
    }

    /// Every operationplan in the arena.
    pub fn operationplans(&self) -> impl Iterator<Item = (OperationPlanKey, &OperationPlan)> {
        self.operationplans.iter()
    }

    pub(crate) fn plan_checked(&self, key: OperationPlanKey) -> PlanResult<&OperationPlan> {
        self.operationplans
            .get(key)
            .ok_or_else(|| PlanError::logic("unknown operationplan"))
    }

    pub(crate) fn plan_checked_mut(&mut self, key: OperationPlanKey) -> PlanResult<&mut OperationPlan> {
        self.operationplans
            .get_mut(key)
            .ok_or_else(|| PlanError::logic("unknown operationplan"))
    }

    /// Root of the hierarchy `key` belongs to.
    pub fn top_owner(&self, key: OperationPlanKey) -> OperationPlanKey {
        let mut cur = key;
        while let Some(owner) = self.operationplans.get(cur).and_then(|p| p.owner) {
            cur = owner;
        }
        cur
    }

    /// `key` and all its descendants, parents before children.
    pub fn hierarchy(&self, key: OperationPlanKey) -> Vec<OperationPlanKey> {
        let mut out = Vec::new();
        let mut stack = vec![key];
        while let Some(k) = stack.pop() {
            if let Some(p) = self.operationplans.get(k) {
                out.push(k);
                stack.extend(p.children.iter().rev().copied());
            }
        }
        out
    }

    fn kind_of(&self, key: OperationPlanKey) -> &OperationKind {
        &self.operations[self.operationplans[key].operation].kind
    }

    /// Lot-size minimum of an operation in effect at `date`.
    pub(crate) fn size_minimum_at(&self, operation: OperationId, date: Date) -> Quantity {
        let op = &self.operations[operation];
        match op.size.minimum_calendar.and_then(|c| self.calendars.get(c)) {
            Some(cal) => cal.quantity_at(date),
            None => op.size.minimum,
        }
    }
}

// ---------------------------------------------------------------------------
// Creation and hierarchy
// ---------------------------------------------------------------------------

impl Plan {
    /// Create an unactivated operationplan, resolving its quantity and
    /// dates. Composite operations get their children created as well.
    pub fn create_operationplan(&mut self, new: NewPlan) -> PlanResult<OperationPlanKey> {
        self.operation_checked(new.operation)?;
        if new.quantity < Quantity::ZERO {
            return Err(PlanError::data("operationplan quantity must not be negative"));
        }
        if new.id == OperationPlanId::RESERVED.0 {
            return Err(PlanError::data(format!("operationplan id {} is reserved", new.id)));
        }
        if let Some(d) = new.demand {
            self.demand_checked(d)?;
        }
        let anchor = new.end.or(new.start).unwrap_or(self.current());
        let mut plan = OperationPlan::new(new.operation, anchor);
        plan.id = OperationPlanId(new.id);
        plan.demand = new.demand;
        let key = self.operationplans.insert(plan);

        if let Some(owner) = new.owner {
            if let Err(e) = self.set_owner(key, Some(owner)) {
                self.operationplans.remove(key);
                return Err(e);
            }
        }
        self.create_children(key, anchor);
        if let Err(e) =
            self.set_operationplan_parameters(key, new.quantity, new.start, new.end, true, true)
        {
            self.delete_tree(key);
            return Err(e);
        }
        for k in self.hierarchy(key) {
            self.operationplans[k].status = new.status;
        }
        if new.create_flowloads {
            for k in self.hierarchy(key) {
                self.create_flow_loads(k);
            }
        }
        Ok(key)
    }

    fn insert_child(&mut self, owner: OperationPlanKey, operation: OperationId, anchor: Date) -> OperationPlanKey {
        let mut child = OperationPlan::new(operation, anchor);
        child.owner = Some(owner);
        let key = self.operationplans.insert(child);
        self.operationplans[owner].children.push(key);
        self.create_children(key, anchor);
        key
    }

    fn create_children(&mut self, key: OperationPlanKey, anchor: Date) {
        let op = self.operationplans[key].operation;
        let subs = self.operations[op].sub_operations.clone();
        match self.operations[op].kind {
            OperationKind::Routing => {
                for s in subs {
                    self.insert_child(key, s.operation, anchor);
                }
            }
            OperationKind::Alternate => {
                if let Some(s) = subs
                    .iter()
                    .find(|s| s.priority > 0 && s.effective.contains_inclusive(anchor))
                {
                    self.insert_child(key, s.operation, anchor);
                }
            }
            OperationKind::Split => {
                for s in subs.iter().filter(|s| s.priority > 0) {
                    self.insert_child(key, s.operation, anchor);
                }
            }
            _ => {}
        }
    }

    /// Attach `child` to `owner`, or detach it with `None`.
    ///
    /// The owner's operation must list the child's operation as one of its
    /// sub-operations.
    pub fn set_owner(
        &mut self,
        child: OperationPlanKey,
        owner: Option<OperationPlanKey>,
    ) -> PlanResult<()> {
        let child_op = self.plan_checked(child)?.operation;
        if let Some(o) = owner {
            let owner_plan = self.plan_checked(o)?;
            if o == child || self.top_owner(o) == child {
                return Err(PlanError::data("an operationplan cannot own itself"));
            }
            let owner_op = &self.operations[owner_plan.operation];
            if !owner_op.sub_operations.iter().any(|s| s.operation == child_op) {
                return Err(PlanError::data(format!(
                    "operation '{}' is not a sub-operation of '{}'",
                    self.operations[child_op].name, owner_op.name
                )));
            }
            if owner_op.kind == OperationKind::Alternate && !owner_plan.children.is_empty() {
                return Err(PlanError::data(format!(
                    "alternate plan of '{}' already has a child",
                    owner_op.name
                )));
            }
        }
        if let Some(old) = self.operationplans[child].owner.take() {
            self.operationplans[old].children.retain(|&c| c != child);
        }
        if let Some(o) = owner {
            self.operationplans[child].owner = Some(o);
            let owner_op = self.operationplans[o].operation;
            let step = |plan: &Plan, k: OperationPlanKey| {
                let op = plan.operationplans[k].operation;
                plan.operations[owner_op].sub_operations.iter().position(|s| s.operation == op)
            };
            let rank = step(self, child);
            let pos = self.operationplans[o]
                .children
                .iter()
                .position(|&c| step(self, c) > rank)
                .unwrap_or(self.operationplans[o].children.len());
            self.operationplans[o].children.insert(pos, child);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Activation
// ---------------------------------------------------------------------------

impl Plan {
    /// Activate a top-level operationplan.
    pub fn activate(&mut self, key: OperationPlanKey) -> PlanResult<Activation> {
        let p = self.plan_checked(key)?;
        if p.owner.is_some() {
            return Err(PlanError::logic("only top-level operationplans are activated"));
        }
        if p.activated {
            return Ok(Activation::Activated(key));
        }
        if p.quantity <= Quantity::ZERO && !p.is_confirmed() {
            debug!(operation = %self.operations[p.operation].name, "empty operationplan discarded");
            self.delete_tree(key);
            return Ok(Activation::Deleted);
        }
        if self.config.merge_on_activate {
            if let MergeOutcome::Merged(survivor) = self.merge_if_possible(key)? {
                return Ok(Activation::Merged(survivor));
            }
        }
        for k in self.hierarchy(key) {
            if let Err(e) = self.assign_id(k) {
                self.delete_tree(key);
                return Err(e);
            }
        }
        for k in self.hierarchy(key) {
            self.activate_one(k);
        }
        let p = &self.operationplans[key];
        debug!(
            id = %p.id,
            operation = %self.operations[p.operation].name,
            quantity = %p.quantity,
            start = %p.dates.start,
            end = %p.dates.end,
            "operationplan activated"
        );
        Ok(Activation::Activated(key))
    }

    fn activate_one(&mut self, key: OperationPlanKey) {
        self.link_in_operation(key);
        if self.operationplans[key].has_flowloads {
            // Tie-breaks depend on the id assigned just now.
            self.update_flow_loads(key);
        } else {
            self.create_flow_loads(key);
        }
        self.operationplans[key].activated = true;
        if let Some(d) = self.operationplans[key].demand {
            self.add_delivery(d, key);
        }
        let op = self.operationplans[key].operation;
        self.mark_changed(ChangeKey::Operation(op));
    }

    fn assign_id(&mut self, key: OperationPlanKey) -> PlanResult<()> {
        let id = self.operationplans[key].id;
        let id = if id.is_assigned() {
            if let Some(&other) = self.ids.get(&id) {
                if other != key {
                    let this_op = &self.operations[self.operationplans[key].operation].name;
                    let other_op = &self.operations[self.operationplans[other].operation].name;
                    return Err(PlanError::data(format!(
                        "operationplan id {id} of '{this_op}' is already used by '{other_op}'"
                    )));
                }
            }
            if id.0 >= self.next_id {
                self.next_id = id.0.saturating_add(1);
            }
            id
        } else {
            while self.ids.contains_key(&OperationPlanId(self.next_id)) {
                self.next_id += 1;
            }
            let id = OperationPlanId(self.next_id);
            self.next_id += 1;
            id
        };
        self.operationplans[key].id = id;
        self.ids.insert(id, key);
        Ok(())
    }

    /// Fold an unactivated plan into an identical activated one.
    ///
    /// Only plain fixed-duration plans without id, lock, owner or loads
    /// qualify; the neighbour must share dates and demand, and the merged
    /// quantity must still respect the lot-size rules.
    pub fn merge_if_possible(&mut self, key: OperationPlanKey) -> PlanResult<MergeOutcome> {
        let p = self.plan_checked(key)?;
        let op = &self.operations[p.operation];
        let eligible = !p.activated
            && !p.id.is_assigned()
            && !p.is_confirmed()
            && p.owner.is_none()
            && p.children.is_empty()
            && !op.kind.is_composite()
            && op.kind.fixed_duration().is_some()
            && op.loads.is_empty();
        if !eligible {
            return Ok(MergeOutcome::Kept(key));
        }
        let (op_id, dates, demand, quantity) = (p.operation, p.dates, p.demand, p.quantity);
        let survivor = self.operationplans_of(op_id).find(|&s| {
            let sp = &self.operationplans[s];
            sp.dates == dates
                && sp.demand == demand
                && !sp.is_confirmed()
                && sp.owner.is_none()
        });
        let Some(survivor) = survivor else {
            return Ok(MergeOutcome::Kept(key));
        };
        let merged = self.operationplans[survivor].quantity.saturating_add(quantity);
        let minimum = self.size_minimum_at(op_id, dates.start);
        if self.operations[op_id].size.round(merged, minimum, false) != merged {
            return Ok(MergeOutcome::Kept(key));
        }
        self.delete_tree(key);
        self.apply_quantity(survivor, merged);
        self.update(survivor);
        debug!(id = %self.operationplans[survivor].id, quantity = %merged, "operationplan merged");
        Ok(MergeOutcome::Merged(survivor))
    }

    fn add_delivery(&mut self, demand: DemandId, key: OperationPlanKey) {
        let Some(d) = self.demands.get_mut(demand) else { return };
        if !d.deliveries.contains(&key) {
            d.deliveries.push(key);
        }
        self.sort_deliveries(demand);
        self.mark_changed(ChangeKey::Demand(demand));
    }

    fn remove_delivery(&mut self, demand: DemandId, key: OperationPlanKey) {
        if let Some(d) = self.demands.get_mut(demand) {
            d.deliveries.retain(|&k| k != key);
            self.mark_changed(ChangeKey::Demand(demand));
        }
    }

    fn sort_deliveries(&mut self, demand: DemandId) {
        let plans = &self.operationplans;
        if let Some(d) = self.demands.get_mut(demand) {
            d.deliveries.sort_by(|&a, &b| {
                let (pa, pb) = (&plans[a], &plans[b]);
                pb.dates.end.cmp(&pa.dates.end).then(pa.id.cmp(&pb.id))
            });
        }
    }

    /// Link the plan to a demand it delivers, or unlink it.
    pub fn set_demand(&mut self, key: OperationPlanKey, demand: Option<DemandId>) -> PlanResult<()> {
        if let Some(d) = demand {
            self.demand_checked(d)?;
        }
        let p = self.plan_checked_mut(key)?;
        let old = std::mem::replace(&mut p.demand, demand);
        let activated = p.activated;
        if activated {
            if let Some(d) = old {
                self.remove_delivery(d, key);
            }
            if let Some(d) = demand {
                self.add_delivery(d, key);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-operation list
// ---------------------------------------------------------------------------

impl Plan {
    fn list_order(&self, a: OperationPlanKey, b: OperationPlanKey) -> Ordering {
        let (pa, pb) = (&self.operationplans[a], &self.operationplans[b]);
        pa.dates
            .start
            .cmp(&pb.dates.start)
            .then(pb.quantity.cmp(&pa.quantity))
            .then(pa.id.cmp(&pb.id))
    }

    fn link_in_operation(&mut self, key: OperationPlanKey) {
        let op = self.operationplans[key].operation;
        let mut after = self.operations[op].last_plan;
        while let Some(a) = after {
            if self.list_order(a, key) != Ordering::Greater {
                break;
            }
            after = self.operationplans[a].prev;
        }
        let next = match after {
            Some(a) => self.operationplans[a].next,
            None => self.operations[op].first_plan,
        };
        let p = &mut self.operationplans[key];
        p.prev = after;
        p.next = next;
        match after {
            Some(a) => self.operationplans[a].next = Some(key),
            None => self.operations[op].first_plan = Some(key),
        }
        match next {
            Some(n) => self.operationplans[n].prev = Some(key),
            None => self.operations[op].last_plan = Some(key),
        }
    }

    fn unlink_from_operation(&mut self, key: OperationPlanKey) {
        let p = &mut self.operationplans[key];
        let (op, prev, next) = (p.operation, p.prev.take(), p.next.take());
        match prev {
            Some(pr) => self.operationplans[pr].next = next,
            None => self.operations[op].first_plan = next,
        }
        match next {
            Some(n) => self.operationplans[n].prev = prev,
            None => self.operations[op].last_plan = prev,
        }
    }

    fn relink_if_needed(&mut self, key: OperationPlanKey) {
        let p = &self.operationplans[key];
        if !p.activated {
            return;
        }
        let out_of_order = p.prev.is_some_and(|pr| self.list_order(pr, key) == Ordering::Greater)
            || p.next.is_some_and(|n| self.list_order(key, n) == Ordering::Greater);
        if out_of_order {
            self.unlink_from_operation(key);
            self.link_in_operation(key);
        }
    }
}

// ---------------------------------------------------------------------------
// Deletion
// ---------------------------------------------------------------------------

impl Plan {
    /// Delete the hierarchy `key` belongs to.
    pub fn delete_operationplan(&mut self, key: OperationPlanKey) -> PlanResult<()> {
        self.plan_checked(key)?;
        let top = self.top_owner(key);
        let p = &self.operationplans[top];
        debug!(id = %p.id, operation = %self.operations[p.operation].name, "operationplan deleted");
        self.delete_tree(top);
        Ok(())
    }

    /// Take a hierarchy out of the plan while keeping it in the arena.
    /// Its id is kept so [`Plan::reattach`] can restore it.
    pub(crate) fn detach(&mut self, top: OperationPlanKey) {
        for k in self.hierarchy(top) {
            self.deactivate_one(k);
        }
    }

    /// Undo [`Plan::detach`].
    pub(crate) fn reattach(&mut self, top: OperationPlanKey) -> PlanResult<()> {
        for k in self.hierarchy(top) {
            self.assign_id(k)?;
        }
        for k in self.hierarchy(top) {
            self.activate_one(k);
        }
        Ok(())
    }

    fn deactivate_one(&mut self, key: OperationPlanKey) {
        self.delete_flow_loads(key);
        let p = &self.operationplans[key];
        let (op, id, demand, activated) = (p.operation, p.id, p.demand, p.activated);
        if activated {
            self.unlink_from_operation(key);
            if self.ids.get(&id) == Some(&key) {
                self.ids.remove(&id);
            }
            if let Some(d) = demand {
                self.remove_delivery(d, key);
            }
            self.operationplans[key].activated = false;
        }
        self.problem_store_mut().clear_owner(ProblemOwner::OperationPlan(key));
        self.mark_changed(ChangeKey::Operation(op));
    }

    pub(crate) fn delete_tree(&mut self, top: OperationPlanKey) {
        let keys = self.hierarchy(top);
        for &k in keys.iter().rev() {
            self.deactivate_one(k);
        }
        if let Some(owner) = self.operationplans.get(top).and_then(|p| p.owner) {
            self.operationplans[owner].children.retain(|&c| c != top);
        }
        for k in keys {
            self.operationplans.remove(k);
        }
    }
}

// ---------------------------------------------------------------------------
// Quantity, dates and status
// ---------------------------------------------------------------------------

impl Plan {
    /// Resize an operationplan.
    ///
    /// The request is rounded to the operation's lot-size rules. Confirmed
    /// plans keep their quantity. Members of a hierarchy forward the
    /// request to their top owner. With `execute` false only the
    /// rounded quantity is returned; with `update` the dates and flowplans
    /// are refreshed.
    pub fn set_quantity(
        &mut self,
        key: OperationPlanKey,
        quantity: Quantity,
        round_down: bool,
        update: bool,
        execute: bool,
    ) -> PlanResult<Quantity> {
        if quantity < Quantity::ZERO {
            return Err(PlanError::data("operationplan quantity must not be negative"));
        }
        if self.plan_checked(key)?.owner.is_some() {
            let top = self.top_owner(key);
            return self.set_quantity(top, quantity, round_down, update, execute);
        }
        let p = &self.operationplans[key];
        if p.is_confirmed() {
            return Ok(p.quantity);
        }
        let rounded = self.round_quantity(key, quantity, round_down);
        if !execute {
            return Ok(rounded);
        }
        self.apply_quantity(key, rounded);
        if update {
            let end = self.operationplans[key].dates.end;
            let state = self.set_operationplan_parameters(key, rounded, None, Some(end), true, true)?;
            self.update(key);
            return Ok(state.quantity);
        }
        Ok(rounded)
    }

    /// Quantity `requested` would be rounded to.
    pub(crate) fn round_quantity(
        &self,
        key: OperationPlanKey,
        requested: Quantity,
        round_down: bool,
    ) -> Quantity {
        let p = &self.operationplans[key];
        let op = &self.operations[p.operation];
        match op.kind {
            OperationKind::Split => requested.max(Quantity::ZERO),
            OperationKind::Alternate => match p.children.first() {
                Some(&child) => self.round_quantity(child, requested, round_down),
                None => requested.max(Quantity::ZERO),
            },
            _ => {
                let minimum = self.size_minimum_at(p.operation, p.dates.start);
                op.size.round(requested, minimum, round_down)
            }
        }
    }

    /// Store a quantity on a plan and push it to its children.
    pub(crate) fn apply_quantity(&mut self, key: OperationPlanKey, quantity: Quantity) {
        self.operationplans[key].quantity = quantity;
        let children = self.operationplans[key].children.clone();
        match self.kind_of(key) {
            OperationKind::Routing | OperationKind::Alternate => {
                for c in children {
                    self.apply_quantity(c, quantity);
                }
            }
            OperationKind::Split => {
                for c in children {
                    let share = self.split_share(key, c, quantity);
                    self.apply_quantity(c, share);
                }
            }
            _ => {}
        }
    }

    /// Part of `quantity` a split child takes: its percentage over the sum.
    pub(crate) fn split_share(
        &self,
        parent: OperationPlanKey,
        child: OperationPlanKey,
        quantity: Quantity,
    ) -> Quantity {
        let op = &self.operations[self.operationplans[parent].operation];
        let child_op = self.operationplans[child].operation;
        let total: i64 = op
            .sub_operations
            .iter()
            .filter(|s| s.priority > 0)
            .map(|s| i64::from(s.priority))
            .sum();
        let pct = op
            .sub_operations
            .iter()
            .find(|s| s.operation == child_op)
            .map_or(0, |s| i64::from(s.priority.max(0)));
        if total == 0 {
            return Quantity::ZERO;
        }
        let bits = (i128::from(quantity.to_bits()) * i128::from(pct)) / i128::from(total);
        Quantity::from_bits(bits.clamp(0, i128::from(i64::MAX)) as i64)
    }

    /// Move the start. Confirmed plans only move when `force` is set, in
    /// which case the dates are taken literally.
    pub fn set_start(&mut self, key: OperationPlanKey, start: Date, force: bool) -> PlanResult<()> {
        let p = self.plan_checked(key)?;
        if p.is_confirmed() && !force {
            return Ok(());
        }
        if force {
            let p = &mut self.operationplans[key];
            p.dates.start = start;
            p.dates.end = p.dates.end.max(start);
        } else {
            let q = p.quantity;
            self.set_operationplan_parameters(key, q, Some(start), None, false, true)?;
        }
        self.update(key);
        Ok(())
    }

    /// Move the end; see [`Plan::set_start`].
    pub fn set_end(&mut self, key: OperationPlanKey, end: Date, force: bool) -> PlanResult<()> {
        let p = self.plan_checked(key)?;
        if p.is_confirmed() && !force {
            return Ok(());
        }
        if force {
            let p = &mut self.operationplans[key];
            p.dates.end = end;
            p.dates.start = p.dates.start.min(end);
        } else {
            let q = p.quantity;
            self.set_operationplan_parameters(key, q, None, Some(end), true, true)?;
        }
        self.update(key);
        Ok(())
    }

    /// Change the status of a hierarchy.
    pub fn set_status(&mut self, key: OperationPlanKey, status: PlanStatus) -> PlanResult<()> {
        self.plan_checked(key)?;
        for k in self.hierarchy(key) {
            self.operationplans[k].status = status;
            let op = self.operationplans[k].operation;
            self.mark_changed(ChangeKey::Operation(op));
        }
        Ok(())
    }

    pub fn set_feasible(&mut self, key: OperationPlanKey, feasible: bool) -> PlanResult<()> {
        self.plan_checked_mut(key)?.feasible = feasible;
        Ok(())
    }

    /// Toggle the material and capacity effects of a plan.
    pub fn set_effects(
        &mut self,
        key: OperationPlanKey,
        consume_material: bool,
        produce_material: bool,
        consume_capacity: bool,
    ) -> PlanResult<()> {
        let p = self.plan_checked_mut(key)?;
        p.consume_material = consume_material;
        p.produce_material = produce_material;
        p.consume_capacity = consume_capacity;
        self.update_flow_loads(key);
        Ok(())
    }

    /// Propagate a change of quantity or dates: flowplans, list position,
    /// demand order and the envelopes of the owners.
    pub fn update(&mut self, key: OperationPlanKey) {
        if !self.operationplans.contains_key(key) {
            return;
        }
        self.update_tree(key);
        let mut cur = self.operationplans[key].owner;
        while let Some(owner) = cur {
            self.refresh_envelope(owner);
            self.update_flow_loads(owner);
            self.relink_if_needed(owner);
            let op = self.operationplans[owner].operation;
            self.mark_changed(ChangeKey::Operation(op));
            cur = self.operationplans[owner].owner;
        }
    }

    fn update_tree(&mut self, key: OperationPlanKey) {
        for c in self.operationplans[key].children.clone() {
            self.update_tree(c);
        }
        self.update_flow_loads(key);
        self.relink_if_needed(key);
        let p = &self.operationplans[key];
        let (op, demand, activated) = (p.operation, p.demand, p.activated);
        if activated {
            if let Some(d) = demand {
                self.sort_deliveries(d);
                self.mark_changed(ChangeKey::Demand(d));
            }
        }
        self.mark_changed(ChangeKey::Operation(op));
    }

    /// Recompute a composite plan's dates from its children.
    pub(crate) fn refresh_envelope(&mut self, key: OperationPlanKey) {
        let children = &self.operationplans[key].children;
        if children.is_empty() {
            return;
        }
        let start = children.iter().map(|&c| self.operationplans[c].dates.start).min();
        let end = children.iter().map(|&c| self.operationplans[c].dates.end).max();
        if let (Some(start), Some(end)) = (start, end) {
            self.operationplans[key].dates = DateRange { start, end };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::qty;
    use crate::flow::FlowKind;
    use crate::operation::SizeRules;
    use crate::time::Duration;

    fn day(n: u32) -> Date {
        Date::from_ymd(2024, 1, n).unwrap()
    }

    fn fixed_plan() -> (Plan, OperationId) {
        let mut plan = Plan::default();
        let op = plan
            .add_operation("make", OperationKind::FixedTime { duration: Duration::DAY })
            .unwrap();
        (plan, op)
    }

    #[test]
    fn create_resolves_dates_backward_from_end() {
        let (mut plan, op) = fixed_plan();
        let key = plan.create_operationplan(NewPlan::new(op, qty(10.0)).ending(day(5))).unwrap();
        let p = plan.operationplan(key).unwrap();
        assert_eq!(p.start(), day(4));
        assert_eq!(p.end(), day(5));
        assert!(!p.is_activated());
        assert!(!p.id().is_assigned());
    }

    #[test]
    fn activation_assigns_increasing_ids() {
        let (mut plan, op) = fixed_plan();
        let a = plan.create_operationplan(NewPlan::new(op, qty(1.0)).ending(day(5))).unwrap();
        let b = plan.create_operationplan(NewPlan::new(op, qty(2.0)).ending(day(7))).unwrap();
        plan.activate(a).unwrap();
        plan.activate(b).unwrap();
        let (ia, ib) = (plan.operationplan(a).unwrap().id(), plan.operationplan(b).unwrap().id());
        assert!(ia.is_assigned() && ib.is_assigned());
        assert!(ia < ib);
        assert_eq!(plan.operationplan_by_id(ib), Some(b));
    }

    #[test]
    fn explicit_id_raises_counter() {
        let (mut plan, op) = fixed_plan();
        let a = plan
            .create_operationplan(NewPlan::new(op, qty(1.0)).ending(day(5)).with_id(100))
            .unwrap();
        plan.activate(a).unwrap();
        let b = plan.create_operationplan(NewPlan::new(op, qty(1.0)).ending(day(9))).unwrap();
        plan.activate(b).unwrap();
        assert_eq!(plan.operationplan(b).unwrap().id(), OperationPlanId(101));
    }

    #[test]
    fn duplicate_id_is_data_error_and_deletes() {
        let (mut plan, op) = fixed_plan();
        let other = plan
            .add_operation("other", OperationKind::FixedTime { duration: Duration::DAY })
            .unwrap();
        let a = plan
            .create_operationplan(NewPlan::new(op, qty(1.0)).ending(day(5)).with_id(7))
            .unwrap();
        plan.activate(a).unwrap();
        let b = plan
            .create_operationplan(NewPlan::new(other, qty(1.0)).ending(day(5)).with_id(7))
            .unwrap();
        assert!(plan.activate(b).unwrap_err().is_data());
        assert!(plan.operationplan(b).is_none());
        assert_eq!(plan.operationplan_by_id(OperationPlanId(7)), Some(a));
    }

    #[test]
    fn zero_quantity_plan_is_deleted_on_activation() {
        let (mut plan, op) = fixed_plan();
        let key = plan.create_operationplan(NewPlan::new(op, Quantity::ZERO).ending(day(5))).unwrap();
        assert_eq!(plan.activate(key).unwrap(), Activation::Deleted);
        assert!(plan.operationplan(key).is_none());
    }

    #[test]
    fn identical_plans_merge() {
        let (mut plan, op) = fixed_plan();
        let a = plan.create_operationplan(NewPlan::new(op, qty(3.0)).ending(day(5))).unwrap();
        plan.activate(a).unwrap();
        let b = plan.create_operationplan(NewPlan::new(op, qty(4.0)).ending(day(5))).unwrap();
        assert_eq!(plan.activate(b).unwrap(), Activation::Merged(a));
        assert_eq!(plan.operationplan(a).unwrap().quantity(), qty(7.0));
        assert_eq!(plan.operationplans_of(op).count(), 1);
    }

    #[test]
    fn merging_can_be_disabled() {
        let (mut plan, op) = fixed_plan();
        plan.config.merge_on_activate = false;
        let a = plan.create_operationplan(NewPlan::new(op, qty(3.0)).ending(day(5))).unwrap();
        plan.activate(a).unwrap();
        let b = plan.create_operationplan(NewPlan::new(op, qty(4.0)).ending(day(5))).unwrap();
        assert_eq!(plan.activate(b).unwrap(), Activation::Activated(b));
        assert_eq!(plan.operationplans_of(op).count(), 2);
    }

    #[test]
    fn operation_list_sorted_by_start_then_quantity() {
        let (mut plan, op) = fixed_plan();
        plan.config.merge_on_activate = false;
        let late = plan.create_operationplan(NewPlan::new(op, qty(1.0)).ending(day(9))).unwrap();
        let small = plan.create_operationplan(NewPlan::new(op, qty(1.0)).ending(day(5))).unwrap();
        let big = plan.create_operationplan(NewPlan::new(op, qty(5.0)).ending(day(5))).unwrap();
        for k in [late, small, big] {
            plan.activate(k).unwrap();
        }
        let order: Vec<_> = plan.operationplans_of(op).collect();
        assert_eq!(order, vec![big, small, late]);

        plan.set_end(late, day(3), false).unwrap();
        let order: Vec<_> = plan.operationplans_of(op).collect();
        assert_eq!(order, vec![late, big, small]);
    }

    #[test]
    fn set_quantity_rounds_to_lot_size() {
        let (mut plan, op) = fixed_plan();
        plan.set_operation_size(
            op,
            SizeRules { minimum: qty(5.0), multiple: qty(5.0), ..SizeRules::default() },
        )
        .unwrap();
        let key = plan.create_operationplan(NewPlan::new(op, qty(1.0)).ending(day(5))).unwrap();
        assert_eq!(plan.operationplan(key).unwrap().quantity(), qty(5.0));
        assert_eq!(plan.set_quantity(key, qty(12.0), false, true, true).unwrap(), qty(15.0));
        assert_eq!(plan.set_quantity(key, qty(12.0), true, true, false).unwrap(), qty(10.0));
        assert_eq!(plan.operationplan(key).unwrap().quantity(), qty(15.0));
        assert!(plan.set_quantity(key, qty(-1.0), false, true, true).unwrap_err().is_data());
    }

    #[test]
    fn confirmed_plans_keep_quantity_and_dates() {
        let (mut plan, op) = fixed_plan();
        let key = plan
            .create_operationplan(
                NewPlan::new(op, qty(4.0)).ending(day(5)).status(PlanStatus::Confirmed),
            )
            .unwrap();
        plan.activate(key).unwrap();
        assert_eq!(plan.set_quantity(key, qty(9.0), false, true, true).unwrap(), qty(4.0));
        plan.set_end(key, day(8), false).unwrap();
        assert_eq!(plan.operationplan(key).unwrap().end(), day(5));
        plan.set_end(key, day(8), true).unwrap();
        assert_eq!(plan.operationplan(key).unwrap().end(), day(8));
    }

    #[test]
    fn routing_steps_are_created_and_deleted_together() {
        let mut plan = Plan::default();
        let routing = plan.add_operation("route", OperationKind::Routing).unwrap();
        let s1 = plan
            .add_operation("cut", OperationKind::FixedTime { duration: Duration::DAY })
            .unwrap();
        let s2 = plan
            .add_operation("weld", OperationKind::FixedTime { duration: Duration::days(2) })
            .unwrap();
        plan.add_sub_operation(routing, s1, 1, DateRange::unbounded()).unwrap();
        plan.add_sub_operation(routing, s2, 2, DateRange::unbounded()).unwrap();
        let key = plan
            .create_operationplan(NewPlan::new(routing, qty(3.0)).ending(day(10)))
            .unwrap();
        plan.activate(key).unwrap();
        let steps = plan.operationplan(key).unwrap().children().to_vec();
        assert_eq!(steps.len(), 2);
        assert_eq!(plan.operationplan(steps[0]).unwrap().dates(), DateRange::new(day(7), day(8)));
        assert_eq!(plan.operationplan(steps[1]).unwrap().dates(), DateRange::new(day(8), day(10)));
        assert_eq!(plan.operationplan(key).unwrap().dates(), DateRange::new(day(7), day(10)));
        assert_eq!(plan.operationplan(steps[1]).unwrap().quantity(), qty(3.0));

        plan.delete_operationplan(steps[1]).unwrap();
        assert!(plan.operationplan(key).is_none());
        assert!(plan.operationplan(steps[0]).is_none());
        assert_eq!(plan.operationplan_count(), 0);
    }

    #[test]
    fn set_owner_rejects_unrelated_operation() {
        let mut plan = Plan::default();
        let routing = plan.add_operation("route", OperationKind::Routing).unwrap();
        let loose = plan
            .add_operation("loose", OperationKind::FixedTime { duration: Duration::DAY })
            .unwrap();
        let parent = plan.create_operationplan(NewPlan::new(routing, qty(1.0)).ending(day(5))).unwrap();
        let child = plan.create_operationplan(NewPlan::new(loose, qty(1.0)).ending(day(5))).unwrap();
        assert!(plan.set_owner(child, Some(parent)).unwrap_err().is_data());
    }

    #[test]
    fn split_children_share_by_percentage() {
        let mut plan = Plan::default();
        let split = plan.add_operation("split", OperationKind::Split).unwrap();
        let a = plan
            .add_operation("a", OperationKind::FixedTime { duration: Duration::DAY })
            .unwrap();
        let b = plan
            .add_operation("b", OperationKind::FixedTime { duration: Duration::DAY })
            .unwrap();
        plan.add_sub_operation(split, a, 30, DateRange::unbounded()).unwrap();
        plan.add_sub_operation(split, b, 70, DateRange::unbounded()).unwrap();
        let key = plan.create_operationplan(NewPlan::new(split, qty(10.0)).ending(day(5))).unwrap();
        let kids = plan.operationplan(key).unwrap().children().to_vec();
        let q: Vec<_> = kids.iter().map(|&k| plan.operationplan(k).unwrap().quantity()).collect();
        assert_eq!(q, vec![qty(3.0), qty(7.0)]);
    }

    #[test]
    fn resizing_a_split_child_resizes_the_whole_split() {
        let mut plan = Plan::default();
        let split = plan.add_operation("split", OperationKind::Split).unwrap();
        let a = plan
            .add_operation("a", OperationKind::FixedTime { duration: Duration::DAY })
            .unwrap();
        let b = plan
            .add_operation("b", OperationKind::FixedTime { duration: Duration::DAY })
            .unwrap();
        plan.add_sub_operation(split, a, 30, DateRange::unbounded()).unwrap();
        plan.add_sub_operation(split, b, 70, DateRange::unbounded()).unwrap();
        let key = plan.create_operationplan(NewPlan::new(split, qty(10.0)).ending(day(5))).unwrap();
        let kids = plan.operationplan(key).unwrap().children().to_vec();

        plan.set_quantity(kids[0], qty(20.0), false, true, true).unwrap();
        assert_eq!(plan.operationplan(key).unwrap().quantity(), qty(20.0));
        let q: Vec<_> = kids.iter().map(|&k| plan.operationplan(k).unwrap().quantity()).collect();
        assert_eq!(q, vec![qty(6.0), qty(14.0)]);
    }

    #[test]
    fn merge_never_exceeds_lot_size() {
        let (mut plan, op) = fixed_plan();
        plan.set_operation_size(op, SizeRules { maximum: qty(8.0), ..SizeRules::default() })
            .unwrap();
        let a = plan.create_operationplan(NewPlan::new(op, qty(5.0)).ending(day(5))).unwrap();
        plan.activate(a).unwrap();
        let b = plan.create_operationplan(NewPlan::new(op, qty(5.0)).ending(day(5))).unwrap();
        assert_eq!(plan.activate(b).unwrap(), Activation::Activated(b));
        assert_eq!(plan.operationplan(a).unwrap().quantity(), qty(5.0));
        assert_eq!(plan.operationplans_of(op).count(), 2);

        let c = plan.create_operationplan(NewPlan::new(op, qty(3.0)).ending(day(5))).unwrap();
        assert!(matches!(plan.activate(c).unwrap(), Activation::Merged(_)));
    }

    #[test]
    fn delivery_plans_registered_on_demand() {
        let mut plan = Plan::default();
        let item = plan.add_item("widget").unwrap();
        let loc = plan.add_location("plant").unwrap();
        let buffer = plan.add_buffer(item, loc).unwrap();
        let d = plan.add_demand("order", item, qty(10.0), day(10)).unwrap();
        let op = plan
            .add_operation("ship", OperationKind::FixedTime { duration: Duration::ZERO })
            .unwrap();
        plan.add_flow(op, buffer, qty(-1.0), FlowKind::Start).unwrap();
        plan.config.merge_on_activate = false;
        let early = plan
            .create_operationplan(NewPlan::new(op, qty(4.0)).ending(day(8)).for_demand(d))
            .unwrap();
        let late = plan
            .create_operationplan(NewPlan::new(op, qty(6.0)).ending(day(12)).for_demand(d))
            .unwrap();
        plan.activate(early).unwrap();
        plan.activate(late).unwrap();
        assert_eq!(plan.demand(d).unwrap().deliveries(), &[late, early]);
        plan.delete_operationplan(late).unwrap();
        assert_eq!(plan.demand(d).unwrap().deliveries(), &[early]);
    }
}
