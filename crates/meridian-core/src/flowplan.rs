//! Flowplans and loadplans: the timeline events an operationplan puts on
//! buffers and resources.
//!
//! Every flow of an operation yields one flowplan per operationplan: an
//! on-hand change on the flow's buffer at the plan's start or end. Loads on
//! continuous resources yield two loadplans (capacity taken at the start,
//! released at the end); loads on bucketized resources yield a single
//! consumption at the start. Loads requesting a setup also put a setup
//! event on the resource.
//!
//! Events that sort on the same date and kind are ordered by a tie-break
//! derived from the operationplan id, so insertion order never leaks into
//! the plan.

use tracing::{trace, warn};

use crate::calendar::Target;
use crate::error::{PlanError, PlanResult};
use crate::fixed::Quantity;
use crate::id::{BufferId, FlowId, FlowPlanId, LoadId, LoadPlanId, OperationPlanKey, ResourceId};
use crate::operationplan::SetupSlot;
use crate::plan::Plan;
use crate::problem::ChangeKey;
use crate::resource::ResourceKind;
use crate::setup::{Changeover, SetupEvent};
use crate::time::{Date, Duration};
use crate::timeline::{Event, EventId, EventKind, Tiebreak};

/// What a timeline event stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRef {
    FlowPlan(FlowPlanId),
    LoadPlan(LoadPlanId),
    /// Changeover in front of an operationplan.
    Setup(OperationPlanKey),
    /// Min/max level change or bucket boundary.
    Target,
}

#[derive(Debug, Clone)]
pub struct FlowPlan {
    pub(crate) flow: FlowId,
    pub(crate) operationplan: OperationPlanKey,
    pub(crate) buffer: BufferId,
    pub(crate) event: EventId,
}

impl FlowPlan {
    pub fn flow(&self) -> FlowId {
        self.flow
    }

    pub fn operationplan(&self) -> OperationPlanKey {
        self.operationplan
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn event(&self) -> EventId {
        self.event
    }
}

#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub(crate) load: LoadId,
    pub(crate) operationplan: OperationPlanKey,
    pub(crate) resource: ResourceId,
    pub(crate) event: EventId,
    /// Capacity taken (start) rather than released (end).
    pub(crate) at_start: bool,
}

impl LoadPlan {
    pub fn load(&self) -> LoadId {
        self.load
    }

    pub fn operationplan(&self) -> OperationPlanKey {
        self.operationplan
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn event(&self) -> EventId {
        self.event
    }

    pub fn is_start(&self) -> bool {
        self.at_start
    }
}

/// Tie-break of the `seq`-th event of an operationplan.
fn tiebreak(id: u64, seq: usize) -> Tiebreak {
    (id, seq as u64)
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

impl Plan {
    pub fn flowplan(&self, id: FlowPlanId) -> Option<&FlowPlan> {
        self.flowplans.get(id)
    }

    pub fn loadplan(&self, id: LoadPlanId) -> Option<&LoadPlan> {
        self.loadplans.get(id)
    }

    /// Timeline event of a flowplan.
    pub fn flowplan_event(&self, id: FlowPlanId) -> Option<&Event<EventRef>> {
        let fp = self.flowplans.get(id)?;
        self.buffers.get(fp.buffer)?.timeline.get(fp.event)
    }

    pub fn loadplan_event(&self, id: LoadPlanId) -> Option<&Event<EventRef>> {
        let lp = self.loadplans.get(id)?;
        self.resources.get(lp.resource)?.timeline.get(lp.event)
    }

    pub fn flowplan_date(&self, id: FlowPlanId) -> Option<Date> {
        self.flowplan_event(id).map(Event::date)
    }

    pub fn flowplan_quantity(&self, id: FlowPlanId) -> Option<Quantity> {
        self.flowplan_event(id).map(Event::quantity)
    }

    /// Date and quantity of the event a flow puts on the buffer for `key`.
    fn flow_event(&self, key: OperationPlanKey, flow: FlowId) -> (Date, Quantity) {
        let p = &self.operationplans[key];
        let f = &self.flows[flow];
        let date = if f.kind.at_end() { p.dates.end } else { p.dates.start };
        let enabled = if f.is_producer() { p.produce_material } else { p.consume_material };
        let quantity = if enabled { f.event_quantity(p.quantity, date) } else { Quantity::ZERO };
        (date, quantity)
    }

    /// Date and quantity of one loadplan of `key`.
    fn load_event(&self, key: OperationPlanKey, load: LoadId, at_start: bool) -> (Date, Quantity) {
        let p = &self.operationplans[key];
        let l = &self.loads[load];
        let active = p.consume_capacity
            && p.quantity > Quantity::ZERO
            && l.effective.contains_inclusive(p.dates.start);
        let q = if active { l.quantity } else { Quantity::ZERO };
        match self.resources[l.resource].kind {
            ResourceKind::Default if at_start => (p.dates.start, q),
            ResourceKind::Default => (p.dates.end, -q),
            ResourceKind::Buckets => (p.dates.start, -q.saturating_mul(p.quantity)),
        }
    }
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

impl Plan {
    /// Put the flowplans, loadplans and setup events of `key` on the
    /// timelines. Does nothing when they already exist.
    pub(crate) fn create_flow_loads(&mut self, key: OperationPlanKey) {
        if self.operationplans[key].has_flowloads {
            return;
        }
        let p = &self.operationplans[key];
        let (op, id) = (p.operation, p.id.0);
        let flows = self.operations[op].flows.clone();
        let loads = self.operations[op].loads.clone();
        let mut seq = 0;

        for flow in flows {
            let (date, quantity) = self.flow_event(key, flow);
            let buffer = self.flows[flow].buffer;
            let fp = self.flowplans.insert(FlowPlan {
                flow,
                operationplan: key,
                buffer,
                event: EventId::default(),
            });
            let event = self.buffers[buffer].timeline.insert(
                EventKind::ChangeOnhand,
                date,
                quantity,
                Quantity::ZERO,
                tiebreak(id, seq),
                EventRef::FlowPlan(fp),
            );
            seq += 1;
            self.flowplans[fp].event = event;
            self.operationplans[key].flowplans.push(fp);
            self.mark_changed(ChangeKey::Buffer(buffer));
        }

        let mut setup_resources = Vec::new();
        for load in loads {
            let resource = self.loads[load].resource;
            let sides: &[bool] = match self.resources[resource].kind {
                ResourceKind::Default => &[true, false],
                ResourceKind::Buckets => &[true],
            };
            for &at_start in sides {
                let (date, quantity) = self.load_event(key, load, at_start);
                let lp = self.loadplans.insert(LoadPlan {
                    load,
                    operationplan: key,
                    resource,
                    event: EventId::default(),
                    at_start,
                });
                let event = self.resources[resource].timeline.insert(
                    EventKind::ChangeOnhand,
                    date,
                    quantity,
                    Quantity::ZERO,
                    tiebreak(id, seq),
                    EventRef::LoadPlan(lp),
                );
                seq += 1;
                self.loadplans[lp].event = event;
                self.operationplans[key].loadplans.push(lp);
            }
            if let Some(setup) = self.loads[load].setup.clone() {
                if self.resources[resource].setup_matrix.is_some() {
                    let start = self.operationplans[key].dates.start;
                    let event = self.resources[resource].timeline.insert(
                        EventKind::Setup,
                        start,
                        Quantity::ZERO,
                        Quantity::ZERO,
                        tiebreak(id, seq),
                        EventRef::Setup(key),
                    );
                    seq += 1;
                    self.operationplans[key].setups.push(SetupSlot {
                        resource,
                        event,
                        value: SetupEvent::none(Some(setup)),
                    });
                    setup_resources.push(resource);
                }
            }
            self.mark_changed(ChangeKey::Resource(resource));
        }

        self.operationplans[key].has_flowloads = true;
        for r in setup_resources {
            self.refresh_resource_setups(r);
        }
        trace!(plan = ?key, events = seq, "flowplans created");
    }

    /// Move the events of `key` to its current dates and quantity.
    pub(crate) fn update_flow_loads(&mut self, key: OperationPlanKey) {
        let Some(p) = self.operationplans.get(key) else { return };
        if !p.has_flowloads {
            return;
        }
        let id = p.id.0;
        let mut seq = 0;
        for fp in p.flowplans.clone() {
            let (flow, buffer, event) = {
                let f = &self.flowplans[fp];
                (f.flow, f.buffer, f.event)
            };
            let (date, quantity) = self.flow_event(key, flow);
            self.buffers[buffer].timeline.update(event, quantity, date, tiebreak(id, seq));
            seq += 1;
            self.mark_changed(ChangeKey::Buffer(buffer));
        }
        let loadplans = self.operationplans[key].loadplans.clone();
        let mut setup_resources = Vec::new();
        for (i, lp) in loadplans.iter().enumerate() {
            let (load, resource, event, at_start) = {
                let l = &self.loadplans[*lp];
                (l.load, l.resource, l.event, l.at_start)
            };
            let (date, quantity) = self.load_event(key, load, at_start);
            self.resources[resource].timeline.update(event, quantity, date, tiebreak(id, seq));
            seq += 1;
            // Setup events follow the loadplans of their load.
            let last_of_load = loadplans
                .get(i + 1)
                .is_none_or(|next| self.loadplans[*next].load != load);
            if last_of_load && self.loads[load].setup.is_some() {
                if let Some(slot) =
                    self.operationplans[key].setups.iter().find(|s| s.resource == resource)
                {
                    let (event, start) = (slot.event, self.operationplans[key].dates.start);
                    self.resources[resource].timeline.update(
                        event,
                        Quantity::ZERO,
                        start,
                        tiebreak(id, seq),
                    );
                    seq += 1;
                    setup_resources.push(resource);
                }
            }
            self.mark_changed(ChangeKey::Resource(resource));
        }
        setup_resources.dedup();
        for r in setup_resources {
            self.refresh_resource_setups(r);
        }
    }

    /// Take the events of `key` off the timelines.
    pub(crate) fn delete_flow_loads(&mut self, key: OperationPlanKey) {
        let Some(p) = self.operationplans.get_mut(key) else { return };
        if !p.has_flowloads {
            return;
        }
        p.has_flowloads = false;
        let flowplans = std::mem::take(&mut p.flowplans);
        let loadplans = std::mem::take(&mut p.loadplans);
        let setups = std::mem::take(&mut p.setups);
        for fp in flowplans {
            if let Some(f) = self.flowplans.remove(fp) {
                self.buffers[f.buffer].timeline.erase(f.event);
                self.mark_changed(ChangeKey::Buffer(f.buffer));
            }
        }
        for lp in loadplans {
            if let Some(l) = self.loadplans.remove(lp) {
                self.resources[l.resource].timeline.erase(l.event);
                self.mark_changed(ChangeKey::Resource(l.resource));
            }
        }
        for slot in setups {
            self.resources[slot.resource].timeline.erase(slot.event);
            self.refresh_resource_setups(slot.resource);
        }
    }

    /// Rebuild the events of every plan of an operation after its flows or
    /// loads changed.
    pub(crate) fn regenerate_flow_loads_of(
        &mut self,
        operation: crate::id::OperationId,
    ) -> PlanResult<()> {
        let keys: Vec<OperationPlanKey> = self
            .operationplans
            .iter()
            .filter(|(_, p)| p.operation == operation && p.has_flowloads)
            .map(|(k, _)| k)
            .collect();
        for key in keys {
            self.delete_flow_loads(key);
            self.create_flow_loads(key);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Target events
// ---------------------------------------------------------------------------

impl Plan {
    /// `(date, level)` steps of a target over the horizon.
    fn target_steps(&self, target: Target) -> Vec<(Date, Quantity)> {
        match target {
            Target::Fixed(q) => vec![(Date::INFINITE_PAST, q)],
            Target::Calendar(c) => self.calendars.get(c).map_or_else(Vec::new, |cal| {
                cal.value_changes()
                    .into_iter()
                    .map(|(d, v)| (d, crate::fixed::qty(v)))
                    .collect()
            }),
        }
    }

    /// Rebuild the min/max events of a buffer.
    pub(crate) fn refresh_buffer_targets(&mut self, buffer: BufferId) {
        let Some(b) = self.buffers.get_mut(buffer) else { return };
        for e in std::mem::take(&mut b.target_events) {
            b.timeline.erase(e);
        }
        let (minimum, maximum) = (b.minimum, b.maximum);
        let mut events = Vec::new();
        for (date, level) in self.target_steps(minimum) {
            events.push((EventKind::SetMin, date, level));
        }
        if let Some(max) = maximum {
            for (date, level) in self.target_steps(max) {
                events.push((EventKind::SetMax, date, level));
            }
        }
        let b = &mut self.buffers[buffer];
        for (kind, date, level) in events {
            let id = b.timeline.insert(kind, date, Quantity::ZERO, level, (0, 0), EventRef::Target);
            b.target_events.push(id);
        }
        self.mark_changed(ChangeKey::Buffer(buffer));
    }

    /// Rebuild the capacity events of a resource: max/min levels for
    /// continuous resources, bucket boundaries for bucketized ones.
    pub(crate) fn refresh_resource_targets(&mut self, resource: ResourceId) {
        let Some(r) = self.resources.get_mut(resource) else { return };
        for e in std::mem::take(&mut r.target_events) {
            r.timeline.erase(e);
        }
        let (kind, maximum, minimum) = (r.kind, r.maximum, r.minimum);
        let mut events = Vec::new();
        match kind {
            ResourceKind::Default => {
                for (date, level) in self.target_steps(maximum) {
                    events.push((EventKind::SetMax, date, level));
                }
                if minimum > Quantity::ZERO {
                    events.push((EventKind::SetMin, Date::INFINITE_PAST, minimum));
                }
            }
            ResourceKind::Buckets => {
                if let Target::Calendar(c) = maximum {
                    if let Some(cal) = self.calendars.get(c) {
                        events.push((
                            EventKind::BucketBoundary,
                            Date::INFINITE_PAST,
                            cal.quantity_at(Date::INFINITE_PAST),
                        ));
                        for d in cal.boundaries() {
                            events.push((EventKind::BucketBoundary, d, cal.quantity_at(d)));
                        }
                    }
                }
            }
        }
        let r = &mut self.resources[resource];
        for (kind, date, level) in events {
            let id = r.timeline.insert(kind, date, Quantity::ZERO, level, (0, 0), EventRef::Target);
            r.target_events.push(id);
        }
        self.mark_changed(ChangeKey::Resource(resource));
    }
}

// ---------------------------------------------------------------------------
// Setup events
// ---------------------------------------------------------------------------

impl Plan {
    /// Recompute every changeover on a resource from the setup in effect
    /// before it. Material dates are left alone.
    ///
    /// Transitions without a matching rule get the configured fallback and
    /// are flagged undefined; the first one per resource is logged.
    pub(crate) fn refresh_resource_setups(&mut self, resource: ResourceId) {
        let Some(r) = self.resources.get(resource) else { return };
        let matrix = r.setup_matrix.and_then(|m| self.setup_matrices.get(m));
        let mut current = r.initial_setup.clone();
        let mut updates: Vec<(OperationPlanKey, SetupEvent)> = Vec::new();
        let mut first_undefined: Option<(Date, Option<String>, Option<String>)> = None;

        for (_, e) in r.timeline.iter() {
            let EventRef::Setup(key) = *e.payload() else { continue };
            let Some(slot) = self.operationplans.get(key).and_then(|p| {
                p.setups.iter().find(|s| s.resource == resource)
            }) else {
                continue;
            };
            let to = slot.value.setup.clone();
            let value = match matrix.map(|m| m.calculate_setup(current.as_deref(), to.as_deref())) {
                None | Some(Changeover::NotNeeded) => SetupEvent::none(to.clone()),
                Some(Changeover::Rule(rule)) => SetupEvent {
                    setup: to.clone(),
                    rule: Some(rule.priority),
                    duration: rule.duration,
                    cost: rule.cost,
                    undefined: false,
                },
                Some(Changeover::Undefined) => {
                    if first_undefined.is_none() {
                        first_undefined = Some((e.date(), current.clone(), to.clone()));
                    }
                    SetupEvent {
                        setup: to.clone(),
                        rule: None,
                        duration: Duration::days(self.config.setup.missing_rule_days),
                        cost: self.config.setup.missing_rule_cost,
                        undefined: true,
                    }
                }
            };
            if value != slot.value {
                updates.push((key, value));
            }
            current = to;
        }

        let changed = !updates.is_empty();
        for (key, value) in updates {
            if let Some(slot) = self.operationplans[key]
                .setups
                .iter_mut()
                .find(|s| s.resource == resource)
            {
                slot.value = value;
            }
        }
        if let Some((date, ref from, ref to)) = first_undefined {
            let r = &mut self.resources[resource];
            if !r.setup_warned {
                r.setup_warned = true;
                warn!(
                    resource = %r.name,
                    %date,
                    from = from.as_deref().unwrap_or("-"),
                    to = to.as_deref().unwrap_or("-"),
                    "no setup rule for changeover, using fallback"
                );
            }
        }
        if changed || first_undefined.is_some() {
            self.mark_changed(ChangeKey::Resource(resource));
        }
    }

    /// Setup the resource is in just before `date`.
    pub fn setup_at(&self, resource: ResourceId, date: Date) -> Option<String> {
        let r = self.resources.get(resource)?;
        let mut current = r.initial_setup.clone();
        for (_, e) in r.timeline.iter() {
            if e.date() >= date {
                break;
            }
            if let EventRef::Setup(key) = *e.payload() {
                if let Some(slot) = self
                    .operationplans
                    .get(key)
                    .and_then(|p| p.setups.iter().find(|s| s.resource == resource))
                {
                    current = slot.value.setup.clone();
                }
            }
        }
        current
    }

    /// Put the plan in `setup` on `resource`, inserting its setup event
    /// when it has none there yet. Changeovers of the plan and its later
    /// neighbours are recomputed.
    pub fn set_setup_event(
        &mut self,
        key: OperationPlanKey,
        resource: ResourceId,
        setup: Option<String>,
    ) -> PlanResult<()> {
        let p = self.plan_checked(key)?;
        let (start, id, slots) = (p.dates.start, p.id.0, p.flowplans.len() + p.loadplans.len());
        if self.resources.get(resource).is_none() {
            return Err(PlanError::logic("unknown resource"));
        }
        let existing = p.setups.iter().position(|s| s.resource == resource);
        match existing {
            Some(i) => {
                let p = &mut self.operationplans[key];
                p.setups[i].value.setup = setup;
                let event = p.setups[i].event;
                let tb = self.resources[resource].timeline.get(event).map(Event::tiebreak).unwrap_or_default();
                self.resources[resource].timeline.update(event, Quantity::ZERO, start, tb);
            }
            None => {
                let event = self.resources[resource].timeline.insert(
                    EventKind::Setup,
                    start,
                    Quantity::ZERO,
                    Quantity::ZERO,
                    tiebreak(id, slots + self.operationplans[key].setups.len()),
                    EventRef::Setup(key),
                );
                self.operationplans[key].setups.push(SetupSlot {
                    resource,
                    event,
                    value: SetupEvent::none(setup),
                });
            }
        }
        self.refresh_resource_setups(resource);
        Ok(())
    }

    /// Recompute the changeovers of `key` and of the plans after it on each
    /// resource it sets up. Material dates do not move.
    pub fn scan_setup_times(&mut self, key: OperationPlanKey) -> PlanResult<()> {
        let resources: Vec<ResourceId> =
            self.plan_checked(key)?.setups.iter().map(|s| s.resource).collect();
        for r in resources {
            self.refresh_resource_setups(r);
        }
        Ok(())
    }

    /// Flowplans on a buffer in timeline order.
    pub fn flowplans_of(
        &self,
        buffer: BufferId,
    ) -> impl Iterator<Item = (FlowPlanId, &Event<EventRef>)> + '_ {
        self.buffers.get(buffer).into_iter().flat_map(|b| {
            b.timeline.iter().filter_map(|(_, e)| match *e.payload() {
                EventRef::FlowPlan(fp) => Some((fp, e)),
                _ => None,
            })
        })
    }

    /// Loadplans on a resource in timeline order.
    pub fn loadplans_of(
        &self,
        resource: ResourceId,
    ) -> impl Iterator<Item = (LoadPlanId, &Event<EventRef>)> + '_ {
        self.resources.get(resource).into_iter().flat_map(|r| {
            r.timeline.iter().filter_map(|(_, e)| match *e.payload() {
                EventRef::LoadPlan(lp) => Some((lp, e)),
                _ => None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Calendar;
    use crate::fixed::qty;
    use crate::flow::FlowKind;
    use crate::operation::OperationKind;
    use crate::operationplan::NewPlan;
    use crate::setup::{SetupMatrix, SetupRule};

    fn day(n: u32) -> Date {
        Date::from_ymd(2024, 1, n).unwrap()
    }

    struct Line {
        plan: Plan,
        op: crate::id::OperationId,
        raw: BufferId,
        out: BufferId,
    }

    fn line() -> Line {
        let mut plan = Plan::default();
        plan.config.merge_on_activate = false;
        let loc = plan.add_location("plant").unwrap();
        let a = plan.add_item("steel").unwrap();
        let b = plan.add_item("frame").unwrap();
        let raw = plan.add_buffer(a, loc).unwrap();
        let out = plan.add_buffer(b, loc).unwrap();
        let op = plan
            .add_operation("weld", OperationKind::FixedTime { duration: Duration::DAY })
            .unwrap();
        plan.add_flow(op, raw, qty(-2.0), FlowKind::Start).unwrap();
        plan.add_flow(op, out, qty(1.0), FlowKind::End).unwrap();
        Line { plan, op, raw, out }
    }

    fn flow_events(plan: &Plan, buffer: BufferId) -> Vec<(Date, Quantity)> {
        plan.buffer(buffer)
            .unwrap()
            .timeline()
            .iter()
            .filter(|(_, e)| e.kind() == EventKind::ChangeOnhand)
            .map(|(_, e)| (e.date(), e.quantity()))
            .collect()
    }

    #[test]
    fn activation_puts_flows_on_buffers() {
        let Line { mut plan, op, raw, out } = line();
        let key = plan.create_operationplan(NewPlan::new(op, qty(5.0)).ending(day(5))).unwrap();
        assert!(flow_events(&plan, raw).is_empty());
        plan.activate(key).unwrap();
        assert_eq!(flow_events(&plan, raw), vec![(day(4), qty(-10.0))]);
        assert_eq!(flow_events(&plan, out), vec![(day(5), qty(5.0))]);
        assert_eq!(plan.operationplan(key).unwrap().flowplans().len(), 2);
    }

    #[test]
    fn resize_and_move_update_events() {
        let Line { mut plan, op, raw, out } = line();
        let key = plan.create_operationplan(NewPlan::new(op, qty(5.0)).ending(day(5))).unwrap();
        plan.activate(key).unwrap();
        plan.set_quantity(key, qty(3.0), false, true, true).unwrap();
        plan.set_end(key, day(8), false).unwrap();
        assert_eq!(flow_events(&plan, raw), vec![(day(7), qty(-6.0))]);
        assert_eq!(flow_events(&plan, out), vec![(day(8), qty(3.0))]);
        plan.buffer(raw).unwrap().timeline().check().unwrap();
    }

    #[test]
    fn equal_events_sort_by_full_operationplan_id() {
        let Line { mut plan, op, out, .. } = line();
        let high = plan
            .create_operationplan(NewPlan::new(op, qty(2.0)).ending(day(5)).with_id((1 << 48) + 1))
            .unwrap();
        let low = plan
            .create_operationplan(NewPlan::new(op, qty(2.0)).ending(day(5)).with_id(1))
            .unwrap();
        plan.activate(high).unwrap();
        plan.activate(low).unwrap();
        let order: Vec<OperationPlanKey> = plan
            .flowplans_of(out)
            .map(|(fp, _)| plan.flowplan(fp).unwrap().operationplan())
            .collect();
        assert_eq!(order, vec![low, high]);
    }

    #[test]
    fn deletion_clears_events() {
        let Line { mut plan, op, raw, .. } = line();
        let key = plan.create_operationplan(NewPlan::new(op, qty(5.0)).ending(day(5))).unwrap();
        plan.activate(key).unwrap();
        plan.delete_operationplan(key).unwrap();
        assert!(flow_events(&plan, raw).is_empty());
        assert_eq!(plan.flowplans.len(), 0);
    }

    #[test]
    fn material_toggle_zeroes_consumption() {
        let Line { mut plan, op, raw, out } = line();
        let key = plan.create_operationplan(NewPlan::new(op, qty(5.0)).ending(day(5))).unwrap();
        plan.activate(key).unwrap();
        plan.set_effects(key, false, true, true).unwrap();
        assert_eq!(flow_events(&plan, raw), vec![(day(4), Quantity::ZERO)]);
        assert_eq!(flow_events(&plan, out), vec![(day(5), qty(5.0))]);
    }

    #[test]
    fn buffer_minimum_from_calendar() {
        let Line { mut plan, raw, .. } = line();
        let mut cal = Calendar::new("safety", 2.0);
        cal.add_bucket(day(10), day(20), 5.0, 1);
        let cal = plan.add_calendar(cal).unwrap();
        plan.set_buffer_minimum(raw, Target::Calendar(cal)).unwrap();
        let mins: Vec<(Date, Quantity)> = plan
            .buffer(raw)
            .unwrap()
            .timeline()
            .iter()
            .filter(|(_, e)| e.kind() == EventKind::SetMin)
            .map(|(_, e)| (e.date(), e.target()))
            .collect();
        assert_eq!(
            mins,
            vec![(Date::INFINITE_PAST, qty(2.0)), (day(10), qty(5.0)), (day(20), qty(2.0))]
        );
    }

    #[test]
    fn continuous_load_takes_and_releases() {
        let Line { mut plan, op, .. } = line();
        let res = plan
            .add_resource("welder", ResourceKind::Default, Target::Fixed(qty(1.0)))
            .unwrap();
        plan.add_load(op, res, qty(1.0), None).unwrap();
        let key = plan.create_operationplan(NewPlan::new(op, qty(5.0)).ending(day(5))).unwrap();
        plan.activate(key).unwrap();
        let r = plan.resource(res).unwrap();
        assert_eq!(r.timeline().onhand_at(day(4)), qty(1.0));
        assert_eq!(r.timeline().onhand_at(day(5)), Quantity::ZERO);
        assert_eq!(plan.operationplan(key).unwrap().loadplans().len(), 2);
    }

    #[test]
    fn changeovers_follow_the_sequence() {
        let Line { mut plan, op, .. } = line();
        let mut m = SetupMatrix::new("colors");
        m.add_rule(SetupRule {
            priority: 1,
            from: Some("red".into()),
            to: Some("blue".into()),
            duration: Duration::HOUR,
            cost: 5.0,
        })
        .unwrap();
        let m = plan.add_setup_matrix(m).unwrap();
        let res = plan
            .add_resource("booth", ResourceKind::Default, Target::Fixed(qty(1.0)))
            .unwrap();
        plan.set_resource_setup(res, Some(m), Some("red".into())).unwrap();
        let paint_blue = plan
            .add_operation("blue", OperationKind::FixedTime { duration: Duration::DAY })
            .unwrap();
        plan.add_load(paint_blue, res, qty(1.0), Some("blue".into())).unwrap();
        plan.add_load(op, res, qty(1.0), Some("green".into())).unwrap();

        let blue = plan
            .create_operationplan(NewPlan::new(paint_blue, qty(1.0)).ending(day(3)))
            .unwrap();
        plan.activate(blue).unwrap();
        let slot = &plan.operationplan(blue).unwrap().setups()[0];
        assert_eq!(slot.value.rule, Some(1));
        assert_eq!(slot.value.duration, Duration::HOUR);

        let green = plan.create_operationplan(NewPlan::new(op, qty(1.0)).ending(day(6))).unwrap();
        plan.activate(green).unwrap();
        let slot = &plan.operationplan(green).unwrap().setups()[0];
        assert!(slot.value.undefined);
        assert_eq!(slot.value.duration, Duration::days(365));
        assert_eq!(plan.setup_at(res, day(7)), Some("green".into()));

        // Moving green in front of blue: red -> green is undefined, green -> blue too.
        plan.set_end(green, day(2), false).unwrap();
        assert!(plan.operationplan(blue).unwrap().setups()[0].value.undefined);
        assert_eq!(plan.setup_at(res, day(1)), Some("red".into()));
    }

    #[test]
    fn explicit_setup_event_and_rescan() {
        let Line { mut plan, op, .. } = line();
        let mut m = SetupMatrix::new("colors");
        m.add_rule(SetupRule {
            priority: 1,
            from: None,
            to: Some("blue".into()),
            duration: Duration::HOUR,
            cost: 1.0,
        })
        .unwrap();
        let m = plan.add_setup_matrix(m).unwrap();
        let res = plan
            .add_resource("booth", ResourceKind::Default, Target::Fixed(qty(1.0)))
            .unwrap();
        plan.set_resource_setup(res, Some(m), None).unwrap();
        plan.add_load(op, res, qty(1.0), None).unwrap();
        let key = plan.create_operationplan(NewPlan::new(op, qty(1.0)).ending(day(4))).unwrap();
        plan.activate(key).unwrap();
        assert!(plan.operationplan(key).unwrap().setups().is_empty());

        plan.set_setup_event(key, res, Some("blue".into())).unwrap();
        let slot = &plan.operationplan(key).unwrap().setups()[0];
        assert_eq!(slot.value.duration, Duration::HOUR);
        assert_eq!(plan.setup_at(res, day(5)), Some("blue".into()));

        plan.set_setup_event(key, res, Some("red".into())).unwrap();
        assert_eq!(plan.operationplan(key).unwrap().setups().len(), 1);
        plan.scan_setup_times(key).unwrap();
        assert!(plan.operationplan(key).unwrap().setups()[0].value.undefined);
    }

    #[test]
    fn flowplans_and_loadplans_in_timeline_order() {
        let Line { mut plan, op, raw, .. } = line();
        let res = plan
            .add_resource("welder", ResourceKind::Default, Target::Fixed(qty(2.0)))
            .unwrap();
        plan.add_load(op, res, qty(1.0), None).unwrap();
        let late = plan.create_operationplan(NewPlan::new(op, qty(1.0)).ending(day(9))).unwrap();
        plan.activate(late).unwrap();
        let early = plan.create_operationplan(NewPlan::new(op, qty(2.0)).ending(day(3))).unwrap();
        plan.activate(early).unwrap();

        let owners: Vec<OperationPlanKey> = plan
            .flowplans_of(raw)
            .map(|(fp, _)| plan.flowplan(fp).unwrap().operationplan())
            .collect();
        assert_eq!(owners, vec![early, late]);
        let dates: Vec<Date> = plan.loadplans_of(res).map(|(_, e)| e.date()).collect();
        assert_eq!(dates, vec![day(2), day(3), day(8), day(9)]);
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn undefined_changeover_warns_once_per_resource() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let Line { mut plan, op, .. } = line();
            let m = plan.add_setup_matrix(SetupMatrix::new("empty")).unwrap();
            let res = plan
                .add_resource("booth", ResourceKind::Default, Target::Fixed(qty(1.0)))
                .unwrap();
            plan.set_resource_setup(res, Some(m), Some("red".into())).unwrap();
            let blue = plan
                .add_operation("blue", OperationKind::FixedTime { duration: Duration::DAY })
                .unwrap();
            plan.add_load(blue, res, qty(1.0), Some("blue".into())).unwrap();
            plan.add_load(op, res, qty(1.0), Some("green".into())).unwrap();

            let a = plan.create_operationplan(NewPlan::new(op, qty(1.0)).ending(day(3))).unwrap();
            plan.activate(a).unwrap();
            let b = plan.create_operationplan(NewPlan::new(blue, qty(1.0)).ending(day(6))).unwrap();
            plan.activate(b).unwrap();
            assert!(plan.operationplan(b).unwrap().setups()[0].value.undefined);
        });

        let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.matches("no setup rule for changeover").count(), 1);
        assert!(text.contains("booth"));
    }
}
