//! The planning context: owns every entity arena and the lazy caches.
//!
//! # Architecture
//!
//! The `Plan` owns:
//! - Model arenas (items, locations, calendars, buffers, resources,
//!   operations, flows, loads, demands, setup matrices, supply paths)
//! - Plan arenas (operationplans, flowplans, loadplans) and the id index
//! - A structure [`Generation`] with the [`Cached`] level table
//! - The [`ProblemStore`] behind a read-write lock
//!
//! Model edits go through `Plan` methods so that the generation is bumped
//! and the affected entities are marked changed for problem detection.
//! Operationplan behaviour lives in [`crate::operationplan`],
//! [`crate::params`] and [`crate::flowplan`] as further `impl Plan` blocks.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use slotmap::SlotMap;
use tracing::debug;

use crate::buffer::Buffer;
use crate::cache::{Cached, Generation};
use crate::calendar::{Calendar, Target};
use crate::config::PlanConfig;
use crate::demand::Demand;
use crate::error::{PlanError, PlanResult};
use crate::fixed::Quantity;
use crate::flow::{Flow, FlowKind, Load};
use crate::flowplan::{FlowPlan, LoadPlan};
use crate::id::*;
use crate::item::{Item, ItemDistribution, ItemSupplier, SupplyTerms};
use crate::level::LevelTable;
use crate::location::Location;
use crate::operation::{Operation, OperationKind, SizeRules, SubOperation};
use crate::operationplan::OperationPlan;
use crate::problem::{ChangeKey, ProblemStore};
use crate::resource::{Resource, ResourceKind};
use crate::setup::SetupMatrix;
use crate::time::{Date, DateRange, Duration};

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Plan {
    pub config: PlanConfig,

    // -- Model --
    pub(crate) items: SlotMap<ItemId, Item>,
    pub(crate) locations: SlotMap<LocationId, Location>,
    pub(crate) calendars: SlotMap<CalendarId, Calendar>,
    pub(crate) buffers: SlotMap<BufferId, Buffer>,
    pub(crate) resources: SlotMap<ResourceId, Resource>,
    pub(crate) operations: SlotMap<OperationId, Operation>,
    pub(crate) flows: SlotMap<FlowId, Flow>,
    pub(crate) loads: SlotMap<LoadId, Load>,
    pub(crate) demands: SlotMap<DemandId, Demand>,
    pub(crate) setup_matrices: SlotMap<SetupMatrixId, SetupMatrix>,
    pub(crate) suppliers: SlotMap<SupplierId, ItemSupplier>,
    pub(crate) distributions: SlotMap<DistributionId, ItemDistribution>,
    names: Names,
    delivery_operations: BTreeMap<BufferId, OperationId>,

    // -- Plan --
    pub(crate) operationplans: SlotMap<OperationPlanKey, OperationPlan>,
    pub(crate) flowplans: SlotMap<FlowPlanId, FlowPlan>,
    pub(crate) loadplans: SlotMap<LoadPlanId, LoadPlan>,
    pub(crate) ids: BTreeMap<OperationPlanId, OperationPlanKey>,
    pub(crate) next_id: u64,

    // -- Lazy state --
    pub(crate) generation: Generation,
    pub(crate) levels: Cached<LevelTable>,
    pub(crate) problems: RwLock<ProblemStore>,
}

#[derive(Debug, Default)]
struct Names {
    items: BTreeMap<String, ItemId>,
    locations: BTreeMap<String, LocationId>,
    calendars: BTreeMap<String, CalendarId>,
    buffers: BTreeMap<String, BufferId>,
    resources: BTreeMap<String, ResourceId>,
    operations: BTreeMap<String, OperationId>,
    demands: BTreeMap<String, DemandId>,
    setup_matrices: BTreeMap<String, SetupMatrixId>,
}

fn claim<K: Copy>(map: &mut BTreeMap<String, K>, what: &str, name: &str, key: K) -> PlanResult<()> {
    if name.is_empty() {
        return Err(PlanError::data(format!("{what} name must not be empty")));
    }
    if map.contains_key(name) {
        return Err(PlanError::data(format!("duplicate {what} name '{name}'")));
    }
    map.insert(name.to_string(), key);
    Ok(())
}

/// First of `base`, `base #2`, `base #3`... not yet in `map`.
fn unique_name<K>(map: &BTreeMap<String, K>, base: String) -> String {
    if !map.contains_key(&base) {
        return base;
    }
    (2..)
        .map(|n| format!("{base} #{n}"))
        .find(|candidate| !map.contains_key(candidate))
        .unwrap_or(base)
}

impl Default for Plan {
    fn default() -> Self {
        Self::new(PlanConfig::default())
    }
}

impl Plan {
    pub fn new(config: PlanConfig) -> Self {
        Self {
            config,
            items: SlotMap::with_key(),
            locations: SlotMap::with_key(),
            calendars: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            resources: SlotMap::with_key(),
            operations: SlotMap::with_key(),
            flows: SlotMap::with_key(),
            loads: SlotMap::with_key(),
            demands: SlotMap::with_key(),
            setup_matrices: SlotMap::with_key(),
            suppliers: SlotMap::with_key(),
            distributions: SlotMap::with_key(),
            names: Names::default(),
            delivery_operations: BTreeMap::new(),
            operationplans: SlotMap::with_key(),
            flowplans: SlotMap::with_key(),
            loadplans: SlotMap::with_key(),
            ids: BTreeMap::new(),
            next_id: 1,
            generation: Generation::new(),
            levels: Cached::new(),
            problems: RwLock::new(ProblemStore::new()),
        }
    }

    /// The plan's "now".
    pub fn current(&self) -> Date {
        self.config.current
    }

    /// Move the plan's "now". Every operation is re-checked for problems.
    pub fn set_current(&mut self, current: Date) {
        self.config.current = current;
        let ops: Vec<OperationId> = self.operations.keys().collect();
        for op in ops {
            self.mark_changed(ChangeKey::Operation(op));
        }
    }

    // -- change tracking ---------------------------------------------------

    /// Record a structural edit; levels and clusters become stale.
    pub(crate) fn structure_changed(&mut self) {
        self.generation.bump();
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub(crate) fn mark_changed(&mut self, key: ChangeKey) {
        self.problem_store_mut().changed.mark(key);
    }

    pub(crate) fn problem_store_mut(&mut self) -> &mut ProblemStore {
        self.problems.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn detect_default(&self) -> bool {
        self.config.problems.detect_by_default
    }

    // -- items, locations, calendars ----------------------------------------

    pub fn add_item(&mut self, name: &str) -> PlanResult<ItemId> {
        let id = self.items.insert(Item::new(name.to_string()));
        if let Err(e) = claim(&mut self.names.items, "item", name, id) {
            self.items.remove(id);
            return Err(e);
        }
        Ok(id)
    }

    pub fn add_location(&mut self, name: &str) -> PlanResult<LocationId> {
        let id = self.locations.insert(Location::new(name.to_string()));
        if let Err(e) = claim(&mut self.names.locations, "location", name, id) {
            self.locations.remove(id);
            return Err(e);
        }
        Ok(id)
    }

    pub fn add_calendar(&mut self, calendar: Calendar) -> PlanResult<CalendarId> {
        let name = calendar.name.clone();
        let id = self.calendars.insert(calendar);
        if let Err(e) = claim(&mut self.names.calendars, "calendar", &name, id) {
            self.calendars.remove(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Set the working-time calendar of a location.
    pub fn set_location_calendar(
        &mut self,
        location: LocationId,
        calendar: Option<CalendarId>,
    ) -> PlanResult<()> {
        if let Some(c) = calendar {
            self.calendar_checked(c)?;
        }
        self.location_checked_mut(location)?.available = calendar;
        Ok(())
    }

    pub fn set_item_delivery_operation(
        &mut self,
        item: ItemId,
        operation: Option<OperationId>,
    ) -> PlanResult<()> {
        if let Some(op) = operation {
            self.operation_checked(op)?;
        }
        self.item_checked_mut(item)?.delivery_operation = operation;
        Ok(())
    }

    // -- buffers -------------------------------------------------------------

    pub fn add_buffer(&mut self, item: ItemId, location: LocationId) -> PlanResult<BufferId> {
        if self.buffer_of(item, location).is_some() {
            return Err(PlanError::data(format!(
                "item '{}' already has a buffer at '{}'",
                self.item_checked(item)?.name,
                self.location_checked(location)?.name
            )));
        }
        let name = format!(
            "{} @ {}",
            self.item_checked(item)?.name,
            self.location_checked(location)?.name
        );
        let detect = self.detect_default();
        let id = self.buffers.insert(Buffer::new(name.clone(), item, location, detect));
        if let Err(e) = claim(&mut self.names.buffers, "buffer", &name, id) {
            self.buffers.remove(id);
            return Err(e);
        }
        self.items[item].buffers.push(id);
        self.locations[location].buffers.push(id);
        self.structure_changed();
        self.mark_changed(ChangeKey::Buffer(id));
        Ok(id)
    }

    /// The buffer holding `item` at `location`.
    pub fn buffer_of(&self, item: ItemId, location: LocationId) -> Option<BufferId> {
        self.items
            .get(item)?
            .buffers
            .iter()
            .copied()
            .find(|&b| self.buffers[b].location == location)
    }

    pub fn set_buffer_minimum(&mut self, buffer: BufferId, minimum: Target) -> PlanResult<()> {
        self.check_target(minimum)?;
        self.buffer_checked_mut(buffer)?.minimum = minimum;
        self.refresh_buffer_targets(buffer);
        Ok(())
    }

    pub fn set_buffer_maximum(&mut self, buffer: BufferId, maximum: Option<Target>) -> PlanResult<()> {
        if let Some(t) = maximum {
            self.check_target(t)?;
        }
        self.buffer_checked_mut(buffer)?.maximum = maximum;
        self.refresh_buffer_targets(buffer);
        Ok(())
    }

    /// Explicit replenishing operation of a buffer.
    pub fn set_producing_operation(
        &mut self,
        buffer: BufferId,
        operation: Option<OperationId>,
    ) -> PlanResult<()> {
        if let Some(op) = operation {
            self.operation_checked(op)?;
        }
        self.buffer_checked_mut(buffer)?.producing = operation;
        self.structure_changed();
        Ok(())
    }

    /// Explicit replenishing operation, or the one built from the item's
    /// suppliers and distributions.
    pub fn producing_operation(&self, buffer: BufferId) -> Option<OperationId> {
        let b = self.buffers.get(buffer)?;
        b.producing.or(b.generated_producing)
    }

    /// Set the initial on-hand of a buffer, realised by a confirmed plan of
    /// a generated inventory operation at the start of the horizon.
    pub fn set_onhand(&mut self, buffer: BufferId, onhand: Quantity) -> PlanResult<()> {
        if onhand < Quantity::ZERO {
            return Err(PlanError::data(format!(
                "negative on-hand for buffer '{}'",
                self.buffer_checked(buffer)?.name
            )));
        }
        let existing = self.buffer_checked(buffer)?.inventory;
        let op = match existing {
            Some(op) => op,
            None => {
                let name = unique_name(
                    &self.names.operations,
                    format!("Inventory {}", self.buffers[buffer].name),
                );
                let op = self.add_operation(&name, OperationKind::Inventory { buffer })?;
                self.add_flow(op, buffer, Quantity::ONE, FlowKind::End)?;
                self.buffers[buffer].inventory = Some(op);
                op
            }
        };
        self.buffers[buffer].onhand = onhand;
        // One plan carries the whole on-hand.
        let plans: Vec<OperationPlanKey> = self.operationplans_of(op).collect();
        for key in plans {
            self.delete_operationplan(key)?;
        }
        if onhand > Quantity::ZERO {
            let key = self.create_operationplan(
                crate::operationplan::NewPlan::new(op, onhand)
                    .starting(Date::INFINITE_PAST)
                    .ending(Date::INFINITE_PAST)
                    .status(crate::operationplan::PlanStatus::Confirmed),
            )?;
            self.activate(key)?;
        }
        self.mark_changed(ChangeKey::Buffer(buffer));
        Ok(())
    }

    // -- resources -----------------------------------------------------------

    pub fn add_resource(
        &mut self,
        name: &str,
        kind: ResourceKind,
        maximum: Target,
    ) -> PlanResult<ResourceId> {
        self.check_target(maximum)?;
        if kind == ResourceKind::Buckets && !matches!(maximum, Target::Calendar(_)) {
            return Err(PlanError::data(format!(
                "bucketized resource '{name}' needs a capacity calendar"
            )));
        }
        let detect = self.detect_default();
        let id = self.resources.insert(Resource::new(name.to_string(), kind, maximum, detect));
        if let Err(e) = claim(&mut self.names.resources, "resource", name, id) {
            self.resources.remove(id);
            return Err(e);
        }
        self.refresh_resource_targets(id);
        self.structure_changed();
        Ok(id)
    }

    pub fn set_resource_maximum(&mut self, resource: ResourceId, maximum: Target) -> PlanResult<()> {
        self.check_target(maximum)?;
        let r = self.resource_checked_mut(resource)?;
        if r.kind == ResourceKind::Buckets && !matches!(maximum, Target::Calendar(_)) {
            return Err(PlanError::data(format!(
                "bucketized resource '{}' needs a capacity calendar",
                r.name
            )));
        }
        r.maximum = maximum;
        self.refresh_resource_targets(resource);
        Ok(())
    }

    pub fn set_resource_minimum(&mut self, resource: ResourceId, minimum: Quantity) -> PlanResult<()> {
        if minimum < Quantity::ZERO {
            return Err(PlanError::data("resource minimum must not be negative"));
        }
        self.resource_checked_mut(resource)?.minimum = minimum;
        self.refresh_resource_targets(resource);
        Ok(())
    }

    pub fn set_resource_location(
        &mut self,
        resource: ResourceId,
        location: Option<LocationId>,
    ) -> PlanResult<()> {
        if let Some(l) = location {
            self.location_checked(l)?;
        }
        self.resource_checked_mut(resource)?.location = location;
        Ok(())
    }

    pub fn add_setup_matrix(&mut self, matrix: SetupMatrix) -> PlanResult<SetupMatrixId> {
        let name = matrix.name.clone();
        let id = self.setup_matrices.insert(matrix);
        if let Err(e) = claim(&mut self.names.setup_matrices, "setup matrix", &name, id) {
            self.setup_matrices.remove(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Attach a setup matrix and the setup the resource starts in.
    pub fn set_resource_setup(
        &mut self,
        resource: ResourceId,
        matrix: Option<SetupMatrixId>,
        initial_setup: Option<String>,
    ) -> PlanResult<()> {
        if let Some(m) = matrix {
            if !self.setup_matrices.contains_key(m) {
                return Err(PlanError::logic("unknown setup matrix"));
            }
        }
        let r = self.resource_checked_mut(resource)?;
        r.setup_matrix = matrix;
        r.initial_setup = initial_setup;
        r.setup_warned = false;
        self.refresh_resource_setups(resource);
        Ok(())
    }

    // -- operations ----------------------------------------------------------

    pub fn add_operation(&mut self, name: &str, kind: OperationKind) -> PlanResult<OperationId> {
        match &kind {
            OperationKind::FixedTime { duration } if duration.is_negative() => {
                return Err(PlanError::data(format!("operation '{name}' has a negative duration")));
            }
            OperationKind::TimePer { duration, duration_per }
                if duration.is_negative() || duration_per.is_negative() =>
            {
                return Err(PlanError::data(format!("operation '{name}' has a negative duration")));
            }
            _ => {}
        }
        let detect = self.detect_default();
        let id = self.operations.insert(Operation::new(name.to_string(), kind, detect));
        if let Err(e) = claim(&mut self.names.operations, "operation", name, id) {
            self.operations.remove(id);
            return Err(e);
        }
        self.structure_changed();
        Ok(id)
    }

    pub fn set_operation_size(&mut self, operation: OperationId, size: SizeRules) -> PlanResult<()> {
        if size.minimum < Quantity::ZERO || size.multiple < Quantity::ZERO {
            return Err(PlanError::data("size minimum and multiple must not be negative"));
        }
        if size.maximum < size.minimum {
            return Err(PlanError::data("size maximum must not be below the minimum"));
        }
        if let Some(c) = size.minimum_calendar {
            self.calendar_checked(c)?;
        }
        self.operation_checked_mut(operation)?.size = size;
        Ok(())
    }

    pub fn set_operation_fence(&mut self, operation: OperationId, fence: Duration) -> PlanResult<()> {
        if fence.is_negative() {
            return Err(PlanError::data("fence must not be negative"));
        }
        self.operation_checked_mut(operation)?.fence = fence;
        self.mark_changed(ChangeKey::Operation(operation));
        Ok(())
    }

    pub fn set_operation_location(
        &mut self,
        operation: OperationId,
        location: Option<LocationId>,
    ) -> PlanResult<()> {
        if let Some(l) = location {
            self.location_checked(l)?;
        }
        self.operation_checked_mut(operation)?.location = location;
        Ok(())
    }

    /// Add a child to a routing, alternate or split operation.
    pub fn add_sub_operation(
        &mut self,
        parent: OperationId,
        child: OperationId,
        priority: i32,
        effective: DateRange,
    ) -> PlanResult<()> {
        self.operation_checked(child)?;
        if parent == child {
            return Err(PlanError::data("an operation cannot be its own sub-operation"));
        }
        let p = self.operation_checked(parent)?;
        if !p.kind.is_composite() {
            return Err(PlanError::data(format!(
                "operation '{}' of kind {} cannot have sub-operations",
                p.name,
                p.kind.label()
            )));
        }
        if p.sub_operations.iter().any(|s| s.operation == child) {
            return Err(PlanError::data(format!(
                "'{}' is already a sub-operation of '{}'",
                self.operations[child].name, p.name
            )));
        }
        if priority < 0 {
            return Err(PlanError::data("sub-operation priority must not be negative"));
        }
        let subs = &mut self.operations[parent].sub_operations;
        let pos = subs.partition_point(|s| s.priority <= priority);
        subs.insert(pos, SubOperation { operation: child, priority, effective });
        self.operations[child].super_operations.push(parent);
        self.structure_changed();
        Ok(())
    }

    pub fn remove_sub_operation(&mut self, parent: OperationId, child: OperationId) -> PlanResult<()> {
        let subs = &mut self.operation_checked_mut(parent)?.sub_operations;
        let before = subs.len();
        subs.retain(|s| s.operation != child);
        if subs.len() == before {
            return Err(PlanError::logic("not a sub-operation"));
        }
        if let Some(c) = self.operations.get_mut(child) {
            c.super_operations.retain(|&p| p != parent);
        }
        self.structure_changed();
        Ok(())
    }

    // -- flows and loads -----------------------------------------------------

    pub fn add_flow(
        &mut self,
        operation: OperationId,
        buffer: BufferId,
        quantity: Quantity,
        kind: FlowKind,
    ) -> PlanResult<FlowId> {
        self.add_flow_with(Flow {
            operation,
            buffer,
            quantity,
            kind,
            effective: DateRange::unbounded(),
        })
    }

    pub fn add_flow_with(&mut self, flow: Flow) -> PlanResult<FlowId> {
        self.operation_checked(flow.operation)?;
        self.buffer_checked(flow.buffer)?;
        if flow.quantity == Quantity::ZERO {
            return Err(PlanError::data("flow quantity must not be zero"));
        }
        let (op, buffer) = (flow.operation, flow.buffer);
        let id = self.flows.insert(flow);
        self.operations[op].flows.push(id);
        self.buffers[buffer].flows.push(id);
        self.structure_changed();
        self.regenerate_flow_loads_of(op)?;
        Ok(id)
    }

    pub fn remove_flow(&mut self, flow: FlowId) -> PlanResult<()> {
        let f = self.flows.get(flow).ok_or_else(|| PlanError::logic("unknown flow"))?;
        let (op, buffer) = (f.operation, f.buffer);
        self.operations[op].flows.retain(|&x| x != flow);
        self.buffers[buffer].flows.retain(|&x| x != flow);
        self.regenerate_flow_loads_of(op)?;
        self.flows.remove(flow);
        self.structure_changed();
        self.mark_changed(ChangeKey::Buffer(buffer));
        Ok(())
    }

    pub fn add_load(
        &mut self,
        operation: OperationId,
        resource: ResourceId,
        quantity: Quantity,
        setup: Option<String>,
    ) -> PlanResult<LoadId> {
        self.operation_checked(operation)?;
        self.resource_checked(resource)?;
        if quantity < Quantity::ZERO {
            return Err(PlanError::data("load quantity must not be negative"));
        }
        let id = self.loads.insert(Load {
            operation,
            resource,
            quantity,
            setup,
            effective: DateRange::unbounded(),
        });
        self.operations[operation].loads.push(id);
        self.resources[resource].loads.push(id);
        self.structure_changed();
        self.regenerate_flow_loads_of(operation)?;
        Ok(id)
    }

    pub fn remove_load(&mut self, load: LoadId) -> PlanResult<()> {
        let l = self.loads.get(load).ok_or_else(|| PlanError::logic("unknown load"))?;
        let (op, resource) = (l.operation, l.resource);
        self.operations[op].loads.retain(|&x| x != load);
        self.resources[resource].loads.retain(|&x| x != load);
        self.regenerate_flow_loads_of(op)?;
        self.loads.remove(load);
        self.structure_changed();
        self.mark_changed(ChangeKey::Resource(resource));
        Ok(())
    }

    // -- supply paths --------------------------------------------------------

    /// Register a supplier for an item at a location. A purchase operation
    /// producing into the item's buffer there is generated.
    pub fn add_item_supplier(
        &mut self,
        item: ItemId,
        supplier: &str,
        location: LocationId,
        terms: SupplyTerms,
    ) -> PlanResult<SupplierId> {
        self.check_terms(&terms)?;
        let buffer = match self.buffer_of(item, location) {
            Some(b) => b,
            None => self.add_buffer(item, location)?,
        };
        let id = self.suppliers.insert(ItemSupplier {
            supplier: supplier.to_string(),
            item,
            location,
            terms: terms.clone(),
            operation: None,
        });
        let name = unique_name(
            &self.names.operations,
            format!("Purchase {} from {supplier}", self.buffers[buffer].name),
        );
        let op = self.add_operation(
            &name,
            OperationKind::Purchase { supplier: id, lead_time: terms.lead_time },
        )?;
        self.apply_terms(op, &terms);
        self.operations[op].location = Some(location);
        self.add_flow(op, buffer, Quantity::ONE, FlowKind::End)?;
        self.suppliers[id].operation = Some(op);
        self.items[item].suppliers.push(id);
        self.refresh_replenishment(buffer)?;
        Ok(id)
    }

    /// Register a transfer path of an item between two locations.
    pub fn add_item_distribution(
        &mut self,
        item: ItemId,
        origin: LocationId,
        destination: LocationId,
        terms: SupplyTerms,
    ) -> PlanResult<DistributionId> {
        self.check_terms(&terms)?;
        if origin == destination {
            return Err(PlanError::data("distribution origin and destination must differ"));
        }
        let from = match self.buffer_of(item, origin) {
            Some(b) => b,
            None => self.add_buffer(item, origin)?,
        };
        let to = match self.buffer_of(item, destination) {
            Some(b) => b,
            None => self.add_buffer(item, destination)?,
        };
        let id = self.distributions.insert(ItemDistribution {
            item,
            origin,
            destination,
            terms: terms.clone(),
            operation: None,
        });
        let name = unique_name(
            &self.names.operations,
            format!(
                "Ship {} from {} to {}",
                self.items[item].name,
                self.locations[origin].name,
                self.locations[destination].name
            ),
        );
        let op = self.add_operation(
            &name,
            OperationKind::Distribution { distribution: id, lead_time: terms.lead_time },
        )?;
        self.apply_terms(op, &terms);
        self.operations[op].location = Some(destination);
        self.add_flow(op, from, -Quantity::ONE, FlowKind::Start)?;
        self.add_flow(op, to, Quantity::ONE, FlowKind::End)?;
        self.distributions[id].operation = Some(op);
        self.items[item].distributions.push(id);
        self.refresh_replenishment(to)?;
        Ok(id)
    }

    fn apply_terms(&mut self, op: OperationId, terms: &SupplyTerms) {
        let o = &mut self.operations[op];
        o.size.minimum = terms.size_minimum;
        o.size.multiple = terms.size_multiple;
    }

    fn check_terms(&self, terms: &SupplyTerms) -> PlanResult<()> {
        if terms.lead_time.is_negative() {
            return Err(PlanError::data("lead time must not be negative"));
        }
        if terms.size_minimum < Quantity::ZERO || terms.size_multiple < Quantity::ZERO {
            return Err(PlanError::data("size minimum and multiple must not be negative"));
        }
        Ok(())
    }

    /// Rebuild the generated replenishment of a buffer from the supply
    /// paths ending in it: the single path's operation, or an alternate
    /// over all enabled paths by priority.
    fn refresh_replenishment(&mut self, buffer: BufferId) -> PlanResult<()> {
        let b = &self.buffers[buffer];
        let (item, location) = (b.item, b.location);
        let mut paths: Vec<(i32, OperationId, DateRange)> = Vec::new();
        for &s in &self.items[item].suppliers {
            let sup = &self.suppliers[s];
            if sup.location == location && sup.terms.priority > 0 {
                if let Some(op) = sup.operation {
                    paths.push((sup.terms.priority, op, sup.terms.effective));
                }
            }
        }
        for &d in &self.items[item].distributions {
            let dist = &self.distributions[d];
            if dist.destination == location && dist.terms.priority > 0 {
                if let Some(op) = dist.operation {
                    paths.push((dist.terms.priority, op, dist.terms.effective));
                }
            }
        }
        paths.sort_by_key(|&(prio, _, _)| prio);

        let generated = match paths.as_slice() {
            [] => None,
            [(_, op, _)] => Some(*op),
            _ => {
                let existing = self.buffers[buffer]
                    .generated_producing
                    .filter(|&op| self.operations[op].kind == OperationKind::Alternate);
                let alt = match existing {
                    Some(op) => {
                        for s in self.operations[op].sub_operations.clone() {
                            self.remove_sub_operation(op, s.operation)?;
                        }
                        op
                    }
                    None => {
                        let name = unique_name(
                            &self.names.operations,
                            format!("Replenish {}", self.buffers[buffer].name),
                        );
                        self.add_operation(&name, OperationKind::Alternate)?
                    }
                };
                for (prio, op, effective) in paths {
                    self.add_sub_operation(alt, op, prio, effective)?;
                }
                Some(alt)
            }
        };
        debug!(buffer = %self.buffers[buffer].name, replenishment = ?generated, "supply paths refreshed");
        self.buffers[buffer].generated_producing = generated;
        self.structure_changed();
        Ok(())
    }

    // -- demands -------------------------------------------------------------

    pub fn add_demand(
        &mut self,
        name: &str,
        item: ItemId,
        quantity: Quantity,
        due: Date,
    ) -> PlanResult<DemandId> {
        self.item_checked(item)?;
        if quantity < Quantity::ZERO {
            return Err(PlanError::data(format!("demand '{name}' has a negative quantity")));
        }
        let detect = self.detect_default();
        let id = self.demands.insert(Demand::new(name.to_string(), item, quantity, due, detect));
        if let Err(e) = claim(&mut self.names.demands, "demand", name, id) {
            self.demands.remove(id);
            return Err(e);
        }
        self.items[item].demands.push(id);
        self.mark_changed(ChangeKey::Demand(id));
        Ok(id)
    }

    pub fn set_demand_quantity(&mut self, demand: DemandId, quantity: Quantity) -> PlanResult<()> {
        if quantity < Quantity::ZERO {
            return Err(PlanError::data("demand quantity must not be negative"));
        }
        self.demand_checked_mut(demand)?.quantity = quantity;
        self.mark_changed(ChangeKey::Demand(demand));
        Ok(())
    }

    pub fn set_demand_due(&mut self, demand: DemandId, due: Date) -> PlanResult<()> {
        self.demand_checked_mut(demand)?.due = due;
        self.mark_changed(ChangeKey::Demand(demand));
        Ok(())
    }

    pub fn set_demand_priority(&mut self, demand: DemandId, priority: i32) -> PlanResult<()> {
        self.demand_checked_mut(demand)?.priority = priority;
        Ok(())
    }

    pub fn set_demand_location(
        &mut self,
        demand: DemandId,
        location: Option<LocationId>,
    ) -> PlanResult<()> {
        if let Some(l) = location {
            self.location_checked(l)?;
        }
        self.demand_checked_mut(demand)?.location = location;
        Ok(())
    }

    pub fn set_demand_operation(
        &mut self,
        demand: DemandId,
        operation: Option<OperationId>,
    ) -> PlanResult<()> {
        if let Some(op) = operation {
            self.operation_checked(op)?;
        }
        self.demand_checked_mut(demand)?.operation = operation;
        self.structure_changed();
        Ok(())
    }

    /// Delivery operation of a demand without generating one: the explicit
    /// operation, the item default, or an already generated delivery.
    pub fn delivery_operation(&self, demand: DemandId) -> Option<OperationId> {
        let d = self.demands.get(demand)?;
        d.operation
            .or(self.items[d.item].delivery_operation)
            .or_else(|| {
                let buffer = self.delivery_buffer(demand)?;
                self.delivery_operations.get(&buffer).copied()
            })
    }

    /// Like [`delivery_operation`](Self::delivery_operation), generating a
    /// delivery operation from the demand's buffer when needed. Returns
    /// `None` when no buffer can be determined.
    pub fn resolve_delivery_operation(&mut self, demand: DemandId) -> PlanResult<Option<OperationId>> {
        self.demand_checked(demand)?;
        if let Some(op) = self.delivery_operation(demand) {
            return Ok(Some(op));
        }
        let Some(buffer) = self.delivery_buffer(demand) else {
            return Ok(None);
        };
        let name = unique_name(
            &self.names.operations,
            format!("Deliver {}", self.buffers[buffer].name),
        );
        let op = self.add_operation(&name, OperationKind::Delivery { buffer })?;
        self.operations[op].location = Some(self.buffers[buffer].location);
        self.operations[op].item = Some(self.buffers[buffer].item);
        self.add_flow(op, buffer, -Quantity::ONE, FlowKind::Start)?;
        self.delivery_operations.insert(buffer, op);
        Ok(Some(op))
    }

    /// Buffer a demand ships from: the item's buffer at the demand location,
    /// or the item's only buffer when no location is given.
    fn delivery_buffer(&self, demand: DemandId) -> Option<BufferId> {
        let d = self.demands.get(demand)?;
        match d.location {
            Some(loc) => self.buffer_of(d.item, loc),
            None => match self.items[d.item].buffers.as_slice() {
                [only] => Some(*only),
                _ => None,
            },
        }
    }

    // -- problem detection switches -----------------------------------------

    pub fn set_demand_detect_problems(&mut self, demand: DemandId, on: bool) -> PlanResult<()> {
        self.demand_checked_mut(demand)?.detect_problems = on;
        self.mark_changed(ChangeKey::Demand(demand));
        Ok(())
    }

    pub fn set_buffer_detect_problems(&mut self, buffer: BufferId, on: bool) -> PlanResult<()> {
        self.buffer_checked_mut(buffer)?.detect_problems = on;
        self.mark_changed(ChangeKey::Buffer(buffer));
        Ok(())
    }

    pub fn set_resource_detect_problems(&mut self, resource: ResourceId, on: bool) -> PlanResult<()> {
        self.resource_checked_mut(resource)?.detect_problems = on;
        self.mark_changed(ChangeKey::Resource(resource));
        Ok(())
    }

    pub fn set_operation_detect_problems(&mut self, operation: OperationId, on: bool) -> PlanResult<()> {
        self.operation_checked_mut(operation)?.detect_problems = on;
        self.mark_changed(ChangeKey::Operation(operation));
        Ok(())
    }

    // -- lookups -------------------------------------------------------------

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn location(&self, id: LocationId) -> Option<&Location> {
        self.locations.get(id)
    }

    pub fn calendar(&self, id: CalendarId) -> Option<&Calendar> {
        self.calendars.get(id)
    }

    pub fn buffer(&self, id: BufferId) -> Option<&Buffer> {
        self.buffers.get(id)
    }

    pub fn resource(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn operation(&self, id: OperationId) -> Option<&Operation> {
        self.operations.get(id)
    }

    pub fn flow(&self, id: FlowId) -> Option<&Flow> {
        self.flows.get(id)
    }

    pub fn load(&self, id: LoadId) -> Option<&Load> {
        self.loads.get(id)
    }

    pub fn demand(&self, id: DemandId) -> Option<&Demand> {
        self.demands.get(id)
    }

    /// Mutable access to a demand's solver constraint list.
    pub fn demand_constraints_mut(
        &mut self,
        id: DemandId,
    ) -> Option<&mut crate::problem::ProblemList> {
        self.demands.get_mut(id).map(|d| &mut d.constraints)
    }

    pub fn setup_matrix(&self, id: SetupMatrixId) -> Option<&SetupMatrix> {
        self.setup_matrices.get(id)
    }

    pub fn supplier(&self, id: SupplierId) -> Option<&ItemSupplier> {
        self.suppliers.get(id)
    }

    pub fn distribution(&self, id: DistributionId) -> Option<&ItemDistribution> {
        self.distributions.get(id)
    }

    pub fn item_by_name(&self, name: &str) -> Option<ItemId> {
        self.names.items.get(name).copied()
    }

    pub fn location_by_name(&self, name: &str) -> Option<LocationId> {
        self.names.locations.get(name).copied()
    }

    pub fn calendar_by_name(&self, name: &str) -> Option<CalendarId> {
        self.names.calendars.get(name).copied()
    }

    pub fn buffer_by_name(&self, name: &str) -> Option<BufferId> {
        self.names.buffers.get(name).copied()
    }

    pub fn resource_by_name(&self, name: &str) -> Option<ResourceId> {
        self.names.resources.get(name).copied()
    }

    pub fn operation_by_name(&self, name: &str) -> Option<OperationId> {
        self.names.operations.get(name).copied()
    }

    pub fn demand_by_name(&self, name: &str) -> Option<DemandId> {
        self.names.demands.get(name).copied()
    }

    pub fn items(&self) -> impl Iterator<Item = (ItemId, &Item)> {
        self.items.iter()
    }

    pub fn buffers(&self) -> impl Iterator<Item = (BufferId, &Buffer)> {
        self.buffers.iter()
    }

    pub fn resources(&self) -> impl Iterator<Item = (ResourceId, &Resource)> {
        self.resources.iter()
    }

    pub fn operations(&self) -> impl Iterator<Item = (OperationId, &Operation)> {
        self.operations.iter()
    }

    pub fn demands(&self) -> impl Iterator<Item = (DemandId, &Demand)> {
        self.demands.iter()
    }

    // -- checked accessors ---------------------------------------------------

    pub(crate) fn item_checked(&self, id: ItemId) -> PlanResult<&Item> {
        self.items.get(id).ok_or_else(|| PlanError::logic("unknown item"))
    }

    fn item_checked_mut(&mut self, id: ItemId) -> PlanResult<&mut Item> {
        self.items.get_mut(id).ok_or_else(|| PlanError::logic("unknown item"))
    }

    pub(crate) fn location_checked(&self, id: LocationId) -> PlanResult<&Location> {
        self.locations.get(id).ok_or_else(|| PlanError::logic("unknown location"))
    }

    fn location_checked_mut(&mut self, id: LocationId) -> PlanResult<&mut Location> {
        self.locations.get_mut(id).ok_or_else(|| PlanError::logic("unknown location"))
    }

    pub(crate) fn calendar_checked(&self, id: CalendarId) -> PlanResult<&Calendar> {
        self.calendars.get(id).ok_or_else(|| PlanError::logic("unknown calendar"))
    }

    pub(crate) fn buffer_checked(&self, id: BufferId) -> PlanResult<&Buffer> {
        self.buffers.get(id).ok_or_else(|| PlanError::logic("unknown buffer"))
    }

    fn buffer_checked_mut(&mut self, id: BufferId) -> PlanResult<&mut Buffer> {
        self.buffers.get_mut(id).ok_or_else(|| PlanError::logic("unknown buffer"))
    }

    pub(crate) fn resource_checked(&self, id: ResourceId) -> PlanResult<&Resource> {
        self.resources.get(id).ok_or_else(|| PlanError::logic("unknown resource"))
    }

    fn resource_checked_mut(&mut self, id: ResourceId) -> PlanResult<&mut Resource> {
        self.resources.get_mut(id).ok_or_else(|| PlanError::logic("unknown resource"))
    }

    pub(crate) fn operation_checked(&self, id: OperationId) -> PlanResult<&Operation> {
        self.operations.get(id).ok_or_else(|| PlanError::logic("unknown operation"))
    }

    fn operation_checked_mut(&mut self, id: OperationId) -> PlanResult<&mut Operation> {
        self.operations.get_mut(id).ok_or_else(|| PlanError::logic("unknown operation"))
    }

    pub(crate) fn demand_checked(&self, id: DemandId) -> PlanResult<&Demand> {
        self.demands.get(id).ok_or_else(|| PlanError::logic("unknown demand"))
    }

    fn demand_checked_mut(&mut self, id: DemandId) -> PlanResult<&mut Demand> {
        self.demands.get_mut(id).ok_or_else(|| PlanError::logic("unknown demand"))
    }

    fn check_target(&self, target: Target) -> PlanResult<()> {
        match target {
            Target::Fixed(q) if q < Quantity::ZERO => {
                Err(PlanError::data("target level must not be negative"))
            }
            Target::Calendar(c) => self.calendar_checked(c).map(|_| ()),
            Target::Fixed(_) => Ok(()),
        }
    }
}
