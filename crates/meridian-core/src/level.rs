//! Levels and clusters of the operation-buffer-resource network.
//!
//! The level of an entity is its depth below the operations that deliver
//! finished goods: such an operation has level 0, the operations producing
//! what it consumes level 1, and so on. Clusters are the connected
//! components of the network; entities in different clusters never
//! interact during planning.
//!
//! Both are computed for the whole graph at once, lazily, the first time
//! they are queried after a structural edit. The result is cached against
//! the plan's structure generation.

use slotmap::SecondaryMap;
use tracing::{debug, info};

use crate::error::{PlanError, PlanResult};
use crate::id::{BufferId, OperationId, ResourceId};
use crate::plan::Plan;

/// An entity carrying a level and a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Node {
    Operation(OperationId),
    Buffer(BufferId),
    Resource(ResourceId),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Leveled {
    /// -1 until reached by the level search.
    pub level: i32,
    /// 0 means unassigned; dangling operations stay there.
    pub cluster: u16,
}

impl Leveled {
    const UNSET: Leveled = Leveled { level: -1, cluster: 0 };
}

/// Levels and clusters of every operation, buffer and resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelTable {
    operations: SecondaryMap<OperationId, Leveled>,
    buffers: SecondaryMap<BufferId, Leveled>,
    resources: SecondaryMap<ResourceId, Leveled>,
    clusters: u16,
}

impl LevelTable {
    pub fn get(&self, node: Node) -> Option<Leveled> {
        match node {
            Node::Operation(id) => self.operations.get(id).copied(),
            Node::Buffer(id) => self.buffers.get(id).copied(),
            Node::Resource(id) => self.resources.get(id).copied(),
        }
    }

    /// Highest cluster number handed out.
    pub fn cluster_count(&self) -> u16 {
        self.clusters
    }

    /// Members of one cluster.
    pub fn cluster_members(&self, cluster: u16) -> Vec<Node> {
        let ops = self
            .operations
            .iter()
            .filter(|(_, l)| l.cluster == cluster)
            .map(|(k, _)| Node::Operation(k));
        let bufs = self
            .buffers
            .iter()
            .filter(|(_, l)| l.cluster == cluster)
            .map(|(k, _)| Node::Buffer(k));
        let res = self
            .resources
            .iter()
            .filter(|(_, l)| l.cluster == cluster)
            .map(|(k, _)| Node::Resource(k));
        ops.chain(bufs).chain(res).collect()
    }

    fn next_cluster(&mut self) -> PlanResult<u16> {
        if self.clusters == u16::MAX - 1 {
            return Err(PlanError::logic("too many clusters"));
        }
        self.clusters += 1;
        Ok(self.clusters)
    }
}

/// Times an operation's level may be raised. Cycles in the material flow
/// would raise levels forever otherwise.
const MAX_LEVEL_VISITS: u8 = 2;

struct Walk<'a> {
    plan: &'a Plan,
    table: LevelTable,
    visits: SecondaryMap<OperationId, u8>,
    stack: Vec<(OperationId, i32)>,
}

impl<'a> Walk<'a> {
    fn new(plan: &'a Plan) -> Self {
        let mut table = LevelTable::default();
        for k in plan.operations.keys() {
            table.operations.insert(k, Leveled::UNSET);
        }
        for k in plan.buffers.keys() {
            table.buffers.insert(k, Leveled::UNSET);
        }
        for k in plan.resources.keys() {
            table.resources.insert(k, Leveled::UNSET);
        }
        Self { plan, table, visits: SecondaryMap::new(), stack: Vec::new() }
    }

    /// Push `op` at `level`, or for cluster assignment only when its level
    /// is already at least that high.
    fn reach(&mut self, op: OperationId, level: i32, cluster: u16) {
        let cur = self.table.operations[op];
        let visits = self.visits.get(op).copied().unwrap_or(0);
        if level >= 0 && cur.level < level && visits < MAX_LEVEL_VISITS {
            self.visits.insert(op, visits + 1);
            self.table.operations[op] = Leveled { level, cluster };
            self.stack.push((op, level));
        } else if cur.cluster == 0 {
            self.table.operations[op].cluster = cluster;
            self.stack.push((op, -1));
        }
    }

    /// Whether an operation starts a level search: it is no child of another
    /// operation and neither it nor its children produce material.
    fn is_level_root(&self, op: OperationId) -> bool {
        let o = &self.plan.operations[op];
        let produces = |id: OperationId| {
            self.plan.operations[id]
                .flows
                .iter()
                .any(|&f| self.plan.flows[f].is_producer())
        };
        o.super_operations.is_empty()
            && !produces(op)
            && !o.sub_operations.iter().any(|s| produces(s.operation))
    }

    fn run(mut self) -> PlanResult<LevelTable> {
        let plan = self.plan;
        for (root, o) in plan.operations.iter() {
            if o.is_dangling() {
                self.table.operations[root] = Leveled { level: 0, cluster: 0 };
                continue;
            }
            let search_level = self.is_level_root(root);
            let existing = self.table.operations[root].cluster;
            if !search_level && existing != 0 {
                continue;
            }
            let cluster = if existing != 0 { existing } else { self.table.next_cluster()? };
            let start_level = if search_level { 0 } else { -1 };
            self.table.operations[root].cluster = cluster;
            if search_level {
                self.table.operations[root].level = 0;
            }
            self.stack.push((root, start_level));
            self.drain(cluster);
        }
        self.place_lonely()?;
        Ok(self.table)
    }

    fn drain(&mut self, cluster: u16) {
        let plan = self.plan;
        while let Some((op, level)) = self.stack.pop() {
            let o = &plan.operations[op];

            for s in o.sub_operations.iter().rev() {
                self.reach(s.operation, level, cluster);
            }
            for &sup in o.super_operations.iter().rev() {
                self.reach(sup, level, cluster);
            }

            for &l in &o.loads {
                let r = plan.loads[l].resource;
                let entry = &mut self.table.resources[r];
                entry.level = entry.level.max(level);
                if entry.cluster == 0 {
                    entry.cluster = cluster;
                    for &other in &plan.resources[r].loads {
                        self.reach(plan.loads[other].operation, -1, cluster);
                    }
                }
            }

            for &f in &o.flows {
                let flow = &plan.flows[f];
                let b = flow.buffer;
                let search = level >= 0 && self.table.buffers[b].level < level + 1;
                if !search && self.table.buffers[b].cluster != 0 {
                    continue;
                }
                self.join_buffer(b, cluster);
                for &bf in &plan.buffers[b].flows {
                    let other = &plan.flows[bf];
                    if flow.is_consumer() && search {
                        if bf != f && other.is_producer() {
                            self.reach(other.operation, level + 1, cluster);
                        } else {
                            self.reach(other.operation, -1, cluster);
                        }
                        self.table.buffers[b].level = level + 1;
                    } else {
                        self.reach(other.operation, -1, cluster);
                    }
                }
            }
        }
    }

    /// Put a buffer, and every other buffer of its item, in `cluster`.
    fn join_buffer(&mut self, buffer: BufferId, cluster: u16) {
        let plan = self.plan;
        self.table.buffers[buffer].cluster = cluster;
        let item = plan.buffers[buffer].item;
        for &sibling in &plan.items[item].buffers {
            if self.table.buffers[sibling].cluster == 0 {
                self.table.buffers[sibling].cluster = cluster;
                for &f in &plan.buffers[sibling].flows {
                    self.reach(plan.flows[f].operation, -1, cluster);
                }
            }
        }
    }

    /// Buffers without flows and resources without loads. A lonely buffer
    /// joins the cluster of another buffer of its item when there is one.
    fn place_lonely(&mut self) -> PlanResult<()> {
        let plan = self.plan;
        for (b, buf) in plan.buffers.iter() {
            if self.table.buffers[b].cluster != 0 {
                continue;
            }
            let sibling = plan.items[buf.item]
                .buffers
                .iter()
                .map(|&s| self.table.buffers[s].cluster)
                .find(|&c| c != 0);
            let cluster = match sibling {
                Some(c) => c,
                None => self.table.next_cluster()?,
            };
            self.table.buffers[b].cluster = cluster;
        }
        for (r, _) in plan.resources.iter() {
            if self.table.resources[r].cluster == 0 {
                self.table.resources[r].cluster = self.table.next_cluster()?;
            }
        }
        Ok(())
    }
}

fn compute(plan: &Plan) -> PlanResult<LevelTable> {
    debug!(generation = plan.generation.value(), "recomputing levels");
    let table = Walk::new(plan).run()?;
    info!(clusters = table.cluster_count(), "levels computed");
    Ok(table)
}

impl Plan {
    /// Run `read` against a fresh level table.
    fn with_levels<R>(&self, read: impl FnOnce(&LevelTable) -> R) -> PlanResult<R> {
        self.levels.with(self.generation, || compute(self), read)
    }

    /// Bring levels and clusters up to date.
    pub fn compute_levels(&self) -> PlanResult<()> {
        self.with_levels(|_| ())
    }

    /// Whether levels are current for the plan's structure.
    pub fn levels_fresh(&self) -> bool {
        self.levels.is_fresh(self.generation)
    }

    pub fn level(&self, node: Node) -> PlanResult<i32> {
        self.with_levels(|t| t.get(node).map(|l| l.level))?
            .ok_or_else(|| PlanError::logic("unknown entity"))
    }

    pub fn cluster(&self, node: Node) -> PlanResult<u16> {
        self.with_levels(|t| t.get(node).map(|l| l.cluster))?
            .ok_or_else(|| PlanError::logic("unknown entity"))
    }

    pub fn cluster_count(&self) -> PlanResult<u16> {
        self.with_levels(LevelTable::cluster_count)
    }

    /// Copy of the current table.
    pub fn level_table(&self) -> PlanResult<LevelTable> {
        self.with_levels(LevelTable::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Target;
    use crate::fixed::qty;
    use crate::flow::FlowKind;
    use crate::operation::OperationKind;
    use crate::resource::ResourceKind;
    use crate::time::{DateRange, Duration};

    fn fixed(plan: &mut Plan, name: &str) -> OperationId {
        plan.add_operation(name, OperationKind::FixedTime { duration: Duration::DAY })
            .unwrap()
    }

    /// deliver <- frame <- assemble <- steel <- buy
    fn chain() -> (Plan, [OperationId; 3], [BufferId; 2]) {
        let mut plan = Plan::default();
        let loc = plan.add_location("plant").unwrap();
        let frame = plan.add_item("frame").unwrap();
        let steel = plan.add_item("steel").unwrap();
        let bf = plan.add_buffer(frame, loc).unwrap();
        let bs = plan.add_buffer(steel, loc).unwrap();
        let deliver = fixed(&mut plan, "deliver");
        let assemble = fixed(&mut plan, "assemble");
        let buy = fixed(&mut plan, "buy");
        plan.add_flow(deliver, bf, qty(-1.0), FlowKind::Start).unwrap();
        plan.add_flow(assemble, bf, qty(1.0), FlowKind::End).unwrap();
        plan.add_flow(assemble, bs, qty(-2.0), FlowKind::Start).unwrap();
        plan.add_flow(buy, bs, qty(1.0), FlowKind::End).unwrap();
        (plan, [deliver, assemble, buy], [bf, bs])
    }

    #[test]
    fn levels_follow_material_depth() {
        let (plan, [deliver, assemble, buy], [bf, bs]) = chain();
        assert_eq!(plan.level(Node::Operation(deliver)).unwrap(), 0);
        assert_eq!(plan.level(Node::Operation(assemble)).unwrap(), 1);
        assert_eq!(plan.level(Node::Operation(buy)).unwrap(), 2);
        assert_eq!(plan.level(Node::Buffer(bf)).unwrap(), 1);
        assert_eq!(plan.level(Node::Buffer(bs)).unwrap(), 2);
        let c = plan.cluster(Node::Operation(deliver)).unwrap();
        assert_eq!(plan.cluster(Node::Operation(buy)).unwrap(), c);
        assert_eq!(plan.cluster_count().unwrap(), 1);
    }

    #[test]
    fn structural_edit_invalidates() {
        let (mut plan, [_, assemble, _], _) = chain();
        plan.compute_levels().unwrap();
        assert!(plan.levels_fresh());
        let res = plan
            .add_resource("press", ResourceKind::Default, Target::Fixed(qty(1.0)))
            .unwrap();
        assert!(!plan.levels_fresh());
        plan.add_load(assemble, res, qty(1.0), None).unwrap();
        assert_eq!(plan.level(Node::Resource(res)).unwrap(), 1);
        assert_eq!(
            plan.cluster(Node::Resource(res)).unwrap(),
            plan.cluster(Node::Operation(assemble)).unwrap()
        );
    }

    #[test]
    fn compute_is_idempotent() {
        let (plan, _, _) = chain();
        let first = plan.level_table().unwrap();
        plan.compute_levels().unwrap();
        assert_eq!(plan.level_table().unwrap(), first);
    }

    #[test]
    fn dangling_operation_stays_in_cluster_zero() {
        let (mut plan, _, _) = chain();
        let lonely = fixed(&mut plan, "lonely");
        assert_eq!(plan.cluster(Node::Operation(lonely)).unwrap(), 0);
        assert_eq!(plan.level(Node::Operation(lonely)).unwrap(), 0);
    }

    #[test]
    fn alternates_share_parent_cluster() {
        let mut plan = Plan::default();
        let alt = plan.add_operation("alt", OperationKind::Alternate).unwrap();
        let a = fixed(&mut plan, "a");
        let b = fixed(&mut plan, "b");
        plan.add_sub_operation(alt, a, 1, DateRange::unbounded()).unwrap();
        plan.add_sub_operation(alt, b, 2, DateRange::unbounded()).unwrap();
        let c = plan.cluster(Node::Operation(alt)).unwrap();
        assert_ne!(c, 0);
        assert_eq!(plan.cluster(Node::Operation(a)).unwrap(), c);
        assert_eq!(plan.cluster(Node::Operation(b)).unwrap(), c);
    }

    #[test]
    fn lonely_entities_get_own_clusters() {
        let (mut plan, [deliver, ..], _) = chain();
        let loc = plan.add_location("dc").unwrap();
        let frame = plan.item_by_name("frame").unwrap();
        let glue = plan.add_item("glue").unwrap();
        let frame_dc = plan.add_buffer(frame, loc).unwrap();
        let glue_dc = plan.add_buffer(glue, loc).unwrap();
        let res = plan
            .add_resource("idle", ResourceKind::Default, Target::Fixed(qty(1.0)))
            .unwrap();
        let main = plan.cluster(Node::Operation(deliver)).unwrap();
        assert_eq!(plan.cluster(Node::Buffer(frame_dc)).unwrap(), main);
        let g = plan.cluster(Node::Buffer(glue_dc)).unwrap();
        let r = plan.cluster(Node::Resource(res)).unwrap();
        assert!(g != main && r != main && g != r);
        assert_eq!(plan.cluster_count().unwrap(), 3);
    }

    #[test]
    fn material_cycle_terminates() {
        let mut plan = Plan::default();
        let loc = plan.add_location("plant").unwrap();
        let x = plan.add_item("x").unwrap();
        let y = plan.add_item("y").unwrap();
        let bx = plan.add_buffer(x, loc).unwrap();
        let by = plan.add_buffer(y, loc).unwrap();
        let ship = fixed(&mut plan, "ship");
        let a = fixed(&mut plan, "a");
        let b = fixed(&mut plan, "b");
        plan.add_flow(ship, bx, qty(-1.0), FlowKind::Start).unwrap();
        plan.add_flow(a, bx, qty(1.0), FlowKind::End).unwrap();
        plan.add_flow(a, by, qty(-1.0), FlowKind::Start).unwrap();
        plan.add_flow(b, by, qty(1.0), FlowKind::End).unwrap();
        plan.add_flow(b, bx, qty(-1.0), FlowKind::Start).unwrap();
        assert!(plan.level(Node::Operation(b)).unwrap() >= 2);
        assert_eq!(plan.cluster_count().unwrap(), 1);
    }
}
