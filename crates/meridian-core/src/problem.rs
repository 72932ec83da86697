//! Problems: first-class records of plan infeasibilities.
//!
//! Every problem belongs to exactly one owner. The problems of an owner form
//! a singly linked chain ordered by kind and start date. Detection (see
//! [`crate::detect`]) produces the desired set per owner and
//! [`ProblemStore::reconcile`] diffs it against the chain so that problems
//! surviving a recomputation keep their identity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::cache::ChangeSet;
use crate::id::{BufferId, DemandId, OperationId, OperationPlanKey, ProblemId, ResourceId};
use crate::time::DateRange;

// ---------------------------------------------------------------------------
// Kinds and owners
// ---------------------------------------------------------------------------

/// Problem kinds. Declaration order is the sort order within an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProblemKind {
    DemandNotPlanned,
    Late,
    Early,
    Short,
    Excess,
    MaterialShortage,
    MaterialExcess,
    CapacityOverload,
    CapacityUnderload,
    BeforeCurrent,
    BeforeFence,
    Precedence,
    InvalidData,
}

impl ProblemKind {
    /// Kinds an owner has at most one of.
    pub fn is_singleton(self) -> bool {
        matches!(
            self,
            ProblemKind::DemandNotPlanned
                | ProblemKind::Late
                | ProblemKind::Early
                | ProblemKind::Short
                | ProblemKind::Excess
                | ProblemKind::BeforeCurrent
                | ProblemKind::BeforeFence
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ProblemKind::DemandNotPlanned => "unplanned",
            ProblemKind::Late => "late",
            ProblemKind::Early => "early",
            ProblemKind::Short => "short",
            ProblemKind::Excess => "excess",
            ProblemKind::MaterialShortage => "material shortage",
            ProblemKind::MaterialExcess => "material excess",
            ProblemKind::CapacityOverload => "overload",
            ProblemKind::CapacityUnderload => "underload",
            ProblemKind::BeforeCurrent => "before current",
            ProblemKind::BeforeFence => "before fence",
            ProblemKind::Precedence => "precedence",
            ProblemKind::InvalidData => "invalid data",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProblemOwner {
    Demand(DemandId),
    Buffer(BufferId),
    Resource(ResourceId),
    OperationPlan(OperationPlanKey),
}

/// An entity whose problems must be re-evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKey {
    Demand(DemandId),
    Buffer(BufferId),
    Resource(ResourceId),
    /// Re-evaluates every operationplan of the operation.
    Operation(OperationId),
}

// ---------------------------------------------------------------------------
// Problems
// ---------------------------------------------------------------------------

/// A problem as computed by detection, before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemSpec {
    pub kind: ProblemKind,
    pub range: DateRange,
    pub weight: f64,
    pub description: String,
}

impl ProblemSpec {
    pub fn new(kind: ProblemKind, range: DateRange, weight: f64, description: String) -> Self {
        Self { kind, range, weight, description }
    }

    fn matches(&self, p: &Problem) -> bool {
        self.kind == p.kind && (self.kind.is_singleton() || self.range.start == p.range.start)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Problem {
    pub kind: ProblemKind,
    pub owner: ProblemOwner,
    pub range: DateRange,
    pub weight: f64,
    pub description: String,
    #[serde(skip)]
    next: Option<ProblemId>,
}

impl Problem {
    fn sort_key(&self) -> (ProblemKind, crate::time::Date) {
        (self.kind, self.range.start)
    }
}

// ---------------------------------------------------------------------------
// ProblemStore
// ---------------------------------------------------------------------------

/// Arena of problems plus the per-owner chains and the pending change set.
#[derive(Debug, Clone, Default)]
pub struct ProblemStore {
    problems: SlotMap<ProblemId, Problem>,
    heads: BTreeMap<ProblemOwner, ProblemId>,
    pub(crate) changed: ChangeSet<ChangeKey>,
}

impl ProblemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn get(&self, id: ProblemId) -> Option<&Problem> {
        self.problems.get(id)
    }

    /// Problems of one owner, in chain order.
    pub fn for_owner(&self, owner: ProblemOwner) -> OwnerIter<'_> {
        OwnerIter { store: self, cur: self.heads.get(&owner).copied() }
    }

    /// All problems, owner by owner.
    pub fn iter(&self) -> impl Iterator<Item = (ProblemId, &Problem)> + '_ {
        self.heads.keys().flat_map(move |&o| self.for_owner(o))
    }

    /// Replace the problems of `owner` with `desired`, keeping the identity
    /// of problems that match by kind (and start date for repeatable
    /// kinds). Returns the number of (created, deleted) problems.
    pub fn reconcile(&mut self, owner: ProblemOwner, desired: Vec<ProblemSpec>) -> (usize, usize) {
        let existing: Vec<ProblemId> = self.for_owner(owner).map(|(id, _)| id).collect();
        let mut pending: Vec<Option<ProblemSpec>> = desired.into_iter().map(Some).collect();
        let mut kept = Vec::with_capacity(existing.len());
        let mut deleted = 0;

        for pid in existing {
            let found = pending
                .iter()
                .position(|s| s.as_ref().is_some_and(|s| s.matches(&self.problems[pid])));
            match found.and_then(|i| pending[i].take()) {
                Some(spec) => {
                    let p = &mut self.problems[pid];
                    p.range = spec.range;
                    p.weight = spec.weight;
                    p.description = spec.description;
                    kept.push(pid);
                }
                None => {
                    self.problems.remove(pid);
                    deleted += 1;
                }
            }
        }

        let mut created = 0;
        for spec in pending.into_iter().flatten() {
            kept.push(self.problems.insert(Problem {
                kind: spec.kind,
                owner,
                range: spec.range,
                weight: spec.weight,
                description: spec.description,
                next: None,
            }));
            created += 1;
        }

        self.relink(owner, kept);
        (created, deleted)
    }

    /// Drop every problem of `owner`.
    pub fn clear_owner(&mut self, owner: ProblemOwner) -> usize {
        let ids: Vec<ProblemId> = self.for_owner(owner).map(|(id, _)| id).collect();
        for &id in &ids {
            self.problems.remove(id);
        }
        self.heads.remove(&owner);
        ids.len()
    }

    fn relink(&mut self, owner: ProblemOwner, mut ids: Vec<ProblemId>) {
        ids.sort_by(|&a, &b| {
            self.problems[a]
                .sort_key()
                .cmp(&self.problems[b].sort_key())
                .then(a.cmp(&b))
        });
        let mut next = None;
        for &id in ids.iter().rev() {
            self.problems[id].next = next;
            next = Some(id);
        }
        match next {
            Some(head) => {
                self.heads.insert(owner, head);
            }
            None => {
                self.heads.remove(&owner);
            }
        }
    }
}

pub struct OwnerIter<'a> {
    store: &'a ProblemStore,
    cur: Option<ProblemId>,
}

impl<'a> Iterator for OwnerIter<'a> {
    type Item = (ProblemId, &'a Problem);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        let p = self.store.problems.get(id)?;
        self.cur = p.next;
        Some((id, p))
    }
}

// ---------------------------------------------------------------------------
// ProblemList
// ---------------------------------------------------------------------------

/// An explicit list of constraints attached by a solver, independent of
/// problem detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProblemList {
    entries: Vec<ProblemSpec>,
}

impl ProblemList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a constraint unless an identical one is present.
    pub fn push(&mut self, spec: ProblemSpec) -> bool {
        if self.entries.contains(&spec) {
            return false;
        }
        self.entries.push(spec);
        true
    }

    pub fn remove(&mut self, spec: &ProblemSpec) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e != spec);
        before != self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProblemSpec> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Date;

    fn day(n: u32) -> Date {
        Date::from_ymd(2024, 1, n).unwrap()
    }

    fn owner() -> ProblemOwner {
        let mut sm = SlotMap::<BufferId, ()>::with_key();
        ProblemOwner::Buffer(sm.insert(()))
    }

    fn spec(kind: ProblemKind, start: u32, weight: f64) -> ProblemSpec {
        ProblemSpec::new(kind, DateRange::new(day(start), Date::INFINITE_FUTURE), weight, String::new())
    }

    #[test]
    fn reconcile_creates_in_sorted_order() {
        let mut store = ProblemStore::new();
        let o = owner();
        let (created, deleted) = store.reconcile(
            o,
            vec![
                spec(ProblemKind::MaterialExcess, 1, 1.0),
                spec(ProblemKind::MaterialShortage, 5, 2.0),
                spec(ProblemKind::MaterialShortage, 2, 3.0),
            ],
        );
        assert_eq!((created, deleted), (3, 0));
        let order: Vec<(ProblemKind, Date)> =
            store.for_owner(o).map(|(_, p)| (p.kind, p.range.start)).collect();
        assert_eq!(
            order,
            vec![
                (ProblemKind::MaterialShortage, day(2)),
                (ProblemKind::MaterialShortage, day(5)),
                (ProblemKind::MaterialExcess, day(1)),
            ]
        );
    }

    #[test]
    fn reconcile_preserves_identity_of_matches() {
        let mut store = ProblemStore::new();
        let o = owner();
        store.reconcile(o, vec![spec(ProblemKind::MaterialShortage, 2, 3.0)]);
        let before = store.for_owner(o).next().unwrap().0;
        let (created, deleted) = store.reconcile(o, vec![spec(ProblemKind::MaterialShortage, 2, 1.0)]);
        assert_eq!((created, deleted), (0, 0));
        let (after, p) = store.for_owner(o).next().unwrap();
        assert_eq!(before, after);
        assert_eq!(p.weight, 1.0);
    }

    #[test]
    fn reconcile_deletes_vanished() {
        let mut store = ProblemStore::new();
        let o = owner();
        store.reconcile(o, vec![spec(ProblemKind::MaterialShortage, 2, 3.0)]);
        let (created, deleted) = store.reconcile(o, Vec::new());
        assert_eq!((created, deleted), (0, 1));
        assert!(store.is_empty());
        assert_eq!(store.for_owner(o).count(), 0);
    }

    #[test]
    fn singleton_kinds_match_regardless_of_start() {
        let mut store = ProblemStore::new();
        let o = owner();
        store.reconcile(o, vec![spec(ProblemKind::Late, 2, 1.0)]);
        let id = store.for_owner(o).next().unwrap().0;
        store.reconcile(o, vec![spec(ProblemKind::Late, 4, 3.0)]);
        let (id2, p) = store.for_owner(o).next().unwrap();
        assert_eq!(id, id2);
        assert_eq!(p.range.start, day(4));
    }

    #[test]
    fn clear_owner_removes_chain() {
        let mut store = ProblemStore::new();
        let o = owner();
        store.reconcile(o, vec![spec(ProblemKind::Late, 2, 1.0), spec(ProblemKind::Short, 2, 1.0)]);
        assert_eq!(store.clear_owner(o), 2);
        assert_eq!(store.iter().count(), 0);
    }

    #[test]
    fn problem_list_ignores_duplicates() {
        let mut list = ProblemList::new();
        assert!(list.push(spec(ProblemKind::CapacityOverload, 1, 1.0)));
        assert!(!list.push(spec(ProblemKind::CapacityOverload, 1, 1.0)));
        assert_eq!(list.len(), 1);
        assert!(list.remove(&spec(ProblemKind::CapacityOverload, 1, 1.0)));
        assert!(list.is_empty());
    }
}
