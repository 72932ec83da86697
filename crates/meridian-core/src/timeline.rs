//! Ordered event ledger with running on-hand.
//!
//! A [`Timeline`] keeps events sorted by date and maintains, on every event,
//! the running on-hand (prefix sum of quantities) and the cumulative
//! produced quantity. Buffers hold their flowplans in one, resources their
//! loadplans and setup events.
//!
//! Events live in a slotmap arena and are chained through explicit
//! `prev`/`next` keys. Insertion walks backward from the tail, so appending
//! in roughly chronological order is cheap.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};

use crate::fixed::Quantity;
use crate::time::Date;

new_key_type! {
    /// Identifies an event inside one timeline.
    pub struct EventId;
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TimelineError {
    #[error("events out of order at {0}")]
    OutOfOrder(Date),
    #[error("running on-hand at {at} is {found}, expected {expected}")]
    OnhandMismatch { at: Date, expected: Quantity, found: Quantity },
    #[error("cumulative produced at {at} is {found}, expected {expected}")]
    CumulativeMismatch { at: Date, expected: Quantity, found: Quantity },
    #[error("broken event chain")]
    BrokenChain,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Event kinds. Declaration order is the priority among events sharing a
/// date: target changes apply before the quantities they constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    SetMax,
    SetMin,
    BucketBoundary,
    Setup,
    ChangeOnhand,
}

/// Last sort criterion of events with equal date, kind and quantity:
/// the owning operationplan id and the event's position within it.
pub type Tiebreak = (u64, u64);

#[derive(Debug, Clone)]
pub struct Event<P> {
    date: Date,
    kind: EventKind,
    quantity: Quantity,
    /// New min/max level for target events, bucket capacity for boundaries.
    target: Quantity,
    tiebreak: Tiebreak,
    payload: P,
    onhand: Quantity,
    cum_produced: Quantity,
    prev: Option<EventId>,
    next: Option<EventId>,
}

impl<P> Event<P> {
    pub fn date(&self) -> Date {
        self.date
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn target(&self) -> Quantity {
        self.target
    }

    pub fn tiebreak(&self) -> Tiebreak {
        self.tiebreak
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Running on-hand after this event.
    pub fn onhand(&self) -> Quantity {
        self.onhand
    }

    /// Total produced up to and including this event.
    pub fn cumulative_produced(&self) -> Quantity {
        self.cum_produced
    }

    /// Total consumed up to and including this event, as a positive number.
    pub fn cumulative_consumed(&self) -> Quantity {
        self.cum_produced - self.onhand
    }

    pub fn prev(&self) -> Option<EventId> {
        self.prev
    }

    pub fn next(&self) -> Option<EventId> {
        self.next
    }

    fn produced(&self) -> Quantity {
        self.quantity.max(Quantity::ZERO)
    }
}

#[derive(Debug, Clone, Copy)]
struct SortKey {
    date: Date,
    kind: EventKind,
    quantity: Quantity,
    tiebreak: Tiebreak,
}

impl SortKey {
    fn of<P>(e: &Event<P>) -> Self {
        SortKey { date: e.date, kind: e.kind, quantity: e.quantity, tiebreak: e.tiebreak }
    }
}

/// Date, then kind, then quantity descending, then tie-break, then arena key.
fn compare(a: SortKey, a_id: EventId, b: SortKey, b_id: EventId) -> Ordering {
    a.date
        .cmp(&b.date)
        .then(a.kind.cmp(&b.kind))
        .then(b.quantity.cmp(&a.quantity))
        .then(a.tiebreak.cmp(&b.tiebreak))
        .then(a_id.cmp(&b_id))
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Timeline<P> {
    events: SlotMap<EventId, Event<P>>,
    first: Option<EventId>,
    last: Option<EventId>,
}

impl<P> Default for Timeline<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Timeline<P> {
    pub fn new() -> Self {
        Self { events: SlotMap::with_key(), first: None, last: None }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, id: EventId) -> Option<&Event<P>> {
        self.events.get(id)
    }

    pub fn first(&self) -> Option<EventId> {
        self.first
    }

    pub fn last(&self) -> Option<EventId> {
        self.last
    }

    /// Insert an event in sorted position and return its key.
    pub fn insert(
        &mut self,
        kind: EventKind,
        date: Date,
        quantity: Quantity,
        target: Quantity,
        tiebreak: Tiebreak,
        payload: P,
    ) -> EventId {
        let id = self.events.insert(Event {
            date,
            kind,
            quantity,
            target,
            tiebreak,
            payload,
            onhand: Quantity::ZERO,
            cum_produced: Quantity::ZERO,
            prev: None,
            next: None,
        });
        self.link(id);
        id
    }

    /// Remove an event, rebalancing the running sums after it.
    pub fn erase(&mut self, id: EventId) -> Option<P> {
        if !self.events.contains_key(id) {
            return None;
        }
        self.unlink(id);
        self.events.remove(id).map(|e| e.payload)
    }

    /// Change quantity, date and tie-break of an event.
    ///
    /// When the event keeps its position only the sums after it are
    /// adjusted; otherwise it is relinked under the same key.
    pub fn update(&mut self, id: EventId, quantity: Quantity, date: Date, tiebreak: Tiebreak) {
        let Some(e) = self.events.get(id) else { return };
        if e.quantity == quantity && e.date == date && e.tiebreak == tiebreak {
            return;
        }
        let (prev, next) = (e.prev, e.next);
        let old_quantity = e.quantity;
        let old_produced = e.produced();

        let moved = SortKey { date, kind: e.kind, quantity, tiebreak };
        let in_place = prev.is_none_or(|p| {
            compare(SortKey::of(&self.events[p]), p, moved, id) == Ordering::Less
        }) && next.is_none_or(|n| {
            compare(moved, id, SortKey::of(&self.events[n]), n) == Ordering::Less
        });

        if in_place {
            let delta = quantity - old_quantity;
            let delta_prod = quantity.max(Quantity::ZERO) - old_produced;
            let e = &mut self.events[id];
            e.quantity = quantity;
            e.date = date;
            e.tiebreak = tiebreak;
            let mut cur = Some(id);
            while let Some(c) = cur {
                let ev = &mut self.events[c];
                ev.onhand += delta;
                ev.cum_produced += delta_prod;
                cur = ev.next;
            }
        } else {
            self.unlink(id);
            let e = &mut self.events[id];
            e.quantity = quantity;
            e.date = date;
            e.tiebreak = tiebreak;
            self.link(id);
        }
    }

    /// Change the min/max target or bucket capacity carried by an event.
    pub fn set_target(&mut self, id: EventId, target: Quantity) {
        if let Some(e) = self.events.get_mut(id) {
            e.target = target;
        }
    }

    pub fn payload_mut(&mut self, id: EventId) -> Option<&mut P> {
        self.events.get_mut(id).map(|e| &mut e.payload)
    }

    /// Iterate events in timeline order.
    pub fn iter(&self) -> Iter<'_, P> {
        Iter { timeline: self, cur: self.first }
    }

    /// Iterate events starting at `id` (inclusive).
    pub fn iter_from(&self, id: EventId) -> Iter<'_, P> {
        Iter { timeline: self, cur: self.events.contains_key(id).then_some(id) }
    }

    /// Iterate events in reverse timeline order.
    pub fn iter_rev(&self) -> RevIter<'_, P> {
        RevIter { timeline: self, cur: self.last }
    }

    /// On-hand after all events up to and including `date`.
    pub fn onhand_at(&self, date: Date) -> Quantity {
        self.iter_rev()
            .find(|(_, e)| e.date <= date)
            .map_or(Quantity::ZERO, |(_, e)| e.onhand)
    }

    /// On-hand before any event on `date`.
    pub fn onhand_before(&self, date: Date) -> Quantity {
        self.iter_rev()
            .find(|(_, e)| e.date < date)
            .map_or(Quantity::ZERO, |(_, e)| e.onhand)
    }

    /// Minimum target in effect at event `id`; zero when none was set.
    pub fn min_at(&self, id: EventId) -> Quantity {
        self.target_at(id, EventKind::SetMin).unwrap_or(Quantity::ZERO)
    }

    /// Maximum target in effect at event `id`; `None` when unbounded.
    pub fn max_at(&self, id: EventId) -> Option<Quantity> {
        self.target_at(id, EventKind::SetMax)
    }

    fn target_at(&self, id: EventId, kind: EventKind) -> Option<Quantity> {
        let mut cur = self.events.contains_key(id).then_some(id);
        while let Some(c) = cur {
            let e = &self.events[c];
            if e.kind == kind {
                return Some(e.target);
            }
            cur = e.prev;
        }
        None
    }

    /// Verify ordering, chain integrity and the prefix-sum invariant.
    pub fn check(&self) -> Result<(), TimelineError> {
        let mut onhand = Quantity::ZERO;
        let mut produced = Quantity::ZERO;
        let mut prev: Option<EventId> = None;
        let mut count = 0usize;
        let mut cur = self.first;
        while let Some(c) = cur {
            let e = self.events.get(c).ok_or(TimelineError::BrokenChain)?;
            if e.prev != prev {
                return Err(TimelineError::BrokenChain);
            }
            if let Some(p) = prev {
                if compare(SortKey::of(&self.events[p]), p, SortKey::of(e), c) != Ordering::Less {
                    return Err(TimelineError::OutOfOrder(e.date));
                }
            }
            onhand += e.quantity;
            produced += e.produced();
            if e.onhand != onhand {
                return Err(TimelineError::OnhandMismatch {
                    at: e.date,
                    expected: onhand,
                    found: e.onhand,
                });
            }
            if e.cum_produced != produced {
                return Err(TimelineError::CumulativeMismatch {
                    at: e.date,
                    expected: produced,
                    found: e.cum_produced,
                });
            }
            count += 1;
            prev = Some(c);
            cur = e.next;
        }
        if prev != self.last || count != self.events.len() {
            return Err(TimelineError::BrokenChain);
        }
        Ok(())
    }

    // -- internal linking -------------------------------------------------

    /// Link an allocated but unlinked event into sorted position.
    fn link(&mut self, id: EventId) {
        let (quantity, produced) = {
            let e = &self.events[id];
            (e.quantity, e.produced())
        };
        let mut cur = self.last;
        while let Some(c) = cur {
            if compare(SortKey::of(&self.events[id]), id, SortKey::of(&self.events[c]), c)
                != Ordering::Less
            {
                break;
            }
            let ce = &mut self.events[c];
            ce.onhand += quantity;
            ce.cum_produced += produced;
            cur = ce.prev;
        }
        let (base_onhand, base_produced, next) = match cur {
            Some(c) => {
                let ce = &self.events[c];
                (ce.onhand, ce.cum_produced, ce.next)
            }
            None => (Quantity::ZERO, Quantity::ZERO, self.first),
        };
        {
            let e = &mut self.events[id];
            e.onhand = base_onhand + quantity;
            e.cum_produced = base_produced + produced;
            e.prev = cur;
            e.next = next;
        }
        match cur {
            Some(c) => self.events[c].next = Some(id),
            None => self.first = Some(id),
        }
        match next {
            Some(n) => self.events[n].prev = Some(id),
            None => self.last = Some(id),
        }
    }

    /// Detach an event from the chain, keeping its slot.
    fn unlink(&mut self, id: EventId) {
        let (quantity, produced, prev, next) = {
            let e = &self.events[id];
            (e.quantity, e.produced(), e.prev, e.next)
        };
        let mut cur = next;
        while let Some(c) = cur {
            let ce = &mut self.events[c];
            ce.onhand -= quantity;
            ce.cum_produced -= produced;
            cur = ce.next;
        }
        match prev {
            Some(p) => self.events[p].next = next,
            None => self.first = next,
        }
        match next {
            Some(n) => self.events[n].prev = prev,
            None => self.last = prev,
        }
        let e = &mut self.events[id];
        e.prev = None;
        e.next = None;
    }
}

// ---------------------------------------------------------------------------
// Iterators
// ---------------------------------------------------------------------------

pub struct Iter<'a, P> {
    timeline: &'a Timeline<P>,
    cur: Option<EventId>,
}

impl<'a, P> Iterator for Iter<'a, P> {
    type Item = (EventId, &'a Event<P>);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        let e = self.timeline.events.get(id)?;
        self.cur = e.next;
        Some((id, e))
    }
}

pub struct RevIter<'a, P> {
    timeline: &'a Timeline<P>,
    cur: Option<EventId>,
}

impl<'a, P> Iterator for RevIter<'a, P> {
    type Item = (EventId, &'a Event<P>);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        let e = self.timeline.events.get(id)?;
        self.cur = e.prev;
        Some((id, e))
    }
}
