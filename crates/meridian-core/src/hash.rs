//! Deterministic hashing of plan state.
//!
//! Two plans built by the same sequence of calls hash equal even though
//! their arena keys differ: entities are visited by name and operationplans
//! by id.

use crate::fixed::Quantity;
use crate::flowplan::EventRef;
use crate::plan::Plan;
use crate::time::Date;
use crate::timeline::Timeline;

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

/// FNV-1a (64-bit). Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_quantity(&mut self, v: Quantity) {
        self.write(&v.to_bits().to_le_bytes());
    }

    pub fn write_date(&mut self, d: Date) {
        self.write_i64(d.timestamp());
    }

    /// Length-prefixed so that `("ab", "c")` and `("a", "bc")` differ.
    pub fn write_str(&mut self, s: &str) {
        self.write_u64(s.len() as u64);
        self.write(s.as_bytes());
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Plan hashes
// ---------------------------------------------------------------------------

/// One hash per part of the plan, to pinpoint where two plans diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanHashes {
    pub operationplans: u64,
    pub buffers: u64,
    pub resources: u64,
    pub demands: u64,
}

impl PlanHashes {
    pub fn combined(&self) -> u64 {
        let mut h = StateHash::new();
        h.write_u64(self.operationplans);
        h.write_u64(self.buffers);
        h.write_u64(self.resources);
        h.write_u64(self.demands);
        h.finish()
    }
}

fn hash_timeline(h: &mut StateHash, timeline: &Timeline<EventRef>) {
    h.write_u64(timeline.len() as u64);
    for (_, e) in timeline.iter() {
        h.write_date(e.date());
        h.write_u64(e.kind() as u64);
        h.write_quantity(e.quantity());
        h.write_quantity(e.onhand());
    }
}

impl Plan {
    pub fn plan_hashes(&self) -> PlanHashes {
        let mut ops = StateHash::new();
        for (id, &key) in &self.ids {
            let p = &self.operationplans[key];
            ops.write_u64(id.0);
            ops.write_str(&self.operations[p.operation].name);
            ops.write_quantity(p.quantity);
            ops.write_date(p.dates.start);
            ops.write_date(p.dates.end);
            ops.write_u64(p.status as u64);
            ops.write_u64(p.owner.and_then(|o| self.operationplans.get(o)).map_or(0, |o| o.id.0));
            for s in &p.setups {
                ops.write_str(&self.resources[s.resource].name);
                ops.write_str(s.value.setup.as_deref().unwrap_or(""));
                ops.write_i64(s.value.duration.as_seconds());
            }
        }

        let mut buffers = StateHash::new();
        let mut names: Vec<_> = self.buffers.iter().map(|(k, b)| (&b.name, k)).collect();
        names.sort();
        for (name, key) in names {
            buffers.write_str(name);
            hash_timeline(&mut buffers, &self.buffers[key].timeline);
        }

        let mut resources = StateHash::new();
        let mut names: Vec<_> = self.resources.iter().map(|(k, r)| (&r.name, k)).collect();
        names.sort();
        for (name, key) in names {
            resources.write_str(name);
            hash_timeline(&mut resources, &self.resources[key].timeline);
        }

        let mut demands = StateHash::new();
        let mut names: Vec<_> = self.demands.iter().map(|(k, d)| (&d.name, k)).collect();
        names.sort();
        for (name, key) in names {
            let d = &self.demands[key];
            demands.write_str(name);
            demands.write_quantity(d.quantity);
            demands.write_date(d.due);
            for &k in &d.deliveries {
                demands.write_u64(self.operationplans.get(k).map_or(0, |p| p.id.0));
            }
        }

        PlanHashes {
            operationplans: ops.finish(),
            buffers: buffers.finish(),
            resources: resources.finish(),
            demands: demands.finish(),
        }
    }

    pub fn state_hash(&self) -> u64 {
        self.plan_hashes().combined()
    }
}
