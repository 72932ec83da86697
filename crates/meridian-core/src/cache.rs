//! Change tracking for the lazily recomputed parts of a plan.
//!
//! [`Generation`] counts structural edits. [`Cached`] holds a value stamped
//! with the generation it was computed for and recomputes it on demand when
//! the stamp is stale. Readers share a read lock; a stale reader upgrades to
//! the write lock and re-checks the stamp before recomputing, so concurrent
//! readers trigger at most one recomputation.
//!
//! [`ChangeSet`] remembers which entities were touched since the last
//! problem detection pass.

use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Monotonic counter of structural edits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a structural edit.
    pub fn bump(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Cached
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Stamped<T> {
    generation: Generation,
    value: T,
}

/// A lazily computed value tied to a [`Generation`].
#[derive(Debug)]
pub struct Cached<T> {
    slot: RwLock<Option<Stamped<T>>>,
}

impl<T> Default for Cached<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Cached<T> {
    pub fn new() -> Self {
        Self { slot: RwLock::new(None) }
    }

    /// Whether a value computed for `generation` is present.
    pub fn is_fresh(&self, generation: Generation) -> bool {
        let guard = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().is_some_and(|s| s.generation == generation)
    }

    /// Run `read` against the value for `generation`, computing it first
    /// when missing or stale.
    pub fn with<R, E>(
        &self,
        generation: Generation,
        compute: impl FnOnce() -> Result<T, E>,
        read: impl FnOnce(&T) -> R,
    ) -> Result<R, E> {
        {
            let guard = self.slot.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(s) = guard.as_ref().filter(|s| s.generation == generation) {
                return Ok(read(&s.value));
            }
        }
        let mut guard = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        // Another reader may have recomputed while we waited for the lock.
        if let Some(s) = guard.as_ref().filter(|s| s.generation == generation) {
            return Ok(read(&s.value));
        }
        let value = compute()?;
        let out = read(&value);
        *guard = Some(Stamped { generation, value });
        Ok(out)
    }

    /// Drop the cached value.
    pub fn invalidate(&mut self) {
        *self.slot.get_mut().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl<T: Clone> Clone for Cached<T> {
    fn clone(&self) -> Self {
        let guard = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        Self {
            slot: RwLock::new(guard.as_ref().map(|s| Stamped {
                generation: s.generation,
                value: s.value.clone(),
            })),
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeSet
// ---------------------------------------------------------------------------

/// Entities marked changed since the last clean point.
#[derive(Debug, Clone)]
pub struct ChangeSet<K: Ord> {
    changed: BTreeSet<K>,
}

impl<K: Ord> Default for ChangeSet<K> {
    fn default() -> Self {
        Self { changed: BTreeSet::new() }
    }
}

impl<K: Ord + Copy> ChangeSet<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, key: K) {
        self.changed.insert(key);
    }

    pub fn unmark(&mut self, key: &K) {
        self.changed.remove(key);
    }

    pub fn is_marked(&self, key: &K) -> bool {
        self.changed.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changed.len()
    }

    /// Take every marked key in order, leaving the set clean.
    pub fn drain(&mut self) -> Vec<K> {
        std::mem::take(&mut self.changed).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn computes_once_per_generation() {
        let cache: Cached<u32> = Cached::new();
        let calls = Cell::new(0);
        let g = Generation::new();
        let compute = || {
            calls.set(calls.get() + 1);
            Ok::<_, ()>(7)
        };
        assert_eq!(cache.with(g, compute, |v| *v), Ok(7));
        assert_eq!(cache.with(g, compute, |v| *v), Ok(7));
        assert_eq!(calls.get(), 1);
        assert!(cache.is_fresh(g));
    }

    #[test]
    fn bump_forces_recompute() {
        let cache: Cached<u64> = Cached::new();
        let mut g = Generation::new();
        cache.with(g, || Ok::<_, ()>(1), |_| ()).unwrap();
        g.bump();
        assert!(!cache.is_fresh(g));
        let v = cache.with(g, || Ok::<_, ()>(2), |v| *v).unwrap();
        assert_eq!(v, 2);
    }

    #[test]
    fn failed_compute_leaves_cache_empty() {
        let cache: Cached<u8> = Cached::new();
        let g = Generation::new();
        assert_eq!(cache.with(g, || Err("boom"), |v| *v), Err("boom"));
        assert!(!cache.is_fresh(g));
    }

    #[test]
    fn invalidate_clears() {
        let mut cache: Cached<u8> = Cached::new();
        let g = Generation::new();
        cache.with(g, || Ok::<_, ()>(3), |_| ()).unwrap();
        cache.invalidate();
        assert!(!cache.is_fresh(g));
    }

    #[test]
    fn change_set_drains_in_order() {
        let mut set = ChangeSet::new();
        set.mark(3);
        set.mark(1);
        set.mark(3);
        assert_eq!(set.len(), 2);
        assert!(set.is_marked(&1));
        assert_eq!(set.drain(), vec![1, 3]);
        assert!(set.is_empty());
    }
}
