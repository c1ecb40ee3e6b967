//! Work queue - bounded, lossy, two-priority store of global terms.
//!
//! Grounded in the original's `TermQueue<P>` (`worker.h`): each priority
//! band is a fixed-capacity array addressed by a top-of-stack index, so
//! push/pop is LIFO within a band ("at head", per spec.md §4.5) rather
//! than FIFO. `Pop` scans bands from lowest priority number (highest
//! urgency) to highest and returns the first non-empty one. Overflow on
//! push silently drops the term - spawning is an optimization, and the
//! reducer falls back to evaluating the term sequentially as though it
//! had never been spawned.

use crate::term::TermPtr;
use parking_lot::Mutex;

/// Priority 0: explicit parallel spawns (`par`). Lower number = popped
/// first = higher urgency, matching `TermQueue::Pop`'s scan order.
pub const PRIORITY_SPAWN: usize = 0;
/// Priority 1: postponed continuations. Scanned after priority 0, so a
/// fresh `par` spawn is always popped ahead of a repostponed
/// continuation (spec.md §4.5: "priority 1 for postponed
/// continuations"; `Pop` still "scans priorities from lowest priority
/// number ... downward").
pub const PRIORITY_POSTPONED: usize = 1;

const NUM_PRIORITIES: usize = 2;

struct Band {
    capacity: usize,
    items: Vec<TermPtr>,
}

impl Band {
    fn new(capacity: usize) -> Band {
        Band {
            capacity,
            items: Vec::with_capacity(capacity.min(256)),
        }
    }

    fn push(&mut self, t: TermPtr) -> bool {
        if self.items.len() >= self.capacity {
            return false;
        }
        self.items.push(t);
        true
    }

    fn pop(&mut self) -> Option<TermPtr> {
        self.items.pop()
    }
}

/// The runtime's single work queue: one [`Band`] per priority, each
/// behind its own lock so a push into priority 1 never contends with a
/// pop from priority 0.
pub struct TermQueue {
    bands: [Mutex<Band>; NUM_PRIORITIES],
}

impl TermQueue {
    pub fn new(capacity_per_priority: usize) -> TermQueue {
        TermQueue {
            bands: [
                Mutex::new(Band::new(capacity_per_priority)),
                Mutex::new(Band::new(capacity_per_priority)),
            ],
        }
    }

    /// Push `t` at the given priority. Returns `false` on overflow -
    /// the caller must fall back to evaluating `t` sequentially, per
    /// §7's "Queue overflow" policy (silently drop, not an error).
    pub fn push(&self, t: TermPtr, priority: usize) -> bool {
        self.bands[priority].lock().push(t)
    }

    /// Pop the highest-urgency non-empty band's top entry.
    pub fn pop(&self) -> Option<TermPtr> {
        for band in &self.bands {
            let mut guard = band.lock();
            if let Some(t) = guard.pop() {
                return Some(t);
            }
        }
        None
    }

    /// Every term currently queued, across both bands - additional GC
    /// roots during a global cycle (§4.7 phase 2: "work-queue entries").
    pub fn snapshot_roots(&self) -> Vec<TermPtr> {
        self.bands
            .iter()
            .flat_map(|b| b.lock().items.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bands.iter().map(|b| b.lock().items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::life::LifeCell;
    use crate::term::value::Scalar;
    use crate::term::{TermCell, TermPayload};
    use std::ptr::NonNull;

    fn leak_constant(v: i64) -> TermPtr {
        let cell = Box::new(TermCell {
            life: LifeCell::new_unborn(),
            label: None,
            payload: TermPayload::Constant(Scalar::Int(v)),
        });
        cell.life.mark_birth();
        unsafe { TermPtr::from_raw(NonNull::new_unchecked(Box::into_raw(cell))) }
    }

    #[test]
    fn pop_prefers_higher_urgency_band() {
        let q = TermQueue::new(8);
        let spawn = leak_constant(1);
        let postponed = leak_constant(2);
        q.push(spawn, PRIORITY_SPAWN);
        q.push(postponed, PRIORITY_POSTPONED);
        assert_eq!(q.pop(), Some(spawn));
        assert_eq!(q.pop(), Some(postponed));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn push_within_a_band_is_lifo() {
        let q = TermQueue::new(8);
        let a = leak_constant(1);
        let b = leak_constant(2);
        q.push(a, PRIORITY_SPAWN);
        q.push(b, PRIORITY_SPAWN);
        assert_eq!(q.pop(), Some(b));
        assert_eq!(q.pop(), Some(a));
    }

    #[test]
    fn overflow_drops_silently_and_reports_false() {
        let q = TermQueue::new(1);
        let a = leak_constant(1);
        let b = leak_constant(2);
        assert!(q.push(a, PRIORITY_SPAWN));
        assert!(!q.push(b, PRIORITY_SPAWN));
        assert_eq!(q.pop(), Some(a));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn snapshot_roots_covers_both_bands() {
        let q = TermQueue::new(8);
        let a = leak_constant(1);
        let b = leak_constant(2);
        q.push(a, PRIORITY_SPAWN);
        q.push(b, PRIORITY_POSTPONED);
        let roots = q.snapshot_roots();
        assert_eq!(roots.len(), 2);
        assert!(roots.contains(&a));
        assert!(roots.contains(&b));
    }
}
