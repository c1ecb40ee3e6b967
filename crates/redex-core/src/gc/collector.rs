//! Mark-sweep collector - local and global GC cycles.
//!
//! Local GC runs without synchronization, scoped to one worker's own
//! *new* and *local* lists. Global GC is stop-the-world, synchronized by
//! a barrier across every worker, and additionally sweeps the *global*
//! list. Both share the same marking worklist machinery; they differ in
//! which roots feed it and which lists get swept.

use super::heap::Heap;
use crate::term::TermPtr;
use std::collections::VecDeque;

/// Result of a GC cycle, used by the allocator's exhaustion policy to
/// decide whether a cycle freed enough to satisfy a failed allocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    pub reclaimed: usize,
    pub kept: usize,
}

/// Drain a marking worklist seeded with `roots`: pop an object, and for
/// each child that still needs marking (life state `Old`), promote it
/// to `Active` and push it. Marking is a fixed point within one cycle -
/// an already-active child is simply skipped.
fn mark_from_roots(roots: impl IntoIterator<Item = TermPtr>) {
    let mut worklist: VecDeque<TermPtr> = roots.into_iter().collect();
    while let Some(t) = worklist.pop_front() {
        let life = &t.get().life;
        let freshly_marked = life.mark_active();
        if !freshly_marked && life.is_active() && !life.is_static() {
            // already active from an earlier pop this cycle: a genuine
            // fixed point, so no need to revisit its children a second
            // time. `mark_active` always reports false for a static
            // term (it's born active and never transitions), so static
            // roots fall through to the walk below on every visit
            // instead of being mistaken for this case.
            continue;
        }
        for child in t.children() {
            if child.get().life.needs_marking() {
                worklist.push_back(child);
            }
        }
    }
}

/// Sweep one list in place: terms still `Old` (unreached by marking) are
/// reclaimed; terms now `Active` are demoted back to `Old` so the next
/// cycle starts clean, and kept in `keep`.
fn sweep_list(heap: &Heap, worker_id: usize, list: &mut Vec<TermPtr>, stats: &mut GcStats) {
    let mut keep = Vec::with_capacity(list.len());
    for t in list.drain(..) {
        if t.get().life.is_active() {
            t.get().life.mark_old_for_sweep();
            stats.kept += 1;
            keep.push(t);
        } else if t.get().life.is_old() {
            t.get().life.mark_dead();
            heap.reclaim(worker_id, t);
            stats.reclaimed += 1;
        } else {
            // unborn (shouldn't reach a sweepable list) or already dead;
            // leave untouched rather than double-reclaim.
            keep.push(t);
        }
    }
    *list = keep;
}

/// Sweep the `new` list with reclassification: survivors move to
/// `lists.global` if marked global, `lists.local` otherwise; unreached
/// `Old` terms are reclaimed exactly as [`sweep_list`] would.
///
/// A global term is kept unconditionally, whether or not this cycle's
/// marking reached it: a worker that reduces a `par`-spawned term
/// allocates the result into its own `new` list and globalizes it, so
/// it can sit there with no local root of its own while another worker
/// still depends on it through a blackhole's done-state. Local GC never
/// sees that other worker's roots, so it cannot tell a live global from
/// a dead one - it must assume alive, matching the original's
/// unconditional `else if(t->IsGlobal())` preservation in its new-list
/// pass (`gc_marksweep.h:438-440`).
fn sweep_new_list(
    heap: &Heap,
    worker_id: usize,
    lists: &mut super::heap::HeapLists,
    stats: &mut GcStats,
) {
    let drained: Vec<TermPtr> = lists.new.drain(..).collect();
    for t in drained {
        if t.is_global() {
            t.get().life.mark_old_for_sweep();
            stats.kept += 1;
            lists.global.push(t);
        } else if t.get().life.is_active() {
            t.get().life.mark_old_for_sweep();
            stats.kept += 1;
            lists.local.push(t);
        } else if t.get().life.is_old() {
            t.get().life.mark_dead();
            heap.reclaim(worker_id, t);
            stats.reclaimed += 1;
        } else {
            // still unborn: construction not yet complete, leave in
            // place for the next cycle to classify.
            lists.new.push(t);
        }
    }
}

/// Local GC: mark from this worker's own roots only, then sweep its
/// *new* and *local* lists. Safe to run without any other worker's
/// cooperation since it never touches another worker's lists.
///
/// The `new` list goes through [`sweep_new_list`], not [`sweep_list`],
/// precisely because `new` is where a freshly globalized `par` result
/// can live with no local root of its own - see that function's doc
/// comment. Using the plain sweep here would reclaim such a term out
/// behind the back of whichever other worker still references it.
pub fn local_gc(heap: &Heap, worker_id: usize, roots: Vec<TermPtr>) -> GcStats {
    mark_from_roots(roots);

    let mut stats = GcStats::default();
    let worker = heap.worker(worker_id);
    let mut lists = worker.lists.lock();
    sweep_new_list(heap, worker_id, &mut lists, &mut stats);
    sweep_list(heap, worker_id, &mut lists.local, &mut stats);
    stats
}

/// Global GC: the seven-phase stop-the-world cycle. Callers are
/// expected to have already brought every worker to the barrier before
/// phase 1 and to release them again after phase 7; see
/// [`crate::worker::pool::WorkerPool`] for the barrier choreography.
/// `all_roots` is one root vector per worker (its root stack, eval
/// stack, and queue-visible entries).
pub fn global_gc(heap: &Heap, all_roots: Vec<Vec<TermPtr>>) -> GcStats {
    // Phase 1: mark every known global and new object as old, resetting
    // the previous cycle's active marks.
    for worker_id in 0..heap.num_workers() {
        let lists = heap.worker(worker_id).lists.lock();
        for t in lists.global.iter().chain(lists.new.iter()) {
            t.get().life.mark_old_for_sweep();
        }
    }

    // Phase 2 + 3: mark from every worker's roots, draining one shared
    // worklist (objects may be reachable from more than one worker's
    // roots; marking is idempotent).
    let roots: Vec<TermPtr> = all_roots.into_iter().flatten().collect();
    mark_from_roots(roots);

    // Phase 4: sweep local, then new, per worker. Surviving `new`
    // objects are reclassified into `local` or `global` by their
    // current marker bit rather than simply re-filed as `new` again,
    // per §4.7 phase 4: "reclassify to local/global, or reclaim".
    let mut stats = GcStats::default();
    for worker_id in 0..heap.num_workers() {
        let mut lists = heap.worker(worker_id).lists.lock();
        sweep_list(heap, worker_id, &mut lists.local, &mut stats);
        sweep_new_list(heap, worker_id, &mut lists, &mut stats);
    }

    // Phase 5: sweep the global list (conceptually "one worker" does
    // this; since lists are per-worker here, the caller holds the
    // barrier for all of them while this loop runs on whichever worker
    // was elected - see WorkerPool::run_global_gc).
    for worker_id in 0..heap.num_workers() {
        let mut lists = heap.worker(worker_id).lists.lock();
        sweep_list(heap, worker_id, &mut lists.global, &mut stats);
    }

    // Phase 6: sweep the "other" (non-term payload) list - always empty
    // in this port, kept for symmetry with the data model.
    for worker_id in 0..heap.num_workers() {
        let mut lists = heap.worker(worker_id).lists.lock();
        sweep_list(heap, worker_id, &mut lists.other, &mut stats);
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::value::Scalar;

    #[test]
    fn local_gc_reclaims_unreferenced_constants() {
        let heap = Heap::new(1, 64 * 1024);
        let kept = heap.alloc_constant(0, Scalar::Int(1)).unwrap();
        let _garbage = heap.alloc_constant(0, Scalar::Int(2)).unwrap();

        let stats = local_gc(&heap, 0, vec![kept]);
        assert_eq!(stats.kept, 1);
        assert_eq!(stats.reclaimed, 1);
    }

    #[test]
    fn local_gc_is_idempotent() {
        let heap = Heap::new(1, 64 * 1024);
        let kept = heap.alloc_constant(0, Scalar::Int(1)).unwrap();
        let first = local_gc(&heap, 0, vec![kept]);
        assert_eq!(first.reclaimed, 0);
        assert_eq!(first.kept, 1);

        // running again with the same root reclaims nothing new.
        let second = local_gc(&heap, 0, vec![kept]);
        assert_eq!(second.reclaimed, 0);
        assert_eq!(second.kept, 1);
    }

    #[test]
    fn local_gc_preserves_global_term_in_new_list_even_without_a_local_root() {
        let heap = Heap::new(1, 64 * 1024);
        // Stands in for a par-spawned result: a worker allocates its
        // reduction's result into its own `new` list, globalizes it, and
        // publishes it via a blackhole - so it has no root of its own on
        // the worker that produced it.
        let spawned_result = heap.alloc_constant(0, Scalar::Int(42)).unwrap();
        spawned_result.get().life.set_global();

        let stats = local_gc(&heap, 0, vec![]);
        assert_eq!(stats.kept, 1);
        assert_eq!(stats.reclaimed, 0);
        assert!(!spawned_result.get().life.is_dead());
        assert!(heap.worker(0).lists.lock().global.contains(&spawned_result));
    }

    #[test]
    fn global_gc_sweeps_global_list_too() {
        let heap = Heap::new(2, 64 * 1024);
        let global_kept = heap.alloc_constant(0, Scalar::Int(7)).unwrap();
        global_kept.get().life.set_global();
        heap.worker(0).lists.lock().global.push(global_kept);
        heap.worker(0).lists.lock().new.clear();

        let stats = global_gc(&heap, vec![vec![global_kept], vec![]]);
        assert_eq!(stats.kept, 1);
    }
}
