//! Postponement - rescheduling of work blocked on a blackhole.
//!
//! §4.8: a worker that pops a term off the queue and finds it would
//! immediately block (its top-level term is a Blackhole someone else is
//! already calculating) shouldn't tie up its thread busy-waiting on that
//! single result while other queued work sits idle. Instead it
//! re-enqueues the term at the postponed-continuation priority (below
//! fresh `par` spawns - `TermQueue::pop` still scans priority 0 first)
//! and goes looks for something else to do; the queue itself is the
//! wakeup mechanism - there is no dedicated notification channel
//! (spec.md §4.8: "the queue itself is the wakeup mechanism"). A nested
//! Blackhole encountered *during* reduction (not at the top of a
//! freshly popped term) still resolves via the ordinary busy-wait in
//! [`crate::term::TermPtr::reduce`] - postponement only pre-empts the
//! outermost, cheaply-checkable case.

use crate::queue::{TermQueue, PRIORITY_POSTPONED};
use crate::term::TermPtr;
use std::time::Duration;

/// Outcome of attempting to schedule a freshly popped queue entry.
pub enum PopOutcome {
    /// Safe to reduce now; the caller should drive `FullReduce` on it.
    Ready(TermPtr),
    /// Still blocking - re-enqueued at `PRIORITY_POSTPONED` after a
    /// brief sleep to avoid thrashing the queue; the caller should pop
    /// again.
    Repostponed,
}

/// Brief pause before re-postponing, per §4.8's "re-postpones (with a
/// brief sleep to avoid thrashing)".
const REPOSTPONE_SLEEP: Duration = Duration::from_micros(500);

/// Decide what to do with a term just popped off the queue: if
/// reducing it would block right now, sleep briefly, re-enqueue it at
/// postponed priority, and report [`PopOutcome::Repostponed`]; otherwise
/// hand it back for normal reduction.
pub fn handle_popped(queue: &TermQueue, term: TermPtr) -> PopOutcome {
    if term.reduce_will_block() {
        std::thread::sleep(REPOSTPONE_SLEEP);
        // Overflow here just drops the continuation; the term remains
        // reachable from whatever already holds a reference to it (its
        // blackhole wrapper), so nothing is lost beyond the parallelism
        // opportunity, matching the lossy-queue contract in §4.5.
        queue.push(term, PRIORITY_POSTPONED);
        PopOutcome::Repostponed
    } else {
        PopOutcome::Ready(term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::PRIORITY_SPAWN;
    use crate::term::life::LifeCell;
    use crate::term::value::Scalar;
    use crate::term::{BlackholeData, TermCell, TermPayload};
    use std::ptr::NonNull;
    use std::sync::atomic::AtomicPtr;

    fn leak_constant(v: i64) -> TermPtr {
        let cell = Box::new(TermCell {
            life: LifeCell::new_unborn(),
            label: None,
            payload: TermPayload::Constant(Scalar::Int(v)),
        });
        cell.life.mark_birth();
        unsafe { TermPtr::from_raw(NonNull::new_unchecked(Box::into_raw(cell))) }
    }

    fn leak_calculating_blackhole(wrapped: TermPtr) -> TermPtr {
        let cell = Box::new(TermCell {
            life: LifeCell::new_unborn(),
            label: None,
            payload: TermPayload::Blackhole(BlackholeData {
                wrapped,
                state: AtomicPtr::new(crate::term::calculating_sentinel()),
            }),
        });
        cell.life.mark_birth();
        unsafe { TermPtr::from_raw(NonNull::new_unchecked(Box::into_raw(cell))) }
    }

    #[test]
    fn non_blocking_term_is_ready_immediately() {
        let queue = TermQueue::new(8);
        let t = leak_constant(1);
        match handle_popped(&queue, t) {
            PopOutcome::Ready(r) => assert_eq!(r, t),
            PopOutcome::Repostponed => panic!("constant should never block"),
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn blocking_term_is_repostponed_not_reduced() {
        let queue = TermQueue::new(8);
        let wrapped = leak_constant(1);
        let bh = leak_calculating_blackhole(wrapped);
        match handle_popped(&queue, bh) {
            PopOutcome::Repostponed => {}
            PopOutcome::Ready(_) => panic!("calculating blackhole should postpone"),
        }
        assert_eq!(queue.pop(), Some(bh));
    }

    #[test]
    fn repostponed_continuation_waits_behind_a_fresh_spawn() {
        let queue = TermQueue::new(8);
        let spawn = leak_constant(9);
        queue.push(spawn, PRIORITY_SPAWN);

        let wrapped = leak_constant(1);
        let bh = leak_calculating_blackhole(wrapped);
        handle_popped(&queue, bh);

        // priority 0 (spawn) is scanned before priority 1 (postponed).
        assert_eq!(queue.pop(), Some(spawn));
        assert_eq!(queue.pop(), Some(bh));
    }
}
