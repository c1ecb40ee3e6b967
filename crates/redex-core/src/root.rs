//! Root stack - thread-local GC roots for terms alive in host scopes.
//!
//! Grounded in the original's `T_tptr`/`T_stackable` (`ptr.h`): every
//! managed reference pushes itself onto a thread-local list on
//! construction and pops on destruction, giving the collector a strict
//! LIFO view of "what's alive on this worker's call stack" without any
//! cooperation from the reducer itself. The original implements this as
//! an intrusive linked list of stack-allocated nodes (`m_prev` chains
//! through addresses already on the C++ call stack); Rust can't safely
//! take the address of a temporary and link through it across frames
//! without pinning, so this port keeps the same push/pop discipline over
//! a thread-local `Vec<TermPtr>` instead (noted in DESIGN.md).

use crate::term::TermPtr;
use std::cell::RefCell;

thread_local! {
    static ROOTS: RefCell<Vec<TermPtr>> = RefCell::new(Vec::new());
}

/// RAII guard: pushes `term` onto this thread's root list on creation,
/// pops it on drop. Construct one for every `TermPtr` a host-language
/// scope needs to keep alive across a point where GC could run.
pub struct RootGuard {
    _private: (),
}

impl RootGuard {
    pub fn new(term: TermPtr) -> RootGuard {
        ROOTS.with(|r| r.borrow_mut().push(term));
        RootGuard { _private: () }
    }
}

impl Drop for RootGuard {
    fn drop(&mut self) {
        ROOTS.with(|r| {
            let popped = r.borrow_mut().pop();
            debug_assert!(popped.is_some(), "root stack underflow: popped past empty");
        });
    }
}

/// Snapshot of every term currently rooted on this thread, bottom to
/// top. Used by local and global GC as the per-worker root set.
pub fn snapshot() -> Vec<TermPtr> {
    ROOTS.with(|r| r.borrow().clone())
}

pub fn depth() -> usize {
    ROOTS.with(|r| r.borrow().len())
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
    fn push_pop_is_strict_lifo() {
        assert_eq!(depth(), 0);
        let a = leak_constant(1);
        let b = leak_constant(2);
        let ga = RootGuard::new(a);
        {
            let _gb = RootGuard::new(b);
            assert_eq!(depth(), 2);
            assert_eq!(snapshot(), vec![a, b]);
        }
        assert_eq!(depth(), 1);
        assert_eq!(snapshot(), vec![a]);
        drop(ga);
        assert_eq!(depth(), 0);
    }
}
