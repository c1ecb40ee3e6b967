//! Life state - the collector's view of a Term's liveness.
//!
//! Four states, matching the lifecycle in the data model: a term is
//! *unborn* while its fields are still being written, becomes *old*
//! immediately after construction completes, is promoted to *active*
//! when a GC cycle's marking phase reaches it through a root, and
//! becomes *dead* once a sweep reclaims its storage. Static terms are
//! born active and never transition again.

use std::sync::atomic::{AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeState {
    Unborn = 0,
    Active = 1,
    Old = 2,
    Dead = 3,
}

impl LifeState {
    fn from_u8(v: u8) -> LifeState {
        match v {
            0 => LifeState::Unborn,
            1 => LifeState::Active,
            2 => LifeState::Old,
            _ => LifeState::Dead,
        }
    }
}

/// Atomic cell holding a term's life state plus the global/static marker
/// bits from §9's "Global and Static decorators become bit-flags on the
/// Term header" note.
#[derive(Debug)]
pub struct LifeCell(AtomicU8);

const GLOBAL_BIT: u8 = 1 << 2;
const STATIC_BIT: u8 = 1 << 3;

impl LifeCell {
    pub fn new_unborn() -> Self {
        LifeCell(AtomicU8::new(LifeState::Unborn as u8))
    }

    pub fn new_static() -> Self {
        LifeCell(AtomicU8::new(LifeState::Active as u8 | GLOBAL_BIT | STATIC_BIT))
    }

    pub fn state(&self) -> LifeState {
        LifeState::from_u8(self.0.load(Ordering::Acquire) & 0b11)
    }

    fn set_state(&self, state: LifeState) {
        let mut prev = self.0.load(Ordering::Acquire);
        loop {
            let next = (prev & !0b11) | state as u8;
            match self
                .0
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Construction finished: unborn -> old.
    pub fn mark_birth(&self) {
        self.set_state(LifeState::Old);
    }

    /// Reached from a GC root during marking: old -> active. Idempotent -
    /// marking an already-active term is a no-op fixed point, matching
    /// §4.7's "marking active is a fixed point within one cycle".
    pub fn mark_active(&self) -> bool {
        if self.is_static() {
            return false;
        }
        let was_old = self.state() == LifeState::Old;
        if was_old {
            self.set_state(LifeState::Active);
        }
        was_old
    }

    /// Start of a GC cycle: reset every global/new object to old so the
    /// next marking pass can promote only what's reachable.
    pub fn mark_old_for_sweep(&self) {
        if !self.is_static() {
            self.set_state(LifeState::Old);
        }
    }

    pub fn mark_dead(&self) {
        self.set_state(LifeState::Dead);
    }

    pub fn is_active(&self) -> bool {
        self.state() == LifeState::Active
    }

    pub fn is_old(&self) -> bool {
        self.state() == LifeState::Old
    }

    pub fn is_dead(&self) -> bool {
        self.state() == LifeState::Dead
    }

    pub fn is_born(&self) -> bool {
        self.state() != LifeState::Unborn
    }

    pub fn needs_marking(&self) -> bool {
        self.is_old()
    }

    pub fn is_global(&self) -> bool {
        self.0.load(Ordering::Acquire) & GLOBAL_BIT != 0
    }

    pub fn is_static(&self) -> bool {
        self.0.load(Ordering::Acquire) & STATIC_BIT != 0
    }

    pub fn set_global(&self) {
        self.0.fetch_or(GLOBAL_BIT, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn birth_then_mark_then_sweep() {
        let cell = LifeCell::new_unborn();
        assert_eq!(cell.state(), LifeState::Unborn);
        cell.mark_birth();
        assert_eq!(cell.state(), LifeState::Old);
        assert!(cell.mark_active());
        assert!(cell.is_active());
        // already active: not a fresh promotion, but still active
        assert!(!cell.mark_active());
        cell.mark_dead();
        assert!(cell.is_dead());
    }

    #[test]
    fn static_terms_never_die() {
        let cell = LifeCell::new_static();
        assert!(cell.is_active());
        assert!(cell.is_global());
        assert!(cell.is_static());
        // marking is a no-op for static cells
        assert!(!cell.mark_active());
        cell.mark_old_for_sweep();
        assert!(cell.is_active());
    }

    #[test]
    fn global_bit_independent_of_life_state() {
        let cell = LifeCell::new_unborn();
        cell.set_global();
        assert!(cell.is_global());
        cell.mark_birth();
        assert!(cell.is_global());
        assert_eq!(cell.state(), LifeState::Old);
    }
}
