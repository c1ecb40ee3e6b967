//! Term graph - the tagged sum at the heart of the engine.
//!
//! Per the re-architecture in SPEC_FULL.md §9, the original's class
//! hierarchy (`Constant<T>`, `Function`, `Application`, `Blackhole`, each
//! a `Term` subclass) becomes one Rust enum, `TermPayload`, dispatched by
//! `match` instead of virtual calls. The `Global`/`Static` decorators
//! become header bit-flags (see [`life`]) rather than wrapper types.

pub mod life;
pub mod value;

use self::life::LifeCell;
use self::value::Scalar;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A reference to a function implemented by the host. Receives the
/// already-collected arguments (exactly `arity` of them) and a reduction
/// context exposing term construction and globalization, mirroring how
/// the standard library builds new graph nodes from within a primitive.
pub type HostProc = Arc<dyn Fn(&[TermPtr], &dyn ReduceCtx) -> TermPtr + Send + Sync>;

/// What a primitive needs from the engine while it runs: build new
/// terms, globalize results, and force a lazily-held argument down to its
/// normal form. Implemented by the reducer's per-worker context so host
/// procedures never touch the heap or the evaluation stack directly.
///
/// `force` is what lets a host procedure honor call-by-need: arguments
/// arrive as unreduced `TermPtr`s (per §4.2, arithmetic dispatches "when
/// the operand reduces to a matching Constant"), so a primitive like
/// `add` forces both operands itself before reading their payload rather
/// than assuming they already are constants.
pub trait ReduceCtx {
    fn mk_constant(&self, value: Scalar) -> TermPtr;
    fn mk_apply(&self, f: TermPtr, a: TermPtr) -> TermPtr;
    fn globalize(&self, t: TermPtr) -> TermPtr;
    fn worker_id(&self) -> usize;
    /// Fully reduce `t` to its normal form (forced mode) and return the
    /// result. Used by host procedures to read a `Constant`'s payload out
    /// of an argument that hasn't been demanded yet.
    fn force(&self, t: TermPtr) -> TermPtr;
    /// Hand `t` to the worker pool's shared queue for independent
    /// reduction (spec.md §6.1 lists `par` among the operations consumed
    /// by standard-library combinators, alongside `force`), wrapping it in
    /// a blackhole first so a racing demander doesn't duplicate the work.
    fn par(&self, t: TermPtr) -> TermPtr;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermTag {
    Constant,
    Function,
    Application,
    Blackhole,
}

/// One node of the term graph. Lives behind a [`TermPtr`]; allocated and
/// freed exclusively through [`crate::gc::heap::Heap`].
pub struct TermCell {
    pub life: LifeCell,
    pub label: Option<Box<str>>,
    pub payload: TermPayload,
}

pub enum TermPayload {
    Constant(Scalar),
    Function(FunctionData),
    Application(ApplicationData),
    Blackhole(BlackholeData),
}

pub struct FunctionData {
    pub host_proc: HostProc,
    pub arity: u8,
    /// Cached result of the zero-argument reduction (a Function is only
    /// reducible when `arity == 0`). Null until written once.
    pub indirection: AtomicPtr<TermCell>,
}

pub struct ApplicationData {
    pub f: TermPtr,
    pub a: TermPtr,
    /// Null until the application completes reduction; thereafter the
    /// authoritative value, per invariant 4 in the data model.
    pub indirection: AtomicPtr<TermCell>,
}

pub struct BlackholeData {
    pub wrapped: TermPtr,
    /// null = noresult, [`calculating_sentinel`] = calculating,
    /// anything else = done(pointer).
    pub state: AtomicPtr<TermCell>,
}

/// Sentinel value marking "calculating" - not a valid heap address, so it
/// can never collide with a real done-result pointer.
pub fn calculating_sentinel() -> *mut TermCell {
    0x1usize as *mut TermCell
}

/// A `Copy` handle to a heap-resident [`TermCell`]. All graph edges are
/// `TermPtr`s; the allocator is the sole owner of the pointee's memory.
#[derive(Clone, Copy)]
pub struct TermPtr(NonNull<TermCell>);

impl fmt::Debug for TermPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TermPtr({:p})", self.0.as_ptr())
    }
}

impl PartialEq for TermPtr {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for TermPtr {}

unsafe impl Send for TermPtr {}
unsafe impl Sync for TermPtr {}

impl TermPtr {
    /// # Safety
    /// `ptr` must point to a live, properly initialized `TermCell` for
    /// the entire lifetime this `TermPtr` is used.
    pub unsafe fn from_raw(ptr: NonNull<TermCell>) -> TermPtr {
        TermPtr(ptr)
    }

    pub fn as_raw(&self) -> NonNull<TermCell> {
        self.0
    }

    pub fn get(&self) -> &TermCell {
        unsafe { self.0.as_ref() }
    }

    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }

    pub fn tag(&self) -> TermTag {
        match &self.get().payload {
            TermPayload::Constant(_) => TermTag::Constant,
            TermPayload::Function(_) => TermTag::Function,
            TermPayload::Application(_) => TermTag::Application,
            TermPayload::Blackhole(_) => TermTag::Blackhole,
        }
    }

    pub fn is_global(&self) -> bool {
        self.get().life.is_global()
    }

    /// Chase a chain of indirections to a fixed point. Acyclic by
    /// construction (invariant 7): the reducer never writes an
    /// indirection into a term reachable from its own pre-indirection
    /// body, so this always terminates.
    pub fn follow_full_indirection(&self) -> TermPtr {
        let mut cur = *self;
        loop {
            let next = match &cur.get().payload {
                TermPayload::Function(f) => {
                    let p = f.indirection.load(Ordering::Acquire);
                    NonNull::new(p)
                }
                TermPayload::Application(a) => {
                    let p = a.indirection.load(Ordering::Acquire);
                    NonNull::new(p)
                }
                TermPayload::Blackhole(b) => {
                    let p = b.state.load(Ordering::Acquire);
                    if p.is_null() || p == calculating_sentinel() {
                        None
                    } else {
                        NonNull::new(p)
                    }
                }
                TermPayload::Constant(_) => None,
            };
            match next {
                Some(p) => cur = unsafe { TermPtr::from_raw(p) },
                None => return cur,
            }
        }
    }

    /// Every term this one directly references - the edges the marking
    /// worklist walks during a GC cycle (§4.7 phase 3). Follows
    /// Application indirections, a Function's cached 0-arity result,
    /// and a Blackhole's wrapped term plus its done result.
    pub fn children(&self) -> Vec<TermPtr> {
        match &self.get().payload {
            TermPayload::Constant(_) => Vec::new(),
            TermPayload::Function(f) => {
                match NonNull::new(f.indirection.load(Ordering::Acquire)) {
                    Some(p) => vec![unsafe { TermPtr::from_raw(p) }],
                    None => Vec::new(),
                }
            }
            TermPayload::Application(a) => {
                let mut kids = vec![a.f, a.a];
                if let Some(p) = NonNull::new(a.indirection.load(Ordering::Acquire)) {
                    kids.push(unsafe { TermPtr::from_raw(p) });
                }
                kids
            }
            TermPayload::Blackhole(b) => {
                let mut kids = vec![b.wrapped];
                let state = b.state.load(Ordering::Acquire);
                if !state.is_null() && state != calculating_sentinel() {
                    kids.push(unsafe { TermPtr::from_raw(NonNull::new_unchecked(state)) });
                }
                kids
            }
        }
    }

    /// Whether reducing this term would block the calling worker right
    /// now (a Blackhole in `calculating` state with no result yet). Used
    /// by `catch`/`normal`/`stressed` frame handling to decide whether to
    /// pop instead of entering the wait path.
    pub fn reduce_will_block(&self) -> bool {
        matches!(&self.get().payload, TermPayload::Blackhole(b)
            if b.state.load(Ordering::Acquire) == calculating_sentinel())
    }

    /// Produce a globally-visible equivalent of this term (§6.1
    /// `globalize`). Idempotent on an already-global term (round-trip
    /// property in §8.2). Invariant 1 requires every field a global
    /// term references to itself be global, so this recurses over
    /// children before marking `self` global - a Blackhole's wrapped
    /// term (and its done result, if any) and an Application's operator
    /// and operand are globalized first, matching §4.4's "both the
    /// blackhole and its wrapped term must be globalized first".
    /// Acyclic by construction (invariant 7), so the recursion always
    /// terminates.
    pub fn globalize(&self) -> TermPtr {
        if self.is_global() {
            return *self;
        }
        for child in self.children() {
            child.globalize();
        }
        self.get().life.set_global();
        *self
    }

    /// Outcome of a single `Reduce()` step, following SPEC_FULL.md §4.3
    /// variant-by-variant.
    pub fn reduce(&self, ctx: &dyn ReduceCtx) -> ReduceOutcome {
        match &self.get().payload {
            TermPayload::Constant(_) => ReduceOutcome::Value(*self),
            TermPayload::Function(f) => reduce_function(*self, f, ctx),
            TermPayload::Application(a) => reduce_application(*self, a, ctx),
            TermPayload::Blackhole(b) => reduce_blackhole(*self, b, ctx),
        }
    }
}

pub enum ReduceOutcome {
    /// Final (or next-step) value. If identical to the term reduced, the
    /// reducer treats this as "stuck" (no further progress possible).
    Value(TermPtr),
    /// `Reduce` needs `inner` evaluated first (pushed as a new frame in
    /// the given mode) before this term can make progress.
    NeedsFrame(TermPtr, crate::reducer::EvalMode),
}

fn reduce_function(this: TermPtr, f: &FunctionData, ctx: &dyn ReduceCtx) -> ReduceOutcome {
    let existing = f.indirection.load(Ordering::Acquire);
    if let Some(p) = NonNull::new(existing) {
        return ReduceOutcome::Value(unsafe { TermPtr::from_raw(p) });
    }
    if f.arity != 0 {
        return ReduceOutcome::Value(this);
    }
    let result = (f.host_proc)(&[], ctx);
    let global_result = ctx.globalize(result);
    // Single writer by construction: first worker to reduce a 0-arity
    // function wins; a racing writer's CAS loss discards its (harmless,
    // semantically-equal) duplicate and reads the winner's value.
    match f.indirection.compare_exchange(
        std::ptr::null_mut(),
        global_result.as_raw().as_ptr(),
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        Ok(_) => ReduceOutcome::Value(global_result),
        Err(winner) => ReduceOutcome::Value(unsafe { TermPtr::from_raw(NonNull::new_unchecked(winner)) }),
    }
}

/// Arity of the function at the base of an application chain, or `None`
/// if the base isn't (yet) a function.
fn base_arity(t: TermPtr) -> Option<u8> {
    match &t.get().payload {
        TermPayload::Function(f) => Some(f.arity),
        _ => None,
    }
}

/// Walk the left spine of nested Applications starting at `this`,
/// collecting arguments outward-in until reaching a non-Application base
/// term. Returns `(base, args)` where `args[0]` was applied first.
fn collect_spine(this: TermPtr) -> (TermPtr, Vec<TermPtr>) {
    let mut args = Vec::new();
    let mut cur = this;
    loop {
        match &cur.get().payload {
            TermPayload::Application(a) => {
                args.push(a.a);
                cur = a.f;
            }
            _ => break,
        }
    }
    args.reverse();
    (cur, args)
}

fn reduce_application(this: TermPtr, a: &ApplicationData, ctx: &dyn ReduceCtx) -> ReduceOutcome {
    let existing = a.indirection.load(Ordering::Acquire);
    if let Some(p) = NonNull::new(existing) {
        return ReduceOutcome::Value(unsafe { TermPtr::from_raw(p) });
    }

    let (raw_base, args) = collect_spine(this);
    // `raw_base` is the spine's structural root, which may be a
    // Blackhole whose wait/finish protocol has already produced a done
    // value, or a Function whose own 0-arity indirection already ran -
    // resolve through both before asking for its arity.
    let base = raw_base.follow_full_indirection();
    let needed = match base_arity(base) {
        Some(n) => n,
        None => {
            // base isn't a function yet - reduce it first, then retry
            // this node. Pushing the unresolved `raw_base` rather than
            // `base` lets a concurrent Blackhole's wait path run again
            // on retry if it still hasn't finished.
            return ReduceOutcome::NeedsFrame(raw_base, crate::reducer::EvalMode::Forced);
        }
    };

    if (args.len() as u8) < needed {
        // under-saturated: not reducible standalone, wait for an outer
        // application to supply the rest.
        return ReduceOutcome::Value(this);
    }

    if needed == 0 {
        // the function itself needs reducing (its 0-arity indirection)
        // before this application can proceed.
        return ReduceOutcome::NeedsFrame(raw_base, crate::reducer::EvalMode::Forced);
    }

    let TermPayload::Function(f) = &base.get().payload else {
        unreachable!("base_arity only returns Some for Function terms")
    };
    let consumed = &args[..needed as usize];
    let result = (f.host_proc)(consumed, ctx);
    let mut global_result = ctx.globalize(result);

    // Over-saturated: `this` carried more arguments than `f.arity`
    // consumed. Splice the leftover arguments back onto the host
    // procedure's result as fresh (unreduced) Applications - per
    // §4.3's "the result either completes ... or returns a residual
    // that is spliced back" - so the next reduction step applies them
    // to whatever the host procedure returned.
    for &extra in &args[needed as usize..] {
        global_result = ctx.globalize(ctx.mk_apply(global_result, extra));
    }

    match a.indirection.compare_exchange(
        std::ptr::null_mut(),
        global_result.as_raw().as_ptr(),
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        Ok(_) => ReduceOutcome::Value(global_result),
        Err(winner) => ReduceOutcome::Value(unsafe { TermPtr::from_raw(NonNull::new_unchecked(winner)) }),
    }
}

fn reduce_blackhole(this: TermPtr, b: &BlackholeData, ctx: &dyn ReduceCtx) -> ReduceOutcome {
    let current = b.state.load(Ordering::Acquire);
    if current.is_null() {
        match b.state.compare_exchange(
            std::ptr::null_mut(),
            calculating_sentinel(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => ReduceOutcome::NeedsFrame(b.wrapped, crate::reducer::EvalMode::Forced),
            Err(_) => reduce_blackhole(this, b, ctx), // lost the race, re-read and wait
        }
    } else if current == calculating_sentinel() {
        wait_for_result(b)
    } else {
        ReduceOutcome::Value(unsafe { TermPtr::from_raw(NonNull::new_unchecked(current)) })
    }
}

/// Exponential backoff from ~2ms to ~64ms while another worker computes
/// the shared result, per the blackhole protocol's Wait step.
fn wait_for_result(b: &BlackholeData) -> ReduceOutcome {
    let mut backoff_us: u64 = 2_000;
    loop {
        let current = b.state.load(Ordering::Acquire);
        if current != calculating_sentinel() {
            return ReduceOutcome::Value(unsafe { TermPtr::from_raw(NonNull::new_unchecked(current)) });
        }
        std::thread::sleep(Duration::from_micros(backoff_us));
        backoff_us = (backoff_us * 2).min(64_000);
    }
}

impl BlackholeData {
    /// Idempotent: a second `finish` call just returns the existing
    /// done value, per the Finish step's contract.
    pub fn finish(&self, result: TermPtr) -> TermPtr {
        match self.state.compare_exchange(
            calculating_sentinel(),
            result.as_raw().as_ptr(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => result,
            Err(existing) => unsafe { TermPtr::from_raw(NonNull::new_unchecked(existing)) },
        }
    }

    pub fn is_done(&self) -> bool {
        let p = self.state.load(Ordering::Acquire);
        !p.is_null() && p != calculating_sentinel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_matches_payload() {
        let cell = TermCell {
            life: LifeCell::new_unborn(),
            label: None,
            payload: TermPayload::Constant(Scalar::Int(1)),
        };
        let boxed = Box::new(cell);
        let ptr = unsafe { TermPtr::from_raw(NonNull::new_unchecked(Box::into_raw(boxed))) };
        assert_eq!(ptr.tag(), TermTag::Constant);
    }

    #[test]
    fn calculating_sentinel_is_not_null_and_not_a_real_ptr() {
        assert!(!calculating_sentinel().is_null());
        assert_ne!(calculating_sentinel(), std::ptr::null_mut());
    }
}
