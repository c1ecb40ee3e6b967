//! Reducer - the iterative evaluator.
//!
//! Each worker owns exactly one [`Stack`] of [`EvalFrame`]s and drives it
//! through [`full_reduce`]. There is no recursion in the evaluator itself
//! even though the term graph is recursive - this is the "coroutine
//! control flow" re-architecture from SPEC_FULL.md §9: the stack *is*
//! the continuation.

use crate::term::{ReduceCtx, ReduceOutcome, TermPtr, TermTag};
use std::sync::atomic::{AtomicBool, Ordering};

/// Evaluation mode, carried per-frame. Controls how deep a reduction
/// goes before the frame pops itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Frame pops itself unconditionally; used to truncate eager
    /// descent (the `stop` combinator).
    Stop,
    /// Like `Normal`, but frames tagged non-catch are converted to
    /// `Halt` while a global halt is propagating; a `catch` frame
    /// absorbs that conversion and stops it from going further down.
    Catch,
    /// Stops at non-reducible, blocked, or lazy-marked terms.
    Normal,
    /// Stops at non-reducible and blocked terms (drives past laziness
    /// markers the `block` combinator wouldn't).
    Stressed,
    /// Stops only at non-reducible terms - drives computation all the
    /// way to normal form.
    Forced,
    /// Cooperative cancellation in progress; the frame pops once
    /// observed, letting the halt propagate further down the stack.
    Halt,
}

impl EvalMode {
    /// Eagerness ordering used by the laziness ceiling check: `Normal` <
    /// `Stressed` < `Forced`. `Stop`/`Catch`/`Halt` aren't part of this
    /// ladder and never compare as "at or below" a ceiling.
    fn eagerness_level(self) -> Option<u8> {
        match self {
            EvalMode::Normal => Some(0),
            EvalMode::Stressed => Some(1),
            EvalMode::Forced => Some(2),
            _ => None,
        }
    }
}

/// Laziness ceiling attached to a frame by the `lazy`/`block`/`stop`
/// contracts (SPEC_FULL.md §4.3 "Laziness and blocking contracts"): the
/// frame pops immediately whenever the active mode's eagerness is at or
/// below the ceiling, and proceeds otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyCeiling {
    /// `lazy(t)`: pop at `Normal`, proceed at `Stressed`/`Forced`.
    Lazy,
    /// `block(t)`: pop at `Normal`/`Stressed`, proceed at `Forced`.
    Block,
    /// No ceiling: ordinary reduction.
    None,
}

impl LazyCeiling {
    fn blocks_at(self, mode: EvalMode) -> bool {
        let Some(level) = mode.eagerness_level() else {
            return false;
        };
        match self {
            LazyCeiling::Lazy => level <= 0,
            LazyCeiling::Block => level <= 1,
            LazyCeiling::None => false,
        }
    }
}

/// A pair `(term, mode)` on the per-worker evaluation stack, with the
/// optional laziness ceiling from `lazy`/`block`.
#[derive(Debug, Clone, Copy)]
pub struct EvalFrame {
    pub term: TermPtr,
    pub mode: EvalMode,
    pub ceiling: LazyCeiling,
    /// Set when this frame is reducing a Blackhole's wrapped term on
    /// behalf of the worker that won the Enter race: once the frame's
    /// own term reaches a fixed point, its value is published via
    /// `BlackholeData::finish` before the frame pops (the blackhole
    /// protocol's Finish step). `None` for every ordinary frame.
    pub finish_target: Option<TermPtr>,
}

impl EvalFrame {
    pub fn new(term: TermPtr, mode: EvalMode) -> EvalFrame {
        EvalFrame {
            term,
            mode,
            ceiling: LazyCeiling::None,
            finish_target: None,
        }
    }

    pub fn lazy(term: TermPtr) -> EvalFrame {
        EvalFrame {
            term,
            mode: EvalMode::Normal,
            ceiling: LazyCeiling::Lazy,
            finish_target: None,
        }
    }

    pub fn block(term: TermPtr) -> EvalFrame {
        EvalFrame {
            term,
            mode: EvalMode::Normal,
            ceiling: LazyCeiling::Block,
            finish_target: None,
        }
    }

    pub fn stop(term: TermPtr) -> EvalFrame {
        EvalFrame {
            term,
            mode: EvalMode::Stop,
            ceiling: LazyCeiling::None,
            finish_target: None,
        }
    }
}

/// Explicit per-worker evaluation stack. A thin `Vec` wrapper named for
/// its role, matching the data model's `Stack<EvalFrame>`.
#[derive(Debug, Default)]
pub struct Stack {
    frames: Vec<EvalFrame>,
}

impl Stack {
    pub fn new() -> Stack {
        Stack { frames: Vec::new() }
    }

    pub fn push(&mut self, frame: EvalFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<EvalFrame> {
        self.frames.pop()
    }

    pub fn top_mut(&mut self) -> Option<&mut EvalFrame> {
        self.frames.last_mut()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Every term currently on the stack - GC roots contributed by a
    /// worker's in-flight evaluation (§4.7 phase 2: "eval stack
    /// contents").
    pub fn terms(&self) -> impl Iterator<Item = TermPtr> + '_ {
        self.frames.iter().map(|f| f.term)
    }
}

/// Hook the reducer calls once per outer-loop iteration, giving the
/// caller a chance to cooperate with a global GC cycle without the
/// reducer itself knowing anything about workers or barriers (§5:
/// "the reducer never yields except by ... entering a barrier for
/// global GC"). The no-op [`NoGcCheckpoint`] is used wherever a full
/// reduce runs outside the worker pool (e.g. in tests).
pub trait GcCheckpoint {
    fn maybe_pause_for_gc(&self, stack: &Stack);
}

pub struct NoGcCheckpoint;

impl GcCheckpoint for NoGcCheckpoint {
    fn maybe_pause_for_gc(&self, _stack: &Stack) {}
}

/// Outcome of driving a term to completion via [`full_reduce`].
pub struct ReduceResult {
    pub term: TermPtr,
    pub halted: bool,
}

/// Error raised when the evaluation stack grows past the configured
/// depth limit (§7 "Stack overflow").
#[derive(Debug, Clone, Copy)]
pub struct StackOverflow {
    pub depth: usize,
}

/// Drive `term` to the point its `mode` dictates, iterating the explicit
/// stack rather than recursing. Mirrors SPEC_FULL.md §4.3's `FullReduce`
/// pseudocode exactly, including halt propagation and the
/// lazy/block/stop ceiling.
pub fn full_reduce(
    stack: &mut Stack,
    term: TermPtr,
    mode: EvalMode,
    ctx: &dyn ReduceCtx,
    global_halt: &AtomicBool,
    max_depth: usize,
    gc: &dyn GcCheckpoint,
) -> Result<ReduceResult, StackOverflow> {
    let floor = stack.len();
    stack.push(EvalFrame::new(term, mode));

    while stack.len() > floor {
        if stack.len() > max_depth {
            return Err(StackOverflow { depth: stack.len() });
        }

        gc.maybe_pause_for_gc(stack);

        let halting = global_halt.load(Ordering::Acquire);
        let frame = stack.top_mut().expect("stack.len() > floor implies non-empty");
        if halting && frame.mode != EvalMode::Catch {
            frame.mode = EvalMode::Halt;
        }

        let frame = *stack.top_mut().unwrap();
        match frame.mode {
            EvalMode::Stop => {
                stack.pop();
            }
            EvalMode::Catch | EvalMode::Normal | EvalMode::Stressed => {
                if frame.ceiling.blocks_at(frame.mode) {
                    stack.pop();
                    continue;
                }
                if frame.term.reduce_will_block() {
                    stack.pop();
                    continue;
                }
                step_forced(stack, frame, ctx);
            }
            EvalMode::Forced => {
                if frame.ceiling.blocks_at(frame.mode) {
                    stack.pop();
                    continue;
                }
                step_forced(stack, frame, ctx);
            }
            EvalMode::Halt => {
                stack.pop();
                global_halt.store(true, Ordering::Release);
            }
        }
    }

    Ok(ReduceResult {
        term,
        halted: global_halt.load(Ordering::Acquire),
    })
}

/// The `forced` arm of the pseudocode: reduce one step, and either make
/// progress, get stuck, or have a new frame pushed underneath us.
fn step_forced(stack: &mut Stack, frame: EvalFrame, ctx: &dyn ReduceCtx) {
    match frame.term.reduce(ctx) {
        ReduceOutcome::Value(r) if r == frame.term => {
            // stuck: no further progress possible for this term.
            stack.pop();
            if let Some(bh) = frame.finish_target {
                finish_blackhole(bh, r);
            }
        }
        ReduceOutcome::Value(r) => {
            // progress: replace the top frame's term and keep looping.
            if let Some(top) = stack.top_mut() {
                top.term = r;
            }
        }
        ReduceOutcome::NeedsFrame(inner, inner_mode) => {
            let mut pushed = EvalFrame::new(inner, inner_mode);
            // A Blackhole pushes its wrapped term to be forced on the
            // calculating worker's behalf; tag that one frame so its
            // eventual fixed point gets published back through Finish.
            if frame.term.tag() == TermTag::Blackhole {
                pushed.finish_target = Some(frame.term);
            }
            stack.push(pushed);
        }
    }
}

fn finish_blackhole(blackhole: TermPtr, result: TermPtr) {
    if let crate::term::TermPayload::Blackhole(b) = &blackhole.get().payload {
        b.finish(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eagerness_ladder_orders_as_documented() {
        assert!(EvalMode::Normal.eagerness_level() < EvalMode::Stressed.eagerness_level());
        assert!(EvalMode::Stressed.eagerness_level() < EvalMode::Forced.eagerness_level());
    }

    #[test]
    fn lazy_ceiling_pops_at_normal_only() {
        assert!(LazyCeiling::Lazy.blocks_at(EvalMode::Normal));
        assert!(!LazyCeiling::Lazy.blocks_at(EvalMode::Stressed));
        assert!(!LazyCeiling::Lazy.blocks_at(EvalMode::Forced));
    }

    #[test]
    fn block_ceiling_pops_at_normal_and_stressed() {
        assert!(LazyCeiling::Block.blocks_at(EvalMode::Normal));
        assert!(LazyCeiling::Block.blocks_at(EvalMode::Stressed));
        assert!(!LazyCeiling::Block.blocks_at(EvalMode::Forced));
    }

    #[test]
    fn stack_push_pop_matches_floor_discipline() {
        let mut stack = Stack::new();
        assert_eq!(stack.len(), 0);
        // Can't construct a real TermPtr without a heap; structural
        // behavior of the stack itself is what's under test here.
        assert!(stack.pop().is_none());
    }
}
