//! Worker pool - thread lifecycle, the process state machine, and the
//! barrier choreography a global GC cycle rides on (spec.md §4.6, §4.9).
//!
//! Grounded in the original's `Worker`/`RunQueue` (`worker.h`): a fixed
//! number of OS threads, one elected at index 0 to also host the
//! periodic global-GC timer and the SIGINT handler. The original uses
//! `pthread_barrier_t` plus `SIGALRM` to interrupt idle sleepers; this
//! port uses `std::sync::Barrier` and plain bounded sleeps (SPEC_FULL.md
//! §9's open-question resolution: condition-variable-style portability
//! over the original's realtime-signal wakeups), accepting the
//! resulting bounded polling latency since spec.md §1 explicitly places
//! "strict garbage-collection latency bounds" out of scope.

use crate::engine::Engine;
use crate::postponement::{self, PopOutcome};
use crate::queue::PRIORITY_SPAWN;
use crate::reducer::{full_reduce, EvalMode, GcCheckpoint, Stack};
use crate::trace::WorkerState;
use rand::Rng;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Process-wide state (spec.md §4.9). A single `Engine`-owned atomic;
/// every worker (including the thread driving [`Engine::compute`])
/// reads it at the top of its loop and at every reducer checkpoint.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Startup = 0,
    Evaluate = 1,
    GlobalGc = 2,
    DotDump = 3,
    Halt = 4,
    Shutdown = 5,
}

impl ProcessState {
    fn from_u8(v: u8) -> ProcessState {
        match v {
            0 => ProcessState::Startup,
            1 => ProcessState::Evaluate,
            2 => ProcessState::GlobalGc,
            3 => ProcessState::DotDump,
            4 => ProcessState::Halt,
            _ => ProcessState::Shutdown,
        }
    }
}

/// Atomic cell holding the process state, shared by every worker.
pub struct ProcessStateCell(AtomicU8);

impl ProcessStateCell {
    pub fn new(initial: ProcessState) -> ProcessStateCell {
        ProcessStateCell(AtomicU8::new(initial as u8))
    }

    pub fn get(&self) -> ProcessState {
        ProcessState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ProcessState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Adapter handed to [`full_reduce`] so the reducer can cooperate with
/// a global GC cycle without depending on `Engine` or threads directly.
pub struct EngineGcHook<'a> {
    pub engine: &'a Engine,
    pub worker_id: usize,
}

impl GcCheckpoint for EngineGcHook<'_> {
    fn maybe_pause_for_gc(&self, stack: &Stack) {
        if self.engine.process_state.get() == ProcessState::GlobalGc {
            let extra: Vec<_> = stack.terms().collect();
            self.engine.participate_global_gc(self.worker_id, extra);
        }
    }
}

/// Spawn the background worker threads (ids `1..config.workers`); id 0
/// is the thread that calls [`Engine::compute`] and is never spawned
/// here.
pub fn spawn_workers(engine: &Arc<Engine>) -> Vec<JoinHandle<()>> {
    (1..engine.config.workers)
        .map(|id| {
            let engine = Arc::clone(engine);
            std::thread::Builder::new()
                .name(format!("redex-worker-{id}"))
                .spawn(move || worker_loop(engine, id))
                .expect("failed to spawn worker thread")
        })
        .collect()
}

/// The loop body for §4.6: wait at the startup barrier, then
/// repeatedly inspect process state and either collect global garbage,
/// pop and reduce a queued term, idle-collect-and-sleep, or wind down.
fn worker_loop(engine: Arc<Engine>, id: usize) {
    engine.barrier_wait();
    log::debug!("worker {id} started");

    // Stagger first pops so concurrently-released workers don't all
    // race for the same freshly-pushed term (original: `usleep(2000 *
    // id)` right after the startup barrier in `RunQueue`).
    std::thread::sleep(Duration::from_micros(2000 * id as u64));

    loop {
        match engine.process_state.get() {
            ProcessState::GlobalGc => engine.participate_global_gc(id, Vec::new()),
            ProcessState::Evaluate => {
                engine.trace.record_transition(id, WorkerState::Idle, Instant::now());
                match engine.queue.pop() {
                    Some(t) => match postponement::handle_popped(&engine.queue, t) {
                        PopOutcome::Ready(t) => {
                            engine.trace.record_transition(id, WorkerState::Evaluate, Instant::now());
                            run_one(&engine, id, t);
                        }
                        PopOutcome::Repostponed => {}
                    },
                    None => {
                        engine.local_gc(id);
                        idle_sleep(&engine);
                    }
                }
            }
            ProcessState::Halt | ProcessState::Shutdown => {
                engine.local_gc(id);
                engine.local_gc(id);
                engine.barrier_wait();
                log::debug!("worker {id} shut down");
                return;
            }
            ProcessState::Startup | ProcessState::DotDump => {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
}

/// Fully reduce one queue-popped term in forced mode, matching
/// `Worker::RunQueue`'s `t->FullReduce()` call; the result is discarded
/// (the caller only benefits from whatever indirection/blackhole
/// side-effects the reduction published) since `par`'s contract is that
/// the demander, not the spawner, reads the result.
pub fn run_one(engine: &Engine, id: usize, term: crate::term::TermPtr) {
    let ctx = crate::engine::EngineCtx { engine, worker_id: id };
    let hook = EngineGcHook { engine, worker_id: id };
    let mut stack = Stack::new();
    let _ = full_reduce(
        &mut stack,
        term,
        EvalMode::Forced,
        &ctx,
        &engine.global_halt,
        engine.config.max_eval_depth,
        &hook,
    );
}

/// Randomized idle sleep within the configured `[min, max]` range
/// (spec.md §4.6), run between unsuccessful queue pops.
fn idle_sleep(engine: &Engine) {
    let lo = engine.config.worker_idle_sleep_min_us;
    let hi = engine.config.worker_idle_sleep_max_us.max(lo + 1);
    let micros = rand::thread_rng().gen_range(lo..hi);
    std::thread::sleep(Duration::from_micros(micros));
}

pub(crate) fn spawn_par(engine: &Engine, term: crate::term::TermPtr, add_blackhole: bool) -> crate::term::TermPtr {
    if engine.config.workers <= 1 {
        return term;
    }
    let target = term.follow_full_indirection();
    let par_target = if add_blackhole && matches!(target.tag(), crate::term::TermTag::Application) {
        engine
            .heap
            .alloc_blackhole(0, target)
            .expect("blackhole allocation for par() failed")
    } else {
        target
    };
    let global_target = par_target.globalize();
    if !engine.queue.push(global_target, PRIORITY_SPAWN) {
        log::warn!("spawn queue full at priority {PRIORITY_SPAWN}, dropping par() spawn");
    }
    global_target
}
