//! Engine - the handle a host program drives the runtime through.
//!
//! Everything that would otherwise be scattered process-wide globals -
//! the heap, the work queue, the process state, the GC barrier, the
//! worker threads - is gathered into one `Engine`, matching the
//! re-architecture note in SPEC_FULL.md §9 ("encapsulated in an Engine
//! handle ... not scattered as free-floating globals"). Grounded in the
//! teacher's `fgc::runtime::Runtime`: a thin orchestrator that owns the
//! collector, starts/stops a pool of cooperating threads, and exposes a
//! small set of methods the rest of the crate (and eventually the
//! standard-library crate this engine is built for) calls into.

use crate::config::RuntimeConfig;
use crate::error::{RedexError, Result};
use crate::gc::collector;
use crate::gc::heap::Heap;
use crate::queue::TermQueue;
use crate::reducer::{full_reduce, EvalMode, Stack};
use crate::root;
use crate::term::value::Scalar;
use crate::term::{HostProc, ReduceCtx, TermPayload, TermPtr};
use crate::trace::{NullSink, TraceSink, WorkerState};
use crate::worker::{self, EngineGcHook, ProcessState, ProcessStateCell};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// The engine's view of a `ReduceCtx`: one of these is built fresh for
/// every reduction driven on a given worker id, so host procedures see a
/// small, cheaply-constructed context rather than reaching through the
/// engine directly.
pub struct EngineCtx<'a> {
    pub engine: &'a Engine,
    pub worker_id: usize,
}

impl ReduceCtx for EngineCtx<'_> {
    fn mk_constant(&self, value: Scalar) -> TermPtr {
        self.engine
            .heap
            .alloc_constant(self.worker_id, value)
            .expect("constant allocation failed")
    }

    fn mk_apply(&self, f: TermPtr, a: TermPtr) -> TermPtr {
        self.engine
            .heap
            .alloc_application(self.worker_id, f, a)
            .expect("application allocation failed")
    }

    fn globalize(&self, t: TermPtr) -> TermPtr {
        t.globalize()
    }

    fn worker_id(&self) -> usize {
        self.worker_id
    }

    fn force(&self, t: TermPtr) -> TermPtr {
        self.engine.demand(self.worker_id, t, EvalMode::Forced)
    }

    fn par(&self, t: TermPtr) -> TermPtr {
        worker::spawn_par(self.engine, t, true)
    }
}

/// Top-level runtime handle (spec.md §6.1's public operations, §4.6's
/// worker pool, §4.7's collector). One `Engine` corresponds to one
/// computation: build a graph against it, call [`Engine::compute`]
/// exactly once, and the pool winds itself down as `compute` returns.
pub struct Engine {
    pub config: RuntimeConfig,
    pub heap: Heap,
    pub queue: TermQueue,
    pub process_state: ProcessStateCell,
    pub global_halt: AtomicBool,
    pub trace: Arc<dyn TraceSink>,

    /// Startup/global-GC/shutdown rendezvous point, sized to exactly
    /// `config.workers` participants: the `config.workers - 1` spawned
    /// background threads plus the thread that calls [`Engine::compute`]
    /// (worker 0). Reused across every cycle - `std::sync::Barrier`
    /// resets itself once all parties arrive.
    barrier: Barrier,
    /// One root-vector slot per worker, filled in during the "mark from
    /// roots" phase of a global GC cycle before the elected leader drains
    /// them (§4.7 phases 2-3).
    gc_roots: Mutex<Vec<Vec<TermPtr>>>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
    /// Round-robins allocations made by calls that aren't running on a
    /// pool worker thread (e.g. host code building the initial graph, or
    /// [`Engine::eval`] called directly from a test).
    alloc_cursor: AtomicUsize,
    interrupted: AtomicBool,
}

impl Engine {
    /// Validate `config`, build the heap and queue, and spawn the worker
    /// pool plus the worker-0 monitor thread (periodic global GC timer
    /// and SIGINT handling - SPEC_FULL.md §4.6/§9's condvar-free
    /// portable stand-in for the original's SIGALRM-driven design).
    pub fn new(config: RuntimeConfig) -> Result<Arc<Engine>> {
        Engine::build(config, Arc::new(NullSink))
    }

    fn build(config: RuntimeConfig, trace: Arc<dyn TraceSink>) -> Result<Arc<Engine>> {
        config.validate()?;

        let engine = Arc::new(Engine {
            heap: Heap::new(config.workers, config.macroblock_size),
            queue: TermQueue::new(config.queue_capacity),
            process_state: ProcessStateCell::new(ProcessState::Startup),
            global_halt: AtomicBool::new(false),
            trace,
            barrier: Barrier::new(config.workers),
            gc_roots: Mutex::new(vec![Vec::new(); config.workers]),
            worker_handles: Mutex::new(Vec::new()),
            monitor_handle: Mutex::new(None),
            alloc_cursor: AtomicUsize::new(0),
            interrupted: AtomicBool::new(false),
            config,
        });

        if let Some(max) = engine.config.max_macroblocks_per_worker {
            engine.heap.set_max_macroblocks_per_worker(max);
        }
        // Wiring this through a weak reference (rather than handing the
        // heap an `Arc<Engine>` directly) avoids an Engine -> Heap ->
        // Engine reference cycle, since `heap` is a plain field on
        // `Engine` itself.
        let weak = Arc::downgrade(&engine);
        engine.heap.set_global_gc_hook(move |worker_id| {
            let Some(engine) = weak.upgrade() else { return };
            // Only meaningful once the pool is actually running its main
            // loop (`compute` has flipped state to `Evaluate` and joined
            // the startup barrier as worker 0) - triggering it any
            // earlier would make this thread an extra, unplanned party
            // to a barrier sized for exactly `config.workers` callers.
            if engine.process_state.get() == ProcessState::Evaluate {
                engine.process_state.set(ProcessState::GlobalGc);
                engine.participate_global_gc(worker_id, Vec::new());
            }
        });

        *engine.worker_handles.lock() = worker::spawn_workers(&engine);
        *engine.monitor_handle.lock() = Some(spawn_monitor(&engine));
        install_sigint_handler();

        Ok(engine)
    }

    /// Same as [`Engine::new`] but with an explicit trace sink (e.g. a
    /// [`crate::trace::FileSink`] wired up by the process surface).
    pub fn with_trace(config: RuntimeConfig, trace: Arc<dyn TraceSink>) -> Result<Arc<Engine>> {
        Engine::build(config, trace)
    }

    fn next_alloc_worker(&self) -> usize {
        self.alloc_cursor.fetch_add(1, Ordering::Relaxed) % self.config.workers
    }

    // ---- §6.1 public operations --------------------------------------

    /// `constant(value) -> term`: wrap a primitive.
    pub fn constant(&self, value: Scalar) -> TermPtr {
        self.heap
            .alloc_constant(self.next_alloc_worker(), value)
            .expect("constant allocation failed")
    }

    /// `function(host_proc, arity, label?) -> term`: always global,
    /// always alive (§3.1: "Global by construction"). `arity` must be in
    /// {0,1,2,3,4,5} per the data model's known-arity invariant.
    pub fn function(&self, host_proc: HostProc, arity: u8, label: Option<&str>) -> TermPtr {
        assert!(
            arity <= 5,
            "function arity must be in 0..=5, got {arity}"
        );
        self.heap
            .alloc_function(self.next_alloc_worker(), host_proc, arity, label)
            .expect("function allocation failed")
    }

    /// `apply(f, a) -> term`: construct an application; does not reduce.
    pub fn apply(&self, f: TermPtr, a: TermPtr) -> TermPtr {
        self.heap
            .alloc_application(self.next_alloc_worker(), f, a)
            .expect("application allocation failed")
    }

    /// `globalize(term) -> term`: idempotent on already-global terms.
    pub fn globalize(&self, t: TermPtr) -> TermPtr {
        t.globalize()
    }

    /// `par(term) -> term`: spawn parallel evaluation; returns a term
    /// equivalent under demand to its argument (§4.5).
    pub fn par(self: &Arc<Self>, term: TermPtr) -> TermPtr {
        worker::spawn_par(self, term, true)
    }

    /// `eval(term, mode) -> term`: drive reduction in the given mode.
    /// Unlike [`Engine::compute`], this does not join the worker-pool's
    /// startup/shutdown barrier - it's a standalone demand usable any
    /// number of times, from any thread, including concurrently (the
    /// blackhole protocol is what keeps concurrent demands of the same
    /// term safe; see §4.4 and the contended-blackhole property in
    /// §8.4#6).
    pub fn eval(&self, term: TermPtr, mode: EvalMode) -> TermPtr {
        self.demand(self.next_alloc_worker(), term, mode)
    }

    /// `catchHalt(term)`: guard a term's evaluation against cooperative
    /// shutdown - a `Catch` frame absorbs a halt-in-progress rather than
    /// converting to `Halt` itself, per the reducer's mode semantics.
    pub fn catch_halt(&self, term: TermPtr) -> TermPtr {
        self.eval(term, EvalMode::Catch)
    }

    /// `halt()`: initiate cooperative shutdown (§6.1, §7 "SIGINT").
    pub fn halt(&self) {
        self.global_halt.store(true, Ordering::Release);
        self.process_state.set(ProcessState::Halt);
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// `compute<T>(term) -> T`: the only total operation (§6.1) - fully
    /// reduces `term` on the calling thread (acting as worker 0), then
    /// winds the pool down. Blocks until a result is produced or the
    /// process aborts.
    pub fn compute<T>(self: &Arc<Self>, term: TermPtr) -> Result<T>
    where
        for<'a> T: TryFrom<&'a Scalar, Error = crate::term::value::NonNumeric>,
    {
        self.barrier_wait();
        self.process_state.set(ProcessState::Evaluate);

        let result = self.demand(0, term, EvalMode::Forced);

        // Flip out of `Evaluate` the instant reduction is done, before
        // reading the result back: otherwise a global-GC timer tick
        // landing in the gap between `demand` returning and `shutdown`
        // running could see `Evaluate`, send a background worker to the
        // barrier, and leave it waiting forever for a worker 0 that is
        // never going to check in again.
        self.process_state.set(ProcessState::Shutdown);

        let value = match &result.get().payload {
            TermPayload::Constant(scalar) => T::try_from(scalar).map_err(|e| {
                RedexError::NonApplicable {
                    label: e.0,
                    worker_id: 0,
                }
            })?,
            _ => {
                return Err(RedexError::NonApplicable {
                    label: "compute() reached a non-constant normal form".to_string(),
                    worker_id: 0,
                })
            }
        };

        self.shutdown();
        Ok(value)
    }

    /// Drive `term` to the point `mode` dictates on `worker_id`'s
    /// behalf, using a fresh [`Stack`] and the same GC-cooperation hook
    /// a pool worker's own reduction loop uses.
    pub(crate) fn demand(&self, worker_id: usize, term: TermPtr, mode: EvalMode) -> TermPtr {
        let ctx = EngineCtx {
            engine: self,
            worker_id,
        };
        let hook = EngineGcHook {
            engine: self,
            worker_id,
        };
        let mut stack = Stack::new();
        match full_reduce(
            &mut stack,
            term,
            mode,
            &ctx,
            &self.global_halt,
            self.config.max_eval_depth,
            &hook,
        ) {
            // `full_reduce` hands back the term it was given, not its
            // result - a reduced Application/Function publishes its
            // value through its own `indirection` (and a Blackhole
            // through its `state`), so the normal form is read back by
            // chasing those rather than trusting the return value.
            Ok(_) => term.follow_full_indirection(),
            Err(overflow) => {
                panic!(
                    "evaluation stack overflow at depth {} (worker {})",
                    overflow.depth, worker_id
                )
            }
        }
    }

    // ---- GC and worker-pool internals ----------------------------------

    pub(crate) fn barrier_wait(&self) {
        self.barrier.wait();
    }

    /// Run local GC scoped to `worker_id`'s own lists, rooted from this
    /// calling thread's root stack (§4.7 "Local GC").
    pub(crate) fn local_gc(&self, worker_id: usize) -> collector::GcStats {
        collector::local_gc(&self.heap, worker_id, root::snapshot())
    }

    /// One participant's contribution to a global GC cycle (§4.7,
    /// phases 1-7): record this worker's roots, rendezvous at the
    /// barrier, let the elected leader (whichever thread `Barrier::wait`
    /// reports as leader) drain every worker's roots and run the
    /// collector, then rendezvous again so nobody proceeds before the
    /// process state flips back to `Evaluate`.
    pub(crate) fn participate_global_gc(&self, worker_id: usize, extra_roots: Vec<TermPtr>) {
        let mut roots = root::snapshot();
        roots.extend(extra_roots);
        self.gc_roots.lock()[worker_id] = roots;
        self.trace
            .record_transition(worker_id, WorkerState::GlobalGc, Instant::now());

        let result = self.barrier.wait();
        if result.is_leader() {
            let mut slots = self.gc_roots.lock();
            let mut all_roots: Vec<Vec<TermPtr>> =
                std::mem::replace(&mut *slots, vec![Vec::new(); self.config.workers]);
            all_roots.push(self.queue.snapshot_roots());
            drop(slots);

            let stats = collector::global_gc(&self.heap, all_roots);
            log::info!(
                "global gc complete: kept={} reclaimed={}",
                stats.kept,
                stats.reclaimed
            );
            self.process_state.set(ProcessState::Evaluate);
        }
        self.barrier.wait();
    }

    /// `evaluate -> main Compute() returns -> shutdown` (§4.9): flip to
    /// `Shutdown`, idle-collect twice on worker 0's behalf exactly like
    /// every spawned worker does in its own `Halt | Shutdown` arm, join
    /// the shutdown barrier, then join every spawned thread.
    fn shutdown(self: &Arc<Self>) {
        self.process_state.set(ProcessState::Shutdown);
        self.local_gc(0);
        self.local_gc(0);
        self.barrier_wait();

        let handles = std::mem::take(&mut *self.worker_handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
        if let Some(handle) = self.monitor_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Worker-0's periodic duties (§4.6): a timer that flips the process
/// into `GlobalGc` on an interval, and (unix only) noticing a SIGINT and
/// converting it into a cooperative halt. Split into its own thread
/// rather than actually pinned to worker 0's thread, since worker 0 here
/// is whatever thread is blocked inside `Engine::compute`'s `FullReduce`
/// - it cooperates with GC via its own `GcCheckpoint`, but can't also run
/// a sleep-loop on the side (documented in DESIGN.md as a deliberate
/// divergence from the original's pthread layout).
fn spawn_monitor(engine: &Arc<Engine>) -> JoinHandle<()> {
    let engine = Arc::clone(engine);
    std::thread::Builder::new()
        .name("redex-monitor".to_string())
        .spawn(move || monitor_loop(engine))
        .expect("failed to spawn monitor thread")
}

fn monitor_loop(engine: Arc<Engine>) {
    let gc_interval = if engine.config.global_gc_interval_ms == 0 {
        None
    } else {
        Some(Duration::from_millis(engine.config.global_gc_interval_ms))
    };
    let mut last_gc = Instant::now();
    let poll = Duration::from_millis(20);

    loop {
        match engine.process_state.get() {
            ProcessState::Shutdown => return,
            ProcessState::Evaluate => {
                if sigint::was_interrupted() {
                    engine.interrupted.store(true, Ordering::Release);
                    engine.halt();
                    continue;
                }
                if let Some(interval) = gc_interval {
                    if last_gc.elapsed() >= interval {
                        engine.process_state.set(ProcessState::GlobalGc);
                        last_gc = Instant::now();
                    }
                }
            }
            _ => {}
        }
        std::thread::sleep(poll);
    }
}

#[cfg(unix)]
mod sigint {
    use std::sync::atomic::{AtomicBool, Ordering};

    static INTERRUPTED: AtomicBool = AtomicBool::new(false);

    extern "C" fn handle(_sig: libc::c_int) {
        INTERRUPTED.store(true, Ordering::SeqCst);
    }

    pub fn install() {
        unsafe {
            libc::signal(libc::SIGINT, handle as libc::sighandler_t);
        }
    }

    pub fn was_interrupted() -> bool {
        INTERRUPTED.load(Ordering::SeqCst)
    }
}

#[cfg(not(unix))]
mod sigint {
    pub fn install() {}
    pub fn was_interrupted() -> bool {
        false
    }
}

fn install_sigint_handler() {
    sigint::install();
}
