//! Heap - per-worker allocation and the four bookkeeping lists.
//!
//! Each worker owns a [`WorkerHeap`]: its own [`MacroblockPool`] plus
//! the *new*, *local*, *global*, and *other* ordered lists. The "other"
//! list has no populated use in this port, since every heap allocation
//! here is a `TermCell`; it is kept as an always-empty list so the GC's
//! sweep phases still have a uniform four-list shape to iterate.

use super::allocator::MacroblockPool;
use super::collector;
use crate::error::{RedexError, Result};
use crate::term::life::LifeCell;
use crate::term::{HostProc, TermCell, TermPayload, TermPtr};
use crate::term::value::Scalar;
use parking_lot::Mutex;
use std::ptr::NonNull;

/// The four address-ordered classification lists a worker maintains
/// between GC cycles.
#[derive(Default)]
pub struct HeapLists {
    pub new: Vec<TermPtr>,
    pub local: Vec<TermPtr>,
    pub global: Vec<TermPtr>,
    pub other: Vec<TermPtr>,
}

/// One worker's private slice of the heap: its macroblocks and lists.
/// Cross-worker access only ever happens during a barrier-synchronized
/// global GC phase.
pub struct WorkerHeap {
    pub pool: Mutex<MacroblockPool>,
    pub lists: Mutex<HeapLists>,
}

impl WorkerHeap {
    fn new(macroblock_size: usize) -> WorkerHeap {
        WorkerHeap {
            pool: Mutex::new(MacroblockPool::new(macroblock_size)),
            lists: Mutex::new(HeapLists::default()),
        }
    }
}

/// Callback the heap invokes to request a global GC cycle when a
/// worker's pool is exhausted and growth is capped; installed by
/// [`crate::engine::Engine`] once it exists, since driving a global
/// cycle needs the barrier and process-state machinery a bare `Heap`
/// doesn't own. `Arc` rather than `Box` so a call can clone it out from
/// under the lock before invoking it - the hook blocks until the whole
/// worker pool rendezvous at a barrier, and that shouldn't happen while
/// holding the mutex guarding the slot itself.
type GlobalGcHook = std::sync::Arc<dyn Fn(usize) + Send + Sync>;

/// The whole engine's heap: one [`WorkerHeap`] per worker, indexed by
/// worker id.
pub struct Heap {
    workers: Vec<WorkerHeap>,
    macroblock_size: usize,
    global_gc_hook: Mutex<Option<GlobalGcHook>>,
}

impl Heap {
    pub fn new(num_workers: usize, macroblock_size: usize) -> Heap {
        Heap {
            workers: (0..num_workers).map(|_| WorkerHeap::new(macroblock_size)).collect(),
            macroblock_size,
            global_gc_hook: Mutex::new(None),
        }
    }

    pub fn macroblock_size(&self) -> usize {
        self.macroblock_size
    }

    pub fn worker(&self, id: usize) -> &WorkerHeap {
        &self.workers[id]
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Cap every worker's pool at `max` macroblocks, making macroblock
    /// exhaustion (and thus the rest of the §4.1 policy) reachable.
    pub fn set_max_macroblocks_per_worker(&self, max: usize) {
        for worker in &self.workers {
            worker.pool.lock().set_max_macroblocks(Some(max));
        }
    }

    /// Install the callback used to request a global GC cycle from
    /// inside [`Heap::alloc`]'s exhaustion policy.
    pub fn set_global_gc_hook(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.global_gc_hook.lock() = Some(std::sync::Arc::new(hook));
    }

    /// Construct and allocate a fresh term from `worker_id`'s macroblock
    /// pool. Birth marks it *old* immediately - the "new" list's objects
    /// are instantly eligible for normal reclamation - and files it
    /// under the *new* list.
    pub fn alloc(&self, worker_id: usize, payload: TermPayload, label: Option<Box<str>>) -> Result<TermPtr> {
        self.ensure_capacity(worker_id)?;
        let cell = TermCell {
            life: LifeCell::new_unborn(),
            label,
            payload,
        };
        let worker = &self.workers[worker_id];
        let raw = worker.pool.lock().alloc(cell)?;
        let ptr = unsafe { TermPtr::from_raw(NonNull::new_unchecked(raw)) };
        ptr.get().life.mark_birth();
        worker.lists.lock().new.push(ptr);
        Ok(ptr)
    }

    /// §4.1's allocation exhaustion policy, run before constructing a
    /// new term so there is never a half-built `TermCell` to lose on a
    /// failed retry: (1) if this worker's pool has no free slot and it
    /// holds any `new`/`local` garbage, run local GC and recheck; (2) if
    /// there's still no room but the pool may still grow, let the
    /// upcoming [`MacroblockPool::alloc`] request another macroblock as
    /// normal; (3) if growth is capped, ask for a global GC cycle - the
    /// only pass that can prove a term this worker can't see rooted
    /// elsewhere is truly dead (§8.1's global-reachability invariant);
    /// (4) abort as out-of-memory if that freed less than half a
    /// macroblock's worth of slots (§8.3).
    fn ensure_capacity(&self, worker_id: usize) -> Result<()> {
        let worker = &self.workers[worker_id];

        if worker.pool.lock().total_free_slots() > 0 {
            return Ok(());
        }

        let has_reclaimable = {
            let lists = worker.lists.lock();
            !lists.new.is_empty() || !lists.local.is_empty()
        };
        if has_reclaimable {
            collector::local_gc(self, worker_id, crate::root::snapshot());
            if worker.pool.lock().total_free_slots() > 0 {
                return Ok(());
            }
        }

        if worker.pool.lock().can_grow() {
            return Ok(());
        }

        let hook = self.global_gc_hook.lock().clone();
        let freed_slots = match hook {
            Some(hook) => {
                hook(worker_id);
                worker.pool.lock().total_free_slots()
            }
            None => 0,
        };

        let slot_size = std::mem::size_of::<TermCell>().max(1);
        let half_macroblock_slots = (self.macroblock_size / slot_size / 2).max(1);
        if freed_slots >= half_macroblock_slots {
            return Ok(());
        }

        Err(RedexError::OutOfMemory {
            requested: slot_size,
            available: freed_slots * slot_size,
        })
    }

    pub fn alloc_constant(&self, worker_id: usize, value: Scalar) -> Result<TermPtr> {
        self.alloc(worker_id, TermPayload::Constant(value), None)
    }

    pub fn alloc_function(
        &self,
        worker_id: usize,
        host_proc: HostProc,
        arity: u8,
        label: Option<&str>,
    ) -> Result<TermPtr> {
        use crate::term::FunctionData;
        use std::sync::atomic::AtomicPtr;

        let ptr = self.alloc(
            worker_id,
            TermPayload::Function(FunctionData {
                host_proc,
                arity,
                indirection: AtomicPtr::new(std::ptr::null_mut()),
            }),
            label.map(|s| s.into()),
        )?;
        // Functions are global by construction.
        ptr.get().life.set_global();
        Ok(ptr)
    }

    pub fn alloc_application(&self, worker_id: usize, f: TermPtr, a: TermPtr) -> Result<TermPtr> {
        use crate::term::ApplicationData;
        use std::sync::atomic::AtomicPtr;

        self.alloc(
            worker_id,
            TermPayload::Application(ApplicationData {
                f,
                a,
                indirection: AtomicPtr::new(std::ptr::null_mut()),
            }),
            None,
        )
    }

    pub fn alloc_blackhole(&self, worker_id: usize, wrapped: TermPtr) -> Result<TermPtr> {
        use crate::term::BlackholeData;
        use std::sync::atomic::AtomicPtr;

        self.alloc(
            worker_id,
            TermPayload::Blackhole(BlackholeData {
                wrapped,
                state: AtomicPtr::new(std::ptr::null_mut()),
            }),
            None,
        )
    }

    /// Reclaim a dead term's storage: run its destructor, then hand the
    /// slot back to the owning macroblock. `worker_id` must be the
    /// worker that originally allocated `ptr`.
    pub fn reclaim(&self, worker_id: usize, ptr: TermPtr) {
        let raw = ptr.as_raw().as_ptr();
        unsafe { std::ptr::drop_in_place(raw) };
        self.workers[worker_id].pool.lock().reclaim(raw);
    }
}
