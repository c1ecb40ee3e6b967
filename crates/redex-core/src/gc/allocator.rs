//! Macroblock allocator - a first-fit, coalescing free-list allocator
//! over fixed-size slots.
//!
//! A prior design managed variable-sized heap elements because each term
//! shape had a different size. Here every term is one Rust enum sized to
//! its largest payload, so every heap element is exactly one slot wide;
//! the first-fit/split/coalesce machinery is kept (a macroblock still
//! subdivides into address-ordered free runs), but "splitting" now only
//! ever produces runs of whole slots rather than byte ranges. This
//! simplification is recorded in DESIGN.md.

use crate::error::{RedexError, Result};
use crate::term::TermCell;
use std::mem::MaybeUninit;

/// A contiguous run of free slots within a macroblock, identified by
/// its starting slot index and length. Runs are kept in an
/// address-ordered list so adjacent runs can be merged on free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeRun {
    start: usize,
    len: usize,
}

/// A single OS-sized allocation unit, subdivided into `TermCell`-sized
/// slots. Terms are constructed in place via [`Macroblock::alloc`].
pub struct Macroblock {
    slots: Box<[MaybeUninit<TermCell>]>,
    /// Address-ordered free-run list (sorted by `start`, merged on
    /// insertion so it never contains two adjacent runs).
    free: Vec<FreeRun>,
}

impl Macroblock {
    /// Request a macroblock able to hold at least one slot; `size_bytes`
    /// is rounded down to a whole number of `TermCell` slots (at least
    /// one).
    pub fn new(size_bytes: usize) -> Macroblock {
        let slot_size = std::mem::size_of::<TermCell>().max(1);
        let capacity = (size_bytes / slot_size).max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, MaybeUninit::uninit);
        Macroblock {
            slots: slots.into_boxed_slice(),
            free: vec![FreeRun { start: 0, len: capacity }],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn free_slots(&self) -> usize {
        self.free.iter().map(|r| r.len).sum()
    }

    /// First-fit: scan the free-run list for the first run able to hold
    /// one slot, splitting off the remainder if any is left.
    pub fn alloc(&mut self, value: TermCell) -> Option<*mut TermCell> {
        let idx = self.free.iter().position(|r| r.len >= 1)?;
        let run = self.free[idx];
        if run.len == 1 {
            self.free.remove(idx);
        } else {
            self.free[idx] = FreeRun {
                start: run.start + 1,
                len: run.len - 1,
            };
        }
        let slot = &mut self.slots[run.start];
        let ptr = slot.as_mut_ptr();
        unsafe { ptr.write(value) };
        Some(ptr)
    }

    /// Does `ptr` fall within this macroblock's slot array?
    pub fn owns(&self, ptr: *mut TermCell) -> bool {
        let base = self.slots.as_ptr() as usize;
        let end = base + self.slots.len() * std::mem::size_of::<TermCell>();
        let addr = ptr as usize;
        addr >= base && addr < end
    }

    fn slot_index(&self, ptr: *mut TermCell) -> usize {
        let base = self.slots.as_ptr() as *mut TermCell;
        unsafe { ptr.offset_from(base) as usize }
    }

    /// Return a slot to the free-run list, merging with address-adjacent
    /// neighbors. The caller is responsible for having already run the
    /// slot's destructor (`ptr::drop_in_place`) - this only reclaims the
    /// storage; it isn't truly reused until the next GC cycle observes
    /// the dead marker and calls this.
    pub fn reclaim(&mut self, ptr: *mut TermCell) {
        let idx = self.slot_index(ptr);
        let pos = self.free.partition_point(|r| r.start < idx);

        let merge_prev = pos > 0 && self.free[pos - 1].start + self.free[pos - 1].len == idx;
        let merge_next = pos < self.free.len() && self.free[pos].start == idx + 1;

        match (merge_prev, merge_next) {
            (true, true) => {
                let next_len = self.free[pos].len;
                self.free[pos - 1].len += 1 + next_len;
                self.free.remove(pos);
            }
            (true, false) => {
                self.free[pos - 1].len += 1;
            }
            (false, true) => {
                self.free[pos].start = idx;
                self.free[pos].len += 1;
            }
            (false, false) => {
                self.free.insert(pos, FreeRun { start: idx, len: 1 });
            }
        }
    }
}

/// Owns every macroblock a single worker has requested from the OS
/// allocator, growing on demand up to an optional cap (§4.1's
/// exhaustion policy; see [`MacroblockPool::set_max_macroblocks`]).
pub struct MacroblockPool {
    blocks: Vec<Macroblock>,
    macroblock_size: usize,
    max_macroblocks: Option<usize>,
}

impl MacroblockPool {
    pub fn new(macroblock_size: usize) -> MacroblockPool {
        MacroblockPool {
            blocks: Vec::new(),
            macroblock_size,
            max_macroblocks: None,
        }
    }

    pub fn total_free_slots(&self) -> usize {
        self.blocks.iter().map(|b| b.free_slots()).sum()
    }

    /// Cap the number of macroblocks this pool may request from the OS.
    /// `None` (the default) leaves growth unbounded.
    pub fn set_max_macroblocks(&mut self, max: Option<usize>) {
        self.max_macroblocks = max;
    }

    /// Would the next [`MacroblockPool::grow`] be allowed? Used by the
    /// heap's allocation-exhaustion policy to decide whether to try
    /// reclaiming before growing, without itself attempting a grow.
    pub fn can_grow(&self) -> bool {
        match self.max_macroblocks {
            Some(max) => self.blocks.len() < max,
            None => true,
        }
    }

    /// Try allocating from existing macroblocks; on failure, request one
    /// more macroblock from the OS and retry once.
    pub fn alloc(&mut self, value: TermCell) -> Result<*mut TermCell> {
        for block in self.blocks.iter_mut() {
            if block.free_slots() > 0 {
                return Ok(block
                    .alloc(value)
                    .expect("free_slots() > 0 implies alloc() succeeds"));
            }
        }

        self.grow()?;
        let block = self
            .blocks
            .last_mut()
            .expect("grow() always appends a macroblock");
        block.alloc(value).ok_or_else(|| RedexError::MacroblockFailed {
            reason: "freshly grown macroblock reports zero capacity".to_string(),
        })
    }

    fn grow(&mut self) -> Result<()> {
        if !self.can_grow() {
            return Err(RedexError::OutOfMemory {
                requested: self.macroblock_size,
                available: self.total_free_slots() * std::mem::size_of::<TermCell>(),
            });
        }
        self.blocks.push(Macroblock::new(self.macroblock_size));
        Ok(())
    }

    pub fn reclaim(&mut self, ptr: *mut TermCell) {
        for block in self.blocks.iter_mut() {
            if block.owns(ptr) {
                block.reclaim(ptr);
                return;
            }
        }
    }

    pub fn macroblock_count(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::life::LifeCell;
    use crate::term::value::Scalar;
    use crate::term::TermPayload;

    fn constant_cell(v: i64) -> TermCell {
        TermCell {
            life: LifeCell::new_unborn(),
            label: None,
            payload: TermPayload::Constant(Scalar::Int(v)),
        }
    }

    #[test]
    fn alloc_and_reclaim_round_trip() {
        let mut block = Macroblock::new(std::mem::size_of::<TermCell>() * 4);
        assert_eq!(block.capacity(), 4);
        let p1 = block.alloc(constant_cell(1)).unwrap();
        let p2 = block.alloc(constant_cell(2)).unwrap();
        assert_eq!(block.free_slots(), 2);

        unsafe { std::ptr::drop_in_place(p1) };
        block.reclaim(p1);
        assert_eq!(block.free_slots(), 3);

        unsafe { std::ptr::drop_in_place(p2) };
        block.reclaim(p2);
        assert_eq!(block.free_slots(), 4);
    }

    #[test]
    fn adjacent_frees_coalesce_into_one_run() {
        let mut block = Macroblock::new(std::mem::size_of::<TermCell>() * 4);
        let ptrs: Vec<_> = (0..4).map(|i| block.alloc(constant_cell(i)).unwrap()).collect();
        for p in &ptrs {
            unsafe { std::ptr::drop_in_place(*p) };
            block.reclaim(*p);
        }
        assert_eq!(block.free.len(), 1);
        assert_eq!(block.free[0], FreeRun { start: 0, len: 4 });
    }

    #[test]
    fn pool_grows_when_first_macroblock_is_exhausted() {
        let mut pool = MacroblockPool::new(std::mem::size_of::<TermCell>() * 2);
        assert!(pool.alloc(constant_cell(1)).is_ok());
        assert!(pool.alloc(constant_cell(2)).is_ok());
        assert_eq!(pool.macroblock_count(), 1);
        assert!(pool.alloc(constant_cell(3)).is_ok());
        assert_eq!(pool.macroblock_count(), 2);
    }

    #[test]
    fn capped_pool_refuses_growth_past_the_limit() {
        let mut pool = MacroblockPool::new(std::mem::size_of::<TermCell>() * 1);
        pool.set_max_macroblocks(Some(1));
        assert!(pool.alloc(constant_cell(1)).is_ok());
        assert!(!pool.can_grow());
        match pool.alloc(constant_cell(2)) {
            Err(RedexError::OutOfMemory { .. }) => {}
            other => panic!("expected OutOfMemory, got {other:?}"),
        }
    }
}
