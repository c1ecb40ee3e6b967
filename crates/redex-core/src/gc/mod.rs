//! Mark-sweep garbage collector - allocator, per-worker heap lists, and
//! the local/global collection cycles (spec.md §4.1, §4.7).

pub mod allocator;
pub mod collector;
pub mod heap;
