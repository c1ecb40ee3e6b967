//! Error Module - Redex Error Types
//!
//! Defines all error types used across the runtime, following the taxonomy
//! in the engine's error handling design: most variants are fatal to the
//! process (the caller is expected to print a diagnostic and abort), a
//! handful are recoverable by construction (queue overflow, blackhole
//! contention).

use std::sync::PoisonError;
use thiserror::Error;

/// Main error type for all Redex operations.
#[derive(Debug, Error)]
pub enum RedexError {
    #[error("out of memory: requested {requested} bytes, {available} available after global GC")]
    OutOfMemory { requested: usize, available: usize },

    #[error("heap initialization failed: {0}")]
    HeapInitialization(String),

    #[error("reduction on non-applicable term: {label} (worker {worker_id})")]
    NonApplicable { label: String, worker_id: usize },

    #[error("evaluation stack overflow at depth {depth} (worker {worker_id})")]
    StackOverflow { depth: usize, worker_id: usize },

    #[error("dereferenced a dead term: {label} (worker {worker_id})")]
    DeadTermAccess { label: String, worker_id: usize },

    #[error("macroblock allocation failed: {reason}")]
    MacroblockFailed { reason: String },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("interrupted by SIGINT")]
    Interrupted,
}

impl RedexError {
    /// Fatal errors abort the process (per the §7 error taxonomy); the rest
    /// are recoverable by the caller (queue overflow is not even surfaced
    /// as an error - the push call silently degrades to sequential
    /// evaluation, see [`crate::queue::TermQueue::push`]).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RedexError::Interrupted)
    }
}

impl<T> From<PoisonError<T>> for RedexError {
    fn from(err: PoisonError<T>) -> Self {
        RedexError::LockPoisoned(err.to_string())
    }
}

/// Result type alias for Redex operations.
pub type Result<T> = std::result::Result<T, RedexError>;
