//! # redex-core - a parallel, lazy, graph-reducing evaluation engine
//!
//! Redex runs a program as a term graph under call-by-need semantics:
//! building the graph (`constant`, `function`, `apply`) never does work,
//! only demanding a term (`eval`, `compute`) does, and every demanded
//! thunk is reduced at most once even when several workers reach it at
//! the same time. Parallelism is explicit (`par`) rather than automatic -
//! spawning a subterm hands it to the worker pool's shared queue, and
//! the blackhole protocol around a spawned term is what keeps redundant
//! work from happening if the spawner ends up demanding it too.
//!
//! ## Quick start
//!
//! ```rust
//! use redex_core::config::RuntimeConfig;
//! use redex_core::engine::Engine;
//! use redex_core::term::value::Scalar;
//!
//! # fn main() -> redex_core::error::Result<()> {
//! let engine = Engine::new(RuntimeConfig::default())?;
//!
//! let add = engine.function(std::sync::Arc::new(|args: &[_], ctx: &dyn redex_core::term::ReduceCtx| {
//!     let a = ctx.force(args[0]);
//!     let b = ctx.force(args[1]);
//!     let (redex_core::term::TermPayload::Constant(x), redex_core::term::TermPayload::Constant(y)) =
//!         (&a.get().payload, &b.get().payload)
//!     else {
//!         panic!("add applied to non-constants");
//!     };
//!     ctx.mk_constant(x.add(y).unwrap())
//! }), 2, Some("add"));
//!
//! let two = engine.constant(Scalar::Int(2));
//! let three = engine.constant(Scalar::Int(3));
//! let expr = engine.apply(engine.apply(add, two), three);
//!
//! let result: i64 = engine.compute(expr)?;
//! assert_eq!(result, 5);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                         Engine                               │
//! │  constant/function/apply/globalize/par/eval/compute/halt    │
//! └───────────────┬───────────────────────────────┬─────────────┘
//!                 │                               │
//!         ┌───────▼────────┐             ┌────────▼─────────┐
//!         │  TermQueue      │             │  Worker pool      │
//!         │  (par spawns,   │◄────pop─────┤  N OS threads,    │
//!         │  postponements) │             │  each its own     │
//!         └────────┬────────┘             │  eval Stack       │
//!                  │                      └────────┬──────────┘
//!                  │ snapshot_roots                 │ reduce()
//!         ┌────────▼─────────────────────────────────▼─────────┐
//!         │                    Term graph                       │
//!         │   Constant | Function | Application | Blackhole     │
//!         │         (allocated from per-worker Heap)            │
//!         └───────────────────────┬───────────────────────────┘
//!                                 │ mark/sweep
//!                         ┌───────▼────────┐
//!                         │  gc::collector  │
//!                         │  local / global │
//!                         └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`config`]: runtime tuning (worker count, macroblock size, GC
//!   interval, idle-sleep range) and environment-variable overrides.
//! - [`engine`]: the `Engine` handle - the crate's public entry point.
//! - [`error`]: `RedexError`, the crate-wide error taxonomy.
//! - [`gc`]: the macroblock allocator and the mark-sweep collector.
//! - [`postponement`]: re-queueing a blocked application for later.
//! - [`queue`]: the bounded, lossy, two-priority work queue `par` feeds.
//! - [`reducer`]: the explicit-stack iterative evaluator and its modes.
//! - [`root`]: thread-local GC root stack (`RootGuard`).
//! - [`term`]: the term graph itself - `TermPtr`, `TermPayload`, `Scalar`.
//! - [`trace`]: pluggable worker-state and graph-dump tracing sinks.
//! - [`worker`]: thread lifecycle and the global-GC barrier choreography.

pub mod config;
pub mod engine;
pub mod error;
pub mod gc;
pub mod postponement;
pub mod queue;
pub mod reducer;
pub mod root;
pub mod term;
pub mod trace;
pub mod worker;

pub use config::RuntimeConfig;
pub use engine::Engine;
pub use error::{RedexError, Result};
pub use term::value::Scalar;
pub use term::{HostProc, ReduceCtx, TermPtr};

/// Crate version string, as declared in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build an [`Engine`] from [`RuntimeConfig::default`]. A convenience
/// for the common case; anything that needs tuned workers, a custom
/// macroblock size, or a trace sink should build a [`RuntimeConfig`] (or
/// use [`RuntimeConfig::from_env`]) and call [`Engine::new`] or
/// [`Engine::with_trace`] directly.
pub fn init() -> Result<std::sync::Arc<Engine>> {
    Engine::new(RuntimeConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_builds_a_usable_engine() {
        let engine = init().unwrap();
        let five = engine.constant(Scalar::Int(5));
        let result: i64 = engine.compute(five).unwrap();
        assert_eq!(result, 5);
    }
}
