//! Configuration Module - Runtime Tuning Parameters
//!
//! Centralizes every tunable named in the engine's process surface:
//! worker count, macroblock size, global GC interval, and the idle-sleep
//! backoff range. Mirrors the teacher's `GcConfig` in shape: a plain
//! struct with a `Default` impl, an `from_env` constructor, and a
//! `validate` pass run once before any worker thread spawns.

use crate::error::{RedexError, Result};

const KB: usize = 1024;
const MB: usize = 1024 * 1024;

/// Runtime configuration for the evaluation engine.
///
/// # Examples
///
/// ```
/// use redex_core::config::RuntimeConfig;
///
/// let config = RuntimeConfig::default();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads. Default: logical CPU count.
    pub workers: usize,

    /// Macroblock size requested from the OS allocator, in bytes. Must be
    /// a power of two. Default: 16 MiB.
    pub macroblock_size: usize,

    /// Bound on how many macroblocks a single worker's pool may grow to,
    /// enforced per §4.1's allocator exhaustion policy: once a worker
    /// hits this cap, a failed allocation falls back to a global GC
    /// cycle rather than an unconditional further grow (§8.3: "Macroblock
    /// allocation fails precisely when global GC frees < macroblock_size
    /// / 2"). `None` (the default) leaves growth unbounded, matching a
    /// host that never wants allocation to fail.
    pub max_macroblocks_per_worker: Option<usize>,

    /// Periodic global GC interval. Zero disables the timer. Default:
    /// 1000 ms.
    pub global_gc_interval_ms: u64,

    /// Lower bound of the randomized idle-sleep interval, in
    /// microseconds. Default: 2000 (2 ms).
    pub worker_idle_sleep_min_us: u64,

    /// Upper bound of the randomized idle-sleep interval, in
    /// microseconds. Default: 64000 (64 ms).
    pub worker_idle_sleep_max_us: u64,

    /// Maximum per-worker evaluation stack depth before a stack-overflow
    /// error aborts the process. Default: 100_000 frames.
    pub max_eval_depth: usize,

    /// Capacity of each priority band in the work queue. Default: 4096.
    pub queue_capacity: usize,

    /// Use CAS-based atomic indirection writes (§9 open question:
    /// atomic vs non-atomic indirection). Default: true.
    pub atomic_indirection: bool,

    /// Emit `log` crate diagnostics for worker lifecycle and GC phases.
    /// Default: false.
    pub verbose: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            workers: num_cpus::get().max(1),
            macroblock_size: 16 * MB,
            max_macroblocks_per_worker: None,
            global_gc_interval_ms: 1000,
            worker_idle_sleep_min_us: 2000,
            worker_idle_sleep_max_us: 64000,
            max_eval_depth: 100_000,
            queue_capacity: 4096,
            atomic_indirection: true,
            verbose: false,
        }
    }
}

impl RuntimeConfig {
    /// Validate the configuration, rejecting values that would make the
    /// engine misbehave (zero workers, non-power-of-two macroblock size,
    /// an inverted sleep range).
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(RedexError::Configuration(
                "workers must be >= 1".to_string(),
            ));
        }

        if self.macroblock_size < 4 * KB || !self.macroblock_size.is_power_of_two() {
            return Err(RedexError::Configuration(
                "macroblock_size must be a power of two, at least 4KiB".to_string(),
            ));
        }

        if self.worker_idle_sleep_min_us == 0
            || self.worker_idle_sleep_min_us > self.worker_idle_sleep_max_us
        {
            return Err(RedexError::Configuration(
                "worker_idle_sleep_min_us must be > 0 and <= worker_idle_sleep_max_us"
                    .to_string(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(RedexError::Configuration(
                "queue_capacity must be >= 1".to_string(),
            ));
        }

        if self.max_eval_depth == 0 {
            return Err(RedexError::Configuration(
                "max_eval_depth must be >= 1".to_string(),
            ));
        }

        if self.max_macroblocks_per_worker == Some(0) {
            return Err(RedexError::Configuration(
                "max_macroblocks_per_worker must be >= 1 when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Build configuration from the recognized tuning environment
    /// variables (`workers`, `macroblock_size`, `max_macroblocks_per_worker`,
    /// `global_gc_interval_ms`, `worker_idle_sleep_min`,
    /// `worker_idle_sleep_max`), overriding [`RuntimeConfig::default`].
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_usize("workers") {
            config.workers = v;
        }
        if let Some(v) = env_usize("macroblock_size") {
            config.macroblock_size = v;
        }
        if let Some(v) = env_usize("max_macroblocks_per_worker") {
            config.max_macroblocks_per_worker = Some(v);
        }
        if let Some(v) = env_u64("global_gc_interval_ms") {
            config.global_gc_interval_ms = v;
        }
        if let Some(v) = env_u64("worker_idle_sleep_min") {
            config.worker_idle_sleep_min_us = v;
        }
        if let Some(v) = env_u64("worker_idle_sleep_max") {
            config.worker_idle_sleep_max_us = v;
        }
        if let Ok(val) = std::env::var("REDEX_VERBOSE") {
            config.verbose = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.parse::<usize>().ok()
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let config = RuntimeConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_power_of_two_macroblock_rejected() {
        let config = RuntimeConfig {
            macroblock_size: 100_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_sleep_range_rejected() {
        let config = RuntimeConfig {
            worker_idle_sleep_min_us: 100,
            worker_idle_sleep_max_us: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
