//! Worker count derivation
//!
//! ffmpeg parallelizes internally, so batch-level concurrency stays low:
//! auto mode runs half the cores, capped. An explicit config value wins
//! but is still clamped to a sane ceiling.

use tracing::debug;

/// Most children auto mode will ever run at once
const AUTO_MAX_WORKERS: usize = 4;
/// Hard ceiling even for explicit configuration
const MAX_WORKERS: usize = 16;

/// Resolve the number of concurrent jobs from the configured value.
///
/// Zero means auto: half the available cores, at least one, at most
/// [`AUTO_MAX_WORKERS`].
pub fn resolve_worker_count(configured: u32) -> usize {
    let workers = if configured == 0 {
        (num_cpus::get() / 2).clamp(1, AUTO_MAX_WORKERS)
    } else {
        (configured as usize).min(MAX_WORKERS)
    };
    debug!(configured, workers, "resolved worker count");
    workers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_mode_bounds() {
        let workers = resolve_worker_count(0);
        assert!((1..=AUTO_MAX_WORKERS).contains(&workers));
    }

    #[test]
    fn test_explicit_value_used() {
        assert_eq!(resolve_worker_count(2), 2);
        assert_eq!(resolve_worker_count(1), 1);
    }

    #[test]
    fn test_explicit_value_clamped() {
        assert_eq!(resolve_worker_count(500), MAX_WORKERS);
    }
}
