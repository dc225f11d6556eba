//! Test support.
//!
//! Everything the unit and integration suites share: a tracing
//! subscriber wired to the test writer, a [`ContextConfig`] sized for
//! single-scenario reactors, and macros that stamp phase boundaries and
//! assertion context onto the `spindrift::test` target so a failing run
//! reads as a timeline of reactor steps.

use crate::config::ContextConfig;
use std::sync::OnceLock;

static SUBSCRIBER: OnceLock<()> = OnceLock::new();

/// Log level for the test subscriber, from `SPINDRIFT_TEST_LOG`
/// (`error`..`trace`); `debug` when unset or unparsable.
fn level_from_env() -> tracing::Level {
    std::env::var("SPINDRIFT_TEST_LOG")
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(tracing::Level::DEBUG)
}

/// Installs the test tracing subscriber. Idempotent; later calls are
/// no-ops, so every test can call it first thing.
pub fn init_test_logging() {
    SUBSCRIBER.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level_from_env())
            .with_test_writer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .compact()
            .try_init();
    });
}

/// A reactor configuration for tests: shallow queues so depth-related
/// bugs (full submission queue, tiny event batches) surface under the
/// small workloads the suites run.
#[must_use]
pub fn test_config() -> ContextConfig {
    ContextConfig::new().queue_depth(16).event_capacity(8)
}

/// Marks the start of a test scenario on the `spindrift::test` target.
///
/// An optional second argument names the backend under test, so matrix
/// runs are distinguishable in interleaved output.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(target: "spindrift::test", scenario = $name, "scenario start");
    };
    ($name:expr, backend = $backend:expr) => {
        tracing::info!(
            target: "spindrift::test",
            scenario = $name,
            backend = $backend,
            "scenario start"
        );
    };
}

/// Marks the successful end of a test scenario, with optional key/value
/// context (byte counts, ports, paths).
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(target: "spindrift::test", scenario = $name, "scenario complete");
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            target: "spindrift::test",
            scenario = $name,
            $($key = ?$value,)*
            "scenario complete"
        );
    };
}

/// Asserts `cond`, logging the expectation first so the last line before
/// a failure names the check and both sides of the comparison.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $what:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            target: "spindrift::test",
            check = $what,
            expected = ?$expected,
            actual = ?$actual,
            "checking"
        );
        assert!(
            $cond,
            "check `{}` failed: expected {:?}, actual {:?}",
            $what, $expected, $actual
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_is_shallow() {
        let config = test_config();
        assert_eq!(config.queue_depth_value(), 16);
        assert_eq!(config.event_capacity_value(), 8);
    }

    #[test]
    fn init_is_idempotent() {
        init_test_logging();
        init_test_logging();
        test_phase!("init_is_idempotent", backend = "none");
        assert_with_log!(1 + 1 == 2, "arithmetic", 2, 1 + 1);
        test_complete!("init_is_idempotent", checks = 1);
    }
}
