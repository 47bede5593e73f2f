//! Log subscriber setup for binaries, benches and tests.
//!
//! The crate itself only emits `tracing` events:
//!
//! - `error`: rejected ids, exhausted id space, dropped enqueues, failed
//!   commands and Production-mode lookups of unregistered owners or groups
//! - `warn`: Development-mode fallbacks
//! - `debug`: registrations and per-tick process summaries
//! - `trace`: per-command and per-membership detail, container growth

use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter` when the variable is unset or invalid.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_logging("strata_ecs=debug");
        init_logging("strata_ecs=trace");
        tracing::debug!("logging initialised twice without panicking");
    }
}
