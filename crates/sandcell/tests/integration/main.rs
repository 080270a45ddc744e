//! Integration tests for sandcell
//!
//! These tests require the nsjail binary and /usr/bin/python3 to be
//! installed. Run with: cargo test -p sandcell --features integration-tests
//!
//! Tests that spawn real jails need namespace privileges and are marked
//! `#[ignore]`. To include them:
//!    cargo test -p sandcell --features integration-tests -- --include-ignored

#![cfg(feature = "integration-tests")]

use sandcell::{Config, Coordinator};

mod concurrency;
mod config_loading;
mod execution;
mod resource_limits;

/// Create a test config with cgroup support if available, falling back to
/// rlimit mode.
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    if config.cgroup {
        match sandcell::prepare_cgroup(&config.cg_root) {
            Ok(true) => {}              // cgroups ready
            _ => config.cgroup = false, // not available, fall back
        }
    }
    config
}

pub(crate) fn coordinator() -> Coordinator {
    Coordinator::new(test_config()).expect("failed to build coordinator")
}
