//! Shared utilities for Spear: configuration, logging, error types.
//!
//! This crate provides common infrastructure used by the Spear binaries.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;

pub use config::{Key, PeerConfig, SpearConfig};
pub use error::{Error, Result};

/// Initialize tracing with `default_level` as the filter.
///
/// `RUST_LOG` still takes precedence when it is set.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // A second call (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
