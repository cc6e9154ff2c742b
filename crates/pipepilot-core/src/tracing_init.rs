//! Logging setup for the `pipepilot` binary.
//!
//! Library code only emits `tracing` events; the binary installs the global
//! subscriber here. Output goes to stderr because stdout carries the child's
//! relayed lines.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Call once, before the first process
/// handle is started.
///
/// `default_filter` applies when `RUST_LOG` is unset; the binary derives it
/// from `RelayConfig::log_level` (e.g. `"pipepilot=debug"`). With `log_json`
/// each relay event, including its `pid` and `stream` span fields, is written
/// as one JSON object per line.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
