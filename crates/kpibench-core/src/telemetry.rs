//! Tracing setup for the `kpibench` binary.
//!
//! Logs always go to stderr so stdout stays clean for command output that
//! scripts may parse.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Filter directives read before `RUST_LOG`.
pub const ENV_LOG: &str = "KPIBENCH_LOG";

/// Filter from `KPIBENCH_LOG`, then `RUST_LOG`, then `level`.
pub fn log_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(ENV_LOG)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the global subscriber. `json` switches to newline-delimited JSON.
/// Only the first call in a process has any effect.
pub fn init_tracing(json: bool, level: Level) {
    let base = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let output: Box<dyn Layer<Registry> + Send + Sync> = if json {
        base.json().boxed()
    } else {
        base.boxed()
    };

    tracing_subscriber::registry()
        .with(output)
        .with(log_filter(level))
        .try_init()
        .ok();
}
