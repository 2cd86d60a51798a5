//! Logging setup with verbose mode support
//!
//! Set VERBOSE=1 or use --verbose to enable debug output for the bridge.
//! RUST_LOG, when set, takes precedence over both.
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "inboxer_bridge=info";
const VERBOSE_FILTER: &str = "inboxer_bridge=debug";

/// Whether VERBOSE is set to a truthy value
pub fn verbose_from_env() -> bool {
    std::env::var("VERBOSE").is_ok_and(|v| is_truthy(&v))
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER })
    })
}

/// Install the global subscriber, writing to stderr. Calling it again is a
/// no-op.
pub fn init(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_writer(std::io::stderr)
        .try_init();
}
