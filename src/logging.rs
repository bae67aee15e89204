//! Logging utilities for orderdesk-engine.
//!
//! Re-exports tracing macros under a `log_*` naming convention, and installs
//! the process-wide subscriber once at startup.

#[allow(unused_imports)]
pub use tracing::{
    debug as log_debug, error as log_error, info as log_info, trace as log_trace, warn as log_warn,
};

use std::env;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. Format is controlled by `LOG_FORMAT`
/// (`json` or `pretty`, default `pretty`). Safe to call more than once; only
/// the first call takes effect.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    if let Err(e) = result {
        // Already initialized (e.g. in tests) — not an error condition.
        tracing::trace!("tracing subscriber already initialized: {e}");
    }
}
