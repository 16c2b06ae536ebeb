//! Structured logging for the `customs-sync` binary.
//!
//! `RUST_LOG` selects what is shown (default `customs_sync=info`, which
//! covers every `customs_sync_*` crate). Output goes to stderr so stdout
//! stays machine-readable; `RUST_LOG_FORMAT=json` switches to JSON lines.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "customs_sync=info";

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false);

    if json_requested(std::env::var("RUST_LOG_FORMAT").ok().as_deref()) {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}

fn json_requested(format: Option<&str>) -> bool {
    format.is_some_and(|v| v.trim().eq_ignore_ascii_case("json"))
}
