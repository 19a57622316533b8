//! Tracing initialization for hosts and test binaries.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber. Level comes from `RUST_LOG`
/// (default `info`); `LOG_FORMAT=json` switches to JSON output. Safe to call
/// once per process.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}
