//! Tracing setup.
//!
//! Logging goes to stderr so command output (tables, JSON) stays clean on
//! stdout. `BEATLINE_LOG` controls the filter (env-filter syntax, default
//! "warn"); `BEATLINE_LOG_FORMAT=json` switches to newline-delimited JSON
//! for log shippers.

use tracing_subscriber::EnvFilter;

/// Guard returned by `init`. Currently nothing to flush on drop, but callers
/// hold it for the process lifetime so exporters can be added later.
pub struct Guard;

/// Initialize the global tracing subscriber. Safe to call once from `main`.
pub fn init() -> Guard {
    let filter = EnvFilter::try_from_env("BEATLINE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let json = std::env::var("BEATLINE_LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    // try_init so tests that touch the library twice don't panic
    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }

    Guard
}
