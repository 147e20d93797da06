//! Tracing subscriber setup shared by the binaries

use tracing_subscriber::EnvFilter;

/// Set `ORACLE_LOG_FORMAT=json` for one JSON object per event
pub const LOG_FORMAT_VAR: &str = "ORACLE_LOG_FORMAT";

/// Install the global subscriber. `RUST_LOG` overrides the `default` filter.
pub fn init(default: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let json = std::env::var(LOG_FORMAT_VAR).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
