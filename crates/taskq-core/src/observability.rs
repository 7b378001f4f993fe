//! Logging setup.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Set `TASKQ_LOG_FORMAT=json` for one JSON object per event.
pub const LOG_FORMAT_ENV: &str = "TASKQ_LOG_FORMAT";

/// Install a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_level`. Returns false if a subscriber was already installed,
/// which is not an error (tests and embedding hosts may set their own).
pub fn init_tracing(default_level: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    if installed.is_err() {
        tracing::debug!("global tracing subscriber already set, keeping it");
    }
    installed.is_ok()
}
