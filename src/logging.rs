use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LogSettings;

/// Installs the global subscriber. Returns `false` when one is already installed.
pub fn init(settings: &LogSettings) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.filter));
    fmt()
        .with_env_filter(filter)
        .with_target(settings.with_target)
        .try_init()
        .is_ok()
}
