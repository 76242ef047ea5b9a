use tracing_subscriber::EnvFilter;

use crate::config::{LayerConfig, DEFAULT_LOG_FILTER};

/// Install a `fmt` subscriber filtered by [`LayerConfig::log_filter`].
///
/// The layer runs inside someone else's process, so this is opt-in and never replaces a subscriber
/// the host already installed. Returns whether this call installed the global subscriber.
pub fn init(config: &LayerConfig) -> bool {
    let filter = EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
