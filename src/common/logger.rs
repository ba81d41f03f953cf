use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Installs the global tracing subscriber from the logging section of the
/// config. `RUST_LOG` takes precedence over the configured level so operators
/// can override filtering without touching `config.toml`.
pub fn init(config: Option<&LoggingConfig>) {
    let log_level = config.and_then(|l| l.level.as_deref()).unwrap_or("info");
    let filters = config.and_then(|l| l.filters.as_deref()).unwrap_or("");

    let filter_str = if filters.is_empty() {
        log_level.to_string()
    } else {
        format!("{log_level},{filters}")
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_str));

    // Ignore the error if a subscriber is already installed (tests, embedders
    // with their own setup).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}
