use tracing_subscriber::EnvFilter;

use crate::settings::{ClientSettings, DEFAULT_LOG_FILTER};

/// `RUST_LOG` wins over the configured filter; an unparsable filter falls back to the default.
pub fn env_filter(settings: &ClientSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Installs the global subscriber. Logs go to stderr so stdout stays machine readable.
pub fn init(settings: &ClientSettings) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter(settings))
        .with_writer(std::io::stderr)
        .try_init();

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
