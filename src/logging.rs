//! Tracing subscriber setup
//!
//! The crate only emits `tracing` events; embedding applications that do
//! not install their own subscriber can call [`init`].

use crate::config::schema::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber described by `config`
///
/// Returns `false` if a global subscriber was already installed, which is
/// not an error: the first installer wins.
pub fn init(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_new(&config.filter)
        .unwrap_or_else(|_| EnvFilter::new("billing_cache=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        let config = LoggingConfig {
            filter: "not a [valid filter".to_string(),
            format: "json".to_string(),
        };
        let _ = init(&config);
        assert!(!init(&LoggingConfig::default()));
    }
}
