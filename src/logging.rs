//! Tracing initialisation.
//!
//! `RUST_LOG` wins when set; otherwise the configured `application.log_level` applies to
//! everything. Logs go to stderr so stdout carries only measurement lines.

use tracing_subscriber::EnvFilter;

use crate::config::ApplicationConfig;

/// Build the filter used by [`init_from_config`].
pub fn env_filter(application: &ApplicationConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(application.log_level.to_lowercase()))
}

/// Install the global fmt subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_from_config(
    application: &ApplicationConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(application))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_from_config_level() {
        let application = ApplicationConfig {
            name: "test".to_string(),
            log_level: "DEBUG".to_string(),
        };
        if std::env::var_os("RUST_LOG").is_none() {
            assert_eq!(
                env_filter(&application).max_level_hint(),
                Some(tracing::level_filters::LevelFilter::DEBUG)
            );
        }
    }
}
