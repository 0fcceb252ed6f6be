// Logging setup
//
// The library only emits `tracing` events; binaries call `init_telemetry`
// once to install a console subscriber.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default filter when neither `RUST_LOG` nor `LOG_LEVEL` is set
pub const DEFAULT_LOG_FILTER: &str = "jobpool=info";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Whether to log to the console
    pub enable_console: bool,
    /// `EnvFilter` directives (None = [`DEFAULT_LOG_FILTER`])
    pub log_filter: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "jobpool".to_string(),
            enable_console: true,
            log_filter: None,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// - `SERVICE_NAME`: service name (default: "jobpool")
    /// - `RUST_LOG` or `LOG_LEVEL`: log filter
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "jobpool".to_string()),
            enable_console: true,
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
        }
    }

    /// Build the filter, falling back to the default on invalid directives
    pub fn env_filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

/// Install the global subscriber
///
/// Returns false if a subscriber was already installed (e.g. by a test
/// harness), in which case the existing one is kept.
///
/// # Example
///
/// ```ignore
/// use jobpool::telemetry::{init_telemetry, TelemetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     init_telemetry(TelemetryConfig::from_env());
///     // ... your application code
/// }
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> bool {
    let console_layer = if config.enable_console {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(config.env_filter()),
        )
    } else {
        None
    };

    let installed = tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(service = %config.service_name, "Telemetry initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::filter::LevelFilter;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "jobpool");
        assert!(config.enable_console);
        assert_eq!(config.env_filter().max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn test_custom_filter() {
        let config = TelemetryConfig {
            log_filter: Some("jobpool=trace".to_string()),
            ..Default::default()
        };
        assert_eq!(config.env_filter().max_level_hint(), Some(LevelFilter::TRACE));
    }

    #[test]
    fn test_invalid_filter_falls_back() {
        let config = TelemetryConfig {
            log_filter: Some("jobpool=loud".to_string()),
            ..Default::default()
        };
        assert_eq!(config.env_filter().max_level_hint(), Some(LevelFilter::INFO));
    }
}
