use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `orc_core=debug,warn`.
    pub level: String,
    pub output: LogOutput,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Text,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>, output: LogOutput) -> Self {
        Self {
            level: level.into(),
            output,
        }
    }

    /// `RUST_LOG` if set and valid, otherwise the configured level.
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber.
///
/// Safe to call multiple times (e.g. in tests); later calls are no-ops.
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init(service_name: &str, config: &LoggingConfig) {
    let filter = config.filter();

    match config.output {
        LogOutput::Text => {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .try_init()
                .ok();
        }
        LogOutput::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_level(true)
                .try_init()
                .ok();
        }
    }

    tracing::debug!(service = service_name, output = ?config.output, "logging initialised");
}
