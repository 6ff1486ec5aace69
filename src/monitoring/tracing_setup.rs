use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Logging configuration (`[logging]` in config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` wins when set
    pub level: String,
    pub format: LogFormat,
    /// Directory for a daily-rolling `dumont.log`
    pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            directory: None,
        }
    }
}

impl LogConfig {
    /// Install the global subscriber.
    ///
    /// The returned guard flushes the file writer and must be kept alive for
    /// the lifetime of the process.
    pub fn init(&self) -> Result<Option<WorkerGuard>> {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let (file_layer, guard) = match &self.directory {
            Some(directory) => {
                std::fs::create_dir_all(directory)
                    .with_context(|| format!("Failed to create log directory {:?}", directory))?;
                let appender = tracing_appender::rolling::daily(directory, "dumont.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer().with_writer(writer).with_ansi(false).json();
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        let registry = Registry::default().with(env_filter).with(file_layer);

        let result = match self.format {
            LogFormat::Json => registry
                .with(fmt::layer().json().flatten_event(true).with_current_span(true))
                .try_init(),
            LogFormat::Pretty => registry
                .with(fmt::layer().pretty().with_target(true))
                .try_init(),
            LogFormat::Compact => registry
                .with(fmt::layer().with_target(false).compact())
                .try_init(),
        };
        result.context("Failed to install tracing subscriber")?;

        Ok(guard)
    }
}
