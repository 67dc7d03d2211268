//! Logging setup with optional JSON output and daily file rotation
//!
//! Library code only emits `tracing` events; installing a subscriber is left to the
//! embedding binary through [`init_logging`].

use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::Registry, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Logging configuration
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` holds no directive for a target
    pub level: Level,

    /// Log to file, rotated daily
    pub file_path: Option<PathBuf>,

    /// Log to stderr
    pub stderr: bool,

    /// Include thread IDs
    pub thread_ids: bool,

    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_path: None,
            stderr: true,
            thread_ids: false,
            json: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment
    ///
    /// Reads `RUST_LOG` (a bare level only; full directives are applied by the filter),
    /// `RESILIENCE_LOG_FILE`, `RESILIENCE_LOG_STDERR` and `RESILIENCE_LOG_JSON`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            if let Ok(level) = Level::from_str(rust_log.trim()) {
                config.level = level;
            }
        }

        if let Ok(log_file) = std::env::var("RESILIENCE_LOG_FILE") {
            if !log_file.trim().is_empty() {
                config.file_path = Some(PathBuf::from(log_file));
            }
        }

        if let Ok(log_stderr) = std::env::var("RESILIENCE_LOG_STDERR") {
            config.stderr = !log_stderr.eq_ignore_ascii_case("false");
        }

        if let Ok(log_json) = std::env::var("RESILIENCE_LOG_JSON") {
            config.json = log_json.eq_ignore_ascii_case("true") || log_json == "1";
        }

        config
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn output_layer<W>(writer: W, ansi: bool, config: &LogConfig) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    if config.json {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_thread_ids(config.thread_ids)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_thread_ids(config.thread_ids)
            .with_target(true)
            .boxed()
    }
}

/// Initialize logging with the given configuration
///
/// Fails if a global subscriber is already installed or the log directory cannot be
/// created.
pub fn init_logging(config: LogConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.stderr {
        layers.push(output_layer(std::io::stderr, true, &config));
    }

    if let Some(file_path) = &config.file_path {
        let directory = file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(directory)?;

        let file_name = file_path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("resilience.log"));
        let file_appender = tracing_appender::rolling::daily(directory, file_name);
        layers.push(output_layer(file_appender, false, &config));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_log_config_from_env() {
        temp_env::with_vars(
            [
                ("RUST_LOG", Some("debug")),
                ("RESILIENCE_LOG_FILE", Some("/tmp/resilience/status.log")),
                ("RESILIENCE_LOG_STDERR", Some("false")),
                ("RESILIENCE_LOG_JSON", Some("true")),
            ],
            || {
                let config = LogConfig::from_env();
                assert_eq!(config.level, Level::DEBUG);
                assert_eq!(
                    config.file_path,
                    Some(PathBuf::from("/tmp/resilience/status.log"))
                );
                assert!(!config.stderr);
                assert!(config.json);
            },
        );
    }

    #[test]
    #[serial]
    fn test_directive_rust_log_keeps_default_level() {
        temp_env::with_vars(
            [
                ("RUST_LOG", Some("datastore_resilience=trace,tokio=warn")),
                ("RESILIENCE_LOG_FILE", None),
                ("RESILIENCE_LOG_STDERR", None),
                ("RESILIENCE_LOG_JSON", None),
            ],
            || {
                assert_eq!(LogConfig::from_env(), LogConfig::default());
            },
        );
    }
}
