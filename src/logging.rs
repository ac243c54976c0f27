use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

const LOG_FILE_PREFIX: &str = "tutor-mastery.log";

/// Keeps the non-blocking file writer flushing; drop it on shutdown.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

/// Installs the global subscriber described by `config`.
///
/// A subscriber that is already installed wins; the call then does nothing
/// and returns `None`.
pub fn init_tracing(config: &LogConfig) -> Option<FileLogGuard> {
    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(true);

    if config.file_logs {
        if let Err(err) = std::fs::create_dir_all(&config.log_dir) {
            eprintln!("failed to create log directory {}: {err}", config.log_dir);
        } else {
            let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, LOG_FILE_PREFIX);
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true);

            let installed = tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer)
                .try_init()
                .is_ok();

            return installed.then_some(FileLogGuard { _guard: guard });
        }
    }

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init();

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let config = LogConfig {
            level: "debug".to_string(),
            ..LogConfig::default()
        };
        let _first = init_tracing(&config);
        assert!(init_tracing(&config).is_none());
        tracing::debug!("still logging");
    }

    #[test]
    fn test_bad_filter_falls_back() {
        let config = LogConfig {
            level: "not a [filter".to_string(),
            ..LogConfig::default()
        };
        let _ = init_tracing(&config);
    }
}
