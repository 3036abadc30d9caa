//! Logging system configuration and initialization
//!
//! Console output (plain or JSON) plus an optional non-blocking daily rolling log
//! file. `RUST_LOG` overrides the configured level when set.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use chrono::Utc;
use lazy_static::lazy_static;
use tracing::info;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    filter::Directive,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "dupe-checker.log";

// Global guard to keep the log file writer alive
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

/// UTC timestamps with millisecond precision
struct UtcTimeFormatter;

impl FormatTime for UtcTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"))
    }
}

/// Directory for the rolling log file: configured, else `logs/` next to the executable
pub fn get_log_directory(config: &LoggingConfig) -> PathBuf {
    if let Some(dir) = &config.log_dir {
        return dir.clone();
    }
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(std::path::Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    exe_dir.join("logs")
}

/// Filter used when `RUST_LOG` is not set.
///
/// HTTP client internals are kept quiet unless TRACE is requested.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directive = |d: String| -> Result<Directive> {
        d.parse().map_err(|e| anyhow!("Invalid log directive {}: {}", d, e))
    };

    let mut filter = EnvFilter::try_new(&config.level)
        .map_err(|e| anyhow!("Invalid log level {}: {}", config.level, e))?;

    if !config.level.to_lowercase().contains("trace") {
        filter = filter
            .add_directive(directive("reqwest=info".to_string())?)
            .add_directive(directive("hyper=warn".to_string())?)
            .add_directive(directive("h2=warn".to_string())?);
    }

    for (module, level) in &config.module_filters {
        filter = filter.add_directive(directive(format!("{module}={level}"))?);
    }

    Ok(filter)
}

/// Initialize logging with the given configuration.
///
/// Only the first call installs a subscriber; later calls return `Ok(())`.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(config)?,
    };

    if !config.console_output && !config.file_output {
        return Err(anyhow!("No logging output configured"));
    }

    let console_layer = config.console_output.then(|| {
        let layer = fmt::Layer::new()
            .with_writer(std::io::stdout)
            .with_timer(UtcTimeFormatter)
            .with_target(false);
        if config.json_format {
            layer.json().boxed()
        } else {
            layer.boxed()
        }
    });

    let log_dir = get_log_directory(config);
    let mut file_guard = None;
    let file_layer = if config.file_output {
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;
        let (file_writer, guard) = non_blocking(rolling::daily(&log_dir, LOG_FILE_PREFIX));
        file_guard = Some(guard);

        let layer = fmt::Layer::new()
            .with_writer(file_writer)
            .with_timer(UtcTimeFormatter)
            .with_ansi(false);
        Some(if config.json_format {
            layer.json().with_target(true).with_thread_ids(true).boxed()
        } else {
            layer.with_target(false).boxed()
        })
    } else {
        None
    };

    let installed = Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if !installed {
        return Ok(());
    }

    // Store the guard globally to prevent it from being dropped
    if let Some(guard) = file_guard {
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("Log guard registry poisoned"))?
            .push(guard);
    }
    info!("🧾 Logging system initialized (level: {}, json: {})", config.level, config.json_format);
    if config.file_output {
        info!("📁 Log directory: {:?}", log_dir);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.console_output);
        assert!(!config.file_output);
    }

    #[test]
    fn test_configured_log_directory_wins() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            log_dir: Some(dir.path().to_path_buf()),
            ..LoggingConfig::default()
        };
        assert_eq!(get_log_directory(&config), dir.path());
        assert!(get_log_directory(&LoggingConfig::default()).ends_with("logs"));
    }

    #[test]
    fn test_build_filter_accepts_module_filters() {
        let mut config = LoggingConfig {
            level: "debug".to_string(),
            ..LoggingConfig::default()
        };
        config
            .module_filters
            .insert("dupe_checker_lib::visit".to_string(), "trace".to_string());
        assert!(build_filter(&config).is_ok());

        config.level = "debug=verbose".to_string();
        assert!(build_filter(&config).is_err());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            file_output: true,
            log_dir: Some(dir.path().to_path_buf()),
            ..LoggingConfig::default()
        };
        let guards = || LOG_GUARDS.lock().map(|g| g.len()).unwrap_or_default();

        assert!(init_logging(&config).is_ok());
        let after_first = guards();
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());

        // only an installed subscriber keeps its file writer alive
        assert_eq!(guards(), after_first);
        assert!(after_first <= 1);
        assert!(dir.path().exists());
    }

    #[test]
    fn test_no_output_is_rejected() {
        let config = LoggingConfig {
            console_output: false,
            file_output: false,
            ..LoggingConfig::default()
        };
        assert!(init_logging(&config).is_err());
    }
}
