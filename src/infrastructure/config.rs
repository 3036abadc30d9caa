//! Application configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional file, then
//! `DUPE_CHECKER_*` environment variables (`__` separates sections), then the
//! repository/index variables deployments already set (`FCREPO_BASE_URI` and
//! friends).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::query::search::SearchTarget;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    FileLoad {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

/// 기본값 상수들
pub mod defaults {
    pub const REPOSITORY_BASE_URI: &str = "http://fcrepo:8080/fcrepo/rest";
    pub const REPOSITORY_INDEX_BASE_URI: &str = "http://fcrepo:8080/fcrepo/rest";
    pub const REPOSITORY_USER: &str = "fedoraAdmin";
    pub const REPOSITORY_PASSWORD: &str = "moo";
    pub const MAX_CONCURRENT_REQUESTS: u64 = 5;

    pub const HTTP_TIMEOUT_MS: u64 = 600_000;
    pub const HTTP_MAX_RETRIES: u64 = 3;

    pub const SEARCH_BASE_URI: &str = "http://elasticsearch:9200/pass/_search";
    pub const SEARCH_MAX_RESULT_SIZE: u64 = 1000;

    pub const WALK_CHANNEL_CAPACITY: u64 = 1;

    pub const LOG_LEVEL: &str = "info";
}

/// Environment variables honoured under their established names, mapped to config keys
pub const LEGACY_ENV_VARS: &[(&str, &str)] = &[
    ("FCREPO_BASE_URI", "repository.base_uri"),
    ("FCREPO_INDEX_BASE_URI", "repository.index_base_uri"),
    ("FCREPO_USER", "repository.user"),
    ("FCREPO_PASS", "repository.password"),
    ("FCREPO_MAX_CONCURRENT_REQUESTS", "repository.max_concurrent_requests"),
    ("HTTP_TIMEOUT_MS", "http.timeout_ms"),
    ("INDEX_SEARCH_BASE_URI", "search.base_uri"),
    ("INDEX_SEARCH_MAX_RESULT_SIZE", "search.max_result_size"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub repository: RepositoryConfig,
    pub http: HttpConfig,
    pub search: SearchConfig,
    pub walk: WalkConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Base URI of the repository REST API
    pub base_uri: String,
    /// Base URI the search index records identities under
    pub index_base_uri: String,
    pub user: String,
    pub password: String,
    /// Upper bound on simultaneous repository fetches
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Search endpoint, e.g. `http://elasticsearch:9200/pass/_search`
    pub base_uri: String,
    /// Largest hit page the index returns; totals above it are reported as truncated
    pub max_result_size: u64,
    pub scheme: Option<String>,
    pub host_and_port: Option<String>,
    pub index: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkConfig {
    /// Depth of each visitor result channel
    pub channel_capacity: usize,
    /// Container to start from; the repository base URI when unset
    pub start_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    /// Enable JSON formatted logs
    pub json_format: bool,
    pub console_output: bool,
    /// Also write a daily rolling log file into `log_dir`
    pub file_output: bool,
    pub log_dir: Option<PathBuf>,
    /// Module-specific log level filters (e.g., "reqwest": "warn")
    #[serde(default)]
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: None,
            module_filters: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from the process environment and `path` (or the default
    /// config file when `path` is `None`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::load_from(path, &env)
    }

    /// Same as [`AppConfig::load`] with an explicit environment
    pub fn load_from(path: Option<&Path>, env: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("repository.base_uri", defaults::REPOSITORY_BASE_URI)?
            .set_default("repository.index_base_uri", defaults::REPOSITORY_INDEX_BASE_URI)?
            .set_default("repository.user", defaults::REPOSITORY_USER)?
            .set_default("repository.password", defaults::REPOSITORY_PASSWORD)?
            .set_default("repository.max_concurrent_requests", defaults::MAX_CONCURRENT_REQUESTS)?
            .set_default("http.timeout_ms", defaults::HTTP_TIMEOUT_MS)?
            .set_default("http.max_retries", defaults::HTTP_MAX_RETRIES)?
            .set_default(
                "http.user_agent",
                format!("dupe-checker/{}", env!("CARGO_PKG_VERSION")),
            )?
            .set_default("search.base_uri", defaults::SEARCH_BASE_URI)?
            .set_default("search.max_result_size", defaults::SEARCH_MAX_RESULT_SIZE)?
            .set_default("walk.channel_capacity", defaults::WALK_CHANNEL_CAPACITY)?
            .set_default("logging.level", defaults::LOG_LEVEL)?
            .set_default("logging.json_format", false)?
            .set_default("logging.console_output", true)?
            .set_default("logging.file_output", false)?;

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path)),
            None => match default_config_file() {
                Some(stem) => builder.add_source(config::File::with_name(&stem.to_string_lossy()).required(false)),
                None => builder,
            },
        };

        builder = builder.add_source(
            config::Environment::with_prefix("DUPE_CHECKER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(Some(env.clone())),
        );

        for (var, key) in LEGACY_ENV_VARS {
            let value = env.get(*var).map(|v| v.trim().to_string());
            if value.is_some() {
                debug!("🔧 {} overrides {}", var, key);
            }
            builder = builder.set_override_option(*key, value)?;
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repository.max_concurrent_requests == 0 {
            return Err(ConfigError::Validation {
                message: "repository.max_concurrent_requests must be greater than 0".to_string(),
            });
        }

        if self.http.timeout_ms == 0 {
            return Err(ConfigError::Validation {
                message: "http.timeout_ms must be greater than 0".to_string(),
            });
        }

        if self.walk.channel_capacity == 0 {
            return Err(ConfigError::Validation {
                message: "walk.channel_capacity must be greater than 0".to_string(),
            });
        }

        let uris = [
            ("repository.base_uri", Some(&self.repository.base_uri)),
            ("repository.index_base_uri", Some(&self.repository.index_base_uri)),
            ("search.base_uri", Some(&self.search.base_uri)),
            ("walk.start_uri", self.walk.start_uri.as_ref()),
        ];
        for (key, uri) in uris {
            if let Some(uri) = uri {
                Url::parse(uri).map_err(|e| ConfigError::Validation {
                    message: format!("{key} is not a valid URI ({uri}): {e}"),
                })?;
            }
        }

        Ok(())
    }

    /// Scheme, host-and-port and index used to render queries
    pub fn search_target(&self) -> Result<SearchTarget, ConfigError> {
        let mut target =
            SearchTarget::from_search_uri(&self.search.base_uri).map_err(|e| ConfigError::Validation {
                message: format!("search.base_uri is not a valid URI ({}): {e}", self.search.base_uri),
            })?;

        if let Some(scheme) = &self.search.scheme {
            target.scheme.clone_from(scheme);
        }
        if let Some(host_and_port) = &self.search.host_and_port {
            target.host_and_port.clone_from(host_and_port);
        }
        if let Some(index) = &self.search.index {
            target.index.clone_from(index);
        }
        Ok(target)
    }

    /// Container the walk starts from
    pub fn start_uri(&self) -> &str {
        self.walk.start_uri.as_deref().unwrap_or(&self.repository.base_uri)
    }

    /// Base URIs under which resource identities may appear
    pub fn base_uris(&self) -> Vec<&str> {
        let mut bases = vec![self.repository.base_uri.as_str()];
        if self.repository.index_base_uri != self.repository.base_uri {
            bases.push(self.repository.index_base_uri.as_str());
        }
        bases
    }
}

/// `<config dir>/dupe-checker/config` (any supported extension)
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dupe-checker").join("config"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn toml_file(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let file = toml_file("");
        let config = AppConfig::load_from(Some(file.path()), &HashMap::new()).unwrap();

        assert_eq!(config.repository.base_uri, defaults::REPOSITORY_BASE_URI);
        assert_eq!(config.repository.user, "fedoraAdmin");
        assert_eq!(config.repository.password, "moo");
        assert_eq!(config.repository.max_concurrent_requests, 5);
        assert_eq!(config.http.timeout_ms, 600_000);
        assert_eq!(config.search.max_result_size, 1000);
        assert_eq!(config.walk.channel_capacity, 1);
        assert_eq!(config.start_uri(), defaults::REPOSITORY_BASE_URI);
        assert_eq!(config.base_uris(), vec![defaults::REPOSITORY_BASE_URI]);
        assert_eq!(
            config.search_target().unwrap(),
            SearchTarget::new("http", "elasticsearch:9200", "pass")
        );
    }

    #[test]
    fn test_layering_file_then_env_then_legacy_vars() {
        let file = toml_file(
            r#"
            [repository]
            base_uri = "http://file:8080/rest"
            max_concurrent_requests = 2

            [search]
            base_uri = "http://file-es:9200/file/_search"
            index = "override"
            "#,
        );
        let env = env(&[
            ("DUPE_CHECKER_REPOSITORY__MAX_CONCURRENT_REQUESTS", "7"),
            ("FCREPO_BASE_URI", "http://legacy:8080/fcrepo/rest"),
            ("FCREPO_INDEX_BASE_URI", "https://pass.example.org/fcrepo/rest"),
            ("HTTP_TIMEOUT_MS", "1500"),
        ]);

        let config = AppConfig::load_from(Some(file.path()), &env).unwrap();
        assert_eq!(config.repository.base_uri, "http://legacy:8080/fcrepo/rest");
        assert_eq!(config.repository.max_concurrent_requests, 7);
        assert_eq!(config.http.timeout_ms, 1500);
        assert_eq!(config.base_uris().len(), 2);
        assert_eq!(
            config.search_target().unwrap(),
            SearchTarget::new("http", "file-es:9200", "override")
        );
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let file = toml_file("");
        let err = AppConfig::load_from(Some(file.path()), &env(&[("FCREPO_MAX_CONCURRENT_REQUESTS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_validation_rejects_bad_uri() {
        let file = toml_file("");
        let err = AppConfig::load_from(Some(file.path()), &env(&[("INDEX_SEARCH_BASE_URI", "not a uri")]))
            .unwrap_err();
        assert!(err.to_string().contains("search.base_uri"));
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load_from(Some(&dir.path().join("absent.toml")), &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::FileLoad { .. }));
    }
}
