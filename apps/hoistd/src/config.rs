//! Daemon configuration.
//!
//! Configuration is stored as TOML. The file is taken from the first
//! command-line argument, else `$HOIST_CONFIG`, else
//! `~/.config/hoist/hoistd.toml`. `HOIST_ACCESS_KEY` and `HOIST_SECRET_KEY`
//! override the keys found in the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hoist_checkpoint::DEFAULT_PROGRESS_DIR;
use hoist_pipeline::WatcherConfig;
use hoist_transfer::{FailurePolicy, UploadOptions};
use serde::{Deserialize, Serialize};

/// Largest block the upload protocol accepts.
pub const MAX_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// Errors from loading or validating the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Directory to watch.
    #[serde(default)]
    pub path: PathBuf,

    /// Seconds between two scans.
    #[serde(default = "default_walk_interval")]
    pub walk_interval_secs: u64,

    /// Seconds a file must stay unmodified before it is uploaded.
    #[serde(default = "default_prepared_time")]
    pub prepared_time_secs: u64,

    #[serde(default)]
    pub bucket: String,

    #[serde(default)]
    pub access_key: String,

    #[serde(default)]
    pub secret_key: String,

    /// Upload host, e.g. `https://upload.example.com`.
    #[serde(default)]
    pub endpoint: String,

    #[serde(default = "default_suffix")]
    pub suffix: String,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_block_size")]
    pub block_size: u64,

    #[serde(default = "default_block_concurrency")]
    pub block_concurrency: usize,

    #[serde(default)]
    pub key_prefix: String,

    /// Re-queue a failed file after `retry_backoff_secs` instead of holding
    /// it until restart.
    #[serde(default = "default_true")]
    pub retry_on_failure: bool,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,

    /// Checkpoint directory; `<path>/progress` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_dir: Option<PathBuf>,

    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

fn default_walk_interval() -> u64 {
    10
}

fn default_prepared_time() -> u64 {
    30
}

fn default_suffix() -> String {
    ".pdf".into()
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    hoist_pipeline::DEFAULT_QUEUE_CAPACITY
}

fn default_block_size() -> u64 {
    hoist_transfer::DEFAULT_BLOCK_SIZE
}

fn default_block_concurrency() -> usize {
    hoist_transfer::DEFAULT_BLOCK_CONCURRENCY
}

fn default_true() -> bool {
    true
}

fn default_retry_backoff() -> u64 {
    60
}

fn default_token_ttl() -> u64 {
    3600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            walk_interval_secs: default_walk_interval(),
            prepared_time_secs: default_prepared_time(),
            bucket: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            endpoint: String::new(),
            suffix: default_suffix(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            block_size: default_block_size(),
            block_concurrency: default_block_concurrency(),
            key_prefix: String::new(),
            retry_on_failure: default_true(),
            retry_backoff_secs: default_retry_backoff(),
            progress_dir: None,
            token_ttl_secs: default_token_ttl(),
        }
    }
}

impl Config {
    /// Reads, overrides from the environment, and validates `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Replaces the keys with `HOIST_ACCESS_KEY` / `HOIST_SECRET_KEY` when set.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ak) = lookup("HOIST_ACCESS_KEY").filter(|v| !v.is_empty()) {
            self.access_key = ak;
        }
        if let Some(sk) = lookup("HOIST_SECRET_KEY").filter(|v| !v.is_empty()) {
            self.secret_key = sk;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.path.as_os_str().is_empty() {
            return invalid("`path` is required");
        }
        if self.bucket.is_empty() {
            return invalid("`bucket` is required");
        }
        if self.access_key.is_empty() || self.secret_key.is_empty() {
            return invalid("`access_key` and `secret_key` are required");
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return invalid("`endpoint` must be an http(s) URL");
        }
        if self.walk_interval_secs == 0 {
            return invalid("`walk_interval_secs` must be at least 1");
        }
        if self.workers == 0 {
            return invalid("`workers` must be at least 1");
        }
        if self.queue_capacity == 0 {
            return invalid("`queue_capacity` must be at least 1");
        }
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return invalid("`block_size` must be between 1 and 4194304");
        }
        if self.block_concurrency == 0 {
            return invalid("`block_concurrency` must be at least 1");
        }
        if self.token_ttl_secs == 0 {
            return invalid("`token_ttl_secs` must be at least 1");
        }
        Ok(())
    }

    pub fn progress_dir(&self) -> PathBuf {
        self.progress_dir
            .clone()
            .unwrap_or_else(|| self.path.join(DEFAULT_PROGRESS_DIR))
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        if self.retry_on_failure {
            FailurePolicy::Retry {
                backoff: Duration::from_secs(self.retry_backoff_secs),
            }
        } else {
            FailurePolicy::Hold
        }
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            bucket: self.bucket.clone(),
            block_size: self.block_size,
            block_concurrency: self.block_concurrency,
            key_prefix: self.key_prefix.clone(),
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            root: self.path.clone(),
            suffix: self.suffix.clone(),
            walk_interval: Duration::from_secs(self.walk_interval_secs),
            prepared_time: Duration::from_secs(self.prepared_time_secs),
            exclude: vec![self.progress_dir()],
        }
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

/// Resolves the configuration file location.
pub fn config_path(arg: Option<String>) -> PathBuf {
    if let Some(arg) = arg {
        return PathBuf::from(arg);
    }
    if let Some(env) = std::env::var_os("HOIST_CONFIG").filter(|v| !v.is_empty()) {
        return PathBuf::from(env);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("hoist")
        .join("hoistd.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
path = "/srv/scans"
bucket = "archive"
access_key = "ak"
secret_key = "sk"
endpoint = "https://upload.example.com"
"#;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.walk_interval_secs, 10);
        assert_eq!(config.prepared_time_secs, 30);
        assert_eq!(config.suffix, ".pdf");
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 50);
        assert_eq!(config.block_size, 4 * 1024 * 1024);
        assert_eq!(config.block_concurrency, 1);
        assert!(config.retry_on_failure);
        assert_eq!(config.retry_backoff_secs, 60);
        assert_eq!(config.token_ttl_secs, 3600);
        assert_eq!(config.progress_dir(), PathBuf::from("/srv/scans/progress"));
    }

    #[test]
    fn overrides_are_honoured() {
        let toml_str = format!(
            "{MINIMAL}\nworkers = 8\nsuffix = \"tif\"\nretry_on_failure = false\nprogress_dir = \"/var/lib/hoist\"\nkey_prefix = \"scans/\"\n"
        );
        let config: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.workers, 8);
        assert_eq!(config.failure_policy(), FailurePolicy::Hold);
        assert_eq!(config.progress_dir(), PathBuf::from("/var/lib/hoist"));
        assert_eq!(config.upload_options().key_prefix, "scans/");

        let watcher = config.watcher_config();
        assert_eq!(watcher.suffix, "tif");
        assert_eq!(watcher.exclude, vec![PathBuf::from("/var/lib/hoist")]);
    }

    #[test]
    fn retry_policy_uses_backoff() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.retry_backoff_secs = 5;
        assert_eq!(
            config.failure_policy(),
            FailurePolicy::Retry {
                backoff: Duration::from_secs(5)
            }
        );
    }

    fn assert_rejected(field: &str, mutate: impl Fn(&mut Config)) {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        mutate(&mut config);
        let err = config.validate().unwrap_err();
        assert!(
            err.to_string().contains(field),
            "expected error about {field}, got: {err}"
        );
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert_rejected("path", |c| c.path = PathBuf::new());
        assert_rejected("bucket", |c| c.bucket.clear());
        assert_rejected("secret_key", |c| c.secret_key.clear());
        assert_rejected("endpoint", |c| c.endpoint = "upload.example.com".into());
        assert_rejected("walk_interval_secs", |c| c.walk_interval_secs = 0);
        assert_rejected("workers", |c| c.workers = 0);
        assert_rejected("queue_capacity", |c| c.queue_capacity = 0);
        assert_rejected("block_size", |c| c.block_size = MAX_BLOCK_SIZE + 1);
        assert_rejected("block_concurrency", |c| c.block_concurrency = 0);
    }

    #[test]
    fn env_overrides_keys() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.apply_env(|name| match name {
            "HOIST_ACCESS_KEY" => Some("env-ak".into()),
            "HOIST_SECRET_KEY" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.access_key, "env-ak");
        assert_eq!(config.secret_key, "sk");
    }

    #[test]
    fn load_reads_and_validates_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hoistd.toml");

        std::fs::write(&path, MINIMAL).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.bucket, "archive");

        std::fs::write(&path, "workers = \"many\"").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));

        std::fs::write(&path, "workers = 2").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Invalid(_))));

        let missing = tmp.path().join("missing.toml");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn roundtrip_toml() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn explicit_argument_wins() {
        assert_eq!(
            config_path(Some("/etc/hoist.toml".into())),
            PathBuf::from("/etc/hoist.toml")
        );
    }
}
