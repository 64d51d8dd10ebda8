//! Layered bridge configuration.
//!
//! # Resolution order
//!
//! ```text
//! built-in defaults  <  YAML file (--config)  <  environment variables
//! ```
//!
//! CLI flag overrides (`--dry-run`, `--use-feed`) are applied by the binary
//! after loading. Empty environment values count as unset.
//!
//! # API pattern
//!
//! [`BridgeConfig::load`] reads the process environment;
//! [`BridgeConfig::load_with`] takes an explicit lookup function and is what
//! tests use.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ConfigError;
use crate::types::CommitIdentity;

pub const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017";
pub const DEFAULT_MONGODB_DATABASE: &str = "virtual_dom";
pub const DEFAULT_REMOTE_BASE: &str = "https://github.com";

// ---------------------------------------------------------------------------
// Secret
// ---------------------------------------------------------------------------

/// A string that never prints its contents.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "Secret(<empty>)")
        } else {
            write!(f, "Secret(***)")
        }
    }
}

// ---------------------------------------------------------------------------
// Log format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "pretty" => Ok(LogFormat::Text),
            other => Err(format!("unknown log format '{other}'; expected json or text")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Json => write!(f, "json"),
            LogFormat::Text => write!(f, "text"),
        }
    }
}

// ---------------------------------------------------------------------------
// BridgeConfig
// ---------------------------------------------------------------------------

/// Fully resolved configuration for one bridge process.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub mongodb_uri: String,
    pub mongodb_database: String,

    pub github_token: Secret,
    pub github_org: String,
    pub github_repo: String,
    /// Used when an intent carries no branch.
    pub github_branch: String,
    pub remote_base: String,

    pub git_user_name: String,
    pub git_user_email: String,

    pub poll_interval: Duration,
    pub batch_size: usize,
    pub worker_count: usize,
    pub metrics_port: u16,
    pub feed_reconnect_delay: Duration,
    pub shutdown_timeout: Duration,
    /// `0` clones full history.
    pub clone_depth: u32,
    pub work_dir: PathBuf,

    pub dry_run: bool,
    pub use_feed: bool,

    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mongodb_uri: DEFAULT_MONGODB_URI.to_string(),
            mongodb_database: DEFAULT_MONGODB_DATABASE.to_string(),
            github_token: Secret::default(),
            github_org: String::new(),
            github_repo: String::new(),
            github_branch: "main".to_string(),
            remote_base: DEFAULT_REMOTE_BASE.to_string(),
            git_user_name: "Virtual DOM Bot".to_string(),
            git_user_email: "bot@tekfly.io".to_string(),
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
            worker_count: 3,
            metrics_port: 9091,
            feed_reconnect_delay: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
            clone_depth: 1,
            work_dir: std::env::temp_dir().join("github-bridge"),
            dry_run: false,
            use_feed: false,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

impl BridgeConfig {
    /// Load from defaults, an optional YAML file, and the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(file, |key| std::env::var(key).ok())
    }

    /// Load with an explicit environment lookup.
    pub fn load_with<F>(file: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(path) = file {
            config.apply_file(FileConfig::load_at(path)?);
        }
        config.apply_env(|key| lookup(key).filter(|value| !value.is_empty()))?;
        Ok(config)
    }

    /// Reject configurations the bridge cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.github_token.is_empty() {
            return Err(ConfigError::Missing {
                key: "GITHUB_TOKEN",
            });
        }
        if self.github_repo.is_empty() {
            return Err(ConfigError::Missing { key: "GITHUB_REPO" });
        }
        if self.github_org.is_empty() && !self.github_repo.contains('/') {
            return Err(ConfigError::Constraint(
                "GITHUB_ORG is required when GITHUB_REPO doesn't contain org/repo format"
                    .to_string(),
            ));
        }
        if self.poll_interval < Duration::from_secs(1) {
            return Err(ConfigError::Constraint(
                "POLL_INTERVAL must be at least 1 second".to_string(),
            ));
        }
        if self.batch_size < 1 {
            return Err(ConfigError::Constraint(
                "BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        if self.worker_count < 1 {
            return Err(ConfigError::Constraint(
                "WORKER_COUNT must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// `org/repo`, honouring a `GITHUB_REPO` that already carries the org.
    pub fn repo_full_name(&self) -> String {
        if self.github_repo.contains('/') {
            self.github_repo.clone()
        } else {
            format!("{}/{}", self.github_org, self.github_repo)
        }
    }

    /// Clone/push URL of the remote repository.
    pub fn remote_url(&self) -> String {
        format!(
            "{}/{}.git",
            self.remote_base.trim_end_matches('/'),
            self.repo_full_name()
        )
    }

    pub fn commit_identity(&self) -> CommitIdentity {
        CommitIdentity {
            name: self.git_user_name.clone(),
            email: self.git_user_email.clone(),
        }
    }

    /// JSON view with the token replaced, for operator output.
    pub fn redacted_json(&self) -> Value {
        let token = if self.github_token.is_empty() { "" } else { "***" };
        json!({
            "mongodb_uri": self.mongodb_uri,
            "mongodb_database": self.mongodb_database,
            "github_token": token,
            "github_org": self.github_org,
            "github_repo": self.github_repo,
            "github_branch": self.github_branch,
            "remote_url": self.remote_url(),
            "git_user_name": self.git_user_name,
            "git_user_email": self.git_user_email,
            "poll_interval_secs": self.poll_interval.as_secs(),
            "batch_size": self.batch_size,
            "worker_count": self.worker_count,
            "metrics_port": self.metrics_port,
            "feed_reconnect_delay_secs": self.feed_reconnect_delay.as_secs(),
            "shutdown_timeout_secs": self.shutdown_timeout.as_secs(),
            "clone_depth": self.clone_depth,
            "work_dir": self.work_dir.display().to_string(),
            "dry_run": self.dry_run,
            "use_feed": self.use_feed,
            "log_level": self.log_level,
            "log_format": self.log_format.to_string(),
        })
    }

    fn apply_file(&mut self, file: FileConfig) {
        let FileConfig {
            mongodb_uri,
            mongodb_database,
            github_token,
            github_org,
            github_repo,
            github_branch,
            remote_base,
            git_user_name,
            git_user_email,
            poll_interval,
            batch_size,
            worker_count,
            metrics_port,
            feed_reconnect_delay,
            shutdown_timeout,
            clone_depth,
            work_dir,
            dry_run,
            use_feed,
            log_level,
            log_format,
        } = file;

        set(&mut self.mongodb_uri, mongodb_uri);
        set(&mut self.mongodb_database, mongodb_database);
        set(&mut self.github_token, github_token.map(Secret::new));
        set(&mut self.github_org, github_org);
        set(&mut self.github_repo, github_repo);
        set(&mut self.github_branch, github_branch);
        set(&mut self.remote_base, remote_base);
        set(&mut self.git_user_name, git_user_name);
        set(&mut self.git_user_email, git_user_email);
        set(&mut self.poll_interval, poll_interval.map(Duration::from_secs));
        set(&mut self.batch_size, batch_size);
        set(&mut self.worker_count, worker_count);
        set(&mut self.metrics_port, metrics_port);
        set(
            &mut self.feed_reconnect_delay,
            feed_reconnect_delay.map(Duration::from_secs),
        );
        set(
            &mut self.shutdown_timeout,
            shutdown_timeout.map(Duration::from_secs),
        );
        set(&mut self.clone_depth, clone_depth);
        set(&mut self.work_dir, work_dir);
        set(&mut self.dry_run, dry_run);
        set(&mut self.use_feed, use_feed);
        set(&mut self.log_level, log_level);
        set(&mut self.log_format, log_format);
    }

    fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        set(&mut self.mongodb_uri, env("MONGODB_URI"));
        set(&mut self.mongodb_database, env("MONGODB_DATABASE"));
        set(&mut self.github_token, env("GITHUB_TOKEN").map(Secret::new));
        set(&mut self.github_org, env("GITHUB_ORG"));
        set(&mut self.github_repo, env("GITHUB_REPO"));
        set(&mut self.github_branch, env("GITHUB_BRANCH"));
        set(&mut self.remote_base, env("GITHUB_REMOTE_BASE"));
        set(&mut self.git_user_name, env("GIT_USER_NAME"));
        set(&mut self.git_user_email, env("GIT_USER_EMAIL"));
        set(
            &mut self.poll_interval,
            parse_env::<u64, _>(&env, "POLL_INTERVAL")?.map(Duration::from_secs),
        );
        set(&mut self.batch_size, parse_env(&env, "BATCH_SIZE")?);
        set(&mut self.worker_count, parse_env(&env, "WORKER_COUNT")?);
        set(&mut self.metrics_port, parse_env(&env, "METRICS_PORT")?);
        set(
            &mut self.feed_reconnect_delay,
            parse_env::<u64, _>(&env, "FEED_RECONNECT_DELAY")?.map(Duration::from_secs),
        );
        set(
            &mut self.shutdown_timeout,
            parse_env::<u64, _>(&env, "SHUTDOWN_TIMEOUT")?.map(Duration::from_secs),
        );
        set(&mut self.clone_depth, parse_env(&env, "GIT_CLONE_DEPTH")?);
        set(&mut self.work_dir, env("WORK_DIR").map(PathBuf::from));
        set(&mut self.dry_run, parse_bool_env(&env, "DRY_RUN")?);
        set(&mut self.use_feed, parse_bool_env(&env, "USE_FEED")?);
        set(&mut self.log_level, env("LOG_LEVEL"));
        set(&mut self.log_format, parse_env(&env, "LOG_FORMAT")?);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// YAML file layer
// ---------------------------------------------------------------------------

/// On-disk configuration. Every key is optional; durations are in seconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub mongodb_uri: Option<String>,
    pub mongodb_database: Option<String>,
    pub github_token: Option<String>,
    pub github_org: Option<String>,
    pub github_repo: Option<String>,
    pub github_branch: Option<String>,
    pub remote_base: Option<String>,
    pub git_user_name: Option<String>,
    pub git_user_email: Option<String>,
    pub poll_interval: Option<u64>,
    pub batch_size: Option<usize>,
    pub worker_count: Option<usize>,
    pub metrics_port: Option<u16>,
    pub feed_reconnect_delay: Option<u64>,
    pub shutdown_timeout: Option<u64>,
    pub clone_depth: Option<u32>,
    pub work_dir: Option<PathBuf>,
    pub dry_run: Option<bool>,
    pub use_feed: Option<bool>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

impl FileConfig {
    /// Parse a YAML config file. Errors carry the file path.
    pub fn load_at(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn parse_env<T, F>(env: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match env(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: err.to_string(),
            }),
    }
}

fn parse_bool_env<F>(env: &F, key: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match env(key) {
        None => Ok(None),
        Some(raw) => parse_bool(raw.trim())
            .map(Some)
            .ok_or_else(|| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: "expected a boolean".to_string(),
            }),
    }
}

/// Accepts the usual spellings: `1/0`, `t/f`, `true/false` in any case, `yes/no`.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
