//! Nodeboard Configuration
//!
//! One TOML file covers both operating modes. The server reads the registry
//! and listener settings; the client reads the reporting settings. CLI flags
//! override file values through the `with_*` builders.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::registry::ranking::{DEFAULT_FRESHNESS_WINDOW_SECS, MAX_FRESHNESS_WINDOW_SECS};
use crate::registry::{RankingPolicy, DEFAULT_CAPACITY};
use crate::reporter::queue::DEFAULT_QUEUE_CAPACITY;

/// Startup configuration problems. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("You MUST set a test source (--test) in client mode")]
    MissingTestSource,

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to parse JSON options: {0}")]
    Json(#[from] serde_json::Error),
}

/// Main configuration for the nodeboard service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderboardConfig {
    // === Server ===

    /// Port for the HTTP listener
    pub listen_port: u16,

    /// Shared secret embedded in the ingest/export path (`/nodes/<token>`)
    pub token: String,

    /// Maximum nodes kept on the leaderboard
    pub max_nodes: usize,

    /// Age after which a node counts as stale (seconds)
    pub freshness_window_secs: u64,

    /// Leaderboard ordering
    pub ranking: RankingPolicy,

    /// Serve realtime test sessions on `/test`
    pub enable_sessions: bool,

    // === Client ===

    /// Ingest endpoint the relay POSTs results to
    pub report_url: String,

    /// Subscription link or file path to test
    pub test_source: Option<String>,

    /// JSON file with test options
    pub options_file: Option<PathBuf>,

    /// Pause between test passes (seconds)
    pub pass_interval_secs: u64,

    /// Bounded queue between the test pass and the relay
    pub queue_capacity: usize,

    /// Results whose name contains any of these are not reported
    pub suppressed_names: Vec<String>,

    /// Timeout for one relay POST (seconds)
    pub relay_timeout_secs: u64,

    /// External measurement program; the link is appended as the last argument
    pub probe_command: Vec<String>,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            // Server
            listen_port: 8090,
            token: String::new(),
            max_nodes: DEFAULT_CAPACITY,
            freshness_window_secs: DEFAULT_FRESHNESS_WINDOW_SECS, // 15 minutes
            ranking: RankingPolicy::FreshnessThenSpeed,
            enable_sessions: true,

            // Client
            report_url: "http://localhost:8090/".to_string(),
            test_source: None,
            options_file: None,
            pass_interval_secs: 600, // 10 minutes
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            suppressed_names: vec!["中国".to_string()],
            relay_timeout_secs: 30,
            probe_command: vec![],
        }
    }
}

impl LeaderboardConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    // Builder-style methods for CLI overrides

    pub fn with_listen_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.listen_port = port;
        }
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        if let Some(token) = token {
            self.token = token;
        }
        self
    }

    pub fn with_report_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url {
            self.report_url = url;
        }
        self
    }

    pub fn with_test_source(mut self, source: Option<String>) -> Self {
        if source.is_some() {
            self.test_source = source;
        }
        self
    }

    pub fn with_options_file(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.options_file = path;
        }
        self
    }

    /// Path of the ingest/export endpoint
    pub fn nodes_path(&self) -> String {
        format!("/nodes/{}", self.token)
    }

    /// The test source, required before the reporting loop may start
    pub fn require_test_source(&self) -> Result<&str, ConfigError> {
        match self.test_source.as_deref() {
            Some(source) if !source.trim().is_empty() => Ok(source),
            _ => Err(ConfigError::MissingTestSource),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_nodes == 0 {
            return Err(ConfigError::Invalid("max_nodes must be at least 1".into()));
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be at least 1".into()));
        }

        if self.pass_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "pass_interval_secs must be greater than 0".into(),
            ));
        }

        if !(1..=MAX_FRESHNESS_WINDOW_SECS).contains(&self.freshness_window_secs) {
            return Err(ConfigError::Invalid(format!(
                "freshness_window_secs must be between 1 and {}",
                MAX_FRESHNESS_WINDOW_SECS
            )));
        }

        if self.relay_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "relay_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.token.contains('/') || self.token.starts_with([':', '*']) {
            return Err(ConfigError::Invalid(format!(
                "token ({}) must not contain '/' or start with ':' or '*'",
                self.token
            )));
        }

        Ok(())
    }
}
