//! Test pass options
//!
//! Options are resolved once at the start of a pass and stay fixed for its
//! duration. Missing or undersized values are raised to safe floors.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::config::ConfigError;

/// Lowest allowed per-candidate timeout (seconds)
pub const MIN_TIMEOUT_SECS: u64 = 8;

/// How the end-of-pass summary is ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMethod {
    /// Fastest average speed first
    Speed,
    /// Lowest ping first
    Ping,
    /// Test order
    None,
}

impl SortMethod {
    pub fn parse(name: &str) -> Self {
        match name {
            "rspeed" | "speed" => SortMethod::Speed,
            "rping" | "ping" => SortMethod::Ping,
            _ => SortMethod::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestOptions {
    pub group_name: String,
    pub speed_test_mode: String,
    pub ping_method: String,
    pub sort_method: String,
    pub concurrency: usize,
    pub test_mode: u32,
    pub language: String,
    pub font_size: u32,
    pub theme: String,
    /// Per-candidate timeout (seconds)
    pub timeout: u64,
    /// Emit an end-of-pass summary
    pub generate_pic: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            group_name: "Default".to_string(),
            speed_test_mode: "all".to_string(),
            ping_method: "googleping".to_string(),
            sort_method: "rspeed".to_string(),
            concurrency: 4,
            test_mode: 2,
            language: "en".to_string(),
            font_size: 24,
            theme: "rainbow".to_string(),
            timeout: 15,
            generate_pic: true,
        }
    }
}

impl TestOptions {
    /// Load options from a JSON file and apply floors
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let options: Self = serde_json::from_slice(&data)?;
        Ok(options.normalized())
    }

    /// Options for a command-line pass: the file if it loads, defaults otherwise
    pub fn for_command_line(path: Option<&Path>) -> Self {
        let mut options = match path {
            Some(path) => TestOptions::load(path).unwrap_or_else(|e| {
                warn!("Ignoring options file {:?}: {}", path, e);
                TestOptions::default()
            }),
            None => TestOptions::default(),
        };
        options.generate_pic = true;
        options
    }

    /// Raise undersized values to their floors
    pub fn normalized(mut self) -> Self {
        if self.concurrency < 1 {
            self.concurrency = 1;
        }
        if self.language.is_empty() {
            self.language = "en".to_string();
        }
        if self.theme.is_empty() {
            self.theme = "rainbow".to_string();
        }
        if self.timeout < MIN_TIMEOUT_SECS {
            self.timeout = MIN_TIMEOUT_SECS;
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn sort(&self) -> SortMethod {
        SortMethod::parse(&self.sort_method)
    }
}
