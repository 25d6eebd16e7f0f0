use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub directories: DirectoriesConfig,
    #[serde(default)]
    pub convert: ConvertOptions,
}

/// Input/output directory pair
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DirectoriesConfig {
    /// Directory scanned for configuration tables.
    pub input: PathBuf,
    /// Directory the serialized files are written to.
    pub output: PathBuf,
}

/// Conversion behavior toggles
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConvertOptions {
    /// Run directory-wide validation after each batch.
    #[serde(default = "default_auto_validate_all")]
    pub auto_validate_all: bool,

    /// Convert files as soon as the watcher reports a change.
    #[serde(default)]
    pub auto_convert: bool,

    /// Only convert files whose modification is newer than their last conversion.
    #[serde(default)]
    pub only_updated: bool,

    /// Only convert files whose previous attempt failed.
    #[serde(default)]
    pub only_failed: bool,

    /// Case-sensitive substring applied to file names.
    #[serde(default)]
    pub filter: String,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            auto_validate_all: default_auto_validate_all(),
            auto_convert: false,
            only_updated: false,
            only_failed: false,
            filter: String::new(),
        }
    }
}

fn default_auto_validate_all() -> bool {
    true
}

impl ConvertOptions {
    /// Sets the filter substring.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Enables or disables watcher-driven conversion.
    pub fn with_auto_convert(mut self, auto_convert: bool) -> Self {
        self.auto_convert = auto_convert;
        self
    }

    /// Enables or disables post-batch directory validation.
    pub fn with_auto_validate_all(mut self, auto_validate_all: bool) -> Self {
        self.auto_validate_all = auto_validate_all;
        self
    }
}
