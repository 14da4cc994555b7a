//! Viewer configuration
//!
//! Loaded from TOML. Every field is optional:
//!
//! ```toml
//! state_cache_capacity = 20
//! auto_expand_level = 0      # -1 expands every level
//! prefetch_limit = 1000
//! children_batch_size = 1
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Expand every level as it is materialized
pub const ALL_LEVELS: i32 = -1;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Number of saved viewer states kept (default: 20)
    #[serde(default = "default_state_cache_capacity")]
    pub state_cache_capacity: usize,

    /// Depth up to which nodes are expanded automatically (default: 0)
    ///
    /// Level 2 expands the input's children, [`ALL_LEVELS`] expands
    /// everything. A restored collapse never applies inside this level.
    #[serde(default)]
    pub auto_expand_level: i32,

    /// Children fetched eagerly per expanded node (default: 1000)
    #[serde(default = "default_prefetch_limit")]
    pub prefetch_limit: usize,

    /// Initial length of a children fetch (default: 1)
    #[serde(default = "default_children_batch_size")]
    pub children_batch_size: usize,
}

fn default_state_cache_capacity() -> usize {
    20
}

fn default_prefetch_limit() -> usize {
    1000
}

fn default_children_batch_size() -> usize {
    1
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            state_cache_capacity: default_state_cache_capacity(),
            auto_expand_level: 0,
            prefetch_limit: default_prefetch_limit(),
            children_batch_size: default_children_batch_size(),
        }
    }
}

impl ViewerConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: ViewerConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "state_cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.auto_expand_level < ALL_LEVELS {
            return Err(ConfigError::Invalid(format!(
                "auto_expand_level must be -1 or greater, got {}",
                self.auto_expand_level
            )));
        }
        if self.children_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "children_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy with every out-of-range value pulled to its nearest valid one
    pub fn clamped(&self) -> Self {
        Self {
            state_cache_capacity: self.state_cache_capacity.max(1),
            auto_expand_level: self.auto_expand_level.max(ALL_LEVELS),
            prefetch_limit: self.prefetch_limit,
            children_batch_size: self.children_batch_size.max(1),
        }
    }

    /// Whether a node with `depth` path segments is auto-expanded
    pub fn auto_expands(&self, depth: usize) -> bool {
        self.auto_expand_level == ALL_LEVELS || (depth as i64) < self.auto_expand_level as i64
    }
}
