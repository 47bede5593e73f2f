//! World configuration.
//!
//! ```
//! use strata_ecs::config::{BuildMode, EcsConfig};
//!
//! let config = EcsConfig::from_json_str(r#"{ "mode": "production", "queue_capacity": 4096 }"#).unwrap();
//! assert_eq!(config.mode, BuildMode::Production);
//! assert_eq!(config.queue_capacity, Some(4096));
//! ```

use serde::{Deserialize, Serialize};

use crate::pool::PoolGrowth;
use crate::EcsError;

// ---------------------------------------------------------------------------
// BuildMode
// ---------------------------------------------------------------------------

/// How the registry treats lookups of owners and groups that were never
/// registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    /// Missing registrations are errors.
    Production,
    /// Missing registrations are logged and a fallback is used: implicit
    /// storage for attaches, empty results for reads.
    Development,
}

impl Default for BuildMode {
    /// Development in debug builds, Production in release builds.
    fn default() -> Self {
        if cfg!(debug_assertions) {
            BuildMode::Development
        } else {
            BuildMode::Production
        }
    }
}

// ---------------------------------------------------------------------------
// EcsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EcsConfig {
    pub mode: BuildMode,
    /// Per-queue bound on pending commands. `None` means unbounded. Commands
    /// enqueued while a bounded queue is full are dropped and counted.
    pub queue_capacity: Option<usize>,
    /// Growth policy for every component pool the world creates.
    pub pool_growth: PoolGrowth,
}

impl EcsConfig {
    /// Default configuration with unregistered access treated as an error.
    pub fn production() -> Self {
        Self {
            mode: BuildMode::Production,
            ..Default::default()
        }
    }

    /// Default configuration with unregistered access logged and tolerated.
    pub fn development() -> Self {
        Self {
            mode: BuildMode::Development,
            ..Default::default()
        }
    }

    /// Parse and validate a JSON document. Missing fields take their
    /// defaults.
    pub fn from_json_str(json: &str) -> Result<Self, EcsError> {
        let config: EcsConfig =
            serde_json::from_str(json).map_err(|e| EcsError::InvalidConfig {
                details: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no world can run with, such as a zero queue bound.
    pub fn validate(&self) -> Result<(), EcsError> {
        if self.queue_capacity == Some(0) {
            return Err(EcsError::InvalidConfig {
                details: "queue_capacity must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
