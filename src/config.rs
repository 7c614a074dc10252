use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::timing::SchedulerTiming;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: ron::error::SpannedError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Period of the scheduler timer.
    pub tick_interval_ms: u64,
    /// How far ahead of the playback position each tick schedules.
    pub lookahead_ms: u64,
    /// Capacity of the scheduler -> gateway instruction ring.
    pub gateway_capacity: usize,
    pub client_name: String,
    /// Substring of the output port name to connect to; first port if unset.
    pub output_port: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 25,
            lookahead_ms: 100,
            gateway_capacity: 4096,
            client_name: "sakkyoku".to_owned(),
            output_port: None,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_ron(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_ron(text: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(text)
    }

    pub fn scheduler_timing(&self) -> SchedulerTiming {
        let interval = Duration::from_millis(self.tick_interval_ms.max(1));
        let lookahead = Duration::from_millis(self.lookahead_ms);
        if lookahead < interval {
            warn!(
                lookahead_ms = self.lookahead_ms,
                tick_interval_ms = self.tick_interval_ms,
                "lookahead shorter than the tick interval, using the interval"
            );
        }
        SchedulerTiming::new(interval, lookahead)
    }
}
