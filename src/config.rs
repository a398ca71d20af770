//! Runtime options for parsing and indexing.

use crate::error::{Error, Result};
use crate::index::{DEFAULT_FRAME_RATE, IndexOptions};
use crate::record::RegenThresholds;
use crate::schema::{FieldNaming, SchemaOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Frame rate assumed when the track has no usable frame durations.
    pub default_frame_rate: f64,
    pub field_naming: FieldNaming,
    pub regen: RegenThresholds,
    /// Report progress every this many units.
    pub progress_interval: usize,
    /// Prefer the background parser; the inline one is used when it is
    /// unavailable.
    pub use_worker: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_frame_rate: DEFAULT_FRAME_RATE,
            field_naming: FieldNaming::default(),
            regen: RegenThresholds::default(),
            progress_interval: 256,
            use_worker: true,
        }
    }
}

impl TelemetryConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.default_frame_rate.is_finite() && self.default_frame_rate > 0.0) {
            return Err(Error::Config(format!(
                "default_frame_rate must be positive, got {}",
                self.default_frame_rate
            )));
        }
        if self.progress_interval == 0 {
            return Err(Error::Config("progress_interval must be at least 1".into()));
        }
        Ok(())
    }

    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            default_frame_rate: self.default_frame_rate,
            regen: self.regen,
        }
    }

    pub fn schema_options(&self) -> SchemaOptions {
        SchemaOptions {
            naming: self.field_naming,
            ..Default::default()
        }
    }
}
