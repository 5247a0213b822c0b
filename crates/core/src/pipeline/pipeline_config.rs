use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inference::domain::engine_options::EngineOptions;
use crate::shared::constants::{
    DEFAULT_CATEGORY, DEFAULT_COOLDOWN_MS, DEFAULT_MIRROR, DEFAULT_SURFACE_HEIGHT,
    DEFAULT_SURFACE_WIDTH, DEFAULT_TRIGGER_THRESHOLD,
};
use crate::trigger::domain::trigger_debouncer::TargetPoint;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Pixel dimensions of the presentation surface receiving taps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub fn center(&self) -> TargetPoint {
        TargetPoint {
            x: self.width as f32 / 2.0,
            y: self.height as f32 / 2.0,
        }
    }
}

impl Default for SurfaceSize {
    fn default() -> Self {
        Self {
            width: DEFAULT_SURFACE_WIDTH,
            height: DEFAULT_SURFACE_HEIGHT,
        }
    }
}

impl FromStr for SurfaceSize {
    type Err = String;

    /// Parses `WIDTHxHEIGHT`, e.g. `800x600`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
        let width = w.trim().parse().map_err(|_| format!("invalid width '{w}'"))?;
        let height = h.trim().parse().map_err(|_| format!("invalid height '{h}'"))?;
        Ok(Self { width, height })
    }
}

/// Options recognized by the perception pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Expression label whose score drives triggers.
    pub category_name: String,
    pub threshold: f32,
    pub cooldown_ms: u64,
    /// Flip frames horizontally (front-facing capture).
    pub mirror: bool,
    pub surface: SurfaceSize,
    /// Explicit tap point; the surface center when unset.
    pub target: Option<TargetPoint>,
    pub engine: EngineOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            category_name: DEFAULT_CATEGORY.to_string(),
            threshold: DEFAULT_TRIGGER_THRESHOLD,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            mirror: DEFAULT_MIRROR,
            surface: SurfaceSize::default(),
            target: None,
            engine: EngineOptions::default(),
        }
    }
}

impl PipelineConfig {
    /// Reads a JSON config file; absent keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.category_name.trim().is_empty() {
            return Err(ConfigError::Invalid("category_name must not be empty".into()));
        }
        check_unit("threshold", self.threshold)?;
        check_unit(
            "engine.min_detection_confidence",
            self.engine.min_detection_confidence,
        )?;
        check_unit(
            "engine.min_tracking_confidence",
            self.engine.min_tracking_confidence,
        )?;
        check_unit(
            "engine.min_presence_confidence",
            self.engine.min_presence_confidence,
        )?;
        if self.engine.max_subjects == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_subjects must be at least 1".into(),
            ));
        }
        if self.surface.width == 0 || self.surface.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "surface must be non-empty, got {}x{}",
                self.surface.width, self.surface.height
            )));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn target_point(&self) -> TargetPoint {
        self.target.unwrap_or_else(|| self.surface.center())
    }
}

fn check_unit(name: &str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}
