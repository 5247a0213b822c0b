use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::shared::constants::{
    DEFAULT_DETECTION_CONFIDENCE, DEFAULT_MAX_SUBJECTS, DEFAULT_PRESENCE_CONFIDENCE,
    DEFAULT_TRACKING_CONFIDENCE,
};

/// Hardware the inference engine should run on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeBackend {
    #[default]
    Cpu,
    /// Platform accelerator (CoreML on macOS, DirectML on Windows).
    /// Engine creation fails on platforms without one.
    Accelerated,
}

impl fmt::Display for ComputeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeBackend::Cpu => write!(f, "cpu"),
            ComputeBackend::Accelerated => write!(f, "accelerated"),
        }
    }
}

impl FromStr for ComputeBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(ComputeBackend::Cpu),
            "accelerated" | "gpu" => Ok(ComputeBackend::Accelerated),
            other => Err(format!("unknown compute backend '{other}' (expected cpu or accelerated)")),
        }
    }
}

/// Construction options handed to an inference engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
    pub min_presence_confidence: f32,
    pub max_subjects: usize,
    pub backend: ComputeBackend,
    /// Model asset; engines that need one fail construction without it.
    pub model_path: Option<PathBuf>,
    /// Newline-separated category labels overriding the built-in list.
    pub labels_path: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            min_detection_confidence: DEFAULT_DETECTION_CONFIDENCE,
            min_tracking_confidence: DEFAULT_TRACKING_CONFIDENCE,
            min_presence_confidence: DEFAULT_PRESENCE_CONFIDENCE,
            max_subjects: DEFAULT_MAX_SUBJECTS,
            backend: ComputeBackend::Cpu,
            model_path: None,
            labels_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let options = EngineOptions::default();
        assert_relative_eq!(options.min_detection_confidence, 0.5);
        assert_relative_eq!(options.min_tracking_confidence, 0.5);
        assert_relative_eq!(options.min_presence_confidence, 0.5);
        assert_eq!(options.max_subjects, 1);
        assert_eq!(options.backend, ComputeBackend::Cpu);
    }

    #[rstest]
    #[case("cpu", ComputeBackend::Cpu)]
    #[case("CPU", ComputeBackend::Cpu)]
    #[case("accelerated", ComputeBackend::Accelerated)]
    #[case("gpu", ComputeBackend::Accelerated)]
    fn test_backend_parses(#[case] input: &str, #[case] expected: ComputeBackend) {
        assert_eq!(input.parse::<ComputeBackend>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!("tpu".parse::<ComputeBackend>().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let options: EngineOptions =
            serde_json::from_str(r#"{"backend": "accelerated", "max_subjects": 2}"#).unwrap();
        assert_eq!(options.backend, ComputeBackend::Accelerated);
        assert_eq!(options.max_subjects, 2);
        assert_relative_eq!(options.min_presence_confidence, 0.5);
    }
}
