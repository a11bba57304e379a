//! Runtime configuration.
//!
//! Every field has a default; a TOML file only needs to name what it overrides.
//! Durations are given in milliseconds.

use std::{fs, path::Path, path::PathBuf, time::Duration};

use anyhow::Context;
use serde::Deserialize;

use crate::model_download::{
    default_gesture_classifier_model_path, default_handpose_estimator_model_path,
};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub pipeline: PipelineConfig,
    pub extractor: ExtractorConfig,
    pub classifier: ClassifierConfig,
    pub overlay: OverlayConfig,
    pub recorder: RecorderConfig,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Index into the enumerated capture devices.
    pub device_index: u32,
    pub activation_timeout_ms: u64,
    /// Consecutive capture failures after which the device is considered lost.
    pub max_consecutive_failures: u32,
}

impl CameraConfig {
    pub fn activation_timeout(&self) -> Duration {
        Duration::from_millis(self.activation_timeout_ms)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            activation_timeout_ms: 5_000,
            max_consecutive_failures: 30,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub frame_interval_ms: u64,
    /// Number of frame buffers kept for reuse.
    pub frame_pool_size: usize,
}

impl PipelineConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 33,
            frame_pool_size: 3,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub model_path: PathBuf,
    /// Hand confidence below which a frame counts as having no subject.
    pub min_confidence: f32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            model_path: default_handpose_estimator_model_path(),
            min_confidence: 0.2,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub model_path: PathBuf,
    /// Class labels in model output order.
    pub labels: Vec<String>,
    pub load_timeout_ms: u64,
    /// Window K for mode smoothing. `None` exposes the raw latest prediction.
    pub smoothing_window: Option<usize>,
    /// Minimum probability for `commit_prediction` to accept the current label.
    pub commit_threshold: Option<f32>,
}

impl ClassifierConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: default_gesture_classifier_model_path(),
            labels: Vec::new(),
            load_timeout_ms: 30_000,
            smoothing_window: None,
            commit_threshold: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub enabled: bool,
    pub line_thickness: i32,
    pub line_color: [u8; 4],
    pub point_color: [u8; 4],
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            line_thickness: 3,
            line_color: [56, 189, 248, 255],
            point_color: [248, 113, 113, 255],
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub default_category: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            default_category: "PHRASE".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = Config::from_toml("").unwrap();
        assert_eq!(cfg.pipeline.frame_interval(), Duration::from_millis(33));
        assert!(cfg.classifier.smoothing_window.is_none());
        assert!(cfg.classifier.commit_threshold.is_none());
        assert!(cfg.overlay.enabled);
    }

    #[test]
    fn partial_sections_overlay_defaults() {
        let cfg = Config::from_toml(
            r#"
            [camera]
            activation_timeout_ms = 250

            [classifier]
            labels = ["A", "B"]
            smoothing_window = 5
            "#,
        )
        .unwrap();

        assert_eq!(cfg.camera.activation_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.camera.max_consecutive_failures, 30);
        assert_eq!(cfg.classifier.labels, vec!["A", "B"]);
        assert_eq!(cfg.classifier.smoothing_window, Some(5));
        assert_eq!(cfg.recorder.default_category, "PHRASE");
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(Config::from_toml("[pipeline]\nframe_interval_ms = \"fast\"").is_err());
    }
}
