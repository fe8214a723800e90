use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{estimator::EstimatorConfig, localizer::LocalizerConfig, tracker::TrackerConfig};

/// Error types for the config module.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Error reading the file.
    #[error("Failed to read config {path}: {source}")]
    Read {
        /// Path of the config file.
        path: String,
        /// Underlying io error.
        source: std::io::Error,
    },

    /// Error parsing the json.
    #[error("Invalid config {path}: {source}")]
    Json {
        /// Path of the config file.
        path: String,
        /// Underlying json error.
        source: serde_json::Error,
    },
}

/// Which side outputs a run writes next to the error report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Write `pred_vis/<index>.jpg` with the projected boxes.
    pub save_visualizations: bool,
    /// Write `detector_vis/<index>.png` with every fresh detection crop.
    pub save_detections: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            save_visualizations: true,
            save_detections: false,
        }
    }
}

/// Full configuration of a tracking run; every section falls back to its defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tracking policy.
    pub tracker: TrackerConfig,
    /// Robust PnP parameters.
    pub estimator: EstimatorConfig,
    /// Localizer selection and crop geometry.
    pub localizer: LocalizerConfig,
    /// Side outputs.
    pub output: OutputConfig,
}

impl PipelineConfig {
    /// Load the configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::localizer::{DetectorKind, LocalizerKind};

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.tracker.inlier_threshold, 20);
        assert_eq!(config.estimator.reprojection_error_px, 7.0);
        assert_eq!(config.estimator.image_size, [512, 512]);
        assert_eq!(config.estimator.scale, 1000.0);
        assert_eq!(config.localizer.crop_size, 512);
        assert_eq!(config.localizer.detector, DetectorKind::Features);
        assert_eq!(config.localizer.feature_detector.min_inliers, 12);
    }

    #[test]
    fn test_partial_json_overrides() -> Result<(), ConfigError> {
        let tmp_dir = tempfile::tempdir().expect("tempdir");
        let path = tmp_dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "tracker": { "inlier_threshold": 30 },
                "estimator": { "random_seed": 5 },
                "localizer": {
                    "kind": "box",
                    "detector": "box_file",
                    "padding": 0.1,
                    "feature_detector": { "min_inliers": 8, "homography": { "threshold_px": 2.0 } }
                }
            }"#,
        )
        .expect("write fixture");

        let config = PipelineConfig::from_json_file(&path)?;
        assert_eq!(config.tracker.inlier_threshold, 30);
        assert_eq!(config.estimator.random_seed, Some(5));
        assert_eq!(config.estimator.reprojection_error_px, 7.0);
        assert_eq!(config.localizer.kind, LocalizerKind::Box);
        assert_eq!(config.localizer.detector, DetectorKind::BoxFile);
        assert_eq!(config.localizer.crop_size, 512);
        assert_eq!(config.localizer.feature_detector.min_inliers, 8);
        assert_eq!(config.localizer.feature_detector.homography.threshold_px, 2.0);
        assert_eq!(config.localizer.feature_detector.max_hamming, 64);
        assert_eq!(config.output, OutputConfig::default());
        Ok(())
    }

    #[test]
    fn test_invalid_json() {
        let tmp_dir = tempfile::tempdir().expect("tempdir");
        let path = tmp_dir.path().join("config.json");
        std::fs::write(&path, "{ not json").expect("write fixture");
        assert!(matches!(
            PipelineConfig::from_json_file(&path),
            Err(ConfigError::Json { .. })
        ));
        assert!(matches!(
            PipelineConfig::from_json_file(tmp_dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
