//! Robust pose recovery from 2D-3D correspondences.

use posetrack_pnp::{solve_pnp_ransac, PnPError, PnPMethod, RansacParams};
use serde::{Deserialize, Serialize};

use crate::{
    correspondence::{CorrespondenceSet, PoseEstimate},
    pose::{Intrinsics, Pose},
};

/// Minimum number of correspondences a PnP solve accepts.
pub const MIN_CORRESPONDENCES: usize = 4;

/// Error types for the estimator module.
#[derive(Debug, thiserror::Error)]
pub enum EstimateError {
    /// Too few correspondences to attempt a solve.
    #[error("At least {required} correspondences are required, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences.
        required: usize,
        /// Number of correspondences provided.
        actual: usize,
    },
}

/// Parameters of the RANSAC PnP estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Reprojection error below which a correspondence is an inlier, in pixels.
    pub reprojection_error_px: f64,
    /// Working resolution `[width, height]` of the crop the matcher saw.
    ///
    /// This is stricter than a plain size hint: keypoints outside
    /// `[0, width) x [0, height)` are dropped before RANSAC and never vote.
    /// Their indices are still reported against the unfiltered input.
    pub image_size: [u32; 2],
    /// Factor applied to model points before solving; translation is divided back.
    pub scale: f64,
    /// Upper bound on RANSAC iterations.
    pub max_iterations: usize,
    /// Desired probability of drawing one outlier-free sample.
    pub confidence: f64,
    /// Fixed sampling seed for reproducible runs.
    pub random_seed: Option<u64>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            reprojection_error_px: 7.0,
            image_size: [512, 512],
            scale: 1000.0,
            max_iterations: 10_000,
            confidence: 0.99,
            random_seed: None,
        }
    }
}

/// Recovers a pose and its inlier set from correspondences.
pub trait PoseEstimator: Send + Sync {
    /// Estimate the pose of the model in the camera described by `intrinsics`.
    ///
    /// When no consistent hypothesis exists the estimate is the identity pose
    /// with no inliers. Fewer than four correspondences are an error.
    fn estimate(
        &self,
        intrinsics: &Intrinsics,
        correspondences: &CorrespondenceSet,
    ) -> Result<PoseEstimate, EstimateError>;
}

impl<T: PoseEstimator + ?Sized> PoseEstimator for Box<T> {
    fn estimate(
        &self,
        intrinsics: &Intrinsics,
        correspondences: &CorrespondenceSet,
    ) -> Result<PoseEstimate, EstimateError> {
        (**self).estimate(intrinsics, correspondences)
    }
}

/// EPnP inside RANSAC, solved in scaled model units.
#[derive(Debug, Clone, Default)]
pub struct RansacPnPEstimator {
    config: EstimatorConfig,
}

impl RansacPnPEstimator {
    /// Create the estimator.
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    /// The estimator parameters.
    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }
}

impl PoseEstimator for RansacPnPEstimator {
    fn estimate(
        &self,
        intrinsics: &Intrinsics,
        correspondences: &CorrespondenceSet,
    ) -> Result<PoseEstimate, EstimateError> {
        if correspondences.len() < MIN_CORRESPONDENCES {
            return Err(EstimateError::InsufficientCorrespondences {
                required: MIN_CORRESPONDENCES,
                actual: correspondences.len(),
            });
        }

        let [w, h] = self.config.image_size;
        let scale = self.config.scale;

        // only keypoints inside the working resolution take part
        let mut index_map = Vec::with_capacity(correspondences.len());
        let mut world = Vec::with_capacity(correspondences.len());
        let mut image = Vec::with_capacity(correspondences.len());
        for (i, (uv, xyz)) in correspondences
            .points_2d()
            .iter()
            .zip(correspondences.points_3d())
            .enumerate()
        {
            if uv.x >= 0.0 && uv.y >= 0.0 && uv.x < w as f64 && uv.y < h as f64 {
                index_map.push(i);
                world.push((*xyz * scale).to_array());
                image.push(uv.to_array());
            }
        }

        let params = RansacParams {
            max_iterations: self.config.max_iterations,
            reproj_threshold_px: self.config.reprojection_error_px,
            confidence: self.config.confidence,
            random_seed: self.config.random_seed,
            refine: true,
        };

        let k = intrinsics.to_matrix();
        match solve_pnp_ransac(&world, &image, &k, PnPMethod::EPnPDefault, &params) {
            Ok(result) => {
                let inliers = result
                    .inliers
                    .iter()
                    .map(|&i| index_map[i])
                    .collect::<Vec<_>>();
                log::debug!(
                    "pose from {}/{} correspondences in {} iterations",
                    inliers.len(),
                    correspondences.len(),
                    result.iterations
                );
                Ok(PoseEstimate {
                    pose: Pose::from_pnp(&result.pose, scale),
                    inliers,
                })
            }
            Err(
                e @ (PnPError::InsufficientInliers { .. }
                | PnPError::InsufficientCorrespondences { .. }),
            ) => {
                log::debug!("no consistent pose hypothesis: {e}");
                Ok(PoseEstimate::failed())
            }
            Err(e) => {
                log::warn!("pnp solve failed: {e}");
                Ok(PoseEstimate::failed())
            }
        }
    }
}
