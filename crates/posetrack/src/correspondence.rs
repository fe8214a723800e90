use glam::{DVec2, DVec3};

use crate::pose::Pose;

/// Error returned when the two sides of a correspondence set differ in length.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Mismatched correspondences: {points_2d} image points, {points_3d} model points")]
pub struct MismatchedCorrespondences {
    /// Number of image points.
    pub points_2d: usize,
    /// Number of model points.
    pub points_3d: usize,
}

/// Paired 2D query keypoints and 3D model points.
#[derive(Debug, Clone, Default)]
pub struct CorrespondenceSet {
    points_2d: Vec<DVec2>,
    points_3d: Vec<DVec3>,
}

impl CorrespondenceSet {
    /// Pair image and model points; both sides must have the same length.
    pub fn new(
        points_2d: Vec<DVec2>,
        points_3d: Vec<DVec3>,
    ) -> Result<Self, MismatchedCorrespondences> {
        if points_2d.len() != points_3d.len() {
            return Err(MismatchedCorrespondences {
                points_2d: points_2d.len(),
                points_3d: points_3d.len(),
            });
        }
        Ok(Self {
            points_2d,
            points_3d,
        })
    }

    /// Append one correspondence.
    pub fn push(&mut self, point_2d: DVec2, point_3d: DVec3) {
        self.points_2d.push(point_2d);
        self.points_3d.push(point_3d);
    }

    /// Image points, in pixels of the crop.
    pub fn points_2d(&self) -> &[DVec2] {
        &self.points_2d
    }

    /// Model points, in meters.
    pub fn points_3d(&self) -> &[DVec3] {
        &self.points_3d
    }

    /// Number of correspondences.
    pub fn len(&self) -> usize {
        self.points_2d.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.points_2d.is_empty()
    }
}

/// Pose recovered from a correspondence set, with the indices that support it.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEstimate {
    /// Estimated object → camera pose.
    pub pose: Pose,
    /// Strictly increasing indices into the correspondence set.
    pub inliers: Vec<usize>,
}

impl PoseEstimate {
    /// Identity pose with no inliers, reported when no consistent hypothesis exists.
    pub fn failed() -> Self {
        Self {
            pose: Pose::IDENTITY,
            inliers: Vec::new(),
        }
    }

    /// Number of inliers, the tracking confidence signal.
    pub fn num_inliers(&self) -> usize {
        self.inliers.len()
    }
}
