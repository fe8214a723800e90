use glam::{DMat3, DVec2, DVec3};
use posetrack_pnp::PnPResult;
use serde::{Deserialize, Serialize};

/// Rigid transform mapping object-space points into the camera frame.
///
/// The translation is expressed in meters, the unit of the sparse model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Rotation object → camera.
    pub rotation: DMat3,
    /// Translation object → camera.
    pub translation: DVec3,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    /// The identity transform, reported when no pose could be estimated.
    pub const IDENTITY: Self = Self {
        rotation: DMat3::IDENTITY,
        translation: DVec3::ZERO,
    };

    /// Create a pose from a rotation and a translation.
    pub fn new(rotation: DMat3, translation: DVec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Build a pose from the top 3×4 block `[R | t]` of a row-major matrix.
    ///
    /// Accepts both 3×4 and 4×4 layouts; extra rows are ignored.
    pub fn from_rows(rows: &[[f64; 4]]) -> Option<Self> {
        if rows.len() < 3 {
            return None;
        }
        let rotation = DMat3::from_cols(
            DVec3::new(rows[0][0], rows[1][0], rows[2][0]),
            DVec3::new(rows[0][1], rows[1][1], rows[2][1]),
            DVec3::new(rows[0][2], rows[1][2], rows[2][2]),
        );
        let translation = DVec3::new(rows[0][3], rows[1][3], rows[2][3]);
        Some(Self::new(rotation, translation))
    }

    /// Convert a PnP solution whose translation is expressed in `1/scale` meters.
    pub fn from_pnp(result: &PnPResult, scale: f64) -> Self {
        let r = result.rotation;
        let rotation = DMat3::from_cols(
            DVec3::new(r[0][0], r[1][0], r[2][0]),
            DVec3::new(r[0][1], r[1][1], r[2][1]),
            DVec3::new(r[0][2], r[1][2], r[2][2]),
        );
        Self::new(rotation, DVec3::from_array(result.translation) / scale)
    }

    /// Map an object-space point into the camera frame.
    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.rotation * point + self.translation
    }

    /// Row-major 3×4 `[R | t]` matrix.
    pub fn to_rows(&self) -> [[f64; 4]; 3] {
        let r = self.rotation;
        let t = self.translation;
        [
            [r.x_axis.x, r.y_axis.x, r.z_axis.x, t.x],
            [r.x_axis.y, r.y_axis.y, r.z_axis.y, t.y],
            [r.x_axis.z, r.y_axis.z, r.z_axis.z, t.z],
        ]
    }
}

/// Pinhole intrinsic matrix `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    /// Focal length along x in pixels.
    pub fx: f64,
    /// Focal length along y in pixels.
    pub fy: f64,
    /// Principal point x in pixels.
    pub cx: f64,
    /// Principal point y in pixels.
    pub cy: f64,
}

impl Intrinsics {
    /// Create the intrinsics from focal lengths and principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Read the entries of a row-major 3×3 matrix; the skew term is ignored.
    pub fn from_matrix(k: &[[f64; 3]; 3]) -> Self {
        Self::new(k[0][0], k[1][1], k[0][2], k[1][2])
    }

    /// Row-major 3×3 matrix.
    pub fn to_matrix(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Project a camera-frame point to pixels, `None` when it is not in front of the camera.
    pub fn project(&self, point_cam: DVec3) -> Option<DVec2> {
        if point_cam.z <= f64::EPSILON {
            return None;
        }
        Some(DVec2::new(
            self.fx * point_cam.x / point_cam.z + self.cx,
            self.fy * point_cam.y / point_cam.z + self.cy,
        ))
    }

    /// Intrinsics of the image obtained by cropping at `offset` and scaling by `scale`.
    pub fn crop_and_resize(&self, offset: DVec2, scale: DVec2) -> Self {
        Self::new(
            self.fx * scale.x,
            self.fy * scale.y,
            (self.cx - offset.x) * scale.x,
            (self.cy - offset.y) * scale.y,
        )
    }
}
