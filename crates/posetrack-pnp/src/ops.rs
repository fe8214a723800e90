use nalgebra::{Matrix3, Rotation3, Vector3};

/// Compute the centroid of a set of points.
pub(crate) fn compute_centroid(pts: &[Vector3<f64>]) -> Vector3<f64> {
    let sum = pts.iter().fold(Vector3::zeros(), |acc, p| acc + p);
    sum / pts.len() as f64
}

/// Convert a row-major array rotation into a nalgebra matrix.
pub(crate) fn mat3_from_rows(r: &[[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::new(
        r[0][0], r[0][1], r[0][2], r[1][0], r[1][1], r[1][2], r[2][0], r[2][1], r[2][2],
    )
}

/// Convert a nalgebra matrix into a row-major array.
pub(crate) fn mat3_to_rows(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

/// Rodrigues vector (axis scaled by angle) of a rotation matrix.
pub(crate) fn rotation_to_rvec(r: &Matrix3<f64>) -> [f64; 3] {
    let rvec = Rotation3::from_matrix(r).scaled_axis();
    [rvec.x, rvec.y, rvec.z]
}

/// Pinhole projection helper for a fixed pose and intrinsics.
pub(crate) struct Projector {
    r: Matrix3<f64>,
    t: Vector3<f64>,
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
}

impl Projector {
    pub(crate) fn new(r: &[[f64; 3]; 3], t: &[f64; 3], k: &[[f64; 3]; 3]) -> Self {
        Self {
            r: mat3_from_rows(r),
            t: Vector3::from(*t),
            fx: k[0][0],
            fy: k[1][1],
            cx: k[0][2],
            cy: k[1][2],
        }
    }

    /// Depth of a world point in the camera frame.
    pub(crate) fn depth(&self, world_point: &[f64; 3]) -> f64 {
        (self.r * Vector3::from(*world_point) + self.t).z
    }

    /// Squared pixel reprojection error, `None` for points at or behind the camera.
    pub(crate) fn sq_error(&self, world_point: &[f64; 3], image_point: &[f64; 2]) -> Option<f64> {
        let pc = self.r * Vector3::from(*world_point) + self.t;
        if pc.z <= 0.0 {
            return None;
        }
        let inv_z = 1.0 / pc.z;
        let du = self.fx * pc.x * inv_z + self.cx - image_point[0];
        let dv = self.fy * pc.y * inv_z + self.cy - image_point[1];
        Some(du.mul_add(du, dv * dv))
    }
}

/// Rigid alignment (Kabsch) of `world` onto `camera`: returns `(R, t)` with `camera ≈ R * world + t`.
pub(crate) fn rigid_transform(
    world: &[Vector3<f64>],
    camera: &[Vector3<f64>],
) -> Option<(Matrix3<f64>, Vector3<f64>)> {
    let c_w = compute_centroid(world);
    let c_c = compute_centroid(camera);

    let mut h = Matrix3::zeros();
    for (pw, pc) in world.iter().zip(camera.iter()) {
        h += (pc - c_c) * (pw - c_w).transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_fix = u;
        u_fix.column_mut(2).neg_mut();
        r = u_fix * v_t;
    }

    let t = c_c - r * c_w;
    Some((r, t))
}
