//! Efficient Perspective-n-Point (EPnP) solver
//! Paper: https://www.tugraz.at/fileadmin/user_upload/Institute/ICG/Images/team_lepetit/publications/lepetit_ijcv08.pdf
//! Reference: https://github.com/opencv/opencv/blob/4.x/modules/calib3d/src/epnp.cpp

use crate::ops::{compute_centroid, mat3_to_rows, rigid_transform, rotation_to_rvec, Projector};
use crate::pnp::{check_correspondences, NumericTol, PnPError, PnPResult, PnPSolver};
use nalgebra::{DMatrix, DVector, Matrix3, SMatrix, SVector, SymmetricEigen, Vector3, Vector4};

/// Marker type representing the Efficient PnP algorithm.
pub struct EPnP;

impl PnPSolver for EPnP {
    type Param = EPnPParams;

    fn solve(
        points_world: &[[f64; 3]],
        points_image: &[[f64; 2]],
        k: &[[f64; 3]; 3],
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError> {
        solve_epnp(points_world, points_image, k, params)
    }
}

/// Parameters controlling the EPnP solver.
#[derive(Debug, Clone)]
pub struct EPnPParams {
    /// Shared numeric tolerances.
    pub tol: NumericTol,
    /// Gauss-Newton iterations used to polish each beta candidate.
    pub gauss_newton_iters: usize,
}

impl Default for EPnPParams {
    fn default() -> Self {
        Self {
            tol: NumericTol::default(),
            gauss_newton_iters: 5,
        }
    }
}

/// 12×4 basis of the (approximate) null space of `MᵀM`, column 0 belongs to the smallest eigenvalue.
type NullSpace = SMatrix<f64, 12, 4>;

const CP_PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// Solve Perspective-n-Point (EPnP).
///
/// # Arguments
/// * `points_world` – 3-D coordinates in the world frame, shape *(N,3)* with `N≥4`.
/// * `points_image` – Corresponding pixel coordinates, shape *(N,2)*.
/// * `k` – Camera intrinsics matrix.
///
/// # Returns
/// The pose with the smallest reprojection error among the three beta
/// approximations of the original paper, each refined by Gauss-Newton.
pub fn solve_epnp(
    points_world: &[[f64; 3]],
    points_image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    params: &EPnPParams,
) -> Result<PnPResult, PnPError> {
    check_correspondences(points_world, points_image, 4)?;

    let pws = points_world
        .iter()
        .map(|p| Vector3::from(*p))
        .collect::<Vec<_>>();

    let cw = select_control_points(&pws);
    let alphas = compute_barycentric(&pws, &cw, params.tol.eps);

    let m = build_m(&alphas, points_image, k);
    let null4 = null_space(&(m.transpose() * &m))?;

    let l = build_l6x10(&null4);
    let rho = rho_ctrlpts(&cw);

    let candidates = [
        estimate_beta_approx_1(&l, &rho, params.tol.svd),
        estimate_beta_approx_2(&l, &rho, params.tol.svd),
        estimate_beta_approx_3(&l, &rho, params.tol.svd),
    ];

    let mut best: Option<(f64, Matrix3<f64>, Vector3<f64>)> = None;
    for betas in candidates.into_iter().flatten() {
        let betas = gauss_newton(betas, &l, &rho, params.gauss_newton_iters);
        let Some((r, t)) = pose_from_betas(&betas, &null4, &alphas, &pws) else {
            continue;
        };
        let err = rmse_px(points_world, points_image, &r, &t, k);
        if best.as_ref().map_or(true, |(best_err, _, _)| err < *best_err) {
            best = Some((err, r, t));
        }
    }

    let (err, r, t) = best.ok_or_else(|| {
        PnPError::SvdFailed("no beta approximation produced a valid pose".to_string())
    })?;

    Ok(PnPResult {
        rotation: mat3_to_rows(&r),
        translation: [t.x, t.y, t.z],
        rvec: rotation_to_rvec(&r),
        reproj_rmse: Some(err),
    })
}

/// Centroid plus the three principal axes of the world points, scaled by their spread.
fn select_control_points(pws: &[Vector3<f64>]) -> [Vector3<f64>; 4] {
    let c = compute_centroid(pws);

    let mut cov = Matrix3::zeros();
    for p in pws {
        let d = p - c;
        cov += d * d.transpose();
    }
    cov /= pws.len() as f64;

    let eig = SymmetricEigen::new(cov);
    let mut axes = (0..3)
        .map(|i| {
            (
                eig.eigenvalues[i].abs().sqrt(),
                eig.eigenvectors.column(i).into_owned(),
            )
        })
        .collect::<Vec<_>>();
    axes.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut cw = [c; 4];
    for (i, (sigma, axis)) in axes.iter().enumerate() {
        cw[i + 1] = c + axis * *sigma;
    }
    cw
}

/// Barycentric coordinates of each world point with respect to the control points.
///
/// Each element is `[α0, α1, α2, α3]` with `Σ αj = 1` and `pw = Σ αj·Cw_j`.
/// When the control-point tetrahedron is degenerate (planar input) the
/// Moore–Penrose pseudo-inverse is used instead of the exact inverse.
fn compute_barycentric(pws: &[Vector3<f64>], cw: &[Vector3<f64>; 4], eps: f64) -> Vec<[f64; 4]> {
    let b = Matrix3::from_columns(&[cw[1] - cw[0], cw[2] - cw[0], cw[3] - cw[0]]);

    let b_inv = if b.determinant().abs() > eps {
        b.try_inverse()
    } else {
        None
    }
    .or_else(|| b.pseudo_inverse(eps).ok())
    .unwrap_or_else(Matrix3::zeros);

    pws.iter()
        .map(|p| {
            let lamb = b_inv * (p - cw[0]);
            [1.0 - (lamb.x + lamb.y + lamb.z), lamb.x, lamb.y, lamb.z]
        })
        .collect()
}

/// Construct the 2N×12 design matrix **M** used by EPnP.
fn build_m(alphas: &[[f64; 4]], points_image: &[[f64; 2]], k: &[[f64; 3]; 3]) -> DMatrix<f64> {
    let n = alphas.len();
    let (fu, fv, uc, vc) = (k[0][0], k[1][1], k[0][2], k[1][2]);

    let mut m = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (a, uv)) in alphas.iter().zip(points_image.iter()).enumerate() {
        let row_x = 2 * i;
        let row_y = row_x + 1;
        for (j, &alpha) in a.iter().enumerate() {
            let base = 3 * j;
            m[(row_x, base)] = alpha * fu;
            m[(row_x, base + 2)] = alpha * (uc - uv[0]);
            m[(row_y, base + 1)] = alpha * fv;
            m[(row_y, base + 2)] = alpha * (vc - uv[1]);
        }
    }
    m
}

/// Eigenvectors of `MᵀM` for the four smallest eigenvalues.
fn null_space(mtm: &DMatrix<f64>) -> Result<NullSpace, PnPError> {
    if mtm.iter().any(|v| !v.is_finite()) {
        return Err(PnPError::SvdFailed(
            "design matrix contains non-finite values".to_string(),
        ));
    }

    let eig = SymmetricEigen::new(mtm.clone());
    let mut order = (0..eig.eigenvalues.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));

    let cols = order
        .iter()
        .take(4)
        .map(|&c| SVector::<f64, 12>::from_iterator(eig.eigenvectors.column(c).iter().copied()))
        .collect::<Vec<_>>();
    Ok(NullSpace::from_columns(&cols))
}

/// Control-point block `j` of null-space vector `i`.
fn null_block(null4: &NullSpace, i: usize, j: usize) -> Vector3<f64> {
    Vector3::new(
        null4[(3 * j, i)],
        null4[(3 * j + 1, i)],
        null4[(3 * j + 2, i)],
    )
}

/// Build the 6×10 matrix **L** relating the beta products to the control-point distances.
fn build_l6x10(null4: &NullSpace) -> [[f64; 10]; 6] {
    let mut l = [[0.0; 10]; 6];
    for (row, &(a, b)) in l.iter_mut().zip(CP_PAIRS.iter()) {
        let dv: [Vector3<f64>; 4] =
            std::array::from_fn(|i| null_block(null4, i, a) - null_block(null4, i, b));
        *row = [
            dv[0].dot(&dv[0]),
            2.0 * dv[0].dot(&dv[1]),
            dv[1].dot(&dv[1]),
            2.0 * dv[0].dot(&dv[2]),
            2.0 * dv[1].dot(&dv[2]),
            dv[2].dot(&dv[2]),
            2.0 * dv[0].dot(&dv[3]),
            2.0 * dv[1].dot(&dv[3]),
            2.0 * dv[2].dot(&dv[3]),
            dv[3].dot(&dv[3]),
        ];
    }
    l
}

/// Squared distances (ρ) between each pair of control points.
fn rho_ctrlpts(cw: &[Vector3<f64>; 4]) -> [f64; 6] {
    CP_PAIRS.map(|(i, j)| (cw[i] - cw[j]).norm_squared())
}

/// Least-squares solve of `L[:, cols] · x = ρ`.
fn solve_l_subset(l: &[[f64; 10]; 6], rho: &[f64; 6], cols: &[usize], tol: f64) -> Option<DVector<f64>> {
    let l_sub = DMatrix::<f64>::from_fn(6, cols.len(), |r, c| l[r][cols[c]]);
    let rho = DVector::<f64>::from_column_slice(rho);
    l_sub.svd(true, true).solve(&rho, tol).ok()
}

/// Approximation 1: betas = [B11 B12 B13 B14].
fn estimate_beta_approx_1(l: &[[f64; 10]; 6], rho: &[f64; 6], tol: f64) -> Option<[f64; 4]> {
    let x = solve_l_subset(l, rho, &[0, 1, 3, 6], tol)?;
    let (b0, sign) = if x[0] < 0.0 {
        ((-x[0]).sqrt(), -1.0)
    } else {
        (x[0].sqrt(), 1.0)
    };
    if b0 <= f64::EPSILON {
        return None;
    }
    Some([b0, sign * x[1] / b0, sign * x[2] / b0, sign * x[3] / b0])
}

/// Approximation 2: betas = [B11 B12 B22].
fn estimate_beta_approx_2(l: &[[f64; 10]; 6], rho: &[f64; 6], tol: f64) -> Option<[f64; 4]> {
    let x = solve_l_subset(l, rho, &[0, 1, 2], tol)?;
    let (mut b0, b1) = leading_betas(x[0], x[2]);
    if x[1] < 0.0 {
        b0 = -b0;
    }
    Some([b0, b1, 0.0, 0.0])
}

/// Approximation 3: betas = [B11 B12 B22 B13 B23].
fn estimate_beta_approx_3(l: &[[f64; 10]; 6], rho: &[f64; 6], tol: f64) -> Option<[f64; 4]> {
    let x = solve_l_subset(l, rho, &[0, 1, 2, 3, 4], tol)?;
    let (mut b0, b1) = leading_betas(x[0], x[2]);
    if x[1] < 0.0 {
        b0 = -b0;
    }
    if b0.abs() <= f64::EPSILON {
        return None;
    }
    Some([b0, b1, x[3] / b0, 0.0])
}

/// Recover `(β0, β1)` from the estimates of `β0²` and `β1²`, resolving the shared sign.
fn leading_betas(b00: f64, b11: f64) -> (f64, f64) {
    if b00 < 0.0 {
        let b1 = if b11 < 0.0 { (-b11).sqrt() } else { 0.0 };
        ((-b00).sqrt(), b1)
    } else {
        let b1 = if b11 > 0.0 { b11.sqrt() } else { 0.0 };
        (b00.sqrt(), b1)
    }
}

/// Gauss-Newton refinement of the betas against the control-point distances.
fn gauss_newton(betas: [f64; 4], l: &[[f64; 10]; 6], rho: &[f64; 6], iters: usize) -> [f64; 4] {
    let mut b = Vector4::from(betas);

    for _ in 0..iters {
        let mut jac = SMatrix::<f64, 6, 4>::zeros();
        let mut res = SVector::<f64, 6>::zeros();

        for (i, row) in l.iter().enumerate() {
            jac[(i, 0)] = 2.0 * row[0] * b[0] + row[1] * b[1] + row[3] * b[2] + row[6] * b[3];
            jac[(i, 1)] = row[1] * b[0] + 2.0 * row[2] * b[1] + row[4] * b[2] + row[7] * b[3];
            jac[(i, 2)] = row[3] * b[0] + row[4] * b[1] + 2.0 * row[5] * b[2] + row[8] * b[3];
            jac[(i, 3)] = row[6] * b[0] + row[7] * b[1] + row[8] * b[2] + 2.0 * row[9] * b[3];

            res[i] = rho[i]
                - (row[0] * b[0] * b[0]
                    + row[1] * b[0] * b[1]
                    + row[2] * b[1] * b[1]
                    + row[3] * b[0] * b[2]
                    + row[4] * b[1] * b[2]
                    + row[5] * b[2] * b[2]
                    + row[6] * b[0] * b[3]
                    + row[7] * b[1] * b[3]
                    + row[8] * b[2] * b[3]
                    + row[9] * b[3] * b[3]);
        }

        match jac.svd(true, true).solve(&res, 1e-12) {
            Ok(delta) => b += delta,
            Err(_) => break,
        }
    }

    b.into()
}

/// Camera-frame control points from the betas, then the rigid pose aligning world to camera points.
fn pose_from_betas(
    betas: &[f64; 4],
    null4: &NullSpace,
    alphas: &[[f64; 4]],
    pws: &[Vector3<f64>],
) -> Option<(Matrix3<f64>, Vector3<f64>)> {
    let mut ccs: [Vector3<f64>; 4] = std::array::from_fn(|j| {
        (0..4).fold(Vector3::zeros(), |acc, i| {
            acc + null_block(null4, i, j) * betas[i]
        })
    });

    let camera_point = |a: &[f64; 4], ccs: &[Vector3<f64>; 4]| {
        a.iter()
            .zip(ccs.iter())
            .fold(Vector3::zeros(), |acc, (alpha, c)| acc + c * *alpha)
    };

    // the object must lie in front of the camera
    if camera_point(&alphas[0], &ccs).z < 0.0 {
        for c in ccs.iter_mut() {
            *c = -*c;
        }
    }

    let pcs = alphas
        .iter()
        .map(|a| camera_point(a, &ccs))
        .collect::<Vec<_>>();

    rigid_transform(pws, &pcs)
}

/// Root-mean-square reprojection error in pixels; points behind the camera count as infinite.
fn rmse_px(
    points_world: &[[f64; 3]],
    points_image: &[[f64; 2]],
    r: &Matrix3<f64>,
    t: &Vector3<f64>,
    k: &[[f64; 3]; 3],
) -> f64 {
    let proj = Projector::new(&mat3_to_rows(r), &[t.x, t.y, t.z], k);
    let sum_sq = points_world
        .iter()
        .zip(points_image.iter())
        .map(|(pw, uv)| proj.sq_error(pw, uv).unwrap_or(f64::INFINITY))
        .sum::<f64>();
    (sum_sq / points_world.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    fn project(r: &Matrix3<f64>, t: &Vector3<f64>, k: &[[f64; 3]; 3], p: &[f64; 3]) -> [f64; 2] {
        let pc = r * Vector3::from(*p) + t;
        [
            k[0][0] * pc.x / pc.z + k[0][2],
            k[1][1] * pc.y / pc.z + k[1][2],
        ]
    }

    fn object_points() -> Vec<[f64; 3]> {
        vec![
            [-0.05, -0.04, -0.03],
            [0.05, -0.04, -0.03],
            [0.05, 0.04, -0.03],
            [-0.05, 0.04, -0.03],
            [-0.05, -0.04, 0.03],
            [0.05, -0.04, 0.03],
            [0.05, 0.04, 0.03],
            [-0.05, 0.04, 0.03],
            [0.01, 0.02, 0.0],
            [-0.02, 0.01, 0.015],
        ]
    }

    #[test]
    fn test_barycentric_reconstructs_points() {
        let pws = object_points()
            .iter()
            .map(|p| Vector3::from(*p))
            .collect::<Vec<_>>();
        let cw = select_control_points(&pws);
        let alphas = compute_barycentric(&pws, &cw, EPnPParams::default().tol.eps);

        for (p, alpha) in pws.iter().zip(alphas.iter()) {
            let recon = alpha
                .iter()
                .zip(cw.iter())
                .fold(Vector3::zeros(), |acc, (a, c)| acc + c * *a);
            assert_relative_eq!(recon, *p, epsilon = 1e-9);
            assert_relative_eq!(alpha.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_build_m_rows() {
        let alphas = [[0.1, 0.2, 0.3, 0.4]];
        let k = [[800.0, 0.0, 640.0], [0.0, 700.0, 480.0], [0.0, 0.0, 1.0]];
        let m = build_m(&alphas, &[[600.0, 500.0]], &k);

        assert_eq!(m.shape(), (2, 12));
        assert_relative_eq!(m[(0, 0)], 0.1 * 800.0);
        assert_relative_eq!(m[(0, 2)], 0.1 * (640.0 - 600.0));
        assert_relative_eq!(m[(1, 4)], 0.2 * 700.0);
        assert_relative_eq!(m[(1, 11)], 0.4 * (480.0 - 500.0));
        assert_relative_eq!(m[(0, 1)], 0.0);
    }

    #[test]
    fn test_solve_epnp_exact_projections() -> Result<(), PnPError> {
        let r_gt = Rotation3::from_euler_angles(0.3, -0.2, 0.8).into_inner();
        let t_gt = Vector3::new(0.02, -0.01, 0.6);
        let k = [[600.0, 0.0, 256.0], [0.0, 600.0, 256.0], [0.0, 0.0, 1.0]];

        let world = object_points();
        let image = world
            .iter()
            .map(|p| project(&r_gt, &t_gt, &k, p))
            .collect::<Vec<_>>();

        let res = EPnP::solve(&world, &image, &k, &EPnPParams::default())?;
        let r = Matrix3::from_fn(|i, j| res.rotation[i][j]);

        assert_relative_eq!(r, r_gt, epsilon = 1e-6);
        assert_relative_eq!(res.translation[0], t_gt.x, epsilon = 1e-6);
        assert_relative_eq!(res.translation[1], t_gt.y, epsilon = 1e-6);
        assert_relative_eq!(res.translation[2], t_gt.z, epsilon = 1e-6);
        assert!(res.reproj_rmse.is_some_and(|e| e < 1e-4));

        let rvec_gt = Rotation3::from_matrix(&r_gt).scaled_axis();
        assert_relative_eq!(res.rvec[0], rvec_gt.x, epsilon = 1e-6);
        assert_relative_eq!(res.rvec[2], rvec_gt.z, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_solve_epnp_rejects_three_points() {
        let world = [[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [0.0, 1.0, 1.0]];
        let image = [[100.0, 100.0], [200.0, 100.0], [100.0, 200.0]];
        let k = [[800.0, 0.0, 400.0], [0.0, 800.0, 300.0], [0.0, 0.0, 1.0]];

        let result = EPnP::solve(&world, &image, &k, &EPnPParams::default());
        assert!(matches!(
            result,
            Err(PnPError::InsufficientCorrespondences {
                required: 4,
                actual: 3
            })
        ));
    }
}
