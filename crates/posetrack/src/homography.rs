//! Planar homographies between two images.

use glam::{DMat3, DVec2, DVec3};
use nalgebra::{SMatrix, SVector, SymmetricEigen};
use rand::{rngs::StdRng, seq::index};
use serde::{Deserialize, Serialize};

/// Map a point through a homography; `None` when it lands at infinity.
pub fn transfer(h: &DMat3, p: DVec2) -> Option<DVec2> {
    let q = *h * DVec3::new(p.x, p.y, 1.0);
    if q.z.abs() < 1e-12 {
        return None;
    }
    Some(DVec2::new(q.x / q.z, q.y / q.z))
}

fn normalizing_transform(points: &[DVec2]) -> DMat3 {
    let n = points.len() as f64;
    let mean = points.iter().copied().sum::<DVec2>() / n;
    let mean_dist = points.iter().map(|p| p.distance(mean)).sum::<f64>() / n;
    let s = if mean_dist > f64::EPSILON {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    DMat3::from_cols(
        DVec3::new(s, 0.0, 0.0),
        DVec3::new(0.0, s, 0.0),
        DVec3::new(-s * mean.x, -s * mean.y, 1.0),
    )
}

/// Direct linear fit of the homography mapping `src` onto `dst`.
///
/// Needs at least four pairs; least squares on more. Returns `None` for
/// degenerate configurations.
pub fn fit_homography(src: &[DVec2], dst: &[DVec2]) -> Option<DMat3> {
    if src.len() < 4 || src.len() != dst.len() {
        return None;
    }

    let t_src = normalizing_transform(src);
    let t_dst = normalizing_transform(dst);

    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (&p, &q) in src.iter().zip(dst) {
        let p = t_src.transform_point2(p);
        let q = t_dst.transform_point2(q);
        let rows = [
            [-p.x, -p.y, -1.0, 0.0, 0.0, 0.0, q.x * p.x, q.x * p.y, q.x],
            [0.0, 0.0, 0.0, -p.x, -p.y, -1.0, q.y * p.x, q.y * p.y, q.y],
        ];
        for row in rows {
            let r = SVector::<f64, 9>::from_row_slice(&row);
            ata += r * r.transpose();
        }
    }

    // the solution is the eigenvector of the smallest eigenvalue
    let eigen = SymmetricEigen::new(ata);
    let (min_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = eigen.eigenvectors.column(min_idx);

    let h_norm = DMat3::from_cols_array(&[h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]])
        .transpose();
    let mut homography = t_dst.inverse() * h_norm * t_src;

    let scale = homography.z_axis.z;
    if scale.abs() > 1e-12 {
        homography = homography * (1.0 / scale);
    }
    if !homography.is_finite() || homography.determinant().abs() < 1e-10 {
        return None;
    }
    Some(homography)
}

/// Parameters of the robust homography fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomographyParams {
    /// Transfer error below which a pair is an inlier, in pixels.
    pub threshold_px: f64,
    /// Upper bound on RANSAC iterations.
    pub max_iterations: usize,
    /// Probability of drawing at least one all-inlier sample.
    pub confidence: f64,
}

impl Default for HomographyParams {
    fn default() -> Self {
        Self {
            threshold_px: 3.0,
            max_iterations: 2000,
            confidence: 0.995,
        }
    }
}

/// Result of [`find_homography_ransac`].
#[derive(Debug, Clone)]
pub struct HomographyFit {
    /// Homography from source to destination pixels.
    pub homography: DMat3,
    /// Indices of the supporting pairs, ascending.
    pub inliers: Vec<usize>,
}

fn inliers_of(h: &DMat3, src: &[DVec2], dst: &[DVec2], threshold_px: f64) -> Vec<usize> {
    let thresh_sq = threshold_px * threshold_px;
    src.iter()
        .zip(dst)
        .enumerate()
        .filter_map(|(i, (&p, &q))| match transfer(h, p) {
            Some(r) if r.distance_squared(q) < thresh_sq => Some(i),
            _ => None,
        })
        .collect()
}

fn required_iterations(num_inliers: usize, num_points: usize, params: &HomographyParams) -> usize {
    let w4 = (num_inliers as f64 / num_points as f64).powi(4);
    if w4 >= 1.0 - 1e-12 {
        return 1;
    }
    let est = ((1.0 - params.confidence).max(1e-12).ln() / (1.0 - w4).ln()).ceil();
    if est.is_finite() && est > 0.0 {
        (est as usize).min(params.max_iterations)
    } else {
        params.max_iterations
    }
}

/// Homography supported by the most pairs, refitted on its inliers.
///
/// Returns `None` with fewer than four pairs or when no sample gives a
/// valid model.
pub fn find_homography_ransac(
    src: &[DVec2],
    dst: &[DVec2],
    params: &HomographyParams,
    rng: &mut StdRng,
) -> Option<HomographyFit> {
    let n = src.len();
    if n < 4 || n != dst.len() {
        return None;
    }

    let mut best: Option<HomographyFit> = None;
    let mut required = params.max_iterations;
    let mut iter = 0;
    while iter < required {
        iter += 1;
        let sample = index::sample(rng, n, 4);
        let s = sample.iter().map(|i| src[i]).collect::<Vec<_>>();
        let d = sample.iter().map(|i| dst[i]).collect::<Vec<_>>();
        let Some(h) = fit_homography(&s, &d) else {
            continue;
        };

        let inliers = inliers_of(&h, src, dst, params.threshold_px);
        let improved = best
            .as_ref()
            .map_or(true, |b| inliers.len() > b.inliers.len());
        if improved {
            required = required.min(required_iterations(inliers.len(), n, params));
            best = Some(HomographyFit {
                homography: h,
                inliers,
            });
        }
    }

    let mut best = best?;
    let s = best.inliers.iter().map(|&i| src[i]).collect::<Vec<_>>();
    let d = best.inliers.iter().map(|&i| dst[i]).collect::<Vec<_>>();
    if let Some(h) = fit_homography(&s, &d) {
        let inliers = inliers_of(&h, src, dst, params.threshold_px);
        if inliers.len() >= best.inliers.len() {
            best = HomographyFit {
                homography: h,
                inliers,
            };
        }
    }

    log::trace!(
        "homography kept {}/{} pairs after {iter} iterations",
        best.inliers.len(),
        n
    );
    Some(best)
}
