//! RANSAC-based robust wrapper for PnP solvers.

use crate::ops::Projector;
use crate::pnp::{check_correspondences, PnPError, PnPResult};
use crate::{solve_pnp, PnPMethod};
use rand::seq::index;
use rand::{rngs::StdRng, SeedableRng};

/// Parameters for RANSAC over PnP.
#[derive(Debug, Clone)]
pub struct RansacParams {
    /// Maximum number of RANSAC iterations.
    pub max_iterations: usize,
    /// Pixel error threshold to classify an observation as an inlier.
    pub reproj_threshold_px: f64,
    /// Desired probability that at least one sample set is outlier-free.
    pub confidence: f64,
    /// Optional fixed seed for reproducible sampling.
    pub random_seed: Option<u64>,
    /// Whether to refit on all inliers using the base solver.
    pub refine: bool,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            reproj_threshold_px: 8.0,
            confidence: 0.99,
            random_seed: None,
            refine: true,
        }
    }
}

/// RANSAC result for PnP.
#[derive(Debug, Clone)]
pub struct PnPRansacResult {
    /// Best pose found by RANSAC.
    pub pose: PnPResult,
    /// Indices of inlier correspondences, strictly increasing.
    pub inliers: Vec<usize>,
    /// Number of hypotheses evaluated.
    pub iterations: usize,
}

/// Solve PnP robustly using a RANSAC loop around a base PnP method (e.g., EPnP).
///
/// - Minimal sample size is 5 for EPnP (4 when only 4 points are available).
/// - Scoring uses Euclidean pixel reprojection error; points behind the camera are outliers.
/// - Iterations adapt from the current inlier ratio and the desired confidence.
pub fn solve_pnp_ransac(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    base: PnPMethod,
    params: &RansacParams,
) -> Result<PnPRansacResult, PnPError> {
    check_correspondences(world, image, 4)?;

    let n = world.len();
    let sample_size = base.sample_size(n);

    let mut rng: StdRng = match params.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut best_inliers: Vec<usize> = Vec::new();
    let mut best_pose: Option<PnPResult> = None;

    let mut w_min: Vec<[f64; 3]> = Vec::with_capacity(sample_size);
    let mut i_min: Vec<[f64; 2]> = Vec::with_capacity(sample_size);

    let mut iter: usize = 0;
    let mut required_iters = params.max_iterations;

    while iter < required_iters {
        iter += 1;

        w_min.clear();
        i_min.clear();
        for idx in index::sample(&mut rng, n, sample_size) {
            w_min.push(world[idx]);
            i_min.push(image[idx]);
        }

        let pose_min = match solve_pnp(&w_min, &i_min, k, &base) {
            Ok(p) => p,
            Err(e) => {
                log::trace!("RANSAC iteration {iter}: minimal solve failed: {e}");
                continue;
            }
        };

        // quick cheirality check on the minimal set
        let proj = Projector::new(&pose_min.rotation, &pose_min.translation, k);
        if w_min.iter().any(|pw| proj.depth(pw) <= 0.0) {
            continue;
        }

        let inliers = classify_inliers(world, image, &proj, params.reproj_threshold_px);
        if inliers.len() > best_inliers.len() {
            best_inliers = inliers;
            best_pose = Some(pose_min);
            required_iters = required_iters.min(adaptive_iterations(
                best_inliers.len(),
                n,
                sample_size,
                params.confidence,
                params.max_iterations,
            ));
        }
    }

    let best_pose = match best_pose {
        Some(pose) if best_inliers.len() >= sample_size => pose,
        _ => {
            return Err(PnPError::InsufficientInliers {
                required: sample_size,
                actual: best_inliers.len(),
            })
        }
    };

    let mut final_pose = if params.refine {
        let w_all = best_inliers.iter().map(|&i| world[i]).collect::<Vec<_>>();
        let i_all = best_inliers.iter().map(|&i| image[i]).collect::<Vec<_>>();
        match solve_pnp(&w_all, &i_all, k, &base) {
            Ok(pose) => pose,
            Err(e) => {
                log::debug!("RANSAC refit on {} inliers failed: {e}", best_inliers.len());
                best_pose
            }
        }
    } else {
        best_pose
    };

    final_pose.reproj_rmse = Some(rmse_on_subset(
        world,
        image,
        &best_inliers,
        &Projector::new(&final_pose.rotation, &final_pose.translation, k),
    ));

    log::debug!(
        "RANSAC kept {}/{} correspondences after {} iterations",
        best_inliers.len(),
        n,
        iter
    );

    Ok(PnPRansacResult {
        pose: final_pose,
        inliers: best_inliers,
        iterations: iter,
    })
}

/// Number of iterations needed to draw one all-inlier sample with the requested confidence.
fn adaptive_iterations(
    num_inliers: usize,
    num_points: usize,
    sample_size: usize,
    confidence: f64,
    max_iterations: usize,
) -> usize {
    let w = num_inliers as f64 / num_points as f64;
    let ws = w.powi(sample_size as i32);
    if ws >= 1.0 - 1e-12 {
        return 1;
    }
    if ws <= 1e-12 {
        return max_iterations;
    }

    let log_conf = (1.0 - confidence).max(1e-12).ln();
    let est = (log_conf / (1.0 - ws).ln()).ceil();
    if est.is_finite() && est > 0.0 {
        (est as usize).min(max_iterations)
    } else {
        max_iterations
    }
}

fn classify_inliers(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    proj: &Projector,
    thresh_px: f64,
) -> Vec<usize> {
    let thresh_sq = thresh_px * thresh_px;
    world
        .iter()
        .zip(image.iter())
        .enumerate()
        .filter_map(|(idx, (pw, uv))| match proj.sq_error(pw, uv) {
            Some(err2) if err2 < thresh_sq => Some(idx),
            _ => None,
        })
        .collect()
}

fn rmse_on_subset(world: &[[f64; 3]], image: &[[f64; 2]], indices: &[usize], proj: &Projector) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    let sum_sq = indices
        .iter()
        .map(|&i| proj.sq_error(&world[i], &image[i]).unwrap_or(f64::INFINITY))
        .sum::<f64>();
    (sum_sq / indices.len() as f64).sqrt()
}
