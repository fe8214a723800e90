#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Perspective-n-Point
//!
//! Camera pose estimation from 2D-3D point correspondences.
//!
//! ## Example: Robust PnP with RANSAC
//!
//! ```rust
//! use posetrack_pnp::{solve_pnp_ransac, PnPMethod, RansacParams};
//!
//! // Eight corners of a 10 cm box placed half a meter in front of the camera.
//! let world = vec![
//!     [-0.05, -0.05, 0.45],
//!     [0.05, -0.05, 0.45],
//!     [0.05, 0.05, 0.45],
//!     [-0.05, 0.05, 0.45],
//!     [-0.05, -0.05, 0.55],
//!     [0.05, -0.05, 0.55],
//!     [0.05, 0.05, 0.55],
//!     [-0.05, 0.05, 0.55],
//! ];
//! let k = [[600.0, 0.0, 256.0], [0.0, 600.0, 256.0], [0.0, 0.0, 1.0]];
//! let image = world
//!     .iter()
//!     .map(|p| [k[0][0] * p[0] / p[2] + k[0][2], k[1][1] * p[1] / p[2] + k[1][2]])
//!     .collect::<Vec<_>>();
//!
//! let params = RansacParams {
//!     random_seed: Some(7),
//!     ..Default::default()
//! };
//! let result = solve_pnp_ransac(&world, &image, &k, PnPMethod::EPnPDefault, &params)?;
//!
//! println!("Inliers: {}/{}", result.inliers.len(), world.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Efficient Perspective-n-Point (EPnP) solver implementation.
pub mod epnp;

/// Common data types and traits for PnP solvers.
pub mod pnp;

/// RANSAC-based robust PnP pose estimation.
pub mod ransac;

mod ops;

pub use epnp::{EPnP, EPnPParams};
pub use pnp::{NumericTol, PnPError, PnPResult, PnPSolver};
pub use ransac::{solve_pnp_ransac, PnPRansacResult, RansacParams};

/// Enumeration of the Perspective-n-Point algorithms available in this crate.
#[derive(Debug, Clone)]
pub enum PnPMethod {
    /// Efficient PnP solver with a user-supplied parameter object.
    EPnP(EPnPParams),
    /// Efficient PnP solver with the crate's default parameters.
    EPnPDefault,
}

impl PnPMethod {
    /// Number of correspondences the method draws per RANSAC hypothesis.
    pub fn sample_size(&self, num_points: usize) -> usize {
        match self {
            PnPMethod::EPnP(_) | PnPMethod::EPnPDefault => {
                if num_points <= 4 {
                    4
                } else {
                    5
                }
            }
        }
    }
}

/// Dispatch function that routes to the chosen PnP solver.
pub fn solve_pnp(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    method: &PnPMethod,
) -> Result<PnPResult, PnPError> {
    match method {
        PnPMethod::EPnP(params) => EPnP::solve(world, image, k, params),
        PnPMethod::EPnPDefault => EPnP::solve(world, image, k, &EPnPParams::default()),
    }
}
