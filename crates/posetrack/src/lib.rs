#![deny(missing_docs)]
//! Pose tracking of a known rigid object in monocular video.
//!
//! Every frame is localized (fresh detection or reprojection of the object's
//! 3D box with the previous pose), matched against a sparse 3D model, and
//! solved with RANSAC PnP. The inlier count decides how the next frame is
//! localized. Per-frame errors against ground truth are aggregated into
//! sequence-level accuracy.

/// Run configuration loaded from JSON.
pub mod config;

/// 2D-3D correspondences and pose estimates.
pub mod correspondence;

pub mod detector;

pub mod estimator;

pub mod features;

/// Frames of a sequence.
pub mod frame;

pub mod homography;

/// Readers for the on-disk dataset layout.
pub mod io;

pub mod localizer;

/// Correspondence matchers.
pub mod matcher;

pub mod metrics;

/// Rigid poses and pinhole intrinsics.
pub mod pose;

pub mod run;

/// Sequence-level driver and aggregation.
pub mod sequence;

pub mod tracker;

/// Drawing of projected 3D boxes.
pub mod viz;

pub use correspondence::{CorrespondenceSet, PoseEstimate};
pub use pose::{Intrinsics, Pose};
pub use tracker::{TrackingController, TrackingPhase, TrackingState};
