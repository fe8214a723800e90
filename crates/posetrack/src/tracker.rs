//! Per-frame tracking control loop.
//!
//! The controller decides for every frame whether to detect the object from
//! scratch or to follow it with the previous pose, then runs the matcher and
//! the estimator and updates the [`TrackingState`] carried to the next frame.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::{
    correspondence::PoseEstimate,
    estimator::{EstimateError, PoseEstimator},
    frame::Frame,
    io::colmap::SparseModel,
    localizer::{LocalizationError, LocalizationStrategy, Localizer},
    matcher::{MatchError, Matcher},
    metrics::ErrorRecord,
    pose::Pose,
};

/// Tracking policy parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Inlier count at or above which tracking is confident.
    pub inlier_threshold: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            inlier_threshold: 20,
        }
    }
}

/// Phase of the tracking state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingPhase {
    /// No frame processed yet.
    AwaitingFirstFrame,
    /// The last frame had enough inliers; the next frame is tracked.
    Confident,
    /// The last frame failed or had too few inliers; the next frame is re-detected.
    Lost,
}

/// State carried from one frame to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingState {
    phase: TrackingPhase,
    previous: Option<(Pose, usize)>,
}

impl Default for TrackingState {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingState {
    /// State before the first frame.
    pub fn new() -> Self {
        Self {
            phase: TrackingPhase::AwaitingFirstFrame,
            previous: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> TrackingPhase {
        self.phase
    }

    /// Pose and inlier count of the previous frame, if it produced a pose.
    pub fn previous(&self) -> Option<&(Pose, usize)> {
        self.previous.as_ref()
    }

    /// Strategy for the next frame.
    pub fn next_strategy(&self) -> LocalizationStrategy {
        match (self.phase, &self.previous) {
            (TrackingPhase::Confident, Some(_)) => LocalizationStrategy::Track,
            _ => LocalizationStrategy::Detect,
        }
    }

    /// Record the estimate of a frame.
    pub fn advance(&mut self, estimate: &PoseEstimate, config: &TrackerConfig) {
        let inliers = estimate.num_inliers();
        self.phase = if inliers >= config.inlier_threshold {
            TrackingPhase::Confident
        } else {
            TrackingPhase::Lost
        };
        self.previous = Some((estimate.pose, inliers));
    }

    /// Record a frame that produced no pose.
    pub fn mark_lost(&mut self) {
        self.phase = TrackingPhase::Lost;
        self.previous = None;
    }
}

/// Why a frame produced no pose.
#[derive(Debug, thiserror::Error)]
pub enum FrameFailure {
    /// The object could not be localized.
    #[error("localization failed: {0}")]
    Localization(#[from] LocalizationError),

    /// The matcher failed.
    #[error("matching failed: {0}")]
    Match(#[from] MatchError),
}

/// Everything the controller produced for one frame.
#[derive(Debug)]
pub struct FrameOutcome {
    /// Index of the frame.
    pub frame_index: usize,
    /// Strategy used to localize the object.
    pub strategy: LocalizationStrategy,
    /// Estimated pose; identity when the estimator failed, `None` when localization failed.
    pub pose: Option<Pose>,
    /// Inlier indices into the frame's correspondences.
    pub inliers: Vec<usize>,
    /// Number of correspondences found by the matcher.
    pub num_correspondences: usize,
    /// Error against ground truth.
    pub record: ErrorRecord,
    /// Phase after the frame.
    pub phase: TrackingPhase,
    /// Failure that prevented a pose, if any.
    pub failure: Option<FrameFailure>,
}

impl FrameOutcome {
    /// Number of inliers of the frame.
    pub fn num_inliers(&self) -> usize {
        self.inliers.len()
    }
}

/// Drives localization, matching and estimation for one frame at a time.
///
/// The controller holds only read-only collaborators; the evolving
/// [`TrackingState`] is owned by the caller.
pub struct TrackingController<L, M, E> {
    localizer: L,
    matcher: M,
    estimator: E,
    model: SparseModel,
    bbox3d: [DVec3; 8],
    config: TrackerConfig,
}

impl<L, M, E> TrackingController<L, M, E>
where
    L: Localizer,
    M: Matcher,
    E: PoseEstimator,
{
    /// Create a controller around its collaborators.
    pub fn new(
        localizer: L,
        matcher: M,
        estimator: E,
        model: SparseModel,
        bbox3d: [DVec3; 8],
        config: TrackerConfig,
    ) -> Self {
        Self {
            localizer,
            matcher,
            estimator,
            model,
            bbox3d,
            config,
        }
    }

    /// The object's 3D bounding box.
    pub fn bbox3d(&self) -> &[DVec3; 8] {
        &self.bbox3d
    }

    /// The tracking policy.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Process one frame and advance `state`.
    pub fn process_frame(&self, frame: &Frame, state: &mut TrackingState) -> FrameOutcome {
        let strategy = state.next_strategy();
        let previous = state.previous().map(|(pose, _)| pose);

        let located = self
            .localizer
            .locate(frame, strategy, previous)
            .map_err(FrameFailure::from)
            .and_then(|localization| {
                let correspondences = self
                    .matcher
                    .match_crop(frame, &localization, &self.model)?;
                Ok((localization, correspondences))
            });

        let (localization, correspondences) = match located {
            Ok(v) => v,
            Err(failure) => {
                state.mark_lost();
                return FrameOutcome {
                    frame_index: frame.index,
                    strategy,
                    pose: None,
                    inliers: Vec::new(),
                    num_correspondences: 0,
                    record: ErrorRecord::missing(frame.index),
                    phase: state.phase(),
                    failure: Some(failure),
                };
            }
        };

        let estimate = match self
            .estimator
            .estimate(&localization.intrinsics, &correspondences)
        {
            Ok(estimate) => estimate,
            Err(EstimateError::InsufficientCorrespondences { actual, .. }) => {
                log::debug!("frame {}: only {actual} correspondences", frame.index);
                PoseEstimate::failed()
            }
        };

        state.advance(&estimate, &self.config);

        log::debug!(
            "frame {}: {:?}, {}/{} inliers, now {:?}",
            frame.index,
            localization.strategy,
            estimate.num_inliers(),
            correspondences.len(),
            state.phase()
        );

        FrameOutcome {
            frame_index: frame.index,
            strategy: localization.strategy,
            record: ErrorRecord::new(frame.index, Some(&estimate.pose), frame.pose_gt.as_ref()),
            pose: Some(estimate.pose),
            inliers: estimate.inliers,
            num_correspondences: correspondences.len(),
            phase: state.phase(),
            failure: None,
        }
    }
}
