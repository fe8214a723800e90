use serde::{Deserialize, Serialize};

use crate::{
    estimator::PoseEstimator,
    frame::Frame,
    io::IoError,
    localizer::Localizer,
    matcher::Matcher,
    metrics::{nanmean, threshold_accuracy, ErrorRecord, ACCURACY_THRESHOLDS},
    pose::Pose,
    tracker::{FrameOutcome, TrackingController, TrackingPhase, TrackingState},
};

/// Accuracy at one `(degrees, centimeters)` threshold pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdAccuracy {
    /// Rotation threshold in degrees.
    pub max_deg: f64,
    /// Translation threshold in centimeters.
    pub max_cm: f64,
    /// Fraction of valid frames under both thresholds.
    #[serde(with = "crate::metrics::nan_as_null")]
    pub accuracy: f64,
}

/// Sequence-level statistics.
///
/// Means and accuracies are NaN when no frame has a valid error record and
/// are then written as `null` in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceSummary {
    /// Number of frames processed.
    pub num_frames: usize,
    /// Frames with both errors available.
    pub num_valid: usize,
    /// Frames that ended confident.
    pub num_confident: usize,
    /// Frames that ended lost, including failures.
    pub num_lost: usize,
    /// Frames that could not be localized, matched or loaded.
    pub num_failures: usize,
    /// NaN-aware mean rotation error in degrees.
    pub mean_rotation_deg: Option<f64>,
    /// NaN-aware mean translation error in centimeters.
    pub mean_translation_cm: Option<f64>,
    /// Accuracy at the 5/3/1 degree-centimeter thresholds.
    pub accuracies: Vec<ThresholdAccuracy>,
}

fn finite(v: f64) -> Option<f64> {
    (!v.is_nan()).then_some(v)
}

impl SequenceSummary {
    /// Summarize the error records of a sequence.
    pub fn from_records(
        records: &[ErrorRecord],
        num_confident: usize,
        num_failures: usize,
    ) -> Self {
        let accuracies = ACCURACY_THRESHOLDS
            .iter()
            .map(|&(max_deg, max_cm)| ThresholdAccuracy {
                max_deg,
                max_cm,
                accuracy: threshold_accuracy(records, max_deg, max_cm),
            })
            .collect();

        Self {
            num_frames: records.len(),
            num_valid: records.iter().filter(|r| r.is_valid()).count(),
            num_confident,
            num_lost: records.len() - num_confident,
            num_failures,
            mean_rotation_deg: finite(nanmean(records.iter().map(|r| r.rotation_deg))),
            mean_translation_cm: finite(nanmean(records.iter().map(|r| r.translation_cm))),
            accuracies,
        }
    }
}

impl std::fmt::Display for SequenceSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fmt_opt = |v: Option<f64>| v.map_or_else(|| "nan".to_string(), |v| format!("{v:.3}"));
        writeln!(
            f,
            "frames: {} (valid {}, confident {}, lost {}, failures {})",
            self.num_frames, self.num_valid, self.num_confident, self.num_lost, self.num_failures
        )?;
        writeln!(
            f,
            "mean error: {} deg, {} cm",
            fmt_opt(self.mean_rotation_deg),
            fmt_opt(self.mean_translation_cm)
        )?;
        for acc in &self.accuracies {
            writeln!(
                f,
                "{}deg@{}cm: {}",
                acc.max_deg,
                acc.max_cm,
                fmt_opt(finite(acc.accuracy))
            )?;
        }
        Ok(())
    }
}

/// Per-frame results of a sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceReport {
    /// Sequence name used in logs.
    pub name: String,
    /// One record per frame, in index order.
    pub records: Vec<ErrorRecord>,
    /// Pose of each frame, `None` for frames without a pose.
    pub poses: Vec<Option<Pose>>,
    /// Inlier count of each frame.
    pub num_inliers: Vec<usize>,
    /// Aggregated statistics.
    pub summary: SequenceSummary,
}

/// Runs the controller over every frame of a sequence in index order.
///
/// Frames that fail to load are logged, recorded with NaN errors, and reset
/// tracking so the next frame is re-detected. `on_frame` sees every outcome
/// together with its frame, after the state has been advanced.
pub fn run_sequence<L, M, E, I, F>(
    name: &str,
    controller: &TrackingController<L, M, E>,
    frames: I,
    mut on_frame: F,
) -> SequenceReport
where
    L: Localizer,
    M: Matcher,
    E: PoseEstimator,
    I: IntoIterator<Item = Result<Frame, IoError>>,
    F: FnMut(&Frame, &FrameOutcome),
{
    let mut state = TrackingState::new();
    let mut records = Vec::new();
    let mut poses = Vec::new();
    let mut num_inliers = Vec::new();
    let mut num_confident = 0;
    let mut num_failures = 0;

    for (index, frame) in frames.into_iter().enumerate() {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("{name}: failed to load frame {index}: {e}");
                state.mark_lost();
                records.push(ErrorRecord::missing(index));
                poses.push(None);
                num_inliers.push(0);
                num_failures += 1;
                continue;
            }
        };

        let outcome = controller.process_frame(&frame, &mut state);
        if let Some(failure) = &outcome.failure {
            log::warn!("{name}: frame {}: {failure}", frame.index);
            num_failures += 1;
        }
        if outcome.phase == TrackingPhase::Confident {
            num_confident += 1;
        }

        records.push(outcome.record);
        poses.push(outcome.pose);
        num_inliers.push(outcome.num_inliers());
        on_frame(&frame, &outcome);
    }

    let summary = SequenceSummary::from_records(&records, num_confident, num_failures);
    log::info!(
        "{name}: {} frames, {} confident, {} failures",
        summary.num_frames,
        summary.num_confident,
        summary.num_failures
    );

    SequenceReport {
        name: name.to_string(),
        records,
        poses,
        num_inliers,
        summary,
    }
}
