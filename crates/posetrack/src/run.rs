//! Run the tracker over the sequences named on the command line.

use std::path::{Path, PathBuf};

use glam::DVec3;
use rayon::prelude::*;

use crate::{
    config::{ConfigError, PipelineConfig},
    detector::FeatureObjectDetector,
    estimator::RansacPnPEstimator,
    io::{
        colmap::{read_points3d_txt, SparseModel},
        dataset::{FrameSource, SequenceLayout, SequenceReader},
        text::{read_box3d_txt, read_intrinsics_txt},
        IoError,
    },
    localizer::{
        BoxFileDetector, BoxLocalizer, DetectorKind, FullFrameDetector, Localizer, LocalizerKind,
        ObjectDetector, PrecroppedLocalizer,
    },
    matcher::PrecomputedMatcher,
    pose::Intrinsics,
    sequence::{run_sequence, SequenceReport},
    tracker::{FrameOutcome, TrackingController},
    viz,
};

/// Error types for the run module.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The configuration file is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Data and SfM directories do not pair up.
    #[error("Got {data_dirs} data dirs but {sfm_dirs} sfm dirs")]
    MismatchedDirs {
        /// Number of data directories.
        data_dirs: usize,
        /// Number of SfM directories.
        sfm_dirs: usize,
    },

    /// A data directory names no sequence.
    #[error("Data dir `{0}` names no sequence, expected `<root> <seq>...`")]
    NoSequences(String),

    /// A required input is missing.
    #[error("Missing {what}: {}", path.display())]
    MissingInput {
        /// Kind of input.
        what: &'static str,
        /// Expected location.
        path: PathBuf,
    },

    /// Reading an input failed.
    #[error(transparent)]
    Io(#[from] IoError),

    /// Writing an output failed.
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        /// Output path.
        path: PathBuf,
        /// Underlying io error.
        source: std::io::Error,
    },

    /// Serializing the report failed.
    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

/// One sequence to track, with the shared inputs it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceJob {
    /// Directory holding `box3d_corners.txt` and the sequences.
    pub data_root: PathBuf,
    /// Directory of the sequence.
    pub sequence_dir: PathBuf,
    /// SfM output directory of the object.
    pub sfm_dir: PathBuf,
}

impl SequenceJob {
    /// Name used in logs and reports.
    pub fn name(&self) -> String {
        self.sequence_dir.display().to_string()
    }

    /// Object 3D box.
    pub fn box3d_path(&self) -> PathBuf {
        self.data_root.join("box3d_corners.txt")
    }

    /// Reference views of the object for the feature detector.
    pub fn reference_dir(&self) -> PathBuf {
        self.sfm_dir.join("sfm_ws").join("reference")
    }

    /// Sparse model of the object.
    pub fn points3d_path(&self) -> PathBuf {
        self.sfm_dir
            .join("sfm_ws")
            .join("model")
            .join("points3D.txt")
    }
}

/// Pair data dirs with SfM dirs and expand each `"<root> <seq1> <seq2>"` into jobs.
pub fn expand_jobs(
    data_dirs: &[String],
    sfm_dirs: &[PathBuf],
) -> Result<Vec<SequenceJob>, RunError> {
    if data_dirs.len() != sfm_dirs.len() {
        return Err(RunError::MismatchedDirs {
            data_dirs: data_dirs.len(),
            sfm_dirs: sfm_dirs.len(),
        });
    }

    let mut jobs = Vec::new();
    for (data_dir, sfm_dir) in data_dirs.iter().zip(sfm_dirs) {
        let mut parts = data_dir.split_whitespace();
        let root = parts
            .next()
            .ok_or_else(|| RunError::NoSequences(data_dir.clone()))?;
        let root = PathBuf::from(root);

        let before = jobs.len();
        jobs.extend(parts.map(|seq| SequenceJob {
            data_root: root.clone(),
            sequence_dir: root.join(seq),
            sfm_dir: sfm_dir.clone(),
        }));
        if jobs.len() == before {
            return Err(RunError::NoSequences(data_dir.clone()));
        }
    }
    Ok(jobs)
}

fn require(what: &'static str, path: PathBuf) -> Result<PathBuf, RunError> {
    if path.exists() {
        Ok(path)
    } else {
        Err(RunError::MissingInput { what, path })
    }
}

fn frame_source(config: &PipelineConfig) -> FrameSource {
    match config.localizer.kind {
        LocalizerKind::Box => FrameSource::FullFrame,
        LocalizerKind::Precropped => FrameSource::Precropped,
    }
}

fn recreate_dir(path: &Path) -> Result<(), RunError> {
    let to_err = |source| RunError::Write {
        path: path.to_path_buf(),
        source,
    };
    if path.exists() {
        std::fs::remove_dir_all(path).map_err(to_err)?;
    }
    std::fs::create_dir_all(path).map_err(to_err)
}

/// A job whose inputs are all checked and loaded.
pub struct PreparedJob {
    job: SequenceJob,
    layout: SequenceLayout,
    bbox3d: [DVec3; 8],
    model: SparseModel,
    full_intrinsics: Option<Intrinsics>,
    detector: Option<Box<dyn ObjectDetector>>,
    reader: SequenceReader,
}

impl PreparedJob {
    /// The job this was prepared from.
    pub fn job(&self) -> &SequenceJob {
        &self.job
    }

    /// Number of frames the job will process.
    pub fn num_frames(&self) -> usize {
        self.reader.num_frames()
    }
}

/// Check and load everything a job needs before its first frame.
///
/// A missing input is an error naming the path. Nothing is written.
pub fn prepare_job(job: &SequenceJob, config: &PipelineConfig) -> Result<PreparedJob, RunError> {
    require("sequence directory", job.sequence_dir.clone())?;
    let bbox3d = read_box3d_txt(require("3D box", job.box3d_path())?)?;
    let model = read_points3d_txt(require("sparse model", job.points3d_path())?)?;
    log::info!("{}: model with {} points", job.name(), model.len());

    let layout = SequenceLayout::new(&job.sequence_dir);
    let reader = SequenceReader::new(layout.clone(), frame_source(config))?;

    let (full_intrinsics, detector) = match config.localizer.kind {
        LocalizerKind::Precropped => (None, None),
        LocalizerKind::Box => {
            let k = read_intrinsics_txt(require("intrinsics", layout.intrinsics_path())?)?;
            let detector: Box<dyn ObjectDetector> = match config.localizer.detector {
                DetectorKind::Features => {
                    let dir = require("reference images", job.reference_dir())?;
                    let detector =
                        FeatureObjectDetector::from_dir(&dir, &config.localizer.feature_detector)?;
                    if detector.num_references() == 0 {
                        return Err(RunError::MissingInput {
                            what: "reference images",
                            path: dir,
                        });
                    }
                    Box::new(detector)
                }
                DetectorKind::FullFrame => Box::new(FullFrameDetector),
                DetectorKind::BoxFile => Box::new(BoxFileDetector::new(layout.clone())),
            };
            (Some(k), Some(detector))
        }
    };

    Ok(PreparedJob {
        job: job.clone(),
        layout,
        bbox3d,
        model,
        full_intrinsics,
        detector,
        reader,
    })
}

/// Prepare every job, stopping at the first one with a setup error.
pub fn prepare_jobs(
    jobs: &[SequenceJob],
    config: &PipelineConfig,
) -> Result<Vec<PreparedJob>, RunError> {
    jobs.iter().map(|job| prepare_job(job, config)).collect()
}

/// Track one prepared sequence, write its outputs and return the report.
///
/// `on_frame` is called after every frame.
pub fn run_prepared<F>(
    prepared: PreparedJob,
    config: &PipelineConfig,
    mut on_frame: F,
) -> Result<SequenceReport, RunError>
where
    F: FnMut(&FrameOutcome),
{
    let PreparedJob {
        job,
        layout,
        bbox3d,
        model,
        full_intrinsics,
        detector,
        reader,
    } = prepared;

    let localizer: Box<dyn Localizer> = match (full_intrinsics, detector) {
        (Some(k), Some(detector)) => {
            let mut localizer = BoxLocalizer::new(detector, k, bbox3d, &config.localizer);
            if config.output.save_detections {
                let dir = layout.detector_vis_dir();
                recreate_dir(&dir)?;
                localizer = localizer.with_detection_dir(dir);
            }
            Box::new(localizer)
        }
        _ => Box::new(PrecroppedLocalizer),
    };

    let vis_dir = layout.pred_vis_dir();
    if config.output.save_visualizations {
        recreate_dir(&vis_dir)?;
    }

    let controller = TrackingController::new(
        localizer,
        PrecomputedMatcher::new(layout.clone()),
        RansacPnPEstimator::new(config.estimator.clone()),
        model,
        bbox3d,
        config.tracker.clone(),
    );

    let name = job.name();
    let draw_threshold = config.tracker.inlier_threshold;
    let report = run_sequence(&name, &controller, reader, |frame, outcome| {
        if config.output.save_visualizations {
            // full-frame intrinsics when localizing at runtime, crop intrinsics otherwise
            let intrinsics = full_intrinsics.or(frame.crop_intrinsics);
            if let Some(k) = intrinsics {
                let predicted = outcome
                    .pose
                    .as_ref()
                    .filter(|_| outcome.num_inliers() > draw_threshold);
                let gt = frame.pose_gt.as_ref();
                let canvas = viz::render_poses(&frame.image, &bbox3d, &k, gt, predicted);
                let path = vis_dir.join(format!("{}.jpg", frame.index));
                if let Err(e) = canvas.save(&path) {
                    log::warn!("{name}: failed to save {}: {e}", path.display());
                }
            }
        }
        on_frame(outcome);
    });

    let report_path = layout.report_path();
    let file = std::fs::File::create(&report_path).map_err(|source| RunError::Write {
        path: report_path.clone(),
        source,
    })?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), &report)?;
    log::info!("{name}: wrote {}", report_path.display());

    Ok(report)
}

/// Prepare and track a single sequence.
pub fn run_job<F>(
    job: &SequenceJob,
    config: &PipelineConfig,
    on_frame: F,
) -> Result<SequenceReport, RunError>
where
    F: FnMut(&FrameOutcome),
{
    run_prepared(prepare_job(job, config)?, config, on_frame)
}

/// Run prepared sequences in parallel, one result per job in input order.
pub fn run_all<F>(
    prepared: Vec<PreparedJob>,
    config: &PipelineConfig,
    on_frame: F,
) -> Vec<Result<SequenceReport, RunError>>
where
    F: Fn(&SequenceJob, &FrameOutcome) + Sync,
{
    prepared
        .into_par_iter()
        .map(|prepared| {
            let job = prepared.job().clone();
            let result = run_prepared(prepared, config, |outcome| on_frame(&job, outcome));
            if let Err(e) = &result {
                log::error!("{}: {e}", job.name());
            }
            result
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_jobs() -> Result<(), RunError> {
        let jobs = expand_jobs(
            &["data/obj a-1 a-2".to_string(), "data/other b-1".to_string()],
            &[PathBuf::from("sfm/obj"), PathBuf::from("sfm/other")],
        )?;
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].data_root, PathBuf::from("data/obj"));
        assert_eq!(jobs[1].sequence_dir, PathBuf::from("data/obj/a-2"));
        assert_eq!(jobs[2].sfm_dir, PathBuf::from("sfm/other"));
        assert_eq!(
            jobs[2].points3d_path(),
            PathBuf::from("sfm/other/sfm_ws/model/points3D.txt")
        );
        Ok(())
    }

    #[test]
    fn test_expand_jobs_errors() {
        assert!(matches!(
            expand_jobs(&["data/obj a-1".to_string()], &[]),
            Err(RunError::MismatchedDirs {
                data_dirs: 1,
                sfm_dirs: 0
            })
        ));
        assert!(matches!(
            expand_jobs(&["data/obj".to_string()], &[PathBuf::from("sfm")]),
            Err(RunError::NoSequences(_))
        ));
    }

    #[test]
    fn test_run_job_names_missing_input() {
        let tmp_dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(tmp_dir.path().join("seq")).expect("mkdir");
        let job = SequenceJob {
            data_root: tmp_dir.path().to_path_buf(),
            sequence_dir: tmp_dir.path().join("seq"),
            sfm_dir: tmp_dir.path().join("sfm"),
        };
        let res = run_job(&job, &PipelineConfig::default(), |_| {});
        match res {
            Err(RunError::MissingInput { what, path }) => {
                assert_eq!(what, "3D box");
                assert_eq!(path, tmp_dir.path().join("box3d_corners.txt"));
            }
            other => panic!("expected a missing input, got {other:?}"),
        }
    }
}
