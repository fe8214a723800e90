use std::{fmt::Write as _, fs, path::Path};

use glam::{DMat3, DVec3};
use image::RgbImage;

use posetrack::{
    config::PipelineConfig,
    run::{prepare_job, prepare_jobs, run_all, run_job, RunError, SequenceJob},
    tracker::TrackingPhase,
    Intrinsics, Pose,
};

const NUM_FRAMES: usize = 3;
const NUM_OUTLIERS: usize = 5;

fn model_points() -> Vec<DVec3> {
    (0..40)
        .map(|i| {
            let i = i as f64;
            DVec3::new(
                0.05 * (1.3 * i).sin(),
                0.05 * (2.1 * i).cos(),
                0.04 * (0.7 * i + 0.5).sin(),
            )
        })
        .collect()
}

fn gt_pose(index: usize) -> Pose {
    Pose::new(
        DMat3::from_rotation_y(0.05 * index as f64),
        DVec3::new(0.01 * index as f64, -0.005, 0.5),
    )
}

fn write_matrix(path: &Path, rows: &[Vec<f64>]) {
    let mut s = String::new();
    for row in rows {
        let line = row
            .iter()
            .map(|v| format!("{v:.12}"))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(s, "{line}").expect("format row");
    }
    fs::write(path, s).expect("write matrix");
}

/// Writes a pre-cropped sequence with exported matches under `root`.
fn write_dataset(root: &Path, sfm: &Path) {
    let seq = root.join("seq-1");
    for dir in ["color", "intrin_ba", "poses_ba", "matches"] {
        fs::create_dir_all(seq.join(dir)).expect("mkdir");
    }
    fs::create_dir_all(sfm.join("sfm_ws").join("model")).expect("mkdir");

    let h = 0.05;
    let corners = [
        [-h, -h, -h],
        [h, -h, -h],
        [h, h, -h],
        [-h, h, -h],
        [-h, -h, h],
        [h, -h, h],
        [h, h, h],
        [-h, h, h],
    ];
    write_matrix(
        &root.join("box3d_corners.txt"),
        &corners.iter().map(|c| c.to_vec()).collect::<Vec<_>>(),
    );

    let points = model_points();
    let mut model = String::from(
        "# 3D point list with one line of data per point:\n\
         #   POINT3D_ID, X, Y, Z, R, G, B, ERROR, TRACK[] as (IMAGE_ID, POINT2D_IDX)\n\
         # Number of points: 40\n",
    );
    for (i, p) in points.iter().enumerate() {
        writeln!(model, "{} {} {} {} 128 128 128 0.5 1 {i}", i + 100, p.x, p.y, p.z)
            .expect("format point");
    }
    fs::write(sfm.join("sfm_ws/model/points3D.txt"), model).expect("write model");

    let k = Intrinsics::new(700.0, 700.0, 256.0, 256.0);
    for index in 0..NUM_FRAMES {
        let stem = index.to_string();
        RgbImage::new(512, 512)
            .save(seq.join("color").join(format!("{stem}.png")))
            .expect("write image");
        write_matrix(
            &seq.join("intrin_ba").join(format!("{stem}.txt")),
            &k.to_matrix().iter().map(|r| r.to_vec()).collect::<Vec<_>>(),
        );

        let pose = gt_pose(index);
        let mut rows = pose
            .to_rows()
            .iter()
            .map(|r| r.to_vec())
            .collect::<Vec<_>>();
        rows.push(vec![0.0, 0.0, 0.0, 1.0]);
        write_matrix(&seq.join("poses_ba").join(format!("{stem}.txt")), &rows);

        let mut matches = Vec::new();
        for (i, p) in points.iter().enumerate() {
            let uv = k
                .project(pose.transform_point(*p))
                .expect("point in front of the camera");
            // a few exported matches point far away from their model point
            let shift = if i < NUM_OUTLIERS { 80.0 } else { 0.0 };
            matches.push(vec![uv.x + shift, uv.y - shift, (i + 100) as f64]);
        }
        // unknown model id, dropped by the matcher
        matches.push(vec![10.0, 10.0, 9999.0]);
        write_matrix(&seq.join("matches").join(format!("{stem}.txt")), &matches);
    }
}

#[test]
fn precropped_sequence_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_dir = tempfile::tempdir()?;
    let root = tmp_dir.path().join("data");
    let sfm = tmp_dir.path().join("sfm");
    write_dataset(&root, &sfm);

    let job = SequenceJob {
        data_root: root.clone(),
        sequence_dir: root.join("seq-1"),
        sfm_dir: sfm,
    };
    let mut config = PipelineConfig::default();
    config.estimator.random_seed = Some(11);

    assert_eq!(prepare_job(&job, &config)?.num_frames(), NUM_FRAMES);

    let mut phases = Vec::new();
    let mut inliers = Vec::new();
    let report = run_job(&job, &config, |outcome| {
        phases.push(outcome.phase);
        inliers.push(outcome.inliers.clone());
    })?;

    assert_eq!(phases, vec![TrackingPhase::Confident; NUM_FRAMES]);
    for frame_inliers in &inliers {
        assert_eq!(
            frame_inliers,
            &(NUM_OUTLIERS..40).collect::<Vec<_>>()
        );
    }

    let summary = &report.summary;
    assert_eq!(summary.num_frames, NUM_FRAMES);
    assert_eq!(summary.num_valid, NUM_FRAMES);
    assert_eq!(summary.num_failures, 0);
    assert!(summary.mean_rotation_deg.is_some_and(|e| e < 0.01));
    assert!(summary.mean_translation_cm.is_some_and(|e| e < 0.01));
    assert!(summary.accuracies.iter().all(|a| a.accuracy == 1.0));

    let seq = root.join("seq-1");
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(
        seq.join("pose_errors.json"),
    )?)?;
    assert_eq!(json["records"].as_array().map(Vec::len), Some(NUM_FRAMES));
    assert_eq!(json["summary"]["num_frames"], NUM_FRAMES);
    for index in 0..NUM_FRAMES {
        assert!(seq.join("pred_vis").join(format!("{index}.jpg")).exists());
    }
    Ok(())
}

#[test]
fn box_localizer_requires_intrinsics() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_dir = tempfile::tempdir()?;
    let root = tmp_dir.path().join("data");
    let sfm = tmp_dir.path().join("sfm");
    write_dataset(&root, &sfm);

    let job = SequenceJob {
        data_root: root.clone(),
        sequence_dir: root.join("seq-1"),
        sfm_dir: sfm.clone(),
    };
    let mut config = PipelineConfig::default();
    config.localizer.kind = posetrack::localizer::LocalizerKind::Box;

    let err = run_job(&job, &config, |_| {}).err().map(|e| e.to_string());
    assert_eq!(
        err,
        Some(format!(
            "Missing intrinsics: {}",
            root.join("seq-1").join("intrinsics.txt").display()
        ))
    );

    // the default feature detector needs reference views of the object
    write_matrix(
        &root.join("seq-1").join("intrinsics.txt"),
        &[
            vec![600.0, 0.0, 320.0],
            vec![0.0, 600.0, 240.0],
            vec![0.0, 0.0, 1.0],
        ],
    );
    let reference_dir = sfm.join("sfm_ws").join("reference");
    let missing_references = format!("Missing reference images: {}", reference_dir.display());
    let err = prepare_job(&job, &config).err().map(|e| e.to_string());
    assert_eq!(err.as_deref(), Some(missing_references.as_str()));

    fs::create_dir_all(&reference_dir)?;
    let err = prepare_job(&job, &config).err().map(|e| e.to_string());
    assert_eq!(err.as_deref(), Some(missing_references.as_str()));

    RgbImage::new(64, 64).save(reference_dir.join("0.png"))?;
    assert_eq!(prepare_job(&job, &config)?.num_frames(), NUM_FRAMES);
    Ok(())
}

#[test]
fn setup_error_stops_every_sequence() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_dir = tempfile::tempdir()?;
    let root = tmp_dir.path().join("data");
    let sfm = tmp_dir.path().join("sfm");
    write_dataset(&root, &sfm);

    let good = SequenceJob {
        data_root: root.clone(),
        sequence_dir: root.join("seq-1"),
        sfm_dir: sfm,
    };
    let missing_model = SequenceJob {
        sfm_dir: tmp_dir.path().join("no-sfm"),
        ..good.clone()
    };
    let config = PipelineConfig::default();

    let frames = std::sync::atomic::AtomicUsize::new(0);
    let result = prepare_jobs(&[good.clone(), missing_model.clone()], &config)
        .map(|prepared| run_all(prepared, &config, |_, _| {
            frames.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));

    match result {
        Err(RunError::MissingInput { what, path }) => {
            assert_eq!(what, "sparse model");
            assert_eq!(path, missing_model.points3d_path());
        }
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("expected a setup error"),
    }
    assert_eq!(frames.into_inner(), 0);
    let seq = root.join("seq-1");
    assert!(!seq.join("pose_errors.json").exists());
    assert!(!seq.join("pred_vis").exists());

    // the valid job alone runs
    let prepared = prepare_jobs(&[good], &config)?;
    let results = run_all(prepared, &config, |_, _| {});
    assert!(results.iter().all(Result::is_ok));
    Ok(())
}

#[test]
fn corrupt_ground_truth_only_blanks_the_error() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_dir = tempfile::tempdir()?;
    let root = tmp_dir.path().join("data");
    let sfm = tmp_dir.path().join("sfm");
    write_dataset(&root, &sfm);
    fs::write(root.join("seq-1/poses_ba/1.txt"), "1 0 0 0\ngarbage\n")?;

    let job = SequenceJob {
        data_root: root.clone(),
        sequence_dir: root.join("seq-1"),
        sfm_dir: sfm,
    };
    let mut config = PipelineConfig::default();
    config.estimator.random_seed = Some(11);

    let mut outcomes = Vec::new();
    let report = run_job(&job, &config, |outcome| {
        outcomes.push((outcome.strategy, outcome.phase, outcome.pose.is_some()))
    })?;

    assert_eq!(outcomes.len(), NUM_FRAMES);
    assert!(outcomes
        .iter()
        .all(|&(_, phase, has_pose)| phase == TrackingPhase::Confident && has_pose));
    assert_eq!(outcomes[2].0, posetrack::localizer::LocalizationStrategy::Track);
    assert!(report.records[0].is_valid());
    assert!(!report.records[1].is_valid());
    assert!(report.records[2].is_valid());
    assert_eq!(report.summary.num_failures, 0);
    assert_eq!(report.summary.num_valid, NUM_FRAMES - 1);
    Ok(())
}
