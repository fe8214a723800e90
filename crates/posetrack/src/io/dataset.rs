use std::{
    cmp::Ordering,
    path::{Path, PathBuf},
};

use walkdir::WalkDir;

use super::{text, IoError};
use crate::{frame::Frame, pose::Intrinsics};

/// Which image set of a sequence feeds the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    /// Full frames from `color_full/` (or `color/` when absent), localized at runtime.
    FullFrame,
    /// Pre-cropped frames from `color/` with their `intrin_ba/` intrinsics.
    Precropped,
}

/// Paths of one sequence directory.
#[derive(Debug, Clone)]
pub struct SequenceLayout {
    /// Root of the sequence, `<data_root>/<seq>`.
    pub dir: PathBuf,
}

impl SequenceLayout {
    /// Layout rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Full-frame intrinsics file.
    pub fn intrinsics_path(&self) -> PathBuf {
        self.dir.join("intrinsics.txt")
    }

    /// Directory of full frames, falling back to the cropped frames.
    pub fn full_frame_dir(&self) -> PathBuf {
        let full = self.dir.join("color_full");
        if full.is_dir() {
            full
        } else {
            self.crop_dir()
        }
    }

    /// Directory of pre-cropped frames.
    pub fn crop_dir(&self) -> PathBuf {
        self.dir.join("color")
    }

    /// Per-frame crop intrinsics.
    pub fn crop_intrinsics_path(&self, stem: &str) -> PathBuf {
        self.dir.join("intrin_ba").join(format!("{stem}.txt"))
    }

    /// Per-frame ground-truth pose.
    pub fn pose_path(&self, stem: &str) -> PathBuf {
        self.dir.join("poses_ba").join(format!("{stem}.txt"))
    }

    /// Per-frame exported matches.
    pub fn matches_path(&self, stem: &str) -> PathBuf {
        self.dir.join("matches").join(format!("{stem}.txt"))
    }

    /// Per-frame exported detections.
    pub fn detection_path(&self, stem: &str) -> PathBuf {
        self.dir.join("detections").join(format!("{stem}.txt"))
    }

    /// Output directory of the pose visualizations.
    pub fn pred_vis_dir(&self) -> PathBuf {
        self.dir.join("pred_vis")
    }

    /// Output directory of the detector crops.
    pub fn detector_vis_dir(&self) -> PathBuf {
        self.dir.join("detector_vis")
    }

    /// Output file of the per-frame errors and summary.
    pub fn report_path(&self) -> PathBuf {
        self.dir.join("pose_errors.json")
    }

    /// Directory holding the images for the given source.
    pub fn image_dir(&self, source: FrameSource) -> PathBuf {
        match source {
            FrameSource::FullFrame => self.full_frame_dir(),
            FrameSource::Precropped => self.crop_dir(),
        }
    }
}

/// List the png/jpg images of a directory in natural order (`2.png` before `10.png`).
pub fn list_images(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, IoError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(IoError::FileDoesNotExist(dir.to_path_buf()));
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"));
        if entry.file_type().is_file() && is_image {
            images.push(path.to_path_buf());
        }
    }

    images.sort_by(|a, b| {
        let a = a.file_name().and_then(|s| s.to_str()).unwrap_or_default();
        let b = b.file_name().and_then(|s| s.to_str()).unwrap_or_default();
        natural_cmp(a, b)
    });

    Ok(images)
}

/// Compare two names treating runs of digits as numbers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();

    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) if ca.is_ascii_digit() && cb.is_ascii_digit() => {
                let na = take_digits(&mut a);
                let nb = take_digits(&mut b);
                // compare by magnitude first, ignoring leading zeros
                let ta = na.trim_start_matches('0');
                let tb = nb.trim_start_matches('0');
                let ord = ta.len().cmp(&tb.len()).then_with(|| ta.cmp(tb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(ca), Some(cb)) => {
                if ca != cb {
                    return ca.cmp(&cb);
                }
                a.next();
                b.next();
            }
        }
    }
}

fn take_digits(it: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut s = String::new();
    while let Some(c) = it.peek().copied().filter(char::is_ascii_digit) {
        s.push(c);
        it.next();
    }
    s
}

/// Lazily loads the frames of one sequence in index order.
pub struct SequenceReader {
    layout: SequenceLayout,
    source: FrameSource,
    images: Vec<PathBuf>,
    next: usize,
}

impl SequenceReader {
    /// Discover the frames of a sequence.
    pub fn new(layout: SequenceLayout, source: FrameSource) -> Result<Self, IoError> {
        let images = list_images(layout.image_dir(source))?;
        log::debug!(
            "found {} frames in {}",
            images.len(),
            layout.image_dir(source).display()
        );
        Ok(Self {
            layout,
            source,
            images,
            next: 0,
        })
    }

    /// Number of frames in the sequence.
    pub fn num_frames(&self) -> usize {
        self.images.len()
    }

    /// The layout this reader loads from.
    pub fn layout(&self) -> &SequenceLayout {
        &self.layout
    }

    fn load(&self, index: usize, path: &Path) -> Result<Frame, IoError> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| IoError::parse(path, "image name is not valid utf-8"))?
            .to_string();

        let image = image::open(path)
            .map_err(|source| IoError::Image {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgb8();

        let crop_intrinsics = match self.source {
            FrameSource::Precropped => read_optional(&self.layout.crop_intrinsics_path(&name))?,
            FrameSource::FullFrame => None,
        };

        // ground truth only feeds the evaluation, an unreadable file leaves the frame trackable
        let pose_path = self.layout.pose_path(&name);
        let pose_gt = if pose_path.exists() {
            match text::read_pose_txt(&pose_path) {
                Ok(pose) => Some(pose),
                Err(e) => {
                    log::warn!("frame {index}: ignoring ground truth: {e}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Frame {
            index,
            name,
            path: path.to_path_buf(),
            image,
            crop_intrinsics,
            pose_gt,
        })
    }
}

fn read_optional(path: &Path) -> Result<Option<Intrinsics>, IoError> {
    if path.exists() {
        text::read_intrinsics_txt(path).map(Some)
    } else {
        Ok(None)
    }
}

impl Iterator for SequenceReader {
    type Item = Result<Frame, IoError>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next;
        let path = self.images.get(index)?.clone();
        self.next += 1;
        Some(self.load(index, &path))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.images.len() - self.next;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_cmp() {
        let mut names = vec!["10.png", "2.png", "1.png", "frame_002.png", "frame_10.png"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(
            names,
            vec!["1.png", "2.png", "10.png", "frame_002.png", "frame_10.png"]
        );
        assert_eq!(natural_cmp("007", "7"), Ordering::Equal);
    }

    #[test]
    fn test_full_frame_dir_fallback() {
        let tmp_dir = tempfile::tempdir().expect("tempdir");
        let layout = SequenceLayout::new(tmp_dir.path());
        assert_eq!(layout.full_frame_dir(), tmp_dir.path().join("color"));

        std::fs::create_dir(tmp_dir.path().join("color_full")).expect("mkdir");
        assert_eq!(layout.full_frame_dir(), tmp_dir.path().join("color_full"));
        assert_eq!(
            layout.image_dir(FrameSource::Precropped),
            tmp_dir.path().join("color")
        );
    }

    #[test]
    fn test_list_images_skips_other_files() -> Result<(), IoError> {
        let tmp_dir = tempfile::tempdir().expect("tempdir");
        for name in ["11.png", "3.png", "notes.txt", "0.jpg"] {
            std::fs::write(tmp_dir.path().join(name), b"").expect("write fixture");
        }
        let images = list_images(tmp_dir.path())?;
        let names = images
            .iter()
            .filter_map(|p| p.file_name().and_then(|s| s.to_str()))
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["0.jpg", "3.png", "11.png"]);

        assert!(matches!(
            list_images(tmp_dir.path().join("missing")),
            Err(IoError::FileDoesNotExist(_))
        ));
        Ok(())
    }

    #[test]
    fn test_reader_ignores_unreadable_ground_truth() -> Result<(), IoError> {
        let tmp_dir = tempfile::tempdir().expect("tempdir");
        let layout = SequenceLayout::new(tmp_dir.path());
        for dir in ["color", "intrin_ba", "poses_ba"] {
            std::fs::create_dir(tmp_dir.path().join(dir)).expect("mkdir");
        }
        image::RgbImage::new(8, 8)
            .save(layout.crop_dir().join("0.png"))
            .expect("write image");
        std::fs::write(
            layout.crop_intrinsics_path("0"),
            "500 0 4\n0 500 4\n0 0 1\n",
        )
        .expect("write fixture");
        std::fs::write(layout.pose_path("0"), "1 0 0\nnot a pose\n").expect("write fixture");

        let mut reader = SequenceReader::new(layout, FrameSource::Precropped)?;
        let frame = reader.next().expect("one frame")?;
        assert_eq!(frame.name, "0");
        assert!(frame.pose_gt.is_none());
        assert!(frame.crop_intrinsics.is_some());
        assert!(reader.next().is_none());
        Ok(())
    }
}
