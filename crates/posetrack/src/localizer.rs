//! Object localization: choose the image region that contains the object.
//!
//! A region comes either from a fresh detection on the full frame or from
//! reprojecting the object's 3D box with the previous pose. The region is
//! cropped and resized to a square working resolution and the intrinsics are
//! updated to match the crop.

use std::path::{Path, PathBuf};

use glam::{DVec2, DVec3};
use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};

use crate::{
    detector::FeatureDetectorConfig,
    frame::Frame,
    io::{dataset::SequenceLayout, text::read_matrix_txt, IoError},
    pose::{Intrinsics, Pose},
};

/// How the region of the current frame is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalizationStrategy {
    /// Run the 2D detector on the full frame.
    Detect,
    /// Reproject the 3D box with the previous pose.
    Track,
}

/// Error types for the localizer module.
#[derive(Debug, thiserror::Error)]
pub enum LocalizationError {
    /// The detector did not find the object.
    #[error("Nothing detected in frame {frame}")]
    NothingDetected {
        /// Index of the frame.
        frame: usize,
    },

    /// The region does not overlap the frame.
    #[error("Region of frame {frame} lies outside the image")]
    OutOfFrame {
        /// Index of the frame.
        frame: usize,
    },

    /// A corner of the reprojected box lies behind the camera.
    #[error("Box corner behind the camera in frame {frame}")]
    BehindCamera {
        /// Index of the frame.
        frame: usize,
    },

    /// A pre-cropped frame came without crop intrinsics.
    #[error("No crop intrinsics for frame {frame}")]
    MissingCropIntrinsics {
        /// Index of the frame.
        frame: usize,
    },

    /// Reading the detector output failed.
    #[error(transparent)]
    Io(#[from] IoError),
}

/// Axis-aligned box in full-frame pixels, `x1 > x0` and `y1 > y0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Left edge.
    pub x0: f64,
    /// Top edge.
    pub y0: f64,
    /// Right edge.
    pub x1: f64,
    /// Bottom edge.
    pub y1: f64,
}

impl BoundingBox {
    /// Create a box from its corners.
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Tight box around a set of points; `None` for an empty set.
    pub fn from_points(points: impl IntoIterator<Item = DVec2>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Some(Self::new(min.x, min.y, max.x, max.y))
    }

    /// Box covering the whole image.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f64, height as f64)
    }

    /// Box width.
    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    /// Box height.
    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    /// Grow every side by `ratio / 2` of the box size.
    pub fn pad(&self, ratio: f64) -> Self {
        let dx = 0.5 * ratio * self.width();
        let dy = 0.5 * ratio * self.height();
        Self::new(self.x0 - dx, self.y0 - dy, self.x1 + dx, self.y1 + dy)
    }

    /// Intersection with the image, snapped outwards to whole pixels.
    ///
    /// Returns `(x, y, width, height)` or `None` when less than one pixel overlaps.
    pub fn clip_to_pixels(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x0.floor().max(0.0);
        let y0 = self.y0.floor().max(0.0);
        let x1 = self.x1.ceil().min(width as f64);
        let y1 = self.y1.ceil().min(height as f64);
        if !(x1 - x0 >= 1.0 && y1 - y0 >= 1.0) {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// Affine map from full-frame pixels into crop pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropTransform {
    /// Top-left corner of the crop in the full frame.
    pub offset: DVec2,
    /// Resize factor along each axis.
    pub scale: DVec2,
}

impl CropTransform {
    /// The identity map.
    pub const IDENTITY: Self = Self {
        offset: DVec2::ZERO,
        scale: DVec2::ONE,
    };

    /// Map a full-frame point into the crop.
    pub fn apply(&self, point: DVec2) -> DVec2 {
        (point - self.offset) * self.scale
    }
}

/// Output of the localizer for one frame.
#[derive(Debug, Clone)]
pub struct Localization {
    /// Strategy that produced the region.
    pub strategy: LocalizationStrategy,
    /// Region in full-frame pixels.
    pub bbox: BoundingBox,
    /// Image crop at the working resolution.
    pub crop: RgbImage,
    /// Intrinsics of the crop.
    pub intrinsics: Intrinsics,
    /// Full-frame to crop pixel map.
    pub transform: CropTransform,
}

/// Produces an image crop and its intrinsics for a frame.
pub trait Localizer: Send + Sync {
    /// Localize by fresh detection.
    fn detect(&self, frame: &Frame) -> Result<Localization, LocalizationError>;

    /// Localize by reprojecting the 3D box with the previous pose.
    fn track(&self, frame: &Frame, previous: &Pose) -> Result<Localization, LocalizationError>;

    /// Dispatch on the strategy; tracking without a previous pose detects.
    fn locate(
        &self,
        frame: &Frame,
        strategy: LocalizationStrategy,
        previous: Option<&Pose>,
    ) -> Result<Localization, LocalizationError> {
        match (strategy, previous) {
            (LocalizationStrategy::Track, Some(pose)) => self.track(frame, pose),
            _ => self.detect(frame),
        }
    }
}

impl<T: Localizer + ?Sized> Localizer for Box<T> {
    fn detect(&self, frame: &Frame) -> Result<Localization, LocalizationError> {
        (**self).detect(frame)
    }

    fn track(&self, frame: &Frame, previous: &Pose) -> Result<Localization, LocalizationError> {
        (**self).track(frame, previous)
    }
}

/// 2D object detector working on full frames.
pub trait ObjectDetector: Send + Sync {
    /// Bounding box of the object, `None` when it is not visible.
    fn detect(&self, frame: &Frame) -> Result<Option<BoundingBox>, LocalizationError>;
}

impl<T: ObjectDetector + ?Sized> ObjectDetector for Box<T> {
    fn detect(&self, frame: &Frame) -> Result<Option<BoundingBox>, LocalizationError> {
        (**self).detect(frame)
    }
}

/// Detector that reports the whole frame as the object region.
///
/// Suited to sequences where the object fills the frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullFrameDetector;

impl ObjectDetector for FullFrameDetector {
    fn detect(&self, frame: &Frame) -> Result<Option<BoundingBox>, LocalizationError> {
        let (w, h) = frame.size();
        Ok(Some(BoundingBox::full(w, h)))
    }
}

/// Detector replaying boxes exported to `<seq>/detections/<stem>.txt` as `x0 y0 x1 y1`.
#[derive(Debug, Clone)]
pub struct BoxFileDetector {
    layout: SequenceLayout,
}

impl BoxFileDetector {
    /// Detector for the given sequence.
    pub fn new(layout: SequenceLayout) -> Self {
        Self { layout }
    }
}

impl ObjectDetector for BoxFileDetector {
    fn detect(&self, frame: &Frame) -> Result<Option<BoundingBox>, LocalizationError> {
        let path = self.layout.detection_path(&frame.name);
        if !path.exists() {
            return Ok(None);
        }
        let rows = read_matrix_txt(&path)?;
        match rows.first().map(Vec::as_slice) {
            None => Ok(None),
            Some(&[x0, y0, x1, y1]) if x1 > x0 && y1 > y0 => {
                Ok(Some(BoundingBox::new(x0, y0, x1, y1)))
            }
            Some(&[_, _, _, _]) => Ok(None),
            Some(row) => Err(IoError::InvalidShape {
                path,
                expected: "1x4",
                rows: rows.len(),
                cols: row.len(),
            }
            .into()),
        }
    }
}

/// Which localizer drives the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalizerKind {
    /// Detect or reproject on full frames and crop at runtime.
    Box,
    /// Use the dataset's pre-cropped frames and crop intrinsics.
    Precropped,
}

/// Which detector feeds the box localizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Local feature matching against reference views of the object.
    Features,
    /// The whole frame.
    FullFrame,
    /// Boxes exported per frame.
    BoxFile,
}

/// Localizer parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizerConfig {
    /// Localizer implementation.
    pub kind: LocalizerKind,
    /// Detector used for fresh detections.
    pub detector: DetectorKind,
    /// Parameters of the feature-matching detector.
    pub feature_detector: FeatureDetectorConfig,
    /// Side of the square working resolution.
    pub crop_size: u32,
    /// Fraction of the box size added around the region.
    pub padding: f64,
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            kind: LocalizerKind::Precropped,
            detector: DetectorKind::Features,
            feature_detector: FeatureDetectorConfig::default(),
            crop_size: 512,
            padding: 0.0,
        }
    }
}

/// Localizer for full frames: detector boxes or reprojected 3D boxes, cropped and resized.
pub struct BoxLocalizer<D> {
    detector: D,
    intrinsics: Intrinsics,
    bbox3d: [DVec3; 8],
    crop_size: u32,
    padding: f64,
    save_dir: Option<PathBuf>,
}

impl<D: ObjectDetector> BoxLocalizer<D> {
    /// Create the localizer from the full-frame intrinsics and the object's 3D box.
    pub fn new(
        detector: D,
        intrinsics: Intrinsics,
        bbox3d: [DVec3; 8],
        config: &LocalizerConfig,
    ) -> Self {
        Self {
            detector,
            intrinsics,
            bbox3d,
            crop_size: config.crop_size,
            padding: config.padding,
            save_dir: None,
        }
    }

    /// Save every fresh detection crop as `<dir>/<frame index>.png`.
    pub fn with_detection_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    fn crop(
        &self,
        frame: &Frame,
        bbox: BoundingBox,
        strategy: LocalizationStrategy,
    ) -> Result<Localization, LocalizationError> {
        let (w, h) = frame.size();
        let bbox = bbox.pad(self.padding);
        let (x, y, cw, ch) = bbox
            .clip_to_pixels(w, h)
            .ok_or(LocalizationError::OutOfFrame { frame: frame.index })?;

        let cropped = imageops::crop_imm(&frame.image, x, y, cw, ch).to_image();
        let crop = imageops::resize(
            &cropped,
            self.crop_size,
            self.crop_size,
            imageops::FilterType::Triangle,
        );

        let transform = CropTransform {
            offset: DVec2::new(x as f64, y as f64),
            scale: DVec2::new(
                self.crop_size as f64 / cw as f64,
                self.crop_size as f64 / ch as f64,
            ),
        };

        Ok(Localization {
            strategy,
            bbox,
            crop,
            intrinsics: self
                .intrinsics
                .crop_and_resize(transform.offset, transform.scale),
            transform,
        })
    }
}

fn save_crop(dir: &Path, index: usize, crop: &RgbImage) {
    let path = dir.join(format!("{index}.png"));
    if let Err(e) = crop.save(&path) {
        log::warn!("failed to save detection crop {}: {e}", path.display());
    }
}

impl<D: ObjectDetector> Localizer for BoxLocalizer<D> {
    fn detect(&self, frame: &Frame) -> Result<Localization, LocalizationError> {
        let bbox = self
            .detector
            .detect(frame)?
            .ok_or(LocalizationError::NothingDetected { frame: frame.index })?;
        let localization = self.crop(frame, bbox, LocalizationStrategy::Detect)?;
        if let Some(dir) = &self.save_dir {
            save_crop(dir, frame.index, &localization.crop);
        }
        Ok(localization)
    }

    fn track(&self, frame: &Frame, previous: &Pose) -> Result<Localization, LocalizationError> {
        let corners = self
            .bbox3d
            .iter()
            .map(|&p| self.intrinsics.project(previous.transform_point(p)))
            .collect::<Option<Vec<_>>>()
            .ok_or(LocalizationError::BehindCamera { frame: frame.index })?;
        let bbox = BoundingBox::from_points(corners)
            .ok_or(LocalizationError::OutOfFrame { frame: frame.index })?;
        self.crop(frame, bbox, LocalizationStrategy::Track)
    }
}

/// Localizer for frames that are already cropped around the object.
///
/// Both strategies return the frame itself with its crop intrinsics.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrecroppedLocalizer;

impl PrecroppedLocalizer {
    fn passthrough(
        frame: &Frame,
        strategy: LocalizationStrategy,
    ) -> Result<Localization, LocalizationError> {
        let intrinsics = frame
            .crop_intrinsics
            .ok_or(LocalizationError::MissingCropIntrinsics { frame: frame.index })?;
        let (w, h) = frame.size();
        Ok(Localization {
            strategy,
            bbox: BoundingBox::full(w, h),
            crop: frame.image.clone(),
            intrinsics,
            transform: CropTransform::IDENTITY,
        })
    }
}

impl Localizer for PrecroppedLocalizer {
    fn detect(&self, frame: &Frame) -> Result<Localization, LocalizationError> {
        Self::passthrough(frame, LocalizationStrategy::Detect)
    }

    fn track(&self, frame: &Frame, _previous: &Pose) -> Result<Localization, LocalizationError> {
        Self::passthrough(frame, LocalizationStrategy::Track)
    }
}
