use std::path::PathBuf;

use image::RgbImage;

use crate::pose::{Intrinsics, Pose};

/// One image of a sequence together with its per-frame metadata.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position of the frame in the sequence, starting at zero.
    pub index: usize,
    /// File stem shared by the image and its side files.
    pub name: String,
    /// Path of the image on disk.
    pub path: PathBuf,
    /// Decoded RGB image.
    pub image: RgbImage,
    /// Intrinsics of an already cropped image, when the dataset provides them.
    pub crop_intrinsics: Option<Intrinsics>,
    /// Ground-truth pose, used for evaluation only.
    pub pose_gt: Option<Pose>,
}

impl Frame {
    /// Image width and height in pixels.
    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
