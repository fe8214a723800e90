//! Object detection by 2D local feature matching against reference views.
//!
//! Each reference view is an image of the object alone, cropped to the
//! object's extent. A frame is matched against every view; the view with the
//! largest homography consensus wins and its image rectangle, mapped into the
//! frame, becomes the detection.

use std::{cmp::Reverse, path::Path};

use glam::DVec2;
use image::RgbImage;
use rand::{rngs::StdRng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    features::{match_descriptors, FeatureConfig, FeatureSet, OrbExtractor},
    frame::Frame,
    homography::{find_homography_ransac, transfer, HomographyParams},
    io::{dataset::list_images, IoError},
    localizer::{BoundingBox, LocalizationError, ObjectDetector},
};

/// Parameters of the feature-matching detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureDetectorConfig {
    /// Keypoint and descriptor extraction.
    pub features: FeatureConfig,
    /// Largest Hamming distance of an accepted match.
    pub max_hamming: u32,
    /// Ratio test between the best and second best match.
    pub max_ratio: f32,
    /// Keep only mutual nearest neighbours.
    pub cross_check: bool,
    /// Robust homography fit.
    pub homography: HomographyParams,
    /// Homography inliers needed to accept a detection.
    pub min_inliers: usize,
    /// Seed of the homography sampler, random when unset.
    pub random_seed: Option<u64>,
}

impl Default for FeatureDetectorConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            max_hamming: 64,
            max_ratio: 0.8,
            cross_check: true,
            homography: HomographyParams::default(),
            min_inliers: 12,
            random_seed: None,
        }
    }
}

struct ReferenceView {
    name: String,
    width: u32,
    height: u32,
    features: FeatureSet,
}

/// Detector matching frames against reference views of the object.
pub struct FeatureObjectDetector {
    extractor: OrbExtractor,
    references: Vec<ReferenceView>,
    config: FeatureDetectorConfig,
}

impl FeatureObjectDetector {
    /// Build the detector from named reference views.
    pub fn new<I>(references: I, config: &FeatureDetectorConfig) -> Self
    where
        I: IntoIterator<Item = (String, RgbImage)>,
    {
        let extractor = OrbExtractor::new(config.features.clone());
        let references = references
            .into_iter()
            .map(|(name, image)| {
                let features = extractor.extract(&image);
                log::debug!("reference view {name}: {} features", features.len());
                ReferenceView {
                    name,
                    width: image.width(),
                    height: image.height(),
                    features,
                }
            })
            .collect();
        Self {
            extractor,
            references,
            config: config.clone(),
        }
    }

    /// Load every image of `dir` as a reference view.
    pub fn from_dir(dir: impl AsRef<Path>, config: &FeatureDetectorConfig) -> Result<Self, IoError> {
        let mut views = Vec::new();
        for path in list_images(dir)? {
            let image = image::open(&path)
                .map_err(|source| IoError::Image {
                    path: path.clone(),
                    source,
                })?
                .to_rgb8();
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            views.push((name, image));
        }
        Ok(Self::new(views, config))
    }

    /// Number of reference views.
    pub fn num_references(&self) -> usize {
        self.references.len()
    }

    fn rng(&self, salt: u64) -> StdRng {
        match self.config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(salt)),
            None => StdRng::from_os_rng(),
        }
    }

    /// Box of `reference` in the frame and its inlier count.
    fn locate_reference(
        &self,
        reference: &ReferenceView,
        query: &FeatureSet,
        rng: &mut StdRng,
    ) -> Option<(BoundingBox, usize)> {
        let min_inliers = self.config.min_inliers.max(4);
        let matches = match_descriptors(
            &reference.features.descriptors,
            &query.descriptors,
            self.config.max_hamming,
            Some(self.config.max_ratio),
            self.config.cross_check,
        );
        if matches.len() < min_inliers {
            log::trace!("reference {}: only {} matches", reference.name, matches.len());
            return None;
        }

        let src = matches
            .iter()
            .map(|&(i, _)| reference.features.keypoints[i].position)
            .collect::<Vec<_>>();
        let dst = matches
            .iter()
            .map(|&(_, j)| query.keypoints[j].position)
            .collect::<Vec<_>>();
        let fit = find_homography_ransac(&src, &dst, &self.config.homography, rng)?;
        if fit.inliers.len() < min_inliers {
            log::trace!(
                "reference {}: {} of {} matches consistent",
                reference.name,
                fit.inliers.len(),
                matches.len()
            );
            return None;
        }

        let (w, h) = (reference.width as f64, reference.height as f64);
        let corners = [
            DVec2::ZERO,
            DVec2::new(w, 0.0),
            DVec2::new(w, h),
            DVec2::new(0.0, h),
        ]
        .into_iter()
        .map(|c| transfer(&fit.homography, c))
        .collect::<Option<Vec<_>>>()?;
        let bbox = BoundingBox::from_points(corners)?;
        (bbox.width() >= 1.0 && bbox.height() >= 1.0).then_some((bbox, fit.inliers.len()))
    }
}

impl ObjectDetector for FeatureObjectDetector {
    fn detect(&self, frame: &Frame) -> Result<Option<BoundingBox>, LocalizationError> {
        let query = self.extractor.extract(&frame.image);
        if query.len() < 4 {
            log::debug!("frame {}: {} features, nothing to match", frame.index, query.len());
            return Ok(None);
        }

        let best = self
            .references
            .par_iter()
            .enumerate()
            .filter_map(|(i, reference)| {
                let mut rng = self.rng(((frame.index as u64) << 16) ^ i as u64);
                self.locate_reference(reference, &query, &mut rng)
                    .map(|(bbox, inliers)| (i, bbox, inliers))
            })
            .max_by_key(|&(i, _, inliers)| (inliers, Reverse(i)));

        Ok(best.map(|(i, bbox, inliers)| {
            log::debug!(
                "frame {}: detected with reference {} ({inliers} inliers)",
                frame.index,
                self.references[i].name
            );
            bbox
        }))
    }
}
