//! Binary local features: FAST corners with oriented BRIEF descriptors.
//!
//! Corners are detected on the gray image with the 16-pixel Bresenham circle
//! test, thinned with a 3x3 non-maximum suppression and oriented with the
//! intensity centroid of a circular patch. Descriptors compare 256 fixed
//! pixel pairs rotated by that orientation on a blurred copy of the image.

use glam::DVec2;
use image::{imageops, GrayImage, RgbImage};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Number of bytes of a descriptor.
pub const DESCRIPTOR_BYTES: usize = 32;

/// 256-bit binary descriptor.
pub type Descriptor = [u8; DESCRIPTOR_BYTES];

// radius of the orientation patch; descriptor pairs lie inside it as well
const PATCH_RADIUS: i32 = 15;
const PATTERN_RADIUS: f64 = 13.0;
const PATTERN_SEED: u64 = 0x0b71_ef00;

// keypoints closer to the border than this are dropped
const BORDER: i32 = PATCH_RADIUS + 9;

const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Parameters of the feature extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Intensity difference for a circle pixel to count as brighter or darker.
    pub fast_threshold: u8,
    /// Contiguous circle pixels needed for a corner.
    pub arc_length: usize,
    /// Strongest corners kept per image.
    pub max_features: usize,
    /// Gaussian blur applied before sampling descriptors.
    pub blur_sigma: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            fast_threshold: 20,
            arc_length: 9,
            max_features: 1000,
            blur_sigma: 1.2,
        }
    }
}

/// A detected corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// Pixel position.
    pub position: DVec2,
    /// Orientation in radians.
    pub angle: f64,
    /// FAST score, the summed contrast of the circle pixels past the threshold.
    pub score: u32,
}

/// Keypoints of one image with one descriptor each.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    /// Detected keypoints, strongest first.
    pub keypoints: Vec<Keypoint>,
    /// Descriptor of each keypoint.
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    /// Number of features.
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    /// Whether no feature was found.
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// FAST detector with oriented BRIEF descriptors.
#[derive(Debug, Clone)]
pub struct OrbExtractor {
    config: FeatureConfig,
    pattern: Vec<(DVec2, DVec2)>,
}

impl OrbExtractor {
    /// Create the extractor; the sampling pattern is the same for every instance.
    pub fn new(config: FeatureConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let mut sample = || loop {
            let p = DVec2::new(
                rng.random_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
                rng.random_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
            );
            if p.length() <= PATTERN_RADIUS {
                return p;
            }
        };
        let pattern = (0..DESCRIPTOR_BYTES * 8)
            .map(|_| (sample(), sample()))
            .collect();
        Self { config, pattern }
    }

    /// The extractor parameters.
    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Detect and describe the features of a color image.
    pub fn extract(&self, image: &RgbImage) -> FeatureSet {
        self.extract_gray(&imageops::grayscale(image))
    }

    /// Detect and describe the features of a gray image.
    pub fn extract_gray(&self, gray: &GrayImage) -> FeatureSet {
        let mut corners = fast_corners(gray, self.config.fast_threshold, self.config.arc_length);
        corners.sort_by(|a, b| {
            b.2.cmp(&a.2)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.0.cmp(&b.0))
        });
        corners.truncate(self.config.max_features);

        let smooth = if self.config.blur_sigma > 0.0 {
            imageops::blur(gray, self.config.blur_sigma)
        } else {
            gray.clone()
        };

        let (keypoints, descriptors): (Vec<_>, Vec<_>) = corners
            .par_iter()
            .map(|&(x, y, score)| {
                let angle = intensity_centroid_angle(&smooth, x, y);
                let keypoint = Keypoint {
                    position: DVec2::new(x as f64, y as f64),
                    angle,
                    score,
                };
                (keypoint, self.describe(&smooth, x, y, angle))
            })
            .unzip();

        FeatureSet {
            keypoints,
            descriptors,
        }
    }

    fn describe(&self, image: &GrayImage, x: i32, y: i32, angle: f64) -> Descriptor {
        let (sin_a, cos_a) = angle.sin_cos();
        let rotate = |p: DVec2| {
            let (px, py) = (
                (cos_a * p.x - sin_a * p.y).round() as i32,
                (sin_a * p.x + cos_a * p.y).round() as i32,
            );
            pixel(image, x + px, y + py)
        };

        let mut descriptor = [0u8; DESCRIPTOR_BYTES];
        for (bit, &(a, b)) in self.pattern.iter().enumerate() {
            if rotate(a) < rotate(b) {
                descriptor[bit / 8] |= 1 << (bit % 8);
            }
        }
        descriptor
    }
}

impl Default for OrbExtractor {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

fn pixel(image: &GrayImage, x: i32, y: i32) -> i32 {
    let (w, h) = image.dimensions();
    let x = x.clamp(0, w as i32 - 1) as u32;
    let y = y.clamp(0, h as i32 - 1) as u32;
    image.get_pixel(x, y).0[0] as i32
}

/// FAST corners `(x, y, score)` after 3x3 non-maximum suppression.
pub fn fast_corners(image: &GrayImage, threshold: u8, arc_length: usize) -> Vec<(i32, i32, u32)> {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w <= 2 * BORDER || h <= 2 * BORDER {
        return Vec::new();
    }

    // scores are computed with a one pixel halo so suppression sees the neighbours
    let (x0, x1, y0, y1) = (BORDER - 1, w - BORDER + 1, BORDER - 1, h - BORDER + 1);
    let stride = (x1 - x0) as usize;
    let scores = (y0..y1)
        .into_par_iter()
        .flat_map_iter(|y| {
            (x0..x1).map(move |x| corner_score(image, x, y, threshold as i32, arc_length))
        })
        .collect::<Vec<u32>>();
    let score_at = |x: i32, y: i32| scores[(y - y0) as usize * stride + (x - x0) as usize];

    let mut corners = Vec::new();
    for y in BORDER..h - BORDER {
        for x in BORDER..w - BORDER {
            let s = score_at(x, y);
            if s == 0 {
                continue;
            }
            // ties go to the first pixel in scan order
            let is_max = (-1..=1).all(|dy| {
                (-1..=1).all(|dx| {
                    let n = score_at(x + dx, y + dy);
                    (dx, dy) == (0, 0) || n < s || (n == s && (dy, dx) > (0, 0))
                })
            });
            if is_max {
                corners.push((x, y, s));
            }
        }
    }
    corners
}

/// Score of a FAST corner at `(x, y)`, zero when the segment test fails.
fn corner_score(image: &GrayImage, x: i32, y: i32, threshold: i32, arc_length: usize) -> u32 {
    let center = pixel(image, x, y);
    let mut ring = [0i32; 16];
    for (v, &(dx, dy)) in ring.iter_mut().zip(CIRCLE.iter()) {
        *v = pixel(image, x + dx, y + dy) - center;
    }

    // quick rejection with the four compass pixels
    let compass = [ring[0], ring[4], ring[8], ring[12]];
    if arc_length >= 9 {
        let brighter = compass.iter().filter(|&&d| d > threshold).count();
        let darker = compass.iter().filter(|&&d| d < -threshold).count();
        if brighter < 2 && darker < 2 {
            return 0;
        }
    }

    let brighter = longest_arc(&ring, |d| d > threshold);
    let darker = longest_arc(&ring, |d| d < -threshold);
    if brighter < arc_length && darker < arc_length {
        return 0;
    }

    let sum = |pred: &dyn Fn(i32) -> bool| -> u32 {
        ring.iter()
            .filter(|&&d| pred(d))
            .map(|&d| (d.abs() - threshold) as u32)
            .sum()
    };
    sum(&|d| d > threshold).max(sum(&|d| d < -threshold))
}

fn longest_arc(ring: &[i32; 16], pred: impl Fn(i32) -> bool) -> usize {
    let mut best = 0;
    let mut run = 0;
    // walk the ring twice so arcs wrapping past the start are counted
    for i in 0..32 {
        if pred(ring[i % 16]) {
            run += 1;
            best = best.max(run);
        } else {
            run = 0;
        }
    }
    best.min(16)
}

fn intensity_centroid_angle(image: &GrayImage, x: i32, y: i32) -> f64 {
    let r2 = PATCH_RADIUS * PATCH_RADIUS;
    let (mut m10, mut m01) = (0i64, 0i64);
    for dy in -PATCH_RADIUS..=PATCH_RADIUS {
        for dx in -PATCH_RADIUS..=PATCH_RADIUS {
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let v = pixel(image, x + dx, y + dy) as i64;
            m10 += dx as i64 * v;
            m01 += dy as i64 * v;
        }
    }
    (m01 as f64).atan2(m10 as f64)
}

/// Hamming distance between two descriptors.
#[inline]
pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Brute-force descriptor matching.
///
/// Returns `(i, j)` pairs into `query` and `train`. A pair is kept when its
/// distance is at most `max_distance`, when it passes the ratio test against
/// the second best candidate (if `max_ratio` is set), and when `j` picks `i`
/// back as its own nearest neighbour (if `cross_check` is set).
pub fn match_descriptors(
    query: &[Descriptor],
    train: &[Descriptor],
    max_distance: u32,
    max_ratio: Option<f32>,
    cross_check: bool,
) -> Vec<(usize, usize)> {
    if query.is_empty() || train.is_empty() {
        return Vec::new();
    }

    let mut best = vec![(u32::MAX, u32::MAX, 0usize); query.len()];
    let mut reverse = vec![(u32::MAX, 0usize); train.len()];
    for (i, q) in query.iter().enumerate() {
        for (j, t) in train.iter().enumerate() {
            let d = hamming_distance(q, t);
            let (first, second, arg) = &mut best[i];
            if d < *first {
                *second = *first;
                *first = d;
                *arg = j;
            } else if d < *second {
                *second = d;
            }
            if d < reverse[j].0 {
                reverse[j] = (d, i);
            }
        }
    }

    let mut matches = Vec::new();
    for (i, &(first, second, j)) in best.iter().enumerate() {
        if first > max_distance {
            continue;
        }
        if let Some(ratio) = max_ratio {
            if second != u32::MAX && first as f32 >= ratio * second as f32 {
                continue;
            }
        }
        if cross_check && reverse[j].1 != i {
            continue;
        }
        matches.push((i, j));
    }
    matches
}
