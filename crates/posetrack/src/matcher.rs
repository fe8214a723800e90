use glam::DVec2;

use crate::{
    correspondence::{CorrespondenceSet, MismatchedCorrespondences},
    frame::Frame,
    io::{colmap::SparseModel, dataset::SequenceLayout, text::read_matrix_txt, IoError},
    localizer::Localization,
};

/// Error types for the matcher module.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// Reading the exported matches failed.
    #[error(transparent)]
    Io(#[from] IoError),

    /// A matcher produced sides of different length.
    #[error(transparent)]
    Mismatched(#[from] MismatchedCorrespondences),
}

/// Produces 2D-3D correspondences between a crop and the sparse model.
pub trait Matcher: Send + Sync {
    /// Match the crop of `frame` against `model`.
    ///
    /// Image points are returned in crop pixels.
    fn match_crop(
        &self,
        frame: &Frame,
        localization: &Localization,
        model: &SparseModel,
    ) -> Result<CorrespondenceSet, MatchError>;
}

impl<T: Matcher + ?Sized> Matcher for Box<T> {
    fn match_crop(
        &self,
        frame: &Frame,
        localization: &Localization,
        model: &SparseModel,
    ) -> Result<CorrespondenceSet, MatchError> {
        (**self).match_crop(frame, localization, model)
    }
}

/// Replays matches exported by the network to `<seq>/matches/<stem>.txt`.
///
/// Each row is `u v point3d_id` in frame pixels. Rows are mapped into the
/// crop, and rows landing outside it or naming an unknown model point are
/// dropped. A frame without a file has no correspondences.
#[derive(Debug, Clone)]
pub struct PrecomputedMatcher {
    layout: SequenceLayout,
}

impl PrecomputedMatcher {
    /// Matcher for the given sequence.
    pub fn new(layout: SequenceLayout) -> Self {
        Self { layout }
    }
}

impl Matcher for PrecomputedMatcher {
    fn match_crop(
        &self,
        frame: &Frame,
        localization: &Localization,
        model: &SparseModel,
    ) -> Result<CorrespondenceSet, MatchError> {
        let path = self.layout.matches_path(&frame.name);
        if !path.exists() {
            log::debug!("no matches for frame {} at {}", frame.index, path.display());
            return Ok(CorrespondenceSet::default());
        }

        let rows = read_matrix_txt(&path)?;
        let (crop_w, crop_h) = localization.crop.dimensions();

        let mut set = CorrespondenceSet::default();
        for row in &rows {
            let &[u, v, id] = row.as_slice() else {
                return Err(IoError::InvalidShape {
                    path,
                    expected: "Nx3",
                    rows: rows.len(),
                    cols: row.len(),
                }
                .into());
            };
            if id.fract() != 0.0 || !id.is_finite() {
                let message = format!("point id `{id}` is not an integer");
                return Err(IoError::parse(&path, message).into());
            }
            let uv = localization.transform.apply(DVec2::new(u, v));
            let inside = uv.x >= 0.0 && uv.y >= 0.0 && uv.x < crop_w as f64 && uv.y < crop_h as f64;
            if !inside || id < 0.0 {
                continue;
            }
            if let Some(xyz) = model.get(id as u64) {
                set.push(uv, xyz);
            }
        }

        log::trace!(
            "frame {}: {} of {} exported matches usable",
            frame.index,
            set.len(),
            rows.len()
        );

        Ok(set)
    }
}
