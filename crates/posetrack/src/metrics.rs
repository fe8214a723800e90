//! Pose error metrics and their NaN-aware aggregation.

use serde::{Deserialize, Serialize};

use crate::pose::Pose;

/// Unit of the translation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LengthUnit {
    /// Meters, the unit of the model.
    #[serde(rename = "m")]
    Meter,
    /// Centimeters.
    #[serde(rename = "cm")]
    Centimeter,
    /// Millimeters.
    #[serde(rename = "mm")]
    Millimeter,
}

impl LengthUnit {
    /// Factor converting meters into this unit.
    pub fn from_meters(self) -> f64 {
        match self {
            LengthUnit::Meter => 1.0,
            LengthUnit::Centimeter => 100.0,
            LengthUnit::Millimeter => 1000.0,
        }
    }
}

/// Rotation and translation error between a predicted and a ground-truth pose.
///
/// The rotation error is the angle of `R_pred · R_gtᵀ` in degrees, within
/// `[0, 180]`. The translation error is the Euclidean distance between the
/// translations in `unit`. Both are NaN when either pose is missing.
pub fn pose_error(
    predicted: Option<&Pose>,
    ground_truth: Option<&Pose>,
    unit: LengthUnit,
) -> (f64, f64) {
    let (Some(pred), Some(gt)) = (predicted, ground_truth) else {
        return (f64::NAN, f64::NAN);
    };

    let translation = (pred.translation - gt.translation).length() * unit.from_meters();

    let r = pred.rotation * gt.rotation.transpose();
    let trace = r.x_axis.x + r.y_axis.y + r.z_axis.z;
    let cos = ((trace - 1.0) / 2.0).clamp(-1.0, 1.0);
    let rotation = cos.acos().to_degrees();

    (rotation, translation)
}

/// Errors of one frame; NaN fields mark frames without a pose or ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Index of the frame in the sequence.
    pub frame_index: usize,
    /// Rotation error in degrees.
    #[serde(with = "nan_as_null")]
    pub rotation_deg: f64,
    /// Translation error in centimeters.
    #[serde(with = "nan_as_null")]
    pub translation_cm: f64,
}

impl ErrorRecord {
    /// Compute the record of a frame.
    pub fn new(frame_index: usize, predicted: Option<&Pose>, ground_truth: Option<&Pose>) -> Self {
        let (rotation_deg, translation_cm) =
            pose_error(predicted, ground_truth, LengthUnit::Centimeter);
        Self {
            frame_index,
            rotation_deg,
            translation_cm,
        }
    }

    /// Record with both errors unavailable.
    pub fn missing(frame_index: usize) -> Self {
        Self {
            frame_index,
            rotation_deg: f64::NAN,
            translation_cm: f64::NAN,
        }
    }

    /// Whether both errors are available.
    pub fn is_valid(&self) -> bool {
        !self.rotation_deg.is_nan() && !self.translation_cm.is_nan()
    }
}

// JSON has no NaN, missing values are written as null.
pub(crate) mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_nan() {
            s.serialize_none()
        } else {
            s.serialize_some(v)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NAN))
    }
}

/// Mean over the non-NaN values, NaN when there are none.
pub fn nanmean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Threshold pairs `(degrees, centimeters)` reported for every sequence.
pub const ACCURACY_THRESHOLDS: [(f64, f64); 3] = [(5.0, 5.0), (3.0, 3.0), (1.0, 1.0)];

/// Fraction of valid records with rotation < `max_deg` and translation < `max_cm`.
///
/// Records with NaN fields are excluded from both numerator and denominator.
/// Returns NaN when no record is valid.
pub fn threshold_accuracy(records: &[ErrorRecord], max_deg: f64, max_cm: f64) -> f64 {
    let valid = records.iter().filter(|r| r.is_valid());
    let (hits, total) = valid.fold((0usize, 0usize), |(h, t), r| {
        let hit = r.rotation_deg < max_deg && r.translation_cm < max_cm;
        (h + usize::from(hit), t + 1)
    });
    if total == 0 {
        f64::NAN
    } else {
        hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::{DMat3, DVec3};

    #[test]
    fn test_pose_error_identical_is_zero() {
        let pose = Pose::new(DMat3::from_rotation_y(0.7), DVec3::new(0.1, 0.0, 0.6));
        let (r, t) = pose_error(Some(&pose), Some(&pose), LengthUnit::Centimeter);
        assert_relative_eq!(r, 0.0, epsilon = 1e-4);
        assert_relative_eq!(t, 0.0);
    }

    #[test]
    fn test_pose_error_known_offsets() {
        let gt = Pose::new(DMat3::IDENTITY, DVec3::new(0.0, 0.0, 0.5));
        let pred = Pose::new(
            DMat3::from_rotation_z(10f64.to_radians()),
            DVec3::new(0.03, 0.04, 0.5),
        );
        let (r, t) = pose_error(Some(&pred), Some(&gt), LengthUnit::Centimeter);
        assert_relative_eq!(r, 10.0, epsilon = 1e-9);
        assert_relative_eq!(t, 5.0, epsilon = 1e-9);

        let (_, t_mm) = pose_error(Some(&pred), Some(&gt), LengthUnit::Millimeter);
        assert_relative_eq!(t_mm, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pose_error_range_and_missing() {
        let gt = Pose::IDENTITY;
        let flipped = Pose::new(DMat3::from_rotation_x(std::f64::consts::PI), DVec3::ZERO);
        let (r, _) = pose_error(Some(&flipped), Some(&gt), LengthUnit::Meter);
        assert!((0.0..=180.0).contains(&r));
        assert_relative_eq!(r, 180.0, epsilon = 1e-4);

        let (r, t) = pose_error(None, Some(&gt), LengthUnit::Meter);
        assert!(r.is_nan() && t.is_nan());
        let (r, t) = pose_error(Some(&gt), None, LengthUnit::Meter);
        assert!(r.is_nan() && t.is_nan());
    }

    #[test]
    fn test_nanmean() {
        assert_relative_eq!(nanmean([1.0, f64::NAN, 3.0]), 2.0);
        assert!(nanmean([f64::NAN, f64::NAN]).is_nan());
        assert!(nanmean(std::iter::empty()).is_nan());
    }

    #[test]
    fn test_threshold_accuracy_is_monotone() {
        let records = [
            ErrorRecord { frame_index: 0, rotation_deg: 0.5, translation_cm: 0.5 },
            ErrorRecord { frame_index: 1, rotation_deg: 2.0, translation_cm: 0.2 },
            ErrorRecord { frame_index: 2, rotation_deg: 4.0, translation_cm: 4.5 },
            ErrorRecord { frame_index: 3, rotation_deg: 40.0, translation_cm: 1.0 },
            ErrorRecord::missing(4),
        ];
        let acc = ACCURACY_THRESHOLDS
            .iter()
            .map(|&(d, c)| threshold_accuracy(&records, d, c))
            .collect::<Vec<_>>();
        assert_relative_eq!(acc[0], 0.75);
        assert_relative_eq!(acc[1], 0.5);
        assert_relative_eq!(acc[2], 0.25);
        assert!(acc[0] >= acc[1] && acc[1] >= acc[2]);
        assert!(threshold_accuracy(&[ErrorRecord::missing(0)], 5.0, 5.0).is_nan());
    }

    #[test]
    fn test_error_record_json_null() -> Result<(), serde_json::Error> {
        let json = serde_json::to_string(&ErrorRecord::missing(3))?;
        assert_eq!(
            json,
            r#"{"frame_index":3,"rotation_deg":null,"translation_cm":null}"#
        );
        let back: ErrorRecord = serde_json::from_str(&json)?;
        assert!(!back.is_valid());
        Ok(())
    }
}
