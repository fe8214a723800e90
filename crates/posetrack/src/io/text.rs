use std::path::Path;

use glam::DVec3;

use super::IoError;
use crate::pose::{Intrinsics, Pose};

fn read_to_string(path: &Path) -> Result<String, IoError> {
    if !path.exists() {
        return Err(IoError::FileDoesNotExist(path.to_path_buf()));
    }
    std::fs::read_to_string(path).map_err(|source| IoError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_part(path: &Path, s: &str) -> Result<f64, IoError> {
    s.parse::<f64>()
        .map_err(|e| IoError::parse(path, format!("{s}: {e}")))
}

/// Read a whitespace separated matrix of floats.
///
/// Empty lines and lines starting with `#` are skipped. Rows may differ in
/// length; shape validation is left to the caller.
pub fn read_matrix_txt(path: impl AsRef<Path>) -> Result<Vec<Vec<f64>>, IoError> {
    let path = path.as_ref();
    let content = read_to_string(path)?;

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.split(|c: char| c.is_whitespace() || c == ',')
                .filter(|s| !s.is_empty())
                .map(|s| parse_part(path, s))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect()
}

fn check_shape(
    path: &Path,
    m: &[Vec<f64>],
    rows: &[usize],
    cols: usize,
    expected: &'static str,
) -> Result<(), IoError> {
    if !rows.contains(&m.len()) || m.iter().any(|row| row.len() != cols) {
        return Err(IoError::InvalidShape {
            path: path.to_path_buf(),
            expected,
            rows: m.len(),
            cols: m.first().map_or(0, Vec::len),
        });
    }
    Ok(())
}

/// Read camera intrinsics.
///
/// Two layouts are accepted: a 3×3 matrix, or the key-value form with one
/// `fx: <value>` line per parameter (`fx`, `fy`, `cx`, `cy`).
pub fn read_intrinsics_txt(path: impl AsRef<Path>) -> Result<Intrinsics, IoError> {
    let path = path.as_ref();
    let content = read_to_string(path)?;

    if content.contains(':') {
        return parse_intrinsics_key_value(path, &content);
    }

    let m = read_matrix_txt(path)?;
    check_shape(path, &m, &[3], 3, "3x3")?;
    Ok(Intrinsics::new(m[0][0], m[1][1], m[0][2], m[1][2]))
}

fn parse_intrinsics_key_value(path: &Path, content: &str) -> Result<Intrinsics, IoError> {
    let (mut fx, mut fy, mut cx, mut cy) = (None, None, None, None);
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((key, value)) = line.split_once(':') else {
            return Err(IoError::parse(path, format!("expected `key: value`, got `{line}`")));
        };
        let value = parse_part(path, value.trim())?;
        match key.trim() {
            "fx" => fx = Some(value),
            "fy" => fy = Some(value),
            "cx" => cx = Some(value),
            "cy" => cy = Some(value),
            other => log::debug!("ignoring intrinsics key {other} in {}", path.display()),
        }
    }

    match (fx, fy, cx, cy) {
        (Some(fx), Some(fy), Some(cx), Some(cy)) => Ok(Intrinsics::new(fx, fy, cx, cy)),
        _ => Err(IoError::parse(path, "missing one of fx, fy, cx, cy")),
    }
}

/// Read a pose stored as a 3×4 `[R | t]` or 4×4 homogeneous matrix.
pub fn read_pose_txt(path: impl AsRef<Path>) -> Result<Pose, IoError> {
    let path = path.as_ref();
    let m = read_matrix_txt(path)?;
    check_shape(path, &m, &[3, 4], 4, "3x4 or 4x4")?;

    let rows = m
        .iter()
        .map(|row| [row[0], row[1], row[2], row[3]])
        .collect::<Vec<_>>();

    Pose::from_rows(&rows).ok_or_else(|| IoError::parse(path, "pose needs three rows"))
}

/// Read the eight corners of the object's 3D bounding box (8×3, meters).
pub fn read_box3d_txt(path: impl AsRef<Path>) -> Result<[DVec3; 8], IoError> {
    let path = path.as_ref();
    let m = read_matrix_txt(path)?;
    check_shape(path, &m, &[8], 3, "8x3")?;

    let mut corners = [DVec3::ZERO; 8];
    for (corner, row) in corners.iter_mut().zip(m.iter()) {
        *corner = DVec3::new(row[0], row[1], row[2]);
    }
    Ok(corners)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).expect("write fixture");
        path
    }

    #[test]
    fn test_read_intrinsics_matrix() -> Result<(), IoError> {
        let tmp_dir = tempfile::tempdir().expect("tempdir");
        let path = write(
            tmp_dir.path(),
            "intrinsics.txt",
            "600.5 0 320\n0 601.5 240\n0 0 1\n",
        );
        let k = read_intrinsics_txt(path)?;
        assert_eq!(k, Intrinsics::new(600.5, 601.5, 320.0, 240.0));
        Ok(())
    }

    #[test]
    fn test_read_intrinsics_key_value() -> Result<(), IoError> {
        let tmp_dir = tempfile::tempdir().expect("tempdir");
        let path = write(
            tmp_dir.path(),
            "intrinsics.txt",
            "fx: 1500.0\nfy: 1499.5\ncx: 960.0\ncy: 720.25\n",
        );
        let k = read_intrinsics_txt(path)?;
        assert_eq!(k, Intrinsics::new(1500.0, 1499.5, 960.0, 720.25));

        let path = write(tmp_dir.path(), "partial.txt", "fx: 1.0\nfy: 1.0\n");
        assert!(matches!(
            read_intrinsics_txt(path),
            Err(IoError::Parse { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_read_pose_3x4_and_4x4() -> Result<(), IoError> {
        let tmp_dir = tempfile::tempdir().expect("tempdir");
        let p34 = write(
            tmp_dir.path(),
            "a.txt",
            "1 0 0 0.1\n0 1 0 0.2\n0 0 1 0.3\n",
        );
        let p44 = write(
            tmp_dir.path(),
            "b.txt",
            "1 0 0 0.1\n0 1 0 0.2\n0 0 1 0.3\n0 0 0 1\n",
        );
        let a = read_pose_txt(p34)?;
        let b = read_pose_txt(p44)?;
        assert_eq!(a, b);
        assert_relative_eq!(a.translation.z, 0.3);

        let bad = write(tmp_dir.path(), "c.txt", "1 0 0\n0 1 0\n0 0 1\n");
        assert!(matches!(
            read_pose_txt(bad),
            Err(IoError::InvalidShape { rows: 3, cols: 3, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_read_box3d() -> Result<(), IoError> {
        let tmp_dir = tempfile::tempdir().expect("tempdir");
        let mut content = String::new();
        for i in 0..8 {
            content.push_str(&format!("{} {} {}\n", i, -i, 0.5 * i as f64));
        }
        let path = write(tmp_dir.path(), "box3d_corners.txt", &content);
        let corners = read_box3d_txt(path)?;
        assert_eq!(corners[7], DVec3::new(7.0, -7.0, 3.5));

        let missing = tmp_dir.path().join("nope.txt");
        assert!(matches!(
            read_box3d_txt(missing),
            Err(IoError::FileDoesNotExist(_))
        ));
        Ok(())
    }
}
