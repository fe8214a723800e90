use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use glam::DVec3;

use super::IoError;

/// Sparse point cloud of the object, keyed by COLMAP point id.
#[derive(Debug, Clone, Default)]
pub struct SparseModel {
    points: HashMap<u64, DVec3>,
}

impl SparseModel {
    /// Build a model from `(id, xyz)` pairs; later duplicates win.
    pub fn from_points(points: impl IntoIterator<Item = (u64, DVec3)>) -> Self {
        Self {
            points: points.into_iter().collect(),
        }
    }

    /// Coordinates of the point with the given id.
    pub fn get(&self, point3d_id: u64) -> Option<DVec3> {
        self.points.get(&point3d_id).copied()
    }

    /// Number of points in the model.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the model has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Read a COLMAP `points3D.txt` file into a [`SparseModel`].
///
/// Lines follow `POINT3D_ID X Y Z R G B ERROR TRACK[]`. Comment lines
/// starting with `#` are skipped, as are the color, error and track fields.
pub fn read_points3d_txt(path: impl AsRef<Path>) -> Result<SparseModel, IoError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(IoError::FileDoesNotExist(path.to_path_buf()));
    }

    // open the file and create a buffered reader
    let file = File::open(path).map_err(|source| IoError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);

    let points = reader
        .lines()
        .map(|line| {
            line.map_err(|source| IoError::Read {
                path: path.to_path_buf(),
                source,
            })
        })
        .filter(|line| {
            line.as_ref()
                .map(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
                .unwrap_or(true)
        })
        .map(|line| parse_point3d_line(path, &line?))
        .collect::<Result<Vec<_>, _>>()?;

    log::debug!("loaded {} model points from {}", points.len(), path.display());

    Ok(SparseModel::from_points(points))
}

fn parse_point3d_line(path: &Path, line: &str) -> Result<(u64, DVec3), IoError> {
    // split the line into parts by whitespace
    let parts = line.split_whitespace().collect::<Vec<_>>();

    // id, xyz, rgb and error are mandatory, the track may be empty
    if parts.len() < 8 {
        return Err(IoError::parse(
            path,
            format!("invalid number of parts: {}", parts.len()),
        ));
    }

    let id = parts[0]
        .parse::<u64>()
        .map_err(|e| IoError::parse(path, format!("{}: {e}", parts[0])))?;
    let mut xyz = [0.0; 3];
    for (v, s) in xyz.iter_mut().zip(&parts[1..4]) {
        *v = s
            .parse::<f64>()
            .map_err(|e| IoError::parse(path, format!("{s}: {e}")))?;
    }

    Ok((id, DVec3::from_array(xyz)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_points3d_txt() -> Result<(), IoError> {
        let tmp_dir = tempfile::tempdir().expect("tempdir");
        let path = tmp_dir.path().join("points3D.txt");
        std::fs::write(
            &path,
            "# 3D point list with one line of data per point:\n\
             #   POINT3D_ID, X, Y, Z, R, G, B, ERROR, TRACK[] as (IMAGE_ID, POINT2D_IDX)\n\
             # Number of points: 2, mean track length: 1.5\n\
             12 0.1 0.2 0.3 255 0 0 0.5 1 3 2 7\n\
             40 -0.1 0.0 0.25 0 255 0 0.25 4 1\n",
        )
        .expect("write fixture");

        let model = read_points3d_txt(&path)?;
        assert_eq!(model.len(), 2);
        assert_eq!(model.get(12), Some(DVec3::new(0.1, 0.2, 0.3)));
        assert_eq!(model.get(40), Some(DVec3::new(-0.1, 0.0, 0.25)));
        assert_eq!(model.get(13), None);
        Ok(())
    }

    #[test]
    fn test_read_points3d_txt_rejects_short_lines() {
        let tmp_dir = tempfile::tempdir().expect("tempdir");
        let path = tmp_dir.path().join("points3D.txt");
        std::fs::write(&path, "1 0.1 0.2 0.3\n").expect("write fixture");
        assert!(matches!(
            read_points3d_txt(&path),
            Err(IoError::Parse { .. })
        ));
    }
}
