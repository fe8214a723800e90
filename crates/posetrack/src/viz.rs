use glam::DVec3;
use image::RgbImage;

use crate::pose::{Intrinsics, Pose};

/// Color of the ground-truth box.
pub const GT_COLOR: [u8; 3] = [0, 255, 0];

/// Color of the predicted box.
pub const PRED_COLOR: [u8; 3] = [0, 0, 255];

/// Box edges as corner index pairs: two faces in cyclic order, then the pillars.
pub const BOX_EDGES: [(usize, usize); 12] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 0),
    (4, 5),
    (5, 6),
    (6, 7),
    (7, 4),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

#[inline]
fn set_pixel(img: &mut RgbImage, x: i64, y: i64, color: [u8; 3]) {
    if x >= 0 && y >= 0 && x < img.width() as i64 && y < img.height() as i64 {
        img.put_pixel(x as u32, y as u32, image::Rgb(color));
    }
}

/// Draws a line inplace using Bresenham's algorithm; pixels outside the image are skipped.
///
/// A `thickness` above one paints a square of that side around each point.
pub fn draw_line(
    img: &mut RgbImage,
    p0: (i64, i64),
    p1: (i64, i64),
    color: [u8; 3],
    thickness: usize,
) {
    let (mut x0, mut y0) = p0;
    let (x1, y1) = p1;

    let dx = (x1 - x0).abs();
    let dy = (y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx - dy;

    let half = (thickness.max(1) as i64 - 1) / 2;

    loop {
        for i in -half..=half {
            for j in -half..=half {
                set_pixel(img, x0 + i, y0 + j, color);
            }
        }

        if x0 == x1 && y0 == y1 {
            break;
        }

        let e2 = 2 * err;
        if e2 > -dy {
            err -= dy;
            x0 += sx;
        }
        if e2 < dx {
            err += dx;
            y0 += sy;
        }
    }
}

/// Project the 3D box with `pose` and draw its edges.
///
/// Nothing is drawn when a corner lies behind the camera.
pub fn draw_box3d(
    img: &mut RgbImage,
    bbox3d: &[DVec3; 8],
    pose: &Pose,
    intrinsics: &Intrinsics,
    color: [u8; 3],
) -> bool {
    let mut corners = [(0i64, 0i64); 8];
    for (c, p) in corners.iter_mut().zip(bbox3d) {
        let Some(uv) = intrinsics.project(pose.transform_point(*p)) else {
            return false;
        };
        *c = (uv.x.round() as i64, uv.y.round() as i64);
    }

    for &(a, b) in BOX_EDGES.iter() {
        draw_line(img, corners[a], corners[b], color, 2);
    }
    true
}

/// Render a frame with the ground-truth box in green and the predicted box in blue.
pub fn render_poses(
    image: &RgbImage,
    bbox3d: &[DVec3; 8],
    intrinsics: &Intrinsics,
    ground_truth: Option<&Pose>,
    predicted: Option<&Pose>,
) -> RgbImage {
    let mut canvas = image.clone();
    if let Some(gt) = ground_truth {
        draw_box3d(&mut canvas, bbox3d, gt, intrinsics, GT_COLOR);
    }
    if let Some(pred) = predicted {
        draw_box3d(&mut canvas, bbox3d, pred, intrinsics, PRED_COLOR);
    }
    canvas
}
