//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face onto the canonical 112x112 ArcFace template using
//! its five landmarks.

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

/// ArcFace reference landmarks for a 112x112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Least-squares similarity transform taking `src` onto `dst`.
///
/// Returns `(a, b, tx, ty)` for the map
/// ```text
/// x' = a*x - b*y + tx
/// y' = b*x + a*y + ty
/// ```
fn estimate_similarity(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> (f32, f32, f32, f32) {
    let n = src.len() as f32;
    let mean = |pts: &[(f32, f32); 5]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (msx, msy) = mean(src);
    let (mdx, mdy) = mean(dst);

    let mut dot = 0.0f32;
    let mut cross = 0.0f32;
    let mut norm = 0.0f32;
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (sx - msx, sy - msy);
        let (dx, dy) = (dx - mdx, dy - mdy);
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
        norm += sx * sx + sy * sy;
    }

    if norm < 1e-12 {
        return (1.0, 0.0, mdx - msx, mdy - msy);
    }

    let a = dot / norm;
    let b = cross / norm;
    (a, b, mdx - (a * msx - b * msy), mdy - (b * msx + a * msy))
}

/// Align a detected face to a canonical 112x112 RGB crop.
///
/// Pixels that fall outside the source frame are black.
pub fn align_face(frame: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let (a, b, tx, ty) = estimate_similarity(landmarks, &REFERENCE_LANDMARKS_112);
    let mut aligned = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);

    match Projection::from_matrix([a, -b, tx, b, a, ty, 0.0, 0.0, 1.0]) {
        Some(projection) => {
            warp_into(frame, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut aligned);
        }
        None => tracing::debug!(?landmarks, "degenerate landmarks; aligned crop left black"),
    }

    aligned
}
