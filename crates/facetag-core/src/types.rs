use serde::{Deserialize, Serialize};
use std::fmt;

/// Label shown for faces that match no enrolled identity.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Pixel dimensions of a frame or display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Map this box (and its landmarks) from `from` pixel space into `to` pixel space.
    ///
    /// Axes scale independently, so a 640x480 source mapped onto a 600x450
    /// display keeps boxes aligned with the stretched video.
    pub fn rescale(&self, from: FrameSize, to: FrameSize) -> BoundingBox {
        if from.width == 0 || from.height == 0 {
            return self.clone();
        }
        let sx = to.width as f32 / from.width as f32;
        let sy = to.height as f32 / from.height as f32;

        BoundingBox {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * sx, ly * sy))),
        }
    }
}

/// Face descriptor: a fixed-length embedding (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two descriptors of equal dimension.
    ///
    /// Callers are responsible for checking dimensions; extra trailing
    /// components of the longer vector are ignored.
    pub fn distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face located in a frame, in that frame's pixel coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub descriptor: Descriptor,
}

/// Descriptors enrolled under one identity label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledDescriptorSet {
    pub label: String,
    pub descriptors: Vec<Descriptor>,
}

impl LabeledDescriptorSet {
    pub fn new(label: impl Into<String>, descriptors: Vec<Descriptor>) -> Self {
        Self {
            label: label.into(),
            descriptors,
        }
    }
}

/// Closest enrolled identity for a query descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    /// Matched label, or `None` when nothing is within the threshold.
    pub label: Option<String>,
    /// Distance to the closest reference; infinite when the gallery is empty.
    pub distance: f32,
}

impl BestMatch {
    pub fn unknown(distance: f32) -> Self {
        Self {
            label: None,
            distance,
        }
    }

    pub fn is_match(&self) -> bool {
        self.label.is_some()
    }
}

impl fmt::Display for BestMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.label.as_deref().unwrap_or(UNKNOWN_LABEL);
        if self.distance.is_finite() {
            write!(f, "{label} ({:.2})", self.distance)
        } else {
            f.write_str(label)
        }
    }
}

/// A detection's box (display coordinates) paired with its match outcome.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub bbox: BoundingBox,
    pub label: Option<String>,
    pub distance: f32,
    pub matched: bool,
}

impl MatchResult {
    pub fn new(bbox: BoundingBox, best: BestMatch) -> Self {
        Self {
            bbox,
            matched: best.is_match(),
            label: best.label,
            distance: best.distance,
        }
    }

    /// Text drawn next to the box, e.g. `"Messi (0.31)"` or `"unknown (0.74)"`.
    pub fn caption(&self) -> String {
        BestMatch {
            label: self.label.clone(),
            distance: self.distance,
        }
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
            landmarks: None,
        }
    }

    #[test]
    fn test_distance_self_is_zero() {
        let a = Descriptor::new(vec![0.3, -0.2, 0.9]);
        assert_eq!(a.distance(&a), 0.0);
    }

    #[test]
    fn test_distance_symmetric_and_non_negative() {
        let a = Descriptor::new(vec![0.1, 0.5, -0.4]);
        let b = Descriptor::new(vec![-0.7, 0.2, 0.3]);
        let ab = a.distance(&b);
        let ba = b.distance(&a);
        assert!(ab >= 0.0);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_distance_known_value() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_rescale_scales_axes_independently() {
        let b = bbox(64.0, 48.0, 128.0, 96.0);
        let out = b.rescale(FrameSize::new(640, 480), FrameSize::new(320, 120));
        assert!((out.x - 32.0).abs() < 1e-4);
        assert!((out.y - 12.0).abs() < 1e-4);
        assert!((out.width - 64.0).abs() < 1e-4);
        assert!((out.height - 24.0).abs() < 1e-4);
        assert_eq!(out.confidence, b.confidence);
    }

    #[test]
    fn test_rescale_moves_landmarks() {
        let mut b = bbox(0.0, 0.0, 10.0, 10.0);
        b.landmarks = Some([(10.0, 20.0); 5]);
        let out = b.rescale(FrameSize::new(100, 100), FrameSize::new(200, 50));
        assert_eq!(out.landmarks, Some([(20.0, 10.0); 5]));
    }

    #[test]
    fn test_rescale_zero_source_is_identity() {
        let b = bbox(1.0, 2.0, 3.0, 4.0);
        assert_eq!(b.rescale(FrameSize::new(0, 0), FrameSize::new(600, 450)), b);
    }

    #[test]
    fn test_caption_formats() {
        let matched = MatchResult::new(
            bbox(0.0, 0.0, 1.0, 1.0),
            BestMatch {
                label: Some("Messi".into()),
                distance: 0.314,
            },
        );
        assert!(matched.matched);
        assert_eq!(matched.caption(), "Messi (0.31)");

        let far = MatchResult::new(bbox(0.0, 0.0, 1.0, 1.0), BestMatch::unknown(0.741));
        assert!(!far.matched);
        assert_eq!(far.caption(), "unknown (0.74)");

        let empty = MatchResult::new(bbox(0.0, 0.0, 1.0, 1.0), BestMatch::unknown(f32::INFINITY));
        assert_eq!(empty.caption(), "unknown");
    }
}
