use crate::gallery::Gallery;
use crate::types::{BestMatch, Descriptor};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("query descriptor has dimension {actual}, gallery uses {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// How distances to a label's several references collapse into one score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchStrategy {
    /// Closest single reference across the whole gallery.
    #[default]
    Nearest,
    /// Mean distance to each label's references; closest label wins.
    MeanPerLabel,
}

impl std::str::FromStr for MatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "mean" | "mean-per-label" => Ok(Self::MeanPerLabel),
            other => Err(format!("unknown match strategy: {other}")),
        }
    }
}

/// Nearest-identity lookup against a fixed gallery.
///
/// A candidate matches only when its distance is strictly below the
/// threshold; a distance equal to the threshold is reported as unknown.
/// On equal distances the entry listed first in the gallery wins.
#[derive(Debug, Clone)]
pub struct FaceMatcher {
    gallery: Gallery,
    threshold: f32,
    strategy: MatchStrategy,
}

impl FaceMatcher {
    pub fn new(gallery: Gallery, threshold: f32) -> Self {
        Self {
            gallery,
            threshold,
            strategy: MatchStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Closest enrolled identity for `query`, or unknown.
    pub fn best_match(&self, query: &Descriptor) -> Result<BestMatch, MatchError> {
        if let Some(expected) = self.gallery.dimension() {
            if query.dimension() != expected {
                return Err(MatchError::DimensionMismatch {
                    expected,
                    actual: query.dimension(),
                });
            }
        }

        let mut best: Option<(&str, f32)> = None;
        for set in self.gallery.sets() {
            let distance = match self.strategy {
                MatchStrategy::Nearest => set
                    .descriptors
                    .iter()
                    .map(|d| query.distance(d))
                    .fold(None, |acc: Option<f32>, d| Some(acc.map_or(d, |a| a.min(d)))),
                MatchStrategy::MeanPerLabel if set.descriptors.is_empty() => None,
                MatchStrategy::MeanPerLabel => Some(
                    set.descriptors.iter().map(|d| query.distance(d)).sum::<f32>()
                        / set.descriptors.len() as f32,
                ),
            };

            if let Some(distance) = distance {
                if best.map_or(true, |(_, b)| distance < b) {
                    best = Some((set.label.as_str(), distance));
                }
            }
        }

        Ok(match best {
            Some((label, distance)) if distance < self.threshold => BestMatch {
                label: Some(label.to_string()),
                distance,
            },
            Some((_, distance)) => BestMatch::unknown(distance),
            None => BestMatch::unknown(f32::INFINITY),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LabeledDescriptorSet;

    fn d(values: &[f32]) -> Descriptor {
        Descriptor::new(values.to_vec())
    }

    fn gallery(sets: &[(&str, &[&[f32]])]) -> Gallery {
        Gallery::new(
            sets.iter()
                .map(|(label, descs)| {
                    LabeledDescriptorSet::new(*label, descs.iter().map(|v| d(v)).collect())
                })
                .collect(),
        )
        .unwrap()
    }

    fn roster() -> Gallery {
        gallery(&[
            ("Virat", &[&[1.0, 0.0, 0.0], &[0.9, 0.1, 0.0]]),
            ("Messi", &[&[0.0, 1.0, 0.0], &[0.1, 0.9, 0.0]]),
            ("Prakash", &[&[0.0, 0.0, 1.0], &[0.0, 0.1, 0.9]]),
        ])
    }

    #[test]
    fn test_empty_gallery_is_unknown() {
        let m = FaceMatcher::new(Gallery::default(), 0.6);
        let r = m.best_match(&d(&[0.3, 0.4])).unwrap();
        assert!(!r.is_match());
        assert!(r.distance.is_infinite());
    }

    #[test]
    fn test_labels_without_descriptors_are_unknown() {
        let m = FaceMatcher::new(gallery(&[("Virat", &[])]), 0.6);
        assert!(!m.best_match(&d(&[1.0])).unwrap().is_match());
    }

    #[test]
    fn test_accessors_expose_configuration() {
        let m = FaceMatcher::new(roster(), 0.6);
        assert_eq!(m.threshold(), 0.6);
        assert!(m.gallery().labels().any(|l| l == "Messi"));
    }

    #[test]
    fn test_identical_descriptor_matches_with_zero_distance() {
        let m = FaceMatcher::new(roster(), 0.6);
        let r = m.best_match(&d(&[0.0, 1.0, 0.0])).unwrap();
        assert_eq!(r.label.as_deref(), Some("Messi"));
        assert_eq!(r.distance, 0.0);
    }

    #[test]
    fn test_far_query_is_unknown() {
        let m = FaceMatcher::new(roster(), 0.6);
        let r = m.best_match(&d(&[-5.0, -5.0, -5.0])).unwrap();
        assert_eq!(r.label, None);
        assert!(r.distance > 0.6);
        assert_eq!(r.to_string(), format!("unknown ({:.2})", r.distance));
    }

    #[test]
    fn test_second_reference_can_win() {
        let m = FaceMatcher::new(roster(), 0.6);
        let r = m.best_match(&d(&[0.0, 0.1, 0.95])).unwrap();
        assert_eq!(r.label.as_deref(), Some("Prakash"));
        assert!(r.distance < 0.1);
    }

    #[test]
    fn test_threshold_boundary_is_exclusive() {
        let m = FaceMatcher::new(gallery(&[("a", &[&[0.0, 0.0]])]), 5.0);
        let at = m.best_match(&d(&[3.0, 4.0])).unwrap();
        assert!(!at.is_match(), "distance == threshold must be unknown");
        assert_eq!(at.distance, 5.0);

        let inside = m.best_match(&d(&[3.0, 3.9])).unwrap();
        assert_eq!(inside.label.as_deref(), Some("a"));
    }

    #[test]
    fn test_tie_goes_to_first_label() {
        let m = FaceMatcher::new(gallery(&[("first", &[&[1.0]]), ("second", &[&[-1.0]])]), 2.0);
        let r = m.best_match(&d(&[0.0])).unwrap();
        assert_eq!(r.label.as_deref(), Some("first"));
    }

    #[test]
    fn test_dimension_mismatch() {
        let m = FaceMatcher::new(roster(), 0.6);
        assert_eq!(
            m.best_match(&d(&[1.0, 0.0])),
            Err(MatchError::DimensionMismatch {
                expected: 3,
                actual: 2,
            })
        );
    }

    #[test]
    fn test_mean_strategy_averages_references() {
        // "a" has one very close and one far reference; "b" two moderately close ones.
        let g = gallery(&[("a", &[&[0.0], &[4.0]]), ("b", &[&[1.0], &[1.0]])]);
        let q = d(&[0.1]);

        let nearest = FaceMatcher::new(g.clone(), 3.0).best_match(&q).unwrap();
        assert_eq!(nearest.label.as_deref(), Some("a"));

        let mean = FaceMatcher::new(g, 3.0)
            .with_strategy(MatchStrategy::MeanPerLabel)
            .best_match(&q)
            .unwrap();
        assert_eq!(mean.label.as_deref(), Some("b"));
        assert!((mean.distance - 0.9).abs() < 1e-5);
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("nearest".parse::<MatchStrategy>().unwrap(), MatchStrategy::Nearest);
        assert_eq!("MEAN".parse::<MatchStrategy>().unwrap(), MatchStrategy::MeanPerLabel);
        assert!("median".parse::<MatchStrategy>().is_err());
    }
}
