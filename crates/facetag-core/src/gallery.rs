//! Reference gallery: enrollment manifest, reference image store and the
//! builder that turns reference images into labelled descriptor sets.

use crate::provider::{ModelProvider, ProviderError};
use crate::types::{Descriptor, LabeledDescriptorSet};
use image::RgbImage;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Manifest file looked up inside the labels directory.
pub const MANIFEST_FILE: &str = "gallery.toml";

const DEFAULT_LABELS: [&str; 3] = ["Virat", "Messi", "Prakash"];
const DEFAULT_REFERENCES_PER_LABEL: u32 = 2;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("reference image not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("failed to fetch reference {label}#{seq}: {source}")]
    Fetch {
        label: String,
        seq: u32,
        source: StoreError,
    },
    #[error("no face found in reference {label}#{seq}")]
    EnrollmentGap { label: String, seq: u32 },
    #[error("label enrolled twice: {0}")]
    DuplicateLabel(String),
    #[error("descriptor for {label} has dimension {actual}, gallery uses {expected}")]
    DimensionMismatch {
        label: String,
        expected: usize,
        actual: usize,
    },
    #[error("model provider: {0}")]
    Provider(#[from] ProviderError),
}

/// What to do when a reference image contains no detectable face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnrollmentPolicy {
    /// Log a warning and enroll the label without that image.
    #[default]
    Skip,
    /// Abort gallery construction.
    FailFast,
}

impl std::str::FromStr for EnrollmentPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "fail" | "fail-fast" | "failfast" => Ok(Self::FailFast),
            other => Err(format!("unknown enrollment policy: {other}")),
        }
    }
}

/// Which identities to enroll and how many reference images each has.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnrollmentManifest {
    pub labels: Vec<String>,
    #[serde(default = "default_references_per_label")]
    pub references_per_label: u32,
}

fn default_references_per_label() -> u32 {
    DEFAULT_REFERENCES_PER_LABEL
}

impl Default for EnrollmentManifest {
    fn default() -> Self {
        Self {
            labels: DEFAULT_LABELS.iter().map(|l| l.to_string()).collect(),
            references_per_label: DEFAULT_REFERENCES_PER_LABEL,
        }
    }
}

impl EnrollmentManifest {
    /// Load `gallery.toml` from `labels_dir`, falling back to the built-in
    /// roster when the file does not exist.
    pub fn load_or_default(labels_dir: &Path) -> Result<Self, ManifestError> {
        let path = labels_dir.join(MANIFEST_FILE);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no gallery manifest, using default roster");
            return Ok(Self::default());
        }
        let src = std::fs::read_to_string(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&src).map_err(|source| ManifestError::Parse { path, source })
    }
}

/// Source of reference images, addressed by label and 1-based sequence number.
#[allow(async_fn_in_trait)]
pub trait ReferenceStore {
    async fn fetch(&self, label: &str, seq: u32) -> Result<RgbImage, StoreError>;
}

/// Reads references from `<root>/<label>/<seq>.png`.
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, label: &str, seq: u32) -> PathBuf {
        self.root.join(label).join(format!("{seq}.png"))
    }
}

impl ReferenceStore for DirectoryStore {
    async fn fetch(&self, label: &str, seq: u32) -> Result<RgbImage, StoreError> {
        let path = self.path_for(label, seq);
        let bytes = tokio::fs::read(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(path.clone())
            } else {
                StoreError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        let img = image::load_from_memory(&bytes)
            .map_err(|source| StoreError::Decode { path, source })?;
        Ok(img.to_rgb8())
    }
}

/// The enrolled identities. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    sets: Vec<LabeledDescriptorSet>,
    dimension: Option<usize>,
}

impl Gallery {
    /// Validate and wrap labelled sets: labels must be unique and every
    /// descriptor must share one dimension.
    pub fn new(sets: Vec<LabeledDescriptorSet>) -> Result<Self, GalleryError> {
        let mut seen = HashSet::new();
        let mut dimension = None;

        for set in &sets {
            if !seen.insert(set.label.as_str()) {
                return Err(GalleryError::DuplicateLabel(set.label.clone()));
            }
            for d in &set.descriptors {
                match dimension {
                    None => dimension = Some(d.dimension()),
                    Some(expected) if expected != d.dimension() => {
                        return Err(GalleryError::DimensionMismatch {
                            label: set.label.clone(),
                            expected,
                            actual: d.dimension(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(Self { sets, dimension })
    }

    pub fn sets(&self) -> &[LabeledDescriptorSet] {
        &self.sets
    }

    /// Descriptor dimension, or `None` when no descriptor is enrolled.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.sets.iter().map(|s| s.label.as_str())
    }

    pub fn descriptor_count(&self) -> usize {
        self.sets.iter().map(|s| s.descriptors.len()).sum()
    }

    /// True when nothing can ever match.
    pub fn is_empty(&self) -> bool {
        self.descriptor_count() == 0
    }
}

/// Builds a [`Gallery`] by running the single-face pipeline on every
/// reference image.
pub struct GalleryBuilder<'a, S> {
    store: &'a S,
    manifest: EnrollmentManifest,
    policy: EnrollmentPolicy,
}

impl<'a, S: ReferenceStore> GalleryBuilder<'a, S> {
    pub fn new(store: &'a S, manifest: EnrollmentManifest) -> Self {
        Self {
            store,
            manifest,
            policy: EnrollmentPolicy::default(),
        }
    }

    pub fn policy(mut self, policy: EnrollmentPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fetch and describe every reference. Fetch and provider failures abort
    /// the build; faceless references follow the enrollment policy.
    pub async fn build<P: ModelProvider>(self, models: &mut P) -> Result<Gallery, GalleryError> {
        let mut sets = Vec::with_capacity(self.manifest.labels.len());

        for label in &self.manifest.labels {
            let mut descriptors: Vec<Descriptor> = Vec::new();

            for seq in 1..=self.manifest.references_per_label {
                let img = self
                    .store
                    .fetch(label, seq)
                    .await
                    .map_err(|source| GalleryError::Fetch {
                        label: label.clone(),
                        seq,
                        source,
                    })?;

                match models.detect_single(Arc::new(img)).await? {
                    Some(detection) => {
                        tracing::debug!(
                            label = %label,
                            seq,
                            confidence = detection.bbox.confidence,
                            "reference enrolled"
                        );
                        descriptors.push(detection.descriptor);
                    }
                    None => match self.policy {
                        EnrollmentPolicy::Skip => {
                            tracing::warn!(
                                label = %label,
                                seq,
                                "no face in reference image; skipping"
                            );
                        }
                        EnrollmentPolicy::FailFast => {
                            return Err(GalleryError::EnrollmentGap {
                                label: label.clone(),
                                seq,
                            });
                        }
                    },
                }
            }

            if descriptors.is_empty() {
                tracing::warn!(
                    label = %label,
                    "label has no usable references and will never match"
                );
            }
            sets.push(LabeledDescriptorSet::new(label.clone(), descriptors));
        }

        let gallery = Gallery::new(sets)?;
        tracing::info!(
            labels = gallery.sets().len(),
            descriptors = gallery.descriptor_count(),
            dimension = ?gallery.dimension(),
            "gallery built"
        );
        Ok(gallery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::ScriptedProvider;
    use std::collections::HashMap;

    /// In-memory store keyed by "label/seq"; the pixel at (0, 0) tags the image.
    struct MemoryStore {
        images: HashMap<String, RgbImage>,
    }

    impl MemoryStore {
        fn with(entries: &[(&str, u32, u8)]) -> Self {
            let images = entries
                .iter()
                .map(|&(label, seq, tag)| {
                    (format!("{label}/{seq}"), RgbImage::from_pixel(4, 4, image::Rgb([tag, 0, 0])))
                })
                .collect();
            Self { images }
        }
    }

    impl ReferenceStore for MemoryStore {
        async fn fetch(&self, label: &str, seq: u32) -> Result<RgbImage, StoreError> {
            self.images
                .get(&format!("{label}/{seq}"))
                .cloned()
                .ok_or_else(|| StoreError::NotFound(PathBuf::from(format!("{label}/{seq}"))))
        }
    }

    fn manifest(labels: &[&str], per_label: u32) -> EnrollmentManifest {
        EnrollmentManifest {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            references_per_label: per_label,
        }
    }

    fn set(label: &str, descs: &[&[f32]]) -> LabeledDescriptorSet {
        let descriptors = descs.iter().map(|d| Descriptor::new(d.to_vec())).collect();
        LabeledDescriptorSet::new(label, descriptors)
    }

    #[test]
    fn test_gallery_rejects_duplicate_labels() {
        let err = Gallery::new(vec![set("a", &[&[1.0]]), set("a", &[&[2.0]])]).unwrap_err();
        assert!(matches!(err, GalleryError::DuplicateLabel(l) if l == "a"));
    }

    #[test]
    fn test_gallery_rejects_mixed_dimensions() {
        let err = Gallery::new(vec![set("a", &[&[1.0, 0.0]]), set("b", &[&[1.0]])]).unwrap_err();
        assert!(matches!(
            err,
            GalleryError::DimensionMismatch {
                expected: 2,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_gallery_counts() {
        let g = Gallery::new(vec![set("a", &[&[1.0], &[2.0]]), set("b", &[])]).unwrap();
        assert_eq!(g.descriptor_count(), 2);
        assert_eq!(g.dimension(), Some(1));
        assert_eq!(g.labels().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(!g.is_empty());
        assert!(Gallery::default().is_empty());
    }

    #[tokio::test]
    async fn test_build_groups_descriptors_by_label() {
        let store = MemoryStore::with(&[
            ("Virat", 1, 10),
            ("Virat", 2, 11),
            ("Messi", 1, 20),
            ("Messi", 2, 21),
        ]);
        let mut provider = ScriptedProvider::tag_descriptors();

        let gallery = GalleryBuilder::new(&store, manifest(&["Virat", "Messi"], 2))
            .build(&mut provider)
            .await
            .unwrap();

        assert_eq!(gallery.sets().len(), 2);
        assert_eq!(gallery.sets()[0].label, "Virat");
        assert_eq!(gallery.sets()[0].descriptors[0].values, vec![10.0]);
        assert_eq!(gallery.sets()[0].descriptors[1].values, vec![11.0]);
        assert_eq!(gallery.sets()[1].descriptors[1].values, vec![21.0]);
    }

    #[tokio::test]
    async fn test_build_skips_faceless_reference() {
        // Tag 0 means "no face" for the scripted provider.
        let store = MemoryStore::with(&[("Messi", 1, 0), ("Messi", 2, 21)]);
        let mut provider = ScriptedProvider::tag_descriptors();

        let gallery = GalleryBuilder::new(&store, manifest(&["Messi"], 2))
            .policy(EnrollmentPolicy::Skip)
            .build(&mut provider)
            .await
            .unwrap();

        assert_eq!(gallery.sets()[0].descriptors.len(), 1);
        assert_eq!(gallery.sets()[0].descriptors[0].values, vec![21.0]);
    }

    #[tokio::test]
    async fn test_build_fail_fast_on_faceless_reference() {
        let store = MemoryStore::with(&[("Messi", 1, 21), ("Messi", 2, 0)]);
        let mut provider = ScriptedProvider::tag_descriptors();

        let err = GalleryBuilder::new(&store, manifest(&["Messi"], 2))
            .policy(EnrollmentPolicy::FailFast)
            .build(&mut provider)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GalleryError::EnrollmentGap { ref label, seq: 2 } if label == "Messi"
        ));
    }

    #[tokio::test]
    async fn test_build_aborts_on_fetch_failure() {
        let store = MemoryStore::with(&[("Messi", 1, 21)]);
        let mut provider = ScriptedProvider::tag_descriptors();

        let err = GalleryBuilder::new(&store, manifest(&["Messi"], 2))
            .build(&mut provider)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GalleryError::Fetch {
                seq: 2,
                source: StoreError::NotFound(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_build_keeps_label_with_no_references() {
        let store = MemoryStore::with(&[("Virat", 1, 0)]);
        let mut provider = ScriptedProvider::tag_descriptors();

        let gallery = GalleryBuilder::new(&store, manifest(&["Virat"], 1))
            .build(&mut provider)
            .await
            .unwrap();

        assert_eq!(gallery.sets().len(), 1);
        assert!(gallery.is_empty());
    }

    #[tokio::test]
    async fn test_directory_store_reads_png() {
        let dir = tempfile::tempdir().unwrap();
        let label_dir = dir.path().join("Messi");
        std::fs::create_dir_all(&label_dir).unwrap();
        RgbImage::from_pixel(3, 2, image::Rgb([1, 2, 3]))
            .save(label_dir.join("1.png"))
            .unwrap();

        let store = DirectoryStore::new(dir.path());
        let img = store.fetch("Messi", 1).await.unwrap();
        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(img.get_pixel(0, 0).0, [1, 2, 3]);

        let missing = store.fetch("Messi", 2).await.unwrap_err();
        assert!(matches!(missing, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_directory_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Virat")).unwrap();
        std::fs::write(dir.path().join("Virat/1.png"), b"not a png").unwrap();

        let err = DirectoryStore::new(dir.path()).fetch("Virat", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Decode { .. }));
    }

    #[test]
    fn test_manifest_default_roster() {
        let dir = tempfile::tempdir().unwrap();
        let m = EnrollmentManifest::load_or_default(dir.path()).unwrap();
        assert_eq!(m.labels, vec!["Virat", "Messi", "Prakash"]);
        assert_eq!(m.references_per_label, 2);
    }

    #[test]
    fn test_manifest_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            "labels = [\"Ada\", \"Grace\"]\nreferences_per_label = 3\n",
        )
        .unwrap();
        let m = EnrollmentManifest::load_or_default(dir.path()).unwrap();
        assert_eq!(m.labels, vec!["Ada", "Grace"]);
        assert_eq!(m.references_per_label, 3);
    }

    #[test]
    fn test_manifest_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "labels = 7").unwrap();
        let err = EnrollmentManifest::load_or_default(dir.path()).unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("skip".parse::<EnrollmentPolicy>().unwrap(), EnrollmentPolicy::Skip);
        assert_eq!("Fail-Fast".parse::<EnrollmentPolicy>().unwrap(), EnrollmentPolicy::FailFast);
        assert!("retry".parse::<EnrollmentPolicy>().is_err());
    }
}
