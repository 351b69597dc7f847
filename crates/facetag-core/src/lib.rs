//! facetag-core: live face labelling.
//!
//! Enrolls a small gallery of named reference faces, then matches every
//! face found in live frames against it and redraws a labelled overlay.
//! Detection (SCRFD) and description (ArcFace) run via ONNX Runtime.

pub mod alignment;
pub mod capture;
pub mod detector;
pub mod engine;
pub mod gallery;
pub mod matcher;
pub mod overlay;
pub mod provider;
pub mod recognizer;
pub mod types;

pub use capture::{
    annotate, stop_channel, CaptureLoop, FrameSource, LoopConfig, LoopState, LoopStats, StopHandle,
    StopSignal,
};
pub use engine::ModelHandle;
pub use gallery::{
    DirectoryStore, EnrollmentManifest, EnrollmentPolicy, Gallery, GalleryBuilder, ReferenceStore,
};
pub use matcher::{FaceMatcher, MatchStrategy};
pub use overlay::{render, ImageOverlay, OverlaySurface};
pub use provider::{ModelProvider, ProviderError};
pub use types::{
    BestMatch, BoundingBox, Descriptor, Detection, FrameSize, LabeledDescriptorSet, MatchResult,
};

use std::path::PathBuf;

/// SCRFD detector weights file name.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognizer weights file name.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// `$XDG_DATA_HOME/facetag/models`, or `~/.local/share/facetag/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facetag")
        .join("models")
}
