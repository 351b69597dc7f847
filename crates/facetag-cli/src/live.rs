//! Adapters between the camera, the snapshot file and the capture loop.

use facetag_core::capture::{FrameSource, SourceError};
use facetag_core::overlay::RenderError;
use facetag_core::{BoundingBox, FrameSize, ImageOverlay, OverlaySurface};
use facetag_hw::Camera;
use image::{ImageFormat, RgbImage};
use std::path::PathBuf;
use std::sync::Arc;

/// Blocking frame grab, run on the blocking pool by [`LiveCamera`].
pub trait BlockingCapture: Send + Sync + 'static {
    fn capture(&self) -> Result<RgbImage, SourceError>;
}

impl BlockingCapture for Camera {
    fn capture(&self) -> Result<RgbImage, SourceError> {
        let frame = self.capture_frame()?;
        tracing::trace!(sequence = frame.sequence, "frame captured");
        Ok(frame.image)
    }
}

type PendingCapture = tokio::task::JoinHandle<Result<RgbImage, SourceError>>;

/// Live webcam frames, read off the async runtime.
///
/// At most one capture runs at a time. If a caller stops waiting (the
/// cycle timed out), the capture keeps running and the next call picks
/// up its frame instead of starting a second read on the device.
pub struct LiveCamera<C = Camera> {
    device: Arc<C>,
    pending: Option<PendingCapture>,
}

impl<C: BlockingCapture> LiveCamera<C> {
    pub fn new(device: C) -> Self {
        Self {
            device: Arc::new(device),
            pending: None,
        }
    }
}

impl<C: BlockingCapture> FrameSource for LiveCamera<C> {
    async fn next_frame(&mut self) -> Result<Option<Arc<RgbImage>>, SourceError> {
        let task = self.pending.get_or_insert_with(|| {
            let device = Arc::clone(&self.device);
            tokio::task::spawn_blocking(move || device.capture())
        });
        let result = task.await;
        self.pending = None;
        Ok(Some(Arc::new(result??)))
    }
}

/// In-memory overlay that publishes each redraw, composited onto its
/// source frame, as a PNG snapshot.
pub struct SnapshotSurface {
    overlay: ImageOverlay,
    path: PathBuf,
}

impl SnapshotSurface {
    pub fn new(size: FrameSize, path: impl Into<PathBuf>) -> Self {
        Self {
            overlay: ImageOverlay::new(size),
            path: path.into(),
        }
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl OverlaySurface for SnapshotSurface {
    fn size(&self) -> FrameSize {
        self.overlay.size()
    }

    fn clear(&mut self) {
        self.overlay.clear();
    }

    fn draw_labeled_box(&mut self, bbox: &BoundingBox, caption: &str, matched: bool) {
        self.overlay.draw_labeled_box(bbox, caption, matched);
    }

    /// Write to a sibling file and rename it over the snapshot, so readers
    /// never see a half-written image.
    fn present(&mut self, frame: &RgbImage) -> Result<(), RenderError> {
        let staging = self.staging_path();
        self.overlay
            .composite(frame)
            .save_with_format(&staging, ImageFormat::Png)
            .map_err(|source| RenderError::Snapshot {
                path: staging.clone(),
                source,
            })?;
        std::fs::rename(&staging, &self.path).map_err(|source| RenderError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
