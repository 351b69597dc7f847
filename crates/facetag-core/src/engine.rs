use crate::detector::FaceDetector;
use crate::provider::{ModelProvider, ProviderError};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::Detection;
use image::RgbImage;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type Reply<T> = oneshot::Sender<Result<T, ProviderError>>;

/// Messages sent from async callers to the inference thread.
enum InferenceRequest {
    Single {
        image: Arc<RgbImage>,
        reply: Reply<Option<Detection>>,
    },
    All {
        image: Arc<RgbImage>,
        reply: Reply<Vec<Detection>>,
    },
}

/// Blocking face pipeline driven by the inference thread.
pub(crate) trait Pipeline: Send + 'static {
    fn single(&mut self, image: &RgbImage) -> Result<Option<Detection>, ProviderError>;
    fn all(&mut self, image: &RgbImage) -> Result<Vec<Detection>, ProviderError>;
}

/// SCRFD detection followed by ArcFace description.
struct OnnxPipeline {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl Pipeline for OnnxPipeline {
    /// Most confident face only.
    fn single(&mut self, image: &RgbImage) -> Result<Option<Detection>, ProviderError> {
        let faces = self.detector.detect(image)?;
        let Some(face) = faces.into_iter().next() else {
            return Ok(None);
        };
        let descriptor = self.recognizer.extract(image, &face)?;
        Ok(Some(Detection {
            bbox: face,
            descriptor,
        }))
    }

    /// Every face; faces the detector returned without landmarks are dropped.
    fn all(&mut self, image: &RgbImage) -> Result<Vec<Detection>, ProviderError> {
        let faces = self.detector.detect(image)?;
        let mut detections = Vec::with_capacity(faces.len());

        for face in faces {
            match self.recognizer.extract(image, &face) {
                Ok(descriptor) => detections.push(Detection {
                    bbox: face,
                    descriptor,
                }),
                Err(RecognizerError::NoLandmarks) => {
                    tracing::debug!(confidence = face.confidence, "face without landmarks dropped");
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::trace!(faces = detections.len(), "frame described");
        Ok(detections)
    }
}

/// Owned handle to the loaded face models.
///
/// Both ONNX sessions live on a dedicated OS thread; the handle talks to it
/// over a bounded channel. Load once with [`ModelHandle::load`], lend it to
/// the gallery builder and the capture loop, then [`ModelHandle::release`].
///
/// A request whose caller stopped waiting (a timed-out cycle, say) is
/// dropped unprocessed when the thread reaches it.
pub struct ModelHandle {
    tx: mpsc::Sender<InferenceRequest>,
    thread: std::thread::JoinHandle<()>,
}

impl ModelHandle {
    /// Load the SCRFD detector and ArcFace recognizer and start the
    /// inference thread. Fails fast if either model is unavailable.
    pub fn load(detector_path: &str, recognizer_path: &str) -> Result<Self, ProviderError> {
        let detector = FaceDetector::load(detector_path)?;
        tracing::info!(path = detector_path, "SCRFD detector loaded");

        let recognizer = FaceRecognizer::load(recognizer_path)?;
        tracing::info!(path = recognizer_path, "ArcFace recognizer loaded");

        Self::spawn(OnnxPipeline {
            detector,
            recognizer,
        })
    }

    pub(crate) fn spawn<P: Pipeline>(mut pipeline: P) -> Result<Self, ProviderError> {
        let (tx, mut rx) = mpsc::channel::<InferenceRequest>(4);

        let thread = std::thread::Builder::new()
            .name("facetag-inference".into())
            .spawn(move || {
                tracing::info!("inference thread started");
                while let Some(req) = rx.blocking_recv() {
                    match req {
                        InferenceRequest::Single { image, reply } => {
                            if !abandoned(&reply) {
                                let _ = reply.send(pipeline.single(&image));
                            }
                        }
                        InferenceRequest::All { image, reply } => {
                            if !abandoned(&reply) {
                                let _ = reply.send(pipeline.all(&image));
                            }
                        }
                    }
                }
                tracing::info!("inference thread exiting");
            })
            .map_err(ProviderError::Spawn)?;

        Ok(Self { tx, thread })
    }

    /// Close the request channel and wait for the inference thread to finish
    /// its current request and drop the sessions.
    pub async fn release(self) {
        let Self { tx, thread } = self;
        drop(tx);
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => tracing::info!("models released"),
            Ok(Err(_)) => tracing::warn!("inference thread panicked"),
            Err(e) => tracing::warn!(error = %e, "failed to join inference thread"),
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> InferenceRequest,
    ) -> Result<T, ProviderError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| ProviderError::EngineClosed)?;
        reply_rx.await.map_err(|_| ProviderError::EngineClosed)?
    }
}

fn abandoned<T>(reply: &Reply<T>) -> bool {
    let gone = reply.is_closed();
    if gone {
        tracing::debug!("caller stopped waiting; request skipped");
    }
    gone
}

impl ModelProvider for ModelHandle {
    async fn detect_single(
        &mut self,
        image: Arc<RgbImage>,
    ) -> Result<Option<Detection>, ProviderError> {
        self.request(|reply| InferenceRequest::Single { image, reply }).await
    }

    async fn detect_all(&mut self, image: Arc<RgbImage>) -> Result<Vec<Detection>, ProviderError> {
        self.request(|reply| InferenceRequest::All { image, reply }).await
    }
}
