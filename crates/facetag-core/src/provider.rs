//! The model provider seam: face localisation, alignment and description
//! behind two asynchronous, fallible calls.

use crate::detector::DetectorError;
use crate::recognizer::RecognizerError;
use crate::types::Detection;
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("failed to start inference thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("inference thread exited")]
    EngineClosed,
}

/// Pretrained face models, treated as a black box.
///
/// Boxes in returned detections are in the pixel space of the input image.
#[allow(async_fn_in_trait)]
pub trait ModelProvider {
    /// Locate the most confident face, align it and compute its descriptor.
    /// `Ok(None)` when the image contains no face.
    async fn detect_single(
        &mut self,
        image: Arc<RgbImage>,
    ) -> Result<Option<Detection>, ProviderError>;

    /// Locate and describe every face in the image.
    async fn detect_all(&mut self, image: Arc<RgbImage>) -> Result<Vec<Detection>, ProviderError>;
}
