//! The live annotation loop: frame → detect → rescale → match → render.
//!
//! Cycles never overlap. The next cycle is armed only after the previous
//! one has rendered (or failed), then waits `poll_interval`.

use crate::matcher::{FaceMatcher, MatchError};
use crate::overlay::{self, OverlaySurface, RenderError};
use crate::provider::{ModelProvider, ProviderError};
use crate::types::{Detection, FrameSize, MatchResult};
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("frame source: {0}")]
    Source(#[source] SourceError),
    #[error("model provider: {0}")]
    Provider(#[from] ProviderError),
    #[error("matcher: {0}")]
    Match(#[from] MatchError),
    #[error("present: {0}")]
    Present(#[from] RenderError),
    #[error("cycle exceeded {0:?}")]
    Timeout(Duration),
}

/// Live video frames.
#[allow(async_fn_in_trait)]
pub trait FrameSource {
    /// Next frame, or `None` once the source has ended.
    async fn next_frame(&mut self) -> Result<Option<Arc<RgbImage>>, SourceError>;
}

/// Creates a connected stop handle and signal.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

/// Requests a running loop to stop.
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// Observed by the loop; cloneable.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once stop is requested. A dropped handle never stops the loop.
    pub async fn stopped(&mut self) {
        if self.rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Constructed; models, camera and gallery are ready but no cycle has run.
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Cycles that rendered.
    pub cycles: u64,
    /// Cycles that failed or timed out.
    pub skipped: u64,
    /// Boxes drawn over all rendered cycles.
    pub faces: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    pub poll_interval: Duration,
    pub cycle_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            cycle_timeout: Duration::from_secs(2),
        }
    }
}

/// Rescale detections from `source` to `display` space and match each one.
pub fn annotate(
    matcher: &FaceMatcher,
    detections: &[Detection],
    source: FrameSize,
    display: FrameSize,
) -> Result<Vec<MatchResult>, MatchError> {
    detections
        .iter()
        .map(|d| {
            let best = matcher.best_match(&d.descriptor)?;
            Ok(MatchResult::new(d.bbox.rescale(source, display), best))
        })
        .collect()
}

/// Drives detect → match → render cycles until stopped.
pub struct CaptureLoop<'a, F, P, S> {
    source: F,
    models: &'a mut P,
    matcher: &'a FaceMatcher,
    surface: S,
    config: LoopConfig,
    state: LoopState,
    stats: LoopStats,
}

impl<'a, F, P, S> CaptureLoop<'a, F, P, S>
where
    F: FrameSource,
    P: ModelProvider,
    S: OverlaySurface,
{
    pub fn new(
        source: F,
        models: &'a mut P,
        matcher: &'a FaceMatcher,
        surface: S,
        config: LoopConfig,
    ) -> Self {
        Self {
            source,
            models,
            matcher,
            surface,
            config,
            state: LoopState::Idle,
            stats: LoopStats::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Run until `stop` fires or the source ends.
    pub async fn run(&mut self, mut stop: StopSignal) -> LoopStats {
        self.state = LoopState::Running;
        tracing::info!(
            interval_ms = self.config.poll_interval.as_millis() as u64,
            display = %self.surface.size(),
            labels = self.matcher.gallery().sets().len(),
            threshold = self.matcher.threshold(),
            "capture loop running"
        );

        while !stop.is_stopped() {
            let timeout = self.config.cycle_timeout;
            let outcome = tokio::select! {
                biased;
                _ = stop.stopped() => break,
                r = tokio::time::timeout(timeout, self.cycle()) => {
                    r.unwrap_or(Err(CaptureError::Timeout(timeout)))
                }
            };

            match outcome {
                Ok(Some(faces)) => {
                    self.stats.cycles += 1;
                    self.stats.faces += faces as u64;
                }
                Ok(None) => {
                    tracing::info!("frame source ended");
                    break;
                }
                Err(e) => {
                    self.stats.skipped += 1;
                    tracing::warn!(error = %e, "capture cycle skipped");
                }
            }

            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.state = LoopState::Stopped;
        tracing::info!(
            cycles = self.stats.cycles,
            skipped = self.stats.skipped,
            faces = self.stats.faces,
            "capture loop stopped"
        );
        self.stats
    }

    /// One detect → match → render pass. `Ok(None)` when the source has ended.
    async fn cycle(&mut self) -> Result<Option<usize>, CaptureError> {
        let Some(frame) = self.source.next_frame().await.map_err(CaptureError::Source)? else {
            return Ok(None);
        };
        let source_size = FrameSize::new(frame.width(), frame.height());

        let detections = self.models.detect_all(Arc::clone(&frame)).await?;
        let results = annotate(self.matcher, &detections, source_size, self.surface.size())?;

        overlay::render(&mut self.surface, &results);
        self.surface.present(&frame)?;

        tracing::debug!(
            faces = results.len(),
            labels = ?results.iter().map(|r| r.caption()).collect::<Vec<_>>(),
            "cycle rendered"
        );
        Ok(Some(results.len()))
    }
}
