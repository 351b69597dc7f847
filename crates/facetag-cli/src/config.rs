use facetag_core::recognizer::ARCFACE_MATCH_DISTANCE;
use facetag_core::{EnrollmentPolicy, FrameSize, LoopConfig, MatchStrategy};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Root of the reference image tree, `<labels_dir>/<label>/<seq>.png`.
    pub labels_dir: PathBuf,
    /// Euclidean distance below which a face counts as a match.
    pub match_threshold: f32,
    pub match_strategy: MatchStrategy,
    pub enrollment_policy: EnrollmentPolicy,
    /// Pause between the end of one cycle and the start of the next.
    pub poll_interval_ms: u64,
    /// Upper bound on a single detect + match + render cycle.
    pub cycle_timeout_ms: u64,
    pub display_width: u32,
    pub display_height: u32,
    /// Where `run` publishes the annotated frame after every redraw.
    pub snapshot_path: PathBuf,
    /// Number of warmup frames to discard after opening the camera.
    pub warmup_frames: usize,
}

impl Config {
    /// Load configuration from `FACETAG_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACETAG_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facetag_core::default_model_dir());

        Self {
            camera_device: std::env::var("FACETAG_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            labels_dir: env_path("FACETAG_LABELS_DIR", "labels"),
            match_threshold: env_f32("FACETAG_MATCH_THRESHOLD", ARCFACE_MATCH_DISTANCE),
            match_strategy: env_parse("FACETAG_MATCH_STRATEGY", MatchStrategy::default()),
            enrollment_policy: env_parse("FACETAG_ENROLLMENT_POLICY", EnrollmentPolicy::default()),
            poll_interval_ms: env_u64("FACETAG_POLL_INTERVAL_MS", 100),
            cycle_timeout_ms: env_u64("FACETAG_CYCLE_TIMEOUT_MS", 2000),
            display_width: env_u32("FACETAG_DISPLAY_WIDTH", 600),
            display_height: env_u32("FACETAG_DISPLAY_HEIGHT", 450),
            snapshot_path: env_path("FACETAG_SNAPSHOT_PATH", "overlay.png"),
            warmup_frames: env_usize("FACETAG_WARMUP_FRAMES", 4),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(facetag_core::DETECTOR_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> String {
        self.model_dir
            .join(facetag_core::RECOGNIZER_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    pub fn display_size(&self) -> FrameSize {
        FrameSize::new(self.display_width, self.display_height)
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            cycle_timeout: Duration::from_millis(self.cycle_timeout_ms),
        }
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&v| v > 0)
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_parse<T: FromStr<Err = String>>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|e: String| {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid setting");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Variable names are unique per test.

    #[test]
    fn test_env_helpers_fall_back_when_unset() {
        assert_eq!(env_f32("FACETAG_TEST_UNSET_F32", 1.1), 1.1);
        assert_eq!(env_u64("FACETAG_TEST_UNSET_U64", 100), 100);
        assert_eq!(env_usize("FACETAG_TEST_UNSET_USIZE", 4), 4);
        assert_eq!(env_path("FACETAG_TEST_UNSET_PATH", "labels"), PathBuf::from("labels"));
    }

    #[test]
    fn test_env_helpers_parse_values() {
        std::env::set_var("FACETAG_TEST_PARSE_F32", "0.6");
        std::env::set_var("FACETAG_TEST_PARSE_U64", "250");
        assert_eq!(env_f32("FACETAG_TEST_PARSE_F32", 1.1), 0.6);
        assert_eq!(env_u64("FACETAG_TEST_PARSE_U64", 100), 250);
    }

    #[test]
    fn test_env_helpers_ignore_garbage() {
        std::env::set_var("FACETAG_TEST_GARBAGE_U64", "soon");
        std::env::set_var("FACETAG_TEST_ZERO_U32", "0");
        assert_eq!(env_u64("FACETAG_TEST_GARBAGE_U64", 100), 100);
        assert_eq!(env_u32("FACETAG_TEST_ZERO_U32", 600), 600);
    }

    #[test]
    fn test_env_parse_strategy_and_policy() {
        std::env::set_var("FACETAG_TEST_STRATEGY", "mean");
        std::env::set_var("FACETAG_TEST_POLICY", "fail-fast");
        std::env::set_var("FACETAG_TEST_BAD_POLICY", "maybe");
        assert_eq!(
            env_parse("FACETAG_TEST_STRATEGY", MatchStrategy::Nearest),
            MatchStrategy::MeanPerLabel
        );
        assert_eq!(
            env_parse("FACETAG_TEST_POLICY", EnrollmentPolicy::Skip),
            EnrollmentPolicy::FailFast
        );
        assert_eq!(
            env_parse("FACETAG_TEST_BAD_POLICY", EnrollmentPolicy::Skip),
            EnrollmentPolicy::Skip
        );
    }

    #[test]
    fn test_model_paths_and_loop_config() {
        let config = Config {
            camera_device: "/dev/video0".into(),
            model_dir: PathBuf::from("/opt/models"),
            labels_dir: PathBuf::from("labels"),
            match_threshold: ARCFACE_MATCH_DISTANCE,
            match_strategy: MatchStrategy::Nearest,
            enrollment_policy: EnrollmentPolicy::Skip,
            poll_interval_ms: 100,
            cycle_timeout_ms: 2000,
            display_width: 600,
            display_height: 450,
            snapshot_path: PathBuf::from("overlay.png"),
            warmup_frames: 4,
        };
        assert_eq!(config.detector_model_path(), "/opt/models/det_10g.onnx");
        assert_eq!(config.recognizer_model_path(), "/opt/models/w600k_r50.onnx");
        assert_eq!(config.display_size(), FrameSize::new(600, 450));

        let lc = config.loop_config();
        assert_eq!(lc.poll_interval, Duration::from_millis(100));
        assert_eq!(lc.cycle_timeout, Duration::from_secs(2));
    }
}
