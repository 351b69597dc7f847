//! facetag-hw: V4L2 camera capture for facetag.
//!
//! Opens a webcam, negotiates a 640x480 format and hands back frames
//! already converted to RGB.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
