//! moodbooth-hw: Webcam access for the booth.
//!
//! Provides V4L2 device enumeration and RGB frame capture behind the
//! [`FrameSource`] / [`CameraOpener`] seams.

pub mod camera;
pub mod frame;

pub use camera::{
    Camera, CameraError, CameraOpener, CaptureConstraints, DeviceInfo, FrameSource, PixelFormat,
    V4lOpener,
};
pub use frame::Frame;
