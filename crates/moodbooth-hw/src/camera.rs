//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame};
use image::RgbImage;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Buffers queued on the capture stream.
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("no video capture device available")]
    NoDevice,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Resolution request: the driver is asked for the ideal size and the
/// negotiated size must not fall below the minimum.
#[derive(Debug, Clone, Copy)]
pub struct CaptureConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
            min_width: 640,
            min_height: 480,
        }
    }
}

impl CaptureConstraints {
    fn accepts(&self, width: u32, height: u32) -> bool {
        width >= self.min_width && height >= self.min_height
    }
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Packed 24-bit RGB.
    Rgb3,
    /// Motion-JPEG, one JPEG per buffer.
    Mjpg,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(PixelFormat::Yuyv)
        } else if fourcc == FourCC::new(b"RGB3") {
            Some(PixelFormat::Rgb3)
        } else if fourcc == FourCC::new(b"MJPG") {
            Some(PixelFormat::Mjpg)
        } else {
            None
        }
    }
}

/// Anything that can hand out the current video frame.
pub trait FrameSource: Send {
    fn grab(&mut self) -> Result<RgbImage, CameraError>;

    /// Native frame size.
    fn resolution(&self) -> (u32, u32);
}

/// Opens a [`FrameSource`] when streaming starts. Dropping the source
/// releases the device.
pub trait CameraOpener: Send {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// V4L2 camera device handle.
///
/// One mmap stream is created at open and kept for the camera's lifetime.
/// The stream holds the device handle; dropping the camera stops streaming
/// and closes the device.
pub struct Camera {
    stream: MmapStream<'static>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str, constraints: &CaptureConstraints) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for YUYV at the ideal size; drivers may answer with RGB3 or MJPG.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = constraints.ideal_width;
        fmt.height = constraints.ideal_height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, RGB3, or MJPG)"
            ))
        })?;

        if !constraints.accepts(negotiated.width, negotiated.height) {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "negotiated {}x{} is below the {}x{} minimum",
                negotiated.width, negotiated.height, constraints.min_width, constraints.min_height
            )));
        }

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        Ok(Self {
            stream,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Dequeue the next frame from the running stream, converted to RGB.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;

        let (data, width, height) =
            convert_buffer(self.pixel_format, self.width, self.height, buf)?;

        Ok(Frame {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// Discard frames while auto-exposure settles.
    pub fn warm_up(&mut self, frames: usize) {
        if frames == 0 {
            return;
        }
        tracing::info!(count = frames, "discarding warmup frames");
        for _ in 0..frames {
            if let Err(e) = self.capture_frame() {
                tracing::debug!(error = %e, "warmup frame failed");
            }
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl FrameSource for Camera {
    fn grab(&mut self) -> Result<RgbImage, CameraError> {
        self.capture_frame()?
            .into_rgb_image()
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Opens the configured device, or the first capture device found.
pub struct V4lOpener {
    pub device: Option<String>,
    pub constraints: CaptureConstraints,
    pub warmup_frames: usize,
}

impl CameraOpener for V4lOpener {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        let path = match &self.device {
            Some(path) => path.clone(),
            None => Camera::list_devices()
                .into_iter()
                .next()
                .map(|d| d.path)
                .ok_or(CameraError::NoDevice)?,
        };

        let mut camera = Camera::open(&path, &self.constraints)?;
        camera.warm_up(self.warmup_frames);
        Ok(Box::new(camera))
    }
}

/// Convert a raw buffer to packed RGB based on the negotiated format.
fn convert_buffer(
    pixel_format: PixelFormat,
    width: u32,
    height: u32,
    buf: &[u8],
) -> Result<(Vec<u8>, u32, u32), CameraError> {
    let conversion_failed = |e: frame::FrameError| {
        CameraError::CaptureFailed(format!("{pixel_format:?} conversion failed: {e}"))
    };

    match pixel_format {
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height)
            .map(|rgb| (rgb, width, height))
            .map_err(conversion_failed),
        PixelFormat::Rgb3 => frame::rgb3_to_rgb(buf, width, height)
            .map(|rgb| (rgb, width, height))
            .map_err(conversion_failed),
        PixelFormat::Mjpg => {
            let img = frame::mjpg_to_rgb(buf).map_err(conversion_failed)?;
            let (w, h) = img.dimensions();
            Ok((img.into_raw(), w, h))
        }
    }
}
