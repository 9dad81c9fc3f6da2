use crate::config::Config;
use image::RgbImage;
use moodbooth_core::{
    ArbitraryStylizer, FaceAnalyzer, FaceDetection, OnnxFaceAnalyzer, StyleTransfer,
};
use moodbooth_hw::{CameraOpener, CaptureConstraints, FrameSource, V4lOpener};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] moodbooth_hw::CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] moodbooth_core::DetectorError),
    #[error("style transfer error: {0}")]
    Stylize(#[from] moodbooth_core::StylizeError),
    #[error("camera is not streaming")]
    NotStreaming,
    #[error("face detection models not loaded")]
    AnalyzerUnavailable,
    #[error("style transfer model not loaded")]
    StylizerUnavailable,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Faces found in one live frame.
pub struct Detection {
    pub width: u32,
    pub height: u32,
    pub faces: Vec<FaceDetection>,
}

/// A frame kept as a still, with the faces found in it.
pub struct Still {
    pub image: RgbImage,
    pub faces: Vec<FaceDetection>,
}

/// Collaborators handed to the engine threads.
pub struct EngineParts {
    pub opener: Box<dyn CameraOpener>,
    /// `None` when the detection models failed to load.
    pub analyzer: Option<Box<dyn FaceAnalyzer>>,
    /// `None` when the style-transfer models failed to load.
    pub stylizer: Option<Box<dyn StyleTransfer>>,
}

impl EngineParts {
    /// Build the V4L2 opener and load both model pairs.
    ///
    /// A model that fails to load disables its feature for the daemon's
    /// lifetime; the failure is logged, never propagated.
    pub fn load(config: &Config) -> Self {
        let opener = V4lOpener {
            device: config.camera_device.clone(),
            constraints: CaptureConstraints::default(),
            warmup_frames: config.warmup_frames,
        };

        let analyzer: Option<Box<dyn FaceAnalyzer>> = match OnnxFaceAnalyzer::load(
            &config.detector_model_path(),
            &config.expression_model_path(),
        ) {
            Ok(a) => {
                tracing::info!("face analysis models loaded");
                Some(Box::new(a))
            }
            Err(e) => {
                tracing::error!(error = %e, "face analysis unavailable");
                None
            }
        };

        let stylizer: Option<Box<dyn StyleTransfer>> = match ArbitraryStylizer::load(
            &config.style_predict_model_path(),
            &config.style_transform_model_path(),
            config.style_strength,
        ) {
            Ok(s) => {
                tracing::info!(strength = config.style_strength, "style transfer models loaded");
                Some(Box::new(s))
            }
            Err(e) => {
                tracing::error!(error = %e, "style transfer unavailable");
                None
            }
        };

        Self {
            opener: Box::new(opener),
            analyzer,
            stylizer,
        }
    }
}

/// Messages for the vision thread (camera + face analysis).
enum VisionRequest {
    Open {
        reply: oneshot::Sender<Result<(u32, u32), EngineError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    Detect {
        reply: oneshot::Sender<Result<Detection, EngineError>>,
    },
    CaptureStill {
        reply: oneshot::Sender<Result<Still, EngineError>>,
    },
}

/// Message for the style thread.
struct StyleRequest {
    content: Arc<RgbImage>,
    style: RgbImage,
    reply: oneshot::Sender<Result<RgbImage, EngineError>>,
}

/// Clone-safe handle to the engine threads.
#[derive(Clone)]
pub struct EngineHandle {
    vision_tx: mpsc::Sender<VisionRequest>,
    style_tx: Option<mpsc::Sender<StyleRequest>>,
    analyzer_ready: bool,
}

impl EngineHandle {
    pub fn analyzer_ready(&self) -> bool {
        self.analyzer_ready
    }

    pub fn stylizer_ready(&self) -> bool {
        self.style_tx.is_some()
    }

    /// Open the camera; a no-op returning the resolution if already open.
    pub async fn open_camera(&self) -> Result<(u32, u32), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_vision(VisionRequest::Open { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Release the camera device.
    pub async fn close_camera(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_vision(VisionRequest::Close { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Grab the current frame and report its faces.
    pub async fn detect(&self) -> Result<Detection, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_vision(VisionRequest::Detect { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Grab the current frame as a still and run one detection pass on it.
    pub async fn capture_still(&self) -> Result<Still, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_vision(VisionRequest::CaptureStill { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Repaint `content` in the manner of `style`.
    pub async fn stylize(
        &self,
        content: Arc<RgbImage>,
        style: RgbImage,
    ) -> Result<RgbImage, EngineError> {
        let tx = self.style_tx.as_ref().ok_or(EngineError::StylizerUnavailable)?;
        let (reply, rx) = oneshot::channel();
        tx.send(StyleRequest { content, style, reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    async fn send_vision(&self, req: VisionRequest) -> Result<(), EngineError> {
        self.vision_tx
            .send(req)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on dedicated OS threads.
///
/// The vision thread owns the camera and face analyzer; style transfer runs
/// on its own thread so a seconds-long inference never stalls detection.
pub fn spawn_engine(parts: EngineParts) -> Result<EngineHandle, EngineError> {
    let EngineParts {
        opener,
        analyzer,
        stylizer,
    } = parts;
    let analyzer_ready = analyzer.is_some();

    let (vision_tx, vision_rx) = mpsc::channel::<VisionRequest>(4);
    std::thread::Builder::new()
        .name("moodbooth-vision".into())
        .spawn(move || run_vision(vision_rx, opener, analyzer))
        .map_err(EngineError::Spawn)?;

    let style_tx = match stylizer {
        Some(stylizer) => {
            let (tx, rx) = mpsc::channel::<StyleRequest>(2);
            std::thread::Builder::new()
                .name("moodbooth-style".into())
                .spawn(move || run_style(rx, stylizer))
                .map_err(EngineError::Spawn)?;
            Some(tx)
        }
        None => None,
    };

    Ok(EngineHandle {
        vision_tx,
        style_tx,
        analyzer_ready,
    })
}

fn run_vision(
    mut rx: mpsc::Receiver<VisionRequest>,
    opener: Box<dyn CameraOpener>,
    mut analyzer: Option<Box<dyn FaceAnalyzer>>,
) {
    tracing::info!("vision thread started");
    let mut camera: Option<Box<dyn FrameSource>> = None;

    while let Some(req) = rx.blocking_recv() {
        match req {
            VisionRequest::Open { reply } => {
                let result = match camera.as_ref() {
                    Some(source) => Ok(source.resolution()),
                    None => open_camera(opener.as_ref()).map(|source| {
                        let resolution = source.resolution();
                        camera = Some(source);
                        resolution
                    }),
                };
                let _ = reply.send(result);
            }
            VisionRequest::Close { reply } => {
                if camera.take().is_some() {
                    tracing::info!("camera released");
                }
                let _ = reply.send(());
            }
            VisionRequest::Detect { reply } => {
                let result = grab_and_detect(&mut camera, &mut analyzer).map(|(frame, faces)| {
                    Detection {
                        width: frame.width(),
                        height: frame.height(),
                        faces,
                    }
                });
                let _ = reply.send(result);
            }
            VisionRequest::CaptureStill { reply } => {
                let result = grab_and_detect(&mut camera, &mut analyzer)
                    .map(|(image, faces)| Still { image, faces });
                if let Ok(still) = &result {
                    tracing::debug!(
                        width = still.image.width(),
                        height = still.image.height(),
                        faces = still.faces.len(),
                        "still captured"
                    );
                }
                let _ = reply.send(result);
            }
        }
    }
    tracing::info!("vision thread exiting");
}

fn open_camera(opener: &dyn CameraOpener) -> Result<Box<dyn FrameSource>, EngineError> {
    let source = opener.open()?;
    let (width, height) = source.resolution();
    tracing::info!(width, height, "camera streaming");
    Ok(source)
}

fn grab_and_detect(
    camera: &mut Option<Box<dyn FrameSource>>,
    analyzer: &mut Option<Box<dyn FaceAnalyzer>>,
) -> Result<(RgbImage, Vec<FaceDetection>), EngineError> {
    let source = camera.as_mut().ok_or(EngineError::NotStreaming)?;
    let analyzer = analyzer.as_mut().ok_or(EngineError::AnalyzerUnavailable)?;
    let frame = source.grab()?;
    let faces = analyzer.detect_all(&frame)?;
    Ok((frame, faces))
}

fn run_style(mut rx: mpsc::Receiver<StyleRequest>, mut stylizer: Box<dyn StyleTransfer>) {
    tracing::info!("style thread started");
    while let Some(req) = rx.blocking_recv() {
        let started = std::time::Instant::now();
        let result = stylizer
            .stylize(&req.content, &req.style)
            .map_err(EngineError::from);
        tracing::debug!(
            ok = result.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "style request finished"
        );
        let _ = req.reply.send(result);
    }
    tracing::info!("style thread exiting");
}
