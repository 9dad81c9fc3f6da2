//! Booth session actor.
//!
//! A single task owns every piece of mutable booth state: streaming and
//! visibility flags, the countdown, the gallery and its selection, and the
//! stylized output. D-Bus calls arrive as [`Request`]s with a oneshot reply;
//! the detection loop, countdown timer, capture and style tasks report back
//! as [`Event`]s on the same channel, so state changes are serialized.
//!
//! Timers live in [`ScopedTask`]s and carry a generation number. Tearing a
//! loop down bumps the generation and drops the task, so a tick already in
//! the channel is recognized as stale and ignored.

use crate::config::Config;
use crate::engine::{Detection, EngineError, EngineHandle};
use crate::timer::ScopedTask;
use image::RgbImage;
use moodbooth_core::{
    classify, resolve_style_path, style_for_slider, CapturedImage, Classification, Countdown,
    CountdownState, Emotion, Gallery, ImageSummary, Overlay, Presence, StyleCatalog, StylePolicy,
    Tick, SLIDER_MAX,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("camera is not streaming")]
    NotStreaming,
    #[error("no image with id {0}")]
    UnknownImage(Uuid),
    #[error("no stylized output yet")]
    NoOutput,
    #[error("no detection overlay yet")]
    NoOverlay,
    #[error("slider value {0} out of range 1..={1}")]
    SliderOutOfRange(u32, u32),
    #[error("failed to load style image {path}: {source}")]
    StyleImage {
        path: String,
        source: image::ImageError,
    },
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("background task failed: {0}")]
    Task(String),
    #[error("session is shut down")]
    Closed,
}

/// Tunables the session needs from the daemon config.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub asset_dir: PathBuf,
    pub style_policy: StylePolicy,
    pub countdown_secs: u32,
    /// Length of one countdown step.
    pub countdown_tick: Duration,
    pub frame_interval: Duration,
}

impl SessionConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            asset_dir: config.asset_dir.clone(),
            style_policy: config.style_policy,
            countdown_secs: config.countdown_secs,
            countdown_tick: Duration::from_secs(1),
            frame_interval: config.frame_interval,
        }
    }
}

/// Snapshot returned by `Status`.
#[derive(Debug, Clone, Serialize)]
pub struct BoothStatus {
    pub version: &'static str,
    pub streaming: bool,
    pub visible: bool,
    pub models_loaded: bool,
    pub stylizer_ready: bool,
    pub countdown: CountdownState,
    pub capturing: bool,
    pub styling: bool,
    /// Dominant emotion of the latest detection tick.
    pub dominant: Option<Emotion>,
    pub images: usize,
    pub selected: ImageSummary,
    pub style_image: Option<String>,
    pub has_output: bool,
    pub slider: u32,
    pub style_policy: StylePolicy,
}

type Reply<T> = oneshot::Sender<T>;
type CaptureReply = Reply<Result<Option<ImageSummary>, SessionError>>;

enum Request {
    StartCamera(Reply<Result<(), SessionError>>),
    StopCamera(Reply<()>),
    SetVisible(bool, Reply<()>),
    TakePicture(CaptureReply),
    ListImages(Reply<Vec<ImageSummary>>),
    SelectImage(Uuid, Reply<Result<(), SessionError>>),
    RemoveImage(Uuid, Reply<Result<(), SessionError>>),
    ApplyStyle(Reply<bool>),
    SetSlider(u32, Reply<Result<Option<PathBuf>, SessionError>>),
    SaveOutput(PathBuf, Reply<Result<(), SessionError>>),
    ExportImage(Uuid, PathBuf, Reply<Result<(), SessionError>>),
    Overlay(Reply<Option<Overlay>>),
    SaveOverlay(PathBuf, Reply<Result<(), SessionError>>),
    Status(Reply<BoothStatus>),
}

enum Event {
    Detected {
        stream: u64,
        result: Result<Detection, EngineError>,
    },
    CountdownTick {
        countdown: u64,
    },
    Captured {
        result: Result<Option<CaptureOutcome>, SessionError>,
        reply: Option<CaptureReply>,
    },
    Stylized {
        source: Uuid,
        style_path: PathBuf,
        result: Result<RgbImage, SessionError>,
    },
}

enum Message {
    Request(Request),
    Event(Event),
}

struct CaptureOutcome {
    image: Arc<RgbImage>,
    png: Vec<u8>,
    classification: Classification,
}

/// The decoded selected image, ready for style transfer.
struct Content {
    id: Uuid,
    image: Arc<RgbImage>,
}

/// Clone-safe handle to the session actor.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Message>,
}

impl SessionHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Request(build(reply)))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn start_camera(&self) -> Result<(), SessionError> {
        self.request(Request::StartCamera).await?
    }

    pub async fn stop_camera(&self) -> Result<(), SessionError> {
        self.request(Request::StopCamera).await
    }

    pub async fn set_visible(&self, visible: bool) -> Result<(), SessionError> {
        self.request(|reply| Request::SetVisible(visible, reply)).await
    }

    /// Capture now. `Ok(None)` means the still had no face, or another
    /// capture was already in flight.
    pub async fn take_picture(&self) -> Result<Option<ImageSummary>, SessionError> {
        self.request(Request::TakePicture).await?
    }

    pub async fn list_images(&self) -> Result<Vec<ImageSummary>, SessionError> {
        self.request(Request::ListImages).await
    }

    pub async fn select_image(&self, id: Uuid) -> Result<(), SessionError> {
        self.request(|reply| Request::SelectImage(id, reply)).await?
    }

    pub async fn remove_image(&self, id: Uuid) -> Result<(), SessionError> {
        self.request(|reply| Request::RemoveImage(id, reply)).await?
    }

    /// Re-run style transfer on the selection. `false` if nothing started.
    pub async fn apply_style(&self) -> Result<bool, SessionError> {
        self.request(Request::ApplyStyle).await
    }

    /// Move the slider; returns the previewed style path when one applies.
    pub async fn set_slider(&self, value: u32) -> Result<Option<PathBuf>, SessionError> {
        self.request(|reply| Request::SetSlider(value, reply)).await?
    }

    pub async fn save_output(&self, path: PathBuf) -> Result<(), SessionError> {
        self.request(|reply| Request::SaveOutput(path, reply)).await?
    }

    pub async fn export_image(&self, id: Uuid, path: PathBuf) -> Result<(), SessionError> {
        self.request(|reply| Request::ExportImage(id, path, reply)).await?
    }

    pub async fn overlay(&self) -> Result<Option<Overlay>, SessionError> {
        self.request(Request::Overlay).await
    }

    pub async fn save_overlay(&self, path: PathBuf) -> Result<(), SessionError> {
        self.request(|reply| Request::SaveOverlay(path, reply)).await?
    }

    pub async fn status(&self) -> Result<BoothStatus, SessionError> {
        self.request(Request::Status).await
    }
}

/// Spawn the session actor on the current runtime.
pub fn spawn_session(
    engine: EngineHandle,
    catalog: StyleCatalog,
    config: SessionConfig,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(32);
    let session = Session::new(engine, catalog, config, tx.downgrade());
    tokio::spawn(session.run(rx));
    SessionHandle { tx }
}

struct Session {
    engine: EngineHandle,
    catalog: StyleCatalog,
    config: SessionConfig,
    tx: mpsc::WeakSender<Message>,
    rng: StdRng,

    streaming: bool,
    visible: bool,
    stream_generation: u64,
    detection: Option<ScopedTask>,
    dominant: Option<Emotion>,
    overlay: Option<Overlay>,

    countdown: Countdown,
    countdown_generation: u64,
    countdown_timer: Option<ScopedTask>,
    capturing: bool,

    gallery: Gallery,
    content: Option<Content>,
    slider: u32,
    style_image: Option<PathBuf>,
    styling: bool,
    output: Option<Arc<RgbImage>>,
}

impl Session {
    fn new(
        engine: EngineHandle,
        catalog: StyleCatalog,
        config: SessionConfig,
        tx: mpsc::WeakSender<Message>,
    ) -> Self {
        let countdown = Countdown::new(config.countdown_secs);
        Self {
            engine,
            catalog,
            config,
            tx,
            rng: StdRng::from_entropy(),
            streaming: false,
            visible: true,
            stream_generation: 0,
            detection: None,
            dominant: None,
            overlay: None,
            countdown,
            countdown_generation: 0,
            countdown_timer: None,
            capturing: false,
            gallery: Gallery::new(),
            content: None,
            slider: 1,
            style_image: None,
            styling: false,
            output: None,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Message>) {
        tracing::info!("session started");
        while let Some(message) = rx.recv().await {
            match message {
                Message::Request(request) => self.handle_request(request).await,
                Message::Event(event) => self.handle_event(event),
            }
        }
        tracing::info!("session exiting");
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::StartCamera(reply) => {
                let _ = reply.send(self.start_camera().await);
            }
            Request::StopCamera(reply) => {
                self.stop_camera().await;
                let _ = reply.send(());
            }
            Request::SetVisible(visible, reply) => {
                self.set_visible(visible);
                let _ = reply.send(());
            }
            Request::TakePicture(reply) => self.begin_capture(Some(reply)),
            Request::ListImages(reply) => {
                let _ = reply.send(self.gallery.summaries());
            }
            Request::SelectImage(id, reply) => {
                let _ = reply.send(self.select_image(id).await);
            }
            Request::RemoveImage(id, reply) => {
                let _ = reply.send(self.remove_image(id));
            }
            Request::ApplyStyle(reply) => {
                let _ = reply.send(self.start_style_transfer());
            }
            Request::SetSlider(value, reply) => {
                let _ = reply.send(self.set_slider(value).await);
            }
            Request::SaveOutput(path, reply) => {
                let _ = reply.send(self.save_output(path).await);
            }
            Request::ExportImage(id, path, reply) => {
                let _ = reply.send(self.export_image(id, path).await);
            }
            Request::Overlay(reply) => {
                let _ = reply.send(self.overlay.clone());
            }
            Request::SaveOverlay(path, reply) => {
                let _ = reply.send(self.save_overlay(path).await);
            }
            Request::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Detected { stream, result } => self.on_detected(stream, result),
            Event::CountdownTick { countdown } => self.on_countdown_tick(countdown),
            Event::Captured { result, reply } => self.on_captured(result, reply),
            Event::Stylized {
                source,
                style_path,
                result,
            } => self.on_stylized(source, style_path, result),
        }
    }

    // --- camera and detection loop ---

    async fn start_camera(&mut self) -> Result<(), SessionError> {
        if !self.engine.analyzer_ready() {
            return Err(EngineError::AnalyzerUnavailable.into());
        }
        if self.streaming {
            return Ok(());
        }
        let (width, height) = self.engine.open_camera().await?;
        self.streaming = true;
        tracing::info!(width, height, "camera started");
        if self.visible {
            self.start_detection();
        }
        Ok(())
    }

    async fn stop_camera(&mut self) {
        self.halt_detection();
        if !self.streaming {
            return;
        }
        if let Err(e) = self.engine.close_camera().await {
            tracing::warn!(error = %e, "failed to release camera");
        }
        self.streaming = false;
        tracing::info!("camera stopped");
    }

    fn set_visible(&mut self, visible: bool) {
        if self.visible == visible {
            return;
        }
        self.visible = visible;
        tracing::info!(visible, "visibility changed");
        if !self.streaming {
            return;
        }
        if visible {
            self.start_detection();
        } else {
            self.halt_detection();
        }
    }

    fn start_detection(&mut self) {
        self.stream_generation += 1;
        let stream = self.stream_generation;
        let engine = self.engine.clone();
        let tx = self.tx.clone();
        let interval = self.config.frame_interval;

        // Ticks run back to back: the next grab waits for this one's reply.
        self.detection = Some(ScopedTask::spawn(async move {
            loop {
                let result = engine.detect().await;
                let closed = matches!(result, Err(EngineError::ChannelClosed));
                let Some(sender) = tx.upgrade() else {
                    break;
                };
                let event = Event::Detected { stream, result };
                if sender.send(Message::Event(event)).await.is_err() || closed {
                    break;
                }
                drop(sender);
                tokio::time::sleep(interval).await;
            }
        }));
        tracing::debug!(stream, "detection loop started");
    }

    /// Stop the detection loop and any countdown. The camera stays open.
    fn halt_detection(&mut self) {
        self.stream_generation += 1;
        if self.detection.take().is_some() {
            tracing::debug!("detection loop stopped");
        }
        self.cancel_countdown();
        self.countdown.clear();
        self.overlay = None;
        self.dominant = None;
    }

    fn on_detected(&mut self, stream: u64, result: Result<Detection, EngineError>) {
        if stream != self.stream_generation || self.detection.is_none() {
            return;
        }
        let detection = match result {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "detection tick failed");
                return;
            }
        };

        match self.countdown.observe(detection.faces.len()) {
            Presence::Started => {
                tracing::info!(
                    faces = detection.faces.len(),
                    seconds = self.config.countdown_secs,
                    "face detected; countdown started"
                );
                self.start_countdown_timer();
            }
            Presence::Reset => {
                tracing::info!("face lost; countdown reset");
                self.cancel_countdown();
            }
            Presence::Unchanged => {}
        }

        self.dominant = classify(&detection.faces).map(|c| c.emotion);
        self.overlay = Some(Overlay::build(
            detection.width,
            detection.height,
            &detection.faces,
            self.countdown.remaining(),
        ));
    }

    // --- countdown ---

    fn start_countdown_timer(&mut self) {
        self.countdown_generation += 1;
        let countdown = self.countdown_generation;
        let tx = self.tx.clone();
        self.countdown_timer = Some(ScopedTask::every(self.config.countdown_tick, move || {
            let tx = tx.clone();
            async move {
                match tx.upgrade() {
                    Some(sender) => sender
                        .send(Message::Event(Event::CountdownTick { countdown }))
                        .await
                        .is_ok(),
                    None => false,
                }
            }
        }));
    }

    fn cancel_countdown(&mut self) {
        self.countdown_generation += 1;
        self.countdown_timer = None;
    }

    fn on_countdown_tick(&mut self, countdown: u64) {
        if countdown != self.countdown_generation || self.countdown_timer.is_none() {
            return;
        }
        match self.countdown.tick() {
            Tick::Remaining(remaining) => tracing::debug!(remaining, "countdown"),
            Tick::Fire => {
                self.cancel_countdown();
                tracing::info!("countdown elapsed; capturing");
                self.begin_capture(None);
            }
            Tick::Idle => self.cancel_countdown(),
        }
    }

    // --- capture ---

    fn begin_capture(&mut self, reply: Option<CaptureReply>) {
        if !self.streaming {
            respond(reply, Err(SessionError::NotStreaming));
            return;
        }
        if self.capturing {
            tracing::debug!("capture already in flight; request dropped");
            respond(reply, Ok(None));
            return;
        }
        self.capturing = true;

        let engine = self.engine.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = capture_still(&engine).await;
            if let Some(sender) = tx.upgrade() {
                let _ = sender
                    .send(Message::Event(Event::Captured { result, reply }))
                    .await;
            }
        });
    }

    fn on_captured(
        &mut self,
        result: Result<Option<CaptureOutcome>, SessionError>,
        reply: Option<CaptureReply>,
    ) {
        self.capturing = false;
        let outcome = match result {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                tracing::debug!("no face in still; capture dropped");
                respond(reply, Ok(None));
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "capture failed");
                respond(reply, Err(e));
                return;
            }
        };

        let (width, height) = outcome.image.dimensions();
        let record = CapturedImage::new(outcome.png, width, height, &outcome.classification);
        let summary = record.summary();
        let id = self.gallery.push(record);
        self.gallery.select(id);
        self.set_content(id, outcome.image);
        tracing::info!(
            id = %id,
            label = %summary.label,
            strength = summary.strength,
            images = self.gallery.len(),
            "image captured"
        );
        respond(reply, Ok(Some(summary)));

        self.start_style_transfer();
    }

    // --- gallery ---

    async fn select_image(&mut self, id: Uuid) -> Result<(), SessionError> {
        let png = self.stored_png(id)?;
        let image = blocking(move || Ok(image::load_from_memory(&png)?.to_rgb8())).await?;
        self.gallery.select(id);
        self.set_content(id, Arc::new(image));
        tracing::debug!(id = %id, "image selected");
        self.start_style_transfer();
        Ok(())
    }

    fn remove_image(&mut self, id: Uuid) -> Result<(), SessionError> {
        self.gallery
            .remove(id)
            .ok_or(SessionError::UnknownImage(id))?;
        if self.content.as_ref().is_some_and(|c| c.id == id) {
            self.content = None;
            self.style_image = None;
            self.output = None;
        }
        tracing::info!(id = %id, images = self.gallery.len(), "image removed");
        Ok(())
    }

    /// A new selection invalidates the previous style and output.
    fn set_content(&mut self, id: Uuid, image: Arc<RgbImage>) {
        self.content = Some(Content { id, image });
        self.style_image = None;
        self.output = None;
    }

    async fn export_image(&self, id: Uuid, path: PathBuf) -> Result<(), SessionError> {
        let png = self.stored_png(id)?;
        let target = path.clone();
        blocking(move || Ok(image::load_from_memory(&png)?.save(&target)?)).await?;
        tracing::info!(id = %id, path = %path.display(), "image exported");
        Ok(())
    }

    fn stored_png(&self, id: Uuid) -> Result<Vec<u8>, SessionError> {
        self.gallery
            .get(id)
            .map(|record| record.image.clone())
            .ok_or(SessionError::UnknownImage(id))
    }

    // --- style transfer ---

    fn start_style_transfer(&mut self) -> bool {
        let Some((source, content)) = self
            .content
            .as_ref()
            .map(|c| (c.id, Arc::clone(&c.image)))
        else {
            tracing::debug!("nothing selected; style transfer skipped");
            return false;
        };
        if !self.engine.stylizer_ready() {
            tracing::debug!("style transfer models not loaded");
            return false;
        }
        if self.styling {
            tracing::debug!("style transfer already running; request dropped");
            return false;
        }
        let Some(label) = self.gallery.get(source).map(|r| r.label.clone()) else {
            return false;
        };

        let style = match self.catalog.choose(
            &label,
            self.config.style_policy,
            self.slider,
            &mut self.rng,
        ) {
            Ok(style) => style,
            Err(e) => {
                tracing::warn!(error = %e, label = %label, "style transfer aborted");
                return false;
            }
        };
        let style_path = resolve_style_path(&self.config.asset_dir, style);

        self.styling = true;
        tracing::info!(
            id = %source,
            label = %label,
            style = %style_path.display(),
            "style transfer started"
        );

        let engine = self.engine.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = load_and_stylize(&engine, content, &style_path).await;
            if let Some(sender) = tx.upgrade() {
                let event = Event::Stylized {
                    source,
                    style_path,
                    result,
                };
                let _ = sender.send(Message::Event(event)).await;
            }
        });
        true
    }

    fn on_stylized(
        &mut self,
        source: Uuid,
        style_path: PathBuf,
        result: Result<RgbImage, SessionError>,
    ) {
        self.styling = false;
        let current = self.content.as_ref().is_some_and(|c| c.id == source);
        match result {
            Ok(image) if current => {
                tracing::info!(id = %source, "style transfer finished");
                self.style_image = Some(style_path);
                self.output = Some(Arc::new(image));
            }
            Ok(_) => tracing::debug!(id = %source, "selection changed; stylized result discarded"),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    id = %source,
                    style = %style_path.display(),
                    "style transfer failed"
                );
                if current && !matches!(e, SessionError::StyleImage { .. }) {
                    self.style_image = Some(style_path);
                }
            }
        }
    }

    /// Store the slider and preview the matching style for the selection.
    /// Inference is not re-run.
    async fn set_slider(&mut self, value: u32) -> Result<Option<PathBuf>, SessionError> {
        if !(1..=SLIDER_MAX).contains(&value) {
            return Err(SessionError::SliderOutOfRange(value, SLIDER_MAX));
        }
        self.slider = value;

        let Some(label) = self
            .content
            .as_ref()
            .and_then(|c| self.gallery.get(c.id))
            .map(|r| r.label.clone())
        else {
            return Ok(None);
        };
        let config = match self.catalog.lookup(&label) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, label = %label, "no styles to preview");
                return Ok(None);
            }
        };
        let Some(style) = style_for_slider(value, &config.styles) else {
            return Ok(None);
        };
        let path = resolve_style_path(&self.config.asset_dir, style);

        load_style_image(path.clone()).await?;
        tracing::debug!(slider = value, style = %path.display(), "style preview");
        self.style_image = Some(path.clone());
        Ok(Some(path))
    }

    async fn save_output(&self, path: PathBuf) -> Result<(), SessionError> {
        let output = self.output.clone().ok_or(SessionError::NoOutput)?;
        let target = path.clone();
        blocking(move || Ok(output.save(&target)?)).await?;
        tracing::info!(path = %path.display(), "stylized output saved");
        Ok(())
    }

    // --- overlay and status ---

    async fn save_overlay(&self, path: PathBuf) -> Result<(), SessionError> {
        let overlay = self.overlay.clone().ok_or(SessionError::NoOverlay)?;
        blocking(move || Ok(overlay.render().save(&path)?)).await
    }

    fn status(&self) -> BoothStatus {
        BoothStatus {
            version: env!("CARGO_PKG_VERSION"),
            streaming: self.streaming,
            visible: self.visible,
            models_loaded: self.engine.analyzer_ready(),
            stylizer_ready: self.engine.stylizer_ready(),
            countdown: self.countdown.state(),
            capturing: self.capturing,
            styling: self.styling,
            dominant: self.dominant,
            images: self.gallery.len(),
            selected: self.gallery.selected_summary(),
            style_image: self.style_image.as_ref().map(|p| p.display().to_string()),
            has_output: self.output.is_some(),
            slider: self.slider,
            style_policy: self.config.style_policy,
        }
    }
}

fn respond<T>(reply: Option<Reply<T>>, value: T) {
    if let Some(reply) = reply {
        let _ = reply.send(value);
    }
}

/// Run image decoding or encoding on the blocking pool, off the actor.
async fn blocking<T, F>(work: F) -> Result<T, SessionError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SessionError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SessionError::Task(e.to_string()))?
}

/// Grab a still, classify it and PNG-encode it off the runtime.
/// `Ok(None)` when the still has no face.
async fn capture_still(engine: &EngineHandle) -> Result<Option<CaptureOutcome>, SessionError> {
    let still = engine.capture_still().await?;
    let Some(classification) = classify(&still.faces) else {
        return Ok(None);
    };
    let image = Arc::new(still.image);
    let encoded = Arc::clone(&image);
    let png = blocking(move || Ok(encode_png(&encoded)?)).await?;
    Ok(Some(CaptureOutcome {
        image,
        png,
        classification,
    }))
}

fn encode_png(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    image.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

async fn load_style_image(path: PathBuf) -> Result<RgbImage, SessionError> {
    blocking(move || {
        image::open(&path)
            .map(|img| img.to_rgb8())
            .map_err(|source| SessionError::StyleImage {
                path: path.display().to_string(),
                source,
            })
    })
    .await
}

async fn load_and_stylize(
    engine: &EngineHandle,
    content: Arc<RgbImage>,
    style_path: &Path,
) -> Result<RgbImage, SessionError> {
    let style = load_style_image(style_path.to_path_buf()).await?;
    Ok(engine.stylize(content, style).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fakes::*;
    use crate::engine::{spawn_engine, EngineParts};
    use moodbooth_core::{FaceAnalyzer, StyleTransfer};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Options {
        countdown_secs: u32,
        countdown_tick: Duration,
        analyzer: bool,
        stylizer: Option<FakeStylizer>,
    }

    impl Default for Options {
        fn default() -> Self {
            Self {
                countdown_secs: 1000,
                countdown_tick: Duration::from_secs(1),
                analyzer: true,
                stylizer: Some(FakeStylizer::default()),
            }
        }
    }

    struct Harness {
        session: SessionHandle,
        analyzer: FakeAnalyzer,
        stylize_calls: Arc<AtomicUsize>,
        dir: PathBuf,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    /// Two styles per emotion, written as tiny PNGs under a scratch dir.
    fn scratch_catalog(dir: &Path) -> StyleCatalog {
        let mut src = String::new();
        for emotion in Emotion::ALL {
            src.push_str(&format!(
                "[{emotion}]\nstyles = [{{ path = \"{emotion}1.png\" }}, \
                 {{ path = \"{emotion}2.png\" }}]\n"
            ));
            for i in 1..=2 {
                RgbImage::from_pixel(8, 8, image::Rgb([200, 40, 40]))
                    .save(dir.join(format!("{emotion}{i}.png")))
                    .unwrap();
            }
        }
        StyleCatalog::from_toml(&src).unwrap()
    }

    fn harness(options: Options) -> Harness {
        let dir = std::env::temp_dir().join(format!("moodbooth-session-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let catalog = scratch_catalog(&dir);

        let analyzer = FakeAnalyzer::default();
        let stylize_calls = options
            .stylizer
            .as_ref()
            .map(|s| Arc::clone(&s.calls))
            .unwrap_or_default();
        let engine = spawn_engine(EngineParts {
            opener: Box::new(FakeOpener { fail: false }),
            analyzer: options
                .analyzer
                .then(|| Box::new(analyzer.clone()) as Box<dyn FaceAnalyzer>),
            stylizer: options
                .stylizer
                .map(|s| Box::new(s) as Box<dyn StyleTransfer>),
        })
        .unwrap();

        let session = spawn_session(
            engine,
            catalog,
            SessionConfig {
                asset_dir: dir.clone(),
                style_policy: StylePolicy::Random,
                countdown_secs: options.countdown_secs,
                countdown_tick: options.countdown_tick,
                frame_interval: Duration::from_millis(10),
            },
        );

        Harness {
            session,
            analyzer,
            stylize_calls,
            dir,
        }
    }

    async fn wait_for(
        session: &SessionHandle,
        what: &str,
        pred: impl Fn(&BoothStatus) -> bool,
    ) -> BoothStatus {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let status = session.status().await.unwrap();
            if pred(&status) {
                return status;
            }
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn happy() -> Vec<moodbooth_core::FaceDetection> {
        vec![face(&[(Emotion::Happy, 0.9)])]
    }

    #[tokio::test]
    async fn test_capture_classifies_selects_and_stylizes() {
        let h = harness(Options::default());
        h.analyzer.set_faces(vec![
            face(&[(Emotion::Happy, 0.1), (Emotion::Surprised, 0.7)]),
            face(&[(Emotion::Surprised, 0.6), (Emotion::Neutral, 0.3)]),
        ]);
        h.session.start_camera().await.unwrap();

        let summary = h.session.take_picture().await.unwrap().unwrap();
        assert_eq!(summary.label, "surprised");
        assert!((summary.strength - 0.65).abs() < 1e-5);
        assert_eq!((summary.width, summary.height), (FRAME_WIDTH, FRAME_HEIGHT));

        let images = h.session.list_images().await.unwrap();
        assert_eq!(images.len(), 1);

        let status = wait_for(&h.session, "stylized output", |s| s.has_output).await;
        assert_eq!(status.selected.id, summary.id);
        assert!(status.style_image.unwrap().contains("surprised"));
        assert_eq!(h.stylize_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capture_without_faces_is_dropped() {
        let h = harness(Options::default());
        h.session.start_camera().await.unwrap();

        assert!(h.session.take_picture().await.unwrap().is_none());
        assert!(h.session.list_images().await.unwrap().is_empty());
        let status = h.session.status().await.unwrap();
        assert_eq!(status.selected, ImageSummary::default());
        assert!(!status.capturing);
    }

    #[tokio::test]
    async fn test_take_picture_requires_stream() {
        let h = harness(Options::default());
        assert!(matches!(
            h.session.take_picture().await,
            Err(SessionError::NotStreaming)
        ));
    }

    #[tokio::test]
    async fn test_start_camera_without_models() {
        let h = harness(Options {
            analyzer: false,
            ..Options::default()
        });
        assert!(matches!(
            h.session.start_camera().await,
            Err(SessionError::Engine(EngineError::AnalyzerUnavailable))
        ));
        assert!(!h.session.status().await.unwrap().streaming);
    }

    #[tokio::test]
    async fn test_countdown_fires_once_per_presence() {
        let h = harness(Options {
            countdown_secs: 1,
            countdown_tick: Duration::from_millis(30),
            ..Options::default()
        });
        h.analyzer.set_faces(happy());
        h.session.start_camera().await.unwrap();

        wait_for(&h.session, "automatic capture", |s| s.images == 1).await;

        // Face stays in frame: the latch holds off a second countdown.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.session.status().await.unwrap().images, 1);

        h.analyzer.set_faces(Vec::new());
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.analyzer.set_faces(happy());
        wait_for(&h.session, "second capture", |s| s.images == 2).await;
    }

    #[tokio::test]
    async fn test_face_leaving_resets_countdown() {
        let h = harness(Options {
            countdown_secs: 3,
            countdown_tick: Duration::from_millis(100),
            ..Options::default()
        });
        h.analyzer.set_faces(happy());
        h.session.start_camera().await.unwrap();
        wait_for(&h.session, "countdown", |s| s.countdown != CountdownState::Idle).await;

        h.analyzer.set_faces(Vec::new());
        wait_for(&h.session, "reset", |s| s.countdown == CountdownState::Idle).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.session.status().await.unwrap().images, 0);
    }

    #[tokio::test]
    async fn test_stop_camera_cancels_countdown() {
        let h = harness(Options {
            countdown_secs: 2,
            countdown_tick: Duration::from_millis(100),
            ..Options::default()
        });
        h.analyzer.set_faces(happy());
        h.session.start_camera().await.unwrap();
        wait_for(&h.session, "countdown", |s| s.countdown != CountdownState::Idle).await;

        h.session.stop_camera().await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        let status = h.session.status().await.unwrap();
        assert!(!status.streaming);
        assert_eq!(status.countdown, CountdownState::Idle);
        assert_eq!(status.images, 0);
        assert!(h.session.overlay().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_detection_error_skips_tick() {
        let h = harness(Options::default());
        h.analyzer.fail_next(3);
        h.analyzer.set_faces(happy());
        h.session.start_camera().await.unwrap();

        let status = wait_for(&h.session, "detection after failures", |s| {
            s.dominant == Some(Emotion::Happy)
        })
        .await;
        assert_eq!(h.analyzer.failures.load(Ordering::SeqCst), 0);
        assert!(status.streaming);
        assert_ne!(status.countdown, CountdownState::Idle);
        assert!(h.session.overlay().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_hide_halts_detection_but_keeps_stream() {
        let h = harness(Options::default());
        h.analyzer.set_faces(happy());
        h.session.start_camera().await.unwrap();
        wait_for(&h.session, "detection", |s| s.dominant == Some(Emotion::Happy)).await;

        h.session.set_visible(false).await.unwrap();
        let status = h.session.status().await.unwrap();
        assert!(status.streaming);
        assert!(!status.visible);
        assert!(status.dominant.is_none());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.session.overlay().await.unwrap().is_none());

        h.session.set_visible(true).await.unwrap();
        wait_for(&h.session, "detection resumed", |s| s.dominant.is_some()).await;
    }

    #[tokio::test]
    async fn test_overlay_follows_detections() {
        let h = harness(Options::default());
        h.analyzer.set_faces(happy());
        h.session.start_camera().await.unwrap();
        wait_for(&h.session, "detection", |s| s.dominant.is_some()).await;

        let overlay = h.session.overlay().await.unwrap().unwrap();
        assert_eq!((overlay.width, overlay.height), (FRAME_WIDTH, FRAME_HEIGHT));
        assert_eq!(overlay.faces.len(), 1);
        assert!(overlay.faces[0].caption.starts_with("happy"));

        let path = h.dir.join("overlay.png");
        h.session.save_overlay(path.clone()).await.unwrap();
        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (FRAME_WIDTH, FRAME_HEIGHT));
    }

    #[tokio::test]
    async fn test_remove_selected_clears_selection_and_output() {
        let h = harness(Options::default());
        h.analyzer.set_faces(happy());
        h.session.start_camera().await.unwrap();
        let summary = h.session.take_picture().await.unwrap().unwrap();
        wait_for(&h.session, "stylized output", |s| s.has_output).await;

        let id = Uuid::parse_str(&summary.id).unwrap();
        h.session.remove_image(id).await.unwrap();
        let status = h.session.status().await.unwrap();
        assert_eq!(status.selected, ImageSummary::default());
        assert!(!status.has_output);
        assert!(status.style_image.is_none());
        assert_eq!(status.images, 0);

        assert!(matches!(
            h.session.remove_image(id).await,
            Err(SessionError::UnknownImage(_))
        ));
    }

    #[tokio::test]
    async fn test_style_transfer_is_single_flight() {
        let h = harness(Options {
            stylizer: Some(FakeStylizer {
                delay: Duration::from_millis(300),
                ..FakeStylizer::default()
            }),
            ..Options::default()
        });
        h.analyzer.set_faces(happy());
        h.session.start_camera().await.unwrap();
        h.session.take_picture().await.unwrap().unwrap();

        assert!(h.session.status().await.unwrap().styling);
        assert!(!h.session.apply_style().await.unwrap());

        wait_for(&h.session, "first result", |s| s.has_output && !s.styling).await;
        assert!(h.session.apply_style().await.unwrap());
        wait_for(&h.session, "second result", |s| !s.styling).await;
        assert_eq!(h.stylize_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_result_for_previous_selection_is_discarded() {
        let h = harness(Options {
            stylizer: Some(FakeStylizer {
                delay: Duration::from_millis(300),
                ..FakeStylizer::default()
            }),
            ..Options::default()
        });
        h.analyzer.set_faces(happy());
        h.session.start_camera().await.unwrap();
        let first = h.session.take_picture().await.unwrap().unwrap();
        let second = h.session.take_picture().await.unwrap().unwrap();
        assert_ne!(first.id, second.id);

        let status = wait_for(&h.session, "styling done", |s| !s.styling).await;
        assert_eq!(status.selected.id, second.id);
        assert!(!status.has_output);
        assert_eq!(h.stylize_calls.load(Ordering::SeqCst), 1);

        assert!(h.session.apply_style().await.unwrap());
        wait_for(&h.session, "output for selection", |s| s.has_output).await;
    }

    #[tokio::test]
    async fn test_selecting_restarts_style_transfer() {
        let h = harness(Options::default());
        h.analyzer.set_faces(happy());
        h.session.start_camera().await.unwrap();
        let first = h.session.take_picture().await.unwrap().unwrap();
        wait_for(&h.session, "first output", |s| s.has_output && !s.styling).await;
        h.session.take_picture().await.unwrap().unwrap();
        wait_for(&h.session, "second output", |s| s.has_output && !s.styling).await;

        h.session
            .select_image(Uuid::parse_str(&first.id).unwrap())
            .await
            .unwrap();
        let status = wait_for(&h.session, "reselected output", |s| {
            s.has_output && !s.styling
        })
        .await;
        assert_eq!(status.selected.id, first.id);
        assert_eq!(h.stylize_calls.load(Ordering::SeqCst), 3);

        assert!(matches!(
            h.session.select_image(Uuid::new_v4()).await,
            Err(SessionError::UnknownImage(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_inference_leaves_output_empty() {
        let h = harness(Options {
            stylizer: Some(FakeStylizer {
                fail: true,
                ..FakeStylizer::default()
            }),
            ..Options::default()
        });
        h.analyzer.set_faces(happy());
        h.session.start_camera().await.unwrap();
        h.session.take_picture().await.unwrap().unwrap();

        wait_for(&h.session, "styling done", |s| !s.styling).await;
        assert_eq!(h.stylize_calls.load(Ordering::SeqCst), 1);
        let status = h.session.status().await.unwrap();
        assert!(!status.has_output);
        assert!(status.style_image.is_some());
    }

    #[tokio::test]
    async fn test_missing_style_image_leaves_output_unset() {
        let h = harness(Options::default());
        for i in 1..=2 {
            std::fs::remove_file(h.dir.join(format!("happy{i}.png"))).unwrap();
        }
        h.analyzer.set_faces(happy());
        h.session.start_camera().await.unwrap();
        let summary = h.session.take_picture().await.unwrap().unwrap();
        assert_eq!(summary.label, "happy");

        let status = wait_for(&h.session, "styling done", |s| !s.styling).await;
        assert!(!status.has_output);
        assert!(!status.styling);
        assert!(status.style_image.is_none());
        // the style image failed before inference
        assert_eq!(h.stylize_calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            h.session.save_output(h.dir.join("out.png")).await,
            Err(SessionError::NoOutput)
        ));
    }

    #[tokio::test]
    async fn test_slider_previews_style() {
        let h = harness(Options::default());
        assert!(matches!(
            h.session.set_slider(0).await,
            Err(SessionError::SliderOutOfRange(0, SLIDER_MAX))
        ));
        assert!(h.session.set_slider(SLIDER_MAX + 1).await.is_err());
        assert!(h.session.set_slider(2).await.unwrap().is_none());

        h.analyzer.set_faces(happy());
        h.session.start_camera().await.unwrap();
        h.session.take_picture().await.unwrap().unwrap();
        wait_for(&h.session, "styling done", |s| !s.styling).await;

        let preview = h.session.set_slider(2).await.unwrap().unwrap();
        assert!(preview.ends_with("happy2.png"));
        // past the end of a two-style list
        let preview = h.session.set_slider(5).await.unwrap().unwrap();
        assert!(preview.ends_with("happy2.png"));
        let preview = h.session.set_slider(1).await.unwrap().unwrap();
        assert!(preview.ends_with("happy1.png"));

        let status = h.session.status().await.unwrap();
        assert_eq!(status.slider, 1);
        assert!(status.style_image.unwrap().ends_with("happy1.png"));
    }

    #[tokio::test]
    async fn test_save_output_and_export() {
        let h = harness(Options::default());
        let out = h.dir.join("out.png");
        assert!(matches!(
            h.session.save_output(out.clone()).await,
            Err(SessionError::NoOutput)
        ));

        h.analyzer.set_faces(happy());
        h.session.start_camera().await.unwrap();
        let summary = h.session.take_picture().await.unwrap().unwrap();
        wait_for(&h.session, "stylized output", |s| s.has_output).await;

        h.session.save_output(out.clone()).await.unwrap();
        let saved = image::open(&out).unwrap().to_rgb8();
        assert_eq!(saved.dimensions(), (FRAME_WIDTH, FRAME_HEIGHT));
        // fake stylizer inverts the flat test frame
        assert_eq!(saved.get_pixel(0, 0).0, [165, 135, 105]);

        let exported = h.dir.join("still.png");
        h.session
            .export_image(Uuid::parse_str(&summary.id).unwrap(), exported.clone())
            .await
            .unwrap();
        let still = image::open(&exported).unwrap().to_rgb8();
        assert_eq!(still.get_pixel(0, 0).0, [90, 120, 150]);
    }
}
