use crate::session::{SessionError, SessionHandle};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;
use zbus::interface;

pub const BUS_NAME: &str = "org.moodbooth.Booth1";
pub const OBJECT_PATH: &str = "/org/moodbooth/Booth1";

/// D-Bus interface for the Moodbooth session daemon.
///
/// Bus name: org.moodbooth.Booth1
/// Object path: /org/moodbooth/Booth1
///
/// Structured results are returned as JSON strings. File paths must be
/// absolute; they are resolved by the daemon, not the caller.
pub struct BoothService {
    session: SessionHandle,
}

impl BoothService {
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }
}

fn failed(e: SessionError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn parse_id(id: &str) -> zbus::fdo::Result<Uuid> {
    Uuid::parse_str(id)
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("bad image id {id:?}: {e}")))
}

fn parse_path(path: &str) -> zbus::fdo::Result<PathBuf> {
    let path = PathBuf::from(path);
    if !path.is_absolute() {
        return Err(zbus::fdo::Error::InvalidArgs(format!(
            "path must be absolute: {}",
            path.display()
        )));
    }
    Ok(path)
}

#[interface(name = "org.moodbooth.Booth1")]
impl BoothService {
    /// Open the camera and start the detection loop.
    async fn start_camera(&self) -> zbus::fdo::Result<()> {
        tracing::info!("start_camera requested");
        self.session.start_camera().await.map_err(failed)
    }

    /// Stop detection, cancel any countdown and release the camera.
    async fn stop_camera(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop_camera requested");
        self.session.stop_camera().await.map_err(failed)
    }

    /// Show or hide the live view. Hiding pauses detection.
    async fn set_visible(&self, visible: bool) -> zbus::fdo::Result<()> {
        self.session.set_visible(visible).await.map_err(failed)
    }

    /// Capture now; returns the new image summary, or `null` if no face.
    async fn take_picture(&self) -> zbus::fdo::Result<String> {
        tracing::info!("take_picture requested");
        let summary = self.session.take_picture().await.map_err(failed)?;
        to_json(&summary)
    }

    async fn list_images(&self) -> zbus::fdo::Result<String> {
        let images = self.session.list_images().await.map_err(failed)?;
        to_json(&images)
    }

    async fn select_image(&self, id: &str) -> zbus::fdo::Result<()> {
        let id = parse_id(id)?;
        self.session.select_image(id).await.map_err(failed)
    }

    async fn remove_image(&self, id: &str) -> zbus::fdo::Result<()> {
        tracing::info!(id, "remove_image requested");
        let id = parse_id(id)?;
        self.session.remove_image(id).await.map_err(failed)
    }

    /// Re-run style transfer on the selection. False if nothing started.
    async fn apply_style(&self) -> zbus::fdo::Result<bool> {
        self.session.apply_style().await.map_err(failed)
    }

    /// Set the style slider (1-6); returns the previewed style path or "".
    async fn set_slider(&self, value: u32) -> zbus::fdo::Result<String> {
        let preview = self.session.set_slider(value).await.map_err(failed)?;
        Ok(preview
            .map(|p| p.display().to_string())
            .unwrap_or_default())
    }

    async fn save_output(&self, path: &str) -> zbus::fdo::Result<()> {
        let path = parse_path(path)?;
        self.session.save_output(path).await.map_err(failed)
    }

    async fn export_image(&self, id: &str, path: &str) -> zbus::fdo::Result<()> {
        let id = parse_id(id)?;
        let path = parse_path(path)?;
        self.session.export_image(id, path).await.map_err(failed)
    }

    /// Latest detection overlay as a display list, or `null`.
    async fn overlay(&self) -> zbus::fdo::Result<String> {
        let overlay = self.session.overlay().await.map_err(failed)?;
        to_json(&overlay)
    }

    /// Rasterize the latest overlay's boxes and landmark points to an image
    /// file. Caption text is not drawn; read it from `Overlay`.
    async fn save_overlay(&self, path: &str) -> zbus::fdo::Result<()> {
        let path = parse_path(path)?;
        self.session.save_overlay(path).await.map_err(failed)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.session.status().await.map_err(failed)?;
        to_json(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
        assert!(matches!(parse_id("img-1"), Err(zbus::fdo::Error::InvalidArgs(_))));
    }

    #[test]
    fn test_parse_path_requires_absolute() {
        assert_eq!(parse_path("/tmp/out.png").unwrap(), PathBuf::from("/tmp/out.png"));
        assert!(matches!(parse_path("out.png"), Err(zbus::fdo::Error::InvalidArgs(_))));
    }

    #[test]
    fn test_session_errors_map_to_failed() {
        let e = failed(SessionError::NoOutput);
        assert!(matches!(e, zbus::fdo::Error::Failed(msg) if msg == "no stylized output yet"));
    }
}
