use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use moodbooth_hw::{Camera, CaptureConstraints, FrameSource};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "moodbooth", about = "Moodbooth emotion photo booth CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the camera and start face detection
    Start,
    /// Stop detection and release the camera
    Stop,
    /// Show the live view (resumes detection)
    Show,
    /// Hide the live view (pauses detection, camera stays open)
    Hide,
    /// Take a picture now
    Capture,
    /// List captured images
    List,
    /// Select a captured image and stylize it
    Select {
        /// Image ID
        id: String,
    },
    /// Remove a captured image
    Remove {
        /// Image ID
        id: String,
    },
    /// Re-run style transfer on the selected image
    Stylize,
    /// Move the style slider (1-6) and preview the matching style
    Slider {
        value: u32,
    },
    /// Save the stylized output to a file
    Save {
        path: PathBuf,
    },
    /// Export a captured image to a file
    Export {
        /// Image ID
        id: String,
        path: PathBuf,
    },
    /// Print the latest detection overlay
    Overlay {
        /// Rasterize the overlay to this PNG instead of printing it
        #[arg(long)]
        png: Option<PathBuf>,
    },
    /// Show daemon status
    Status,
    /// List video capture devices
    Devices,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// Device path; defaults to the first capture device
        #[arg(short, long)]
        device: Option<String>,
        /// Frames to capture
        #[arg(short, long, default_value_t = 10)]
        frames: usize,
        /// Save the last frame here
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
}

#[zbus::proxy(
    interface = "org.moodbooth.Booth1",
    default_service = "org.moodbooth.Booth1",
    default_path = "/org/moodbooth/Booth1"
)]
trait Booth {
    fn start_camera(&self) -> zbus::Result<()>;
    fn stop_camera(&self) -> zbus::Result<()>;
    fn set_visible(&self, visible: bool) -> zbus::Result<()>;
    fn take_picture(&self) -> zbus::Result<String>;
    fn list_images(&self) -> zbus::Result<String>;
    fn select_image(&self, id: &str) -> zbus::Result<()>;
    fn remove_image(&self, id: &str) -> zbus::Result<()>;
    fn apply_style(&self) -> zbus::Result<bool>;
    fn set_slider(&self, value: u32) -> zbus::Result<String>;
    fn save_output(&self, path: &str) -> zbus::Result<()>;
    fn export_image(&self, id: &str, path: &str) -> zbus::Result<()>;
    fn overlay(&self) -> zbus::Result<String>;
    fn save_overlay(&self, path: &str) -> zbus::Result<()>;
    fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Test {
            device,
            frames,
            snapshot,
        } => camera_test(device, frames, snapshot),
        command => run_remote(command).await,
    }
}

async fn run_remote(command: Commands) -> Result<()> {
    let connection = zbus::Connection::session()
        .await
        .context("cannot connect to the session bus")?;
    let booth = BoothProxy::new(&connection)
        .await
        .context("moodboothd is not reachable")?;

    match command {
        Commands::Start => {
            booth.start_camera().await?;
            println!("Camera started");
        }
        Commands::Stop => {
            booth.stop_camera().await?;
            println!("Camera stopped");
        }
        Commands::Show => booth.set_visible(true).await?,
        Commands::Hide => booth.set_visible(false).await?,
        Commands::Capture => {
            let reply = booth.take_picture().await?;
            if reply == "null" {
                println!("No face in frame; nothing captured");
            } else {
                print_json(&reply)?;
            }
        }
        Commands::List => print_json(&booth.list_images().await?)?,
        Commands::Select { id } => {
            booth.select_image(&id).await?;
            println!("Selected {id}");
        }
        Commands::Remove { id } => {
            booth.remove_image(&id).await?;
            println!("Removed {id}");
        }
        Commands::Stylize => {
            if booth.apply_style().await? {
                println!("Style transfer started");
            } else {
                println!("Style transfer not started (no selection, busy, or model unavailable)");
            }
        }
        Commands::Slider { value } => {
            let preview = booth.set_slider(value).await?;
            if preview.is_empty() {
                println!("Slider set to {value}");
            } else {
                println!("Slider set to {value}: {preview}");
            }
        }
        Commands::Save { path } => {
            let path = absolute(&path)?;
            booth.save_output(&path.to_string_lossy()).await?;
            println!("Saved {}", path.display());
        }
        Commands::Export { id, path } => {
            let path = absolute(&path)?;
            booth.export_image(&id, &path.to_string_lossy()).await?;
            println!("Exported {}", path.display());
        }
        Commands::Overlay { png: Some(path) } => {
            let path = absolute(&path)?;
            booth.save_overlay(&path.to_string_lossy()).await?;
            println!("Saved {}", path.display());
        }
        Commands::Overlay { png: None } => print_json(&booth.overlay().await?)?,
        Commands::Status => print_json(&booth.status().await?)?,
        Commands::Devices | Commands::Test { .. } => unreachable!("handled locally"),
    }

    Ok(())
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon returned bad JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// The daemon resolves paths against its own working directory.
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

fn list_devices() -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No video capture devices found");
        return Ok(());
    }
    for d in devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
    Ok(())
}

fn camera_test(device: Option<String>, frames: usize, snapshot: Option<PathBuf>) -> Result<()> {
    let path = match device {
        Some(path) => path,
        None => Camera::list_devices()
            .into_iter()
            .next()
            .map(|d| d.path)
            .context("no video capture device found")?,
    };

    println!("Running camera diagnostics on {path}...");
    let mut camera = Camera::open(&path, &CaptureConstraints::default())?;
    println!(
        "Negotiated {}x{} {:?}",
        camera.width, camera.height, camera.fourcc
    );
    camera.warm_up(4);

    let started = Instant::now();
    let mut last = None;
    for _ in 0..frames.max(1) {
        last = Some(camera.grab()?);
    }
    let elapsed = started.elapsed();
    let fps = frames.max(1) as f64 / elapsed.as_secs_f64();
    println!("Captured {} frames in {:.2?} ({fps:.1} fps)", frames.max(1), elapsed);

    if let (Some(path), Some(frame)) = (snapshot, last) {
        frame.save(&path)?;
        println!("Saved snapshot to {}", path.display());
    }

    Ok(())
}
