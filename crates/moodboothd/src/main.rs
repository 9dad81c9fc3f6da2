use anyhow::Result;
use moodbooth_core::StyleCatalog;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod session;
mod timer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("moodboothd starting");

    let config = config::Config::from_env();
    tracing::info!(
        model_dir = %config.model_dir.display(),
        asset_dir = %config.asset_dir.display(),
        policy = ?config.style_policy,
        countdown_secs = config.countdown_secs,
        "configuration loaded"
    );

    let catalog = match &config.catalog_path {
        Some(path) => StyleCatalog::load(path)?,
        None => StyleCatalog::builtin()?,
    };

    let engine = engine::spawn_engine(engine::EngineParts::load(&config))?;
    let session = session::spawn_session(
        engine,
        catalog,
        session::SessionConfig::from_config(&config),
    );

    let _connection = zbus::connection::Builder::session()?
        .name(dbus_interface::BUS_NAME)?
        .serve_at(
            dbus_interface::OBJECT_PATH,
            dbus_interface::BoothService::new(session.clone()),
        )?
        .build()
        .await?;

    tracing::info!(bus = dbus_interface::BUS_NAME, "moodboothd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("moodboothd shutting down");

    if let Err(e) = session.stop_camera().await {
        tracing::warn!(error = %e, "camera shutdown failed");
    }

    Ok(())
}
