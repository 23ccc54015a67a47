//! Open CamStudio - Camera capture sessions, made simple.
//!
//! This is the main library crate for Open CamStudio.
//! It provides the capture session engine and a demo entry point driving it
//! against simulated hardware.

pub mod capture;
pub mod config;
pub mod recorder;
pub mod thumbnail;
pub mod utils;

use anyhow::Context;
use capture::SimulatedHardware;
use config::CaptureConfig;
use recorder::{CaptureBackend, CaptureCoordinator, RecordingCompletion};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable naming an optional JSON config file
pub const CONFIG_ENV: &str = "OPEN_CAMSTUDIO_CONFIG";

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "open_camstudio=debug,open_camstudio_lib=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Run a short capture session on simulated hardware
pub fn run() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting Open CamStudio v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    let config = CaptureConfig::load_or_default(config_path.as_deref())
        .context("failed to load capture config")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(demo_session(config))
}

async fn demo_session(config: CaptureConfig) -> anyhow::Result<()> {
    let hardware = SimulatedHardware::with_default_devices();
    let request = config.configure_request();
    let (handle, mut completions) =
        CaptureCoordinator::spawn(config, CaptureBackend::simulated(&hardware));

    let mut notices = handle.status().notices();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            if let Ok(json) = serde_json::to_string(&notice) {
                tracing::info!("notice: {}", json);
            }
        }
    });

    handle.prepare(request).await?;
    handle.toggle_torch().await?;
    handle.switch_to_next().await?;
    handle.switch_to_next().await?;

    let session = handle.record_to_default_location().await?;
    tracing::info!("Recording to {}", session.output.display());

    tokio::time::sleep(Duration::from_secs(2)).await;
    handle.stop_recording().await?;

    match completions.recv().await {
        Some(RecordingCompletion::Finished(media)) => {
            let record = serde_json::to_string_pretty(&media.catalog_record())?;
            tracing::info!("Catalog record:\n{}", record);
            if let Some(reason) = &media.thumbnail_error {
                tracing::warn!("Thumbnail pending: {}", reason);
            }
        }
        Some(RecordingCompletion::Failed { error, .. }) => {
            tracing::error!("Recording failed: {}", error);
        }
        None => anyhow::bail!("capture coordinator exited before completing the recording"),
    }

    handle.stop_stream().await?;
    Ok(())
}
