//! posecoach: live and batch exercise feedback

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Action, Cli};
use posecoach::analysis::{BatchSession, HttpAnalysisClient, MediaRegistry, VideoUpload};
use posecoach::capture::CameraSource;
use posecoach::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("posecoach=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_deref())?;
    posecoach::CONFIG.store(Arc::new(config.clone()));

    let client = HttpAnalysisClient::new(&config.service)?;
    info!(service = client.base_url(), "posecoach starting");

    match cli.action {
        Action::Live { exercise, device } => {
            let mut config = config;
            if let Some(exercise) = exercise {
                config.session.exercise = exercise;
            }
            if let Some(device) = device {
                config.capture.device = device;
            }
            live(config, client).await
        }
        Action::Analyze {
            video,
            exercise,
            out,
        } => analyze(&config, client, &video, exercise, out).await,
        Action::Health => {
            if client.health().await? {
                println!("ok");
                Ok(())
            } else {
                Err(eyre!("service at {} is not healthy", client.base_url()))
            }
        }
        Action::Exercises => {
            for exercise in client.supported_exercises().await? {
                println!("{exercise}");
            }
            Ok(())
        }
    }
}

async fn analyze(
    config: &Config,
    client: HttpAnalysisClient,
    video: &Path,
    exercise: Option<posecoach::analysis::Exercise>,
    out: Option<PathBuf>,
) -> Result<()> {
    let upload = VideoUpload::from_path(video, config.service.max_upload_bytes).await?;
    let mut session = BatchSession::new(Arc::new(client), MediaRegistry::new());
    session.set_exercise(exercise.unwrap_or(config.session.exercise));

    let handle = session.upload(upload).await?;
    let out = out.unwrap_or_else(|| annotated_path(video));
    handle.save_to(&out).await?;
    println!("{}", out.display());
    Ok(())
}

fn annotated_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".into());
    video.with_file_name(format!("{stem}.annotated.mp4"))
}

#[cfg(feature = "v4l2-camera")]
fn camera_source() -> Result<Arc<dyn CameraSource>> {
    Ok(Arc::new(posecoach::capture::V4l2Camera::new()))
}

#[cfg(not(feature = "v4l2-camera"))]
fn camera_source() -> Result<Arc<dyn CameraSource>> {
    Err(posecoach::error::CameraError::Unsupported(
        "built without the v4l2-camera feature".into(),
    )
    .into())
}

#[cfg(not(feature = "preview"))]
async fn live(config: Config, client: HttpAnalysisClient) -> Result<()> {
    use posecoach::display::ImageSurface;
    use posecoach::pipeline::SessionController;

    let controller = SessionController::new(
        camera_source()?,
        Arc::new(client),
        Box::new(ImageSurface::new(config.capture.width, config.capture.height)),
        config.session.clone(),
    )
    .with_constraints(config.capture.clone())
    .with_renderer(posecoach::display::OverlayRenderer::new(config.overlay.clone()));

    let mut status = controller.subscribe_status();
    let printer = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let line = status.borrow_and_update().clone();
            println!("{line}");
        }
    });

    let handle = controller.handle();
    let result = tokio::select! {
        result = controller.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            handle.stop();
            Ok(())
        }
    };
    drop(controller);
    printer.abort();

    info!("posecoach shutting down");
    Ok(result?)
}

#[cfg(feature = "preview")]
async fn live(config: Config, client: HttpAnalysisClient) -> Result<()> {
    use posecoach::display::{ChannelSurface, ImageSurface, OverlayRenderer, Sdl2Display};
    use posecoach::pipeline::SessionController;
    use tokio_util::sync::CancellationToken;
    use tracing::warn;

    let (frame_tx, frame_rx) = flume::bounded(2);
    let (overlay_tx, overlay_rx) = flume::bounded(2);

    let surface = ChannelSurface::new(
        ImageSurface::new(config.capture.width, config.capture.height),
        overlay_tx,
    );
    let controller = SessionController::new(
        camera_source()?,
        Arc::new(client),
        Box::new(surface),
        config.session.clone(),
    )
    .with_constraints(config.capture.clone())
    .with_renderer(OverlayRenderer::new(config.overlay.clone()))
    .with_frame_tap(frame_tx);

    let handle = controller.handle();
    let session = tokio::spawn(async move { controller.run().await });

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    // SDL stays on the main thread
    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let mut window = Sdl2Display::new(&sdl_context, config.capture.width, config.capture.height)?;
    window.run(&sdl_context, frame_rx, overlay_rx, cancel)?;

    handle.stop();
    match session.await? {
        Ok(()) => {}
        Err(err) => warn!("Session ended with error: {}", err),
    }

    info!(status = %handle.status(), "posecoach shutting down");
    Ok(())
}
