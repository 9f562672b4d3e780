use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tw::basic_models::{CameraMode, ImageRef};
use tw_client::config::Config;
use tw_client::gallery::{AlbumDirectory, Gallery};
use tw_client::ingestion::{OpenAiDescriber, StillCamera, StreamingIllustrator};
use tw_client::session::{CaptureController, Services, SessionOutcome, SessionState};
use tw_client::views::{Screen, TypingText};

/// Describe a photo with a vision model, then recreate it from the description
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// The photo to recreate
    photo: PathBuf,
    /// Style of the recreation: realistic, super-ai, cartoon or 90s-disposable
    #[arg(short, long, default_value = "realistic")]
    mode: String,
    /// Don't save the original and the recreation to the album automatically
    #[arg(long)]
    no_save: bool,
    /// Save the recreated image to the album once done, reporting any failure
    #[arg(long)]
    save: bool,
    /// Also write the recreated image to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Album to save into
    #[arg(long)]
    album: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(album) = args.album {
        config.gallery.album = album;
    }
    let mode = CameraMode::parse_lossy(&args.mode);
    let http = reqwest::Client::new();
    let services = Services {
        camera: Arc::new(StillCamera::new(&args.photo)),
        describer: Arc::new(OpenAiDescriber::new(&config)),
        illustrator: Arc::new(StreamingIllustrator::new(&config, http.clone())),
        gallery: Gallery::new(
            &config.gallery,
            Arc::new(AlbumDirectory::new(&config.gallery.pictures_dir)),
            http,
        ),
        auto_save: config.gallery.auto_save && !args.no_save,
    };
    let (controller, mut alerts) = CaptureController::new(services);
    let controller = Arc::new(controller);

    let renderer = tokio::spawn(render(controller.subscribe()));
    let on_interrupt = controller.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    println!("Recreating {} in {} mode", args.photo.display(), mode.label());
    let outcome = controller.capture(mode).await?;
    renderer.abort();
    println!();
    if args.save && matches!(outcome, SessionOutcome::Complete(_)) {
        match controller.save_current().await {
            Ok(asset) => println!("Saved to {}", asset.display()),
            Err(err) => tracing::warn!("Save failed: {err}"),
        }
    }
    while let Ok(alert) = alerts.try_recv() {
        eprintln!("{}: {}", alert.title, alert.message);
    }

    match outcome {
        SessionOutcome::Complete(image) => {
            if let Some(output) = args.output {
                write_image(&image, &output).await?;
                println!("Recreated image written to {}", output.display());
            }
            println!("Done");
            Ok(())
        }
        SessionOutcome::Cancelled => {
            println!("Cancelled");
            Ok(())
        }
        SessionOutcome::Failed => bail!("Recreation failed"),
    }
}

/// Follow the session on the terminal, typing the description out as it goes.
async fn render(mut states: watch::Receiver<SessionState>) {
    let mut typing = TypingText::default();
    let mut ticker = tokio::time::interval(Duration::from_millis(8));
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    return;
                }
                let screen = Screen::from_state(&states.borrow_and_update());
                match screen {
                    Screen::Scanning { text } => typing.set_text(text),
                    Screen::Developing { text, .. } => {
                        tracing::info!("Preview updated");
                        typing.set_text(text);
                    }
                    Screen::Polaroid { image, caption } => {
                        println!("\n[recreated image ready: {image:?}]");
                        tracing::debug!("Caption: {caption}");
                    }
                    Screen::Capture { .. } => {}
                }
            }
            _ = ticker.tick() => {
                let before = typing.visible().len();
                if typing.tick() {
                    if before == 0 {
                        println!();
                    }
                    print!("{}", &typing.visible()[before..]);
                    std::io::stdout().flush().ok();
                }
            }
        }
    }
}

async fn write_image(image: &ImageRef, output: &Path) -> Result<()> {
    let bytes = match image {
        ImageRef::Data { base64, .. } => base64::engine::general_purpose::STANDARD.decode(base64)?,
        ImageRef::Local(path) => tokio::fs::read(path).await?,
        ImageRef::Remote(url) => reqwest::get(url)
            .await?
            .error_for_status()?
            .bytes()
            .await?
            .to_vec(),
    };
    tokio::fs::write(output, bytes)
        .await
        .with_context(|| format!("Writing {}", output.display()))
}
