use ab_glyph::FontRef;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use facewatch_core::ui::{reference_hint, Banner};
use facewatch_core::upload::pick_first;
use facewatch_core::{Canvas, DrawOp, ReferenceState, StatusReport};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "facewatch", about = "facewatch webcam face detection and matching CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Use an image as the face to match (only the first file is used)
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Drop the uploaded image and match against the default again
    Deselect,
    /// Show daemon status
    Status,
    /// Print the current overlay, optionally rendering it to a PNG
    Overlay {
        /// Write the rasterized overlay here
        #[arg(long)]
        png: Option<PathBuf>,
        /// TrueType font used for text in the PNG
        #[arg(long)]
        font: Option<PathBuf>,
    },
    /// Follow status and overlay text live
    Watch {
        #[arg(long, default_value_t = 200)]
        interval_ms: u64,
    },
    /// Retry opening the camera after a failure
    Retry,
    /// List V4L2 capture devices
    Devices,
}

#[zbus::proxy(
    interface = "io.github.facewatch.Facewatch1",
    default_service = "io.github.facewatch.Facewatch1",
    default_path = "/io/github/facewatch/Facewatch1"
)]
trait Facewatch {
    async fn set_reference(&self, data_uri: &str) -> zbus::Result<String>;
    async fn deselect_reference(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn overlay(&self) -> zbus::Result<String>;
    async fn retry_camera(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Devices = cli.command {
        let devices = facewatch_hw::Camera::list_devices();
        if devices.is_empty() {
            println!("No V4L2 capture devices found");
        }
        for d in devices {
            println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
        }
        return Ok(());
    }

    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    let proxy = FacewatchProxy::new(&conn)
        .await
        .context("facewatchd is not running")?;

    match cli.command {
        Commands::Upload { files } => {
            let uri = pick_first(&files)?;
            let state: ReferenceState = serde_json::from_str(&proxy.set_reference(&uri).await?)?;
            print_reference(&state);
        }
        Commands::Deselect => {
            let state: ReferenceState =
                serde_json::from_str(&proxy.deselect_reference().await?)?;
            print_reference(&state);
        }
        Commands::Status => {
            let report = fetch_status(&proxy).await?;
            print_status(&report);
        }
        Commands::Overlay { png, font } => {
            let canvas = fetch_overlay(&proxy).await?;
            let Some(canvas) = canvas else {
                println!("No overlay yet");
                return Ok(());
            };
            print_overlay(&canvas);
            if let Some(path) = png {
                let font_data = font
                    .map(|f| std::fs::read(&f).with_context(|| format!("reading {}", f.display())))
                    .transpose()?;
                let font = font_data
                    .as_deref()
                    .map(FontRef::try_from_slice)
                    .transpose()
                    .map_err(|e| anyhow!("invalid font: {e}"))?;
                canvas
                    .rasterize(font.as_ref())
                    .save(&path)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Overlay written to {}", path.display());
            }
        }
        Commands::Watch { interval_ms } => {
            watch(&proxy, Duration::from_millis(interval_ms.max(1))).await?;
        }
        Commands::Retry => {
            let report: StatusReport = serde_json::from_str(&proxy.retry_camera().await?)?;
            print_status(&report);
        }
        Commands::Devices => {}
    }

    Ok(())
}

async fn fetch_status(proxy: &FacewatchProxy<'_>) -> Result<StatusReport> {
    let json = proxy.status().await.context("Status call failed")?;
    serde_json::from_str(&json).context("malformed status report")
}

async fn fetch_overlay(proxy: &FacewatchProxy<'_>) -> Result<Option<Canvas>> {
    let json = proxy.overlay().await.context("Overlay call failed")?;
    serde_json::from_str(&json).context("malformed overlay")
}

fn print_status(report: &StatusReport) {
    println!("facewatchd {}", report.version);
    println!("  state:     {}", report.session.name());
    let banner = Banner::for_status(report);
    if !banner.text().is_empty() {
        println!("  banner:    {}", banner.text());
    }
    if let Some((w, h)) = report.video {
        println!("  video:     {w}x{h}");
    }
    println!(
        "  ticks:     {} ({} with faces)",
        report.ticks, report.frames_with_faces
    );
    if let Some(at) = report.last_face_at {
        println!("  last face: {}", at.to_rfc3339());
    }
    print_reference(&report.reference);
}

fn print_reference(state: &ReferenceState) {
    match state {
        ReferenceState::Active { origin, faces } => {
            println!("  reference: {origin:?} image, {faces} face(s)")
        }
        other => {
            if let Some(hint) = reference_hint(other) {
                println!("  reference: {hint}");
            } else {
                println!("  reference: pending");
            }
        }
    }
}

fn print_overlay(canvas: &Canvas) {
    for op in &canvas.ops {
        if let DrawOp::TextField { anchor, lines } = op {
            println!("  [{:>4.0},{:>4.0}] {}", anchor.0, anchor.1, lines.join(" | "));
        }
    }
}

/// Lines `watch` should print for a new report: the banner when it changed,
/// and the reference hint when the reference changed.
#[derive(Default)]
struct WatchState {
    banner: Option<Banner>,
    reference: Option<ReferenceState>,
}

impl WatchState {
    fn update(&mut self, report: &StatusReport) -> Vec<String> {
        let mut lines = Vec::new();
        let banner = Banner::for_status(report);
        if self.banner.as_ref() != Some(&banner) {
            lines.push(banner.text().to_string());
            self.banner = Some(banner);
        }
        if self.reference.as_ref() != Some(&report.reference) {
            if let Some(hint) = reference_hint(&report.reference) {
                lines.push(hint);
            }
            self.reference = Some(report.reference.clone());
        }
        lines
    }
}

/// Poll the daemon, printing banner and reference changes and the text of
/// each new overlay.
async fn watch(proxy: &FacewatchProxy<'_>, interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut state = WatchState::default();
    let mut last_overlay = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let report = fetch_status(proxy).await?;
        for line in state.update(&report) {
            println!("{line}");
        }

        if report.last_face_at != last_overlay {
            last_overlay = report.last_face_at;
            if let Some(canvas) = fetch_overlay(proxy).await? {
                print_overlay(&canvas);
            }
        }
    }
}
