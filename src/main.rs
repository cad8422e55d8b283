mod capture;
mod client;
mod config;
mod scanner;
mod server;
mod signal;
mod store;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use capture::FrameSource;
use capture::files::ImageFilesSource;
use capture::qr::{ScanBox, detect_qr_codes, distinct_contents};
use client::AttendanceClient;
use config::{Config, FacingMode, ScannerConfig};
use scanner::display::TerminalDisplay;
use scanner::handler::{ScanHandler, ScanTasks};
use scanner::{ScanSettings, Scanner};

#[derive(Parser, Debug)]
#[command(name = "qrattend", version, about = "QR code attendance scanner and server")]
struct Cli {
    /// Config file (defaults to <config dir>/qrattend/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan codes and register each one with the attendance server
    Scan {
        /// Scan from the camera (the default)
        #[arg(long, conflicts_with = "images")]
        camera: bool,
        /// Replay images from a file or directory instead of the camera
        #[arg(long)]
        images: Option<PathBuf>,
        /// Replay images forever
        #[arg(long = "loop", default_value_t = false, requires = "images")]
        loop_forever: bool,
        /// Attendance server base URL
        #[arg(long)]
        server: Option<String>,
        #[arg(long)]
        fps: Option<u32>,
        /// Side of the centered scan box in pixels (0 = whole frame)
        #[arg(long)]
        qrbox: Option<u32>,
        /// environment or user
        #[arg(long)]
        facing_mode: Option<FacingMode>,
        /// Camera device node, overrides the facing mode
        #[arg(long)]
        device: Option<PathBuf>,
    },
    /// Print the codes found in still images
    Decode {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Write the effective configuration to the config file
    InitConfig,
    /// Run the attendance server
    Serve {
        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,
        /// Roster database file
        #[arg(long)]
        database: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan {
            camera,
            images,
            loop_forever,
            server,
            fps,
            qrbox,
            facing_mode,
            device,
        } => {
            let scanner_config = &mut config.scanner;
            if let Some(server) = server {
                scanner_config.server_url = server;
            }
            if let Some(fps) = fps {
                scanner_config.fps = fps;
            }
            if let Some(qrbox) = qrbox {
                scanner_config.qrbox = qrbox;
            }
            if let Some(facing_mode) = facing_mode {
                scanner_config.facing_mode = facing_mode;
            }
            if device.is_some() {
                scanner_config.device = device;
            }

            let source: Box<dyn FrameSource> = match images {
                Some(path) if !camera => Box::new(ImageFilesSource::open(&path, loop_forever)?),
                _ => open_camera(&config.scanner)?,
            };
            run_scan(&config.scanner, source).await
        }
        Commands::Decode { images } => decode_images(&images),
        Commands::InitConfig => {
            let path = cli
                .config
                .or_else(Config::default_path)
                .context("Could not determine config directory")?;
            config.save(&path)?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Serve { bind, database } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(database) = database {
                config.server.database = database;
            }
            signal::setup_signal_handler();
            server::serve(&config.server, signal::stop_flag()).await
        }
    }
}

async fn run_scan(config: &ScannerConfig, source: Box<dyn FrameSource>) -> Result<()> {
    signal::setup_signal_handler();

    let client = AttendanceClient::new(&config.server_url, config.request_timeout())?;
    log::info!("Posting scans to {}", client.endpoint());
    let handler = ScanHandler::new(Arc::new(TerminalDisplay::new()), client);

    let mut tasks = ScanTasks::new();
    let scanner = Scanner::new(ScanSettings::from_config(config), signal::stop_flag());
    let result = scanner
        .run(source, |decoded| handler.on_scan_decoded(decoded, &mut tasks))
        .await;

    // Let in-flight requests finish so their responses are still logged
    tasks.drain().await;
    println!();

    result.map(|_| ())
}

#[cfg(feature = "camera")]
fn open_camera(config: &ScannerConfig) -> Result<Box<dyn FrameSource>> {
    use capture::camera::{CameraSource, device_for_facing, list_devices};

    let device = match &config.device {
        Some(device) => device.clone(),
        None => {
            let devices = list_devices();
            log::debug!("Camera devices: {:?}", devices);
            device_for_facing(config.facing_mode, &devices)
                .context("No camera found under /dev/video*")?
        }
    };
    Ok(Box::new(CameraSource::new(&device, config.fps)?))
}

#[cfg(not(feature = "camera"))]
fn open_camera(_config: &ScannerConfig) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!("Built without camera support; use --images")
}

fn decode_images(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        for text in decode_image(path)? {
            println!("{}", text);
        }
    }
    Ok(())
}

fn decode_image(path: &Path) -> Result<Vec<String>> {
    let rgba = image::open(path)
        .with_context(|| format!("Failed to open image {}", path.display()))?
        .to_rgba8();
    let codes = detect_qr_codes(&rgba, ScanBox::new(0), ScannerConfig::default().max_dim);
    if codes.is_empty() {
        log::warn!("No QR code found in {}", path.display());
    }
    Ok(distinct_contents(&codes)
        .into_iter()
        .map(str::to_string)
        .collect())
}
