//! Scanning loop: pull frames, decode, hand decoded texts to a callback
//!
//! Capture and decoding run on a blocking worker; the callback runs on the
//! async side in frame order.

pub mod display;
pub mod handler;

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::capture::qr::{ScanBox, detect_qr_codes, distinct_contents};
use crate::capture::{Frame, FrameSource};
use crate::config::ScannerConfig;

/// Decoded frames buffered between the worker and the callback
const DECODE_QUEUE: usize = 16;

/// Frame pacing and decode region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    /// Maximum frames per second (0 = unpaced)
    pub fps: u32,
    pub scan_box: ScanBox,
    /// Downsampling bound passed to the decoder (0 = never)
    pub max_dim: u32,
}

impl ScanSettings {
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            fps: config.fps,
            scan_box: ScanBox::new(config.qrbox),
            max_dim: config.max_dim,
        }
    }

    /// Minimum time between two frames
    pub fn frame_interval(&self) -> Option<Duration> {
        (self.fps > 0).then(|| Duration::from_secs(1) / self.fps)
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from_config(&ScannerConfig::default())
    }
}

/// Turns a frame into the texts it carries
pub trait FrameDecoder: Send + 'static {
    fn decode(&self, frame: &Frame) -> Vec<String>;
}

/// rqrr-backed decoder restricted to the scan box
#[derive(Debug, Clone, Copy)]
pub struct QrDecoder {
    pub scan_box: ScanBox,
    pub max_dim: u32,
}

impl FrameDecoder for QrDecoder {
    fn decode(&self, frame: &Frame) -> Vec<String> {
        let codes = detect_qr_codes(&frame.rgba, self.scan_box, self.max_dim);
        distinct_contents(&codes)
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}

/// Counters reported when a scan session ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub frames: u64,
    pub decodes: u64,
}

pub struct Scanner<D = QrDecoder> {
    settings: ScanSettings,
    decoder: D,
    stop: &'static AtomicBool,
}

impl Scanner<QrDecoder> {
    pub fn new(settings: ScanSettings, stop: &'static AtomicBool) -> Self {
        let decoder = QrDecoder {
            scan_box: settings.scan_box,
            max_dim: settings.max_dim,
        };
        Self::with_decoder(settings, decoder, stop)
    }
}

impl<D: FrameDecoder> Scanner<D> {
    pub fn with_decoder(settings: ScanSettings, decoder: D, stop: &'static AtomicBool) -> Self {
        Self {
            settings,
            decoder,
            stop,
        }
    }

    /// Scan until the source is exhausted, fails, or the stop flag is raised
    ///
    /// `on_decoded` is invoked once per distinct text in each frame.
    pub async fn run<S, F>(self, source: S, mut on_decoded: F) -> Result<ScanSummary>
    where
        S: FrameSource + 'static,
        F: FnMut(&str),
    {
        let (tx, mut rx) = mpsc::channel::<Vec<String>>(DECODE_QUEUE);
        let Self {
            settings,
            decoder,
            stop,
        } = self;

        log::info!(
            "Scanning at {} fps, scan box {} px",
            settings.fps,
            settings.scan_box.size
        );

        let worker =
            tokio::task::spawn_blocking(move || decode_loop(source, decoder, settings, stop, tx));

        let mut decodes = 0;
        while let Some(texts) = rx.recv().await {
            for text in &texts {
                decodes += 1;
                on_decoded(text);
            }
        }

        let frames = worker.await.context("Scan worker panicked")??;
        log::info!("Scan finished: {} frames, {} decodes", frames, decodes);
        Ok(ScanSummary { frames, decodes })
    }
}

fn decode_loop<S: FrameSource, D: FrameDecoder>(
    mut source: S,
    decoder: D,
    settings: ScanSettings,
    stop: &AtomicBool,
    tx: mpsc::Sender<Vec<String>>,
) -> Result<u64> {
    let interval = settings.frame_interval();
    let mut frames = 0;

    while !stop.load(Ordering::Relaxed) {
        let started = Instant::now();
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                log::error!("Frame source failed: {:#}", e);
                return Err(e);
            }
        };
        frames += 1;

        let texts = decoder.decode(&frame);
        if !texts.is_empty() {
            log::debug!(
                "Frame {} ({}x{}) decoded {:?}",
                frame.sequence,
                frame.width(),
                frame.height(),
                texts
            );
            if tx.blocking_send(texts).is_err() {
                log::debug!("Decode receiver closed, stopping scan");
                break;
            }
        }

        if let Some(interval) = interval {
            let elapsed = started.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
    }

    Ok(frames)
}
