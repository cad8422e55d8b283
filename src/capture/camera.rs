//! Camera capture through a GStreamer V4L2 pipeline

use anyhow::{Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::path::{Path, PathBuf};

use super::{Frame, FrameSource};
use crate::config::FacingMode;

/// How long a single pull waits before checking the bus again
const PULL_TIMEOUT_MS: u64 = 500;

/// Live camera feed delivering RGBA frames
pub struct CameraSource {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    device: PathBuf,
    sequence: u64,
}

impl CameraSource {
    /// Create and start a capture pipeline
    ///
    /// # Arguments
    /// * `device` - V4L2 device node (e.g. /dev/video0)
    /// * `framerate` - Frames per second requested from the camera (0 = camera default)
    pub fn new(device: &Path, framerate: u32) -> Result<Self> {
        gst::init().context("Failed to initialize GStreamer")?;

        log::info!(
            "Opening camera {} @ {} fps",
            device.display(),
            framerate
        );

        let pipeline = gst::Pipeline::new();

        // Create elements
        let source = gst::ElementFactory::make("v4l2src")
            .name("camera-source")
            .property("device", device.to_string_lossy().as_ref())
            .build()
            .context("Failed to create v4l2src element")?;

        let videoconvert = gst::ElementFactory::make("videoconvert")
            .build()
            .context("Failed to create videoconvert element")?;

        let videorate = gst::ElementFactory::make("videorate")
            .build()
            .context("Failed to create videorate element")?;

        // Configure appsink caps (raw RGBA video)
        let mut caps = gst::Caps::builder("video/x-raw").field("format", "RGBA");
        if framerate > 0 {
            caps = caps.field("framerate", gst::Fraction::new(framerate as i32, 1));
        }
        let caps = caps.build();

        // Keep only the newest frame so decoding never lags behind the camera
        let appsink = gst_app::AppSink::builder()
            .name("frame-sink")
            .caps(&caps)
            .max_buffers(1)
            .drop(true)
            .sync(false)
            .build();

        // Add elements to pipeline
        pipeline.add_many([&source, &videoconvert, &videorate, appsink.upcast_ref()])?;

        // Link elements
        gst::Element::link_many([&source, &videoconvert, &videorate, appsink.upcast_ref()])?;

        pipeline
            .set_state(gst::State::Playing)
            .with_context(|| format!("Failed to start camera {}", device.display()))?;

        Ok(Self {
            pipeline,
            appsink,
            device: device.to_path_buf(),
            sequence: 0,
        })
    }

    /// Surface the first pending error message on the pipeline bus
    fn check_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        if let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
            if let gst::MessageView::Error(err) = msg.view() {
                anyhow::bail!(
                    "Camera {} error: {} ({:?})",
                    self.device.display(),
                    err.error(),
                    err.debug()
                );
            }
        }
        Ok(())
    }

    fn sample_to_frame(&mut self, sample: &gst::Sample) -> Result<Frame> {
        let caps = sample.caps().context("Sample has no caps")?;
        let info = gst_video::VideoInfo::from_caps(caps).context("Failed to parse video caps")?;
        let buffer = sample.buffer().context("Sample has no buffer")?;
        let map = buffer
            .map_readable()
            .context("Failed to map frame buffer")?;

        let stride = info.stride()[0].max(0) as usize;
        let frame = Frame::from_strided(
            map.as_slice(),
            info.width(),
            info.height(),
            stride,
            self.sequence,
        )?;
        self.sequence += 1;
        Ok(frame)
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            self.check_bus()?;

            if let Some(sample) = self
                .appsink
                .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
            {
                return self.sample_to_frame(&sample).map(Some);
            }

            if self.appsink.is_eos() {
                log::info!("Camera {} reached end of stream", self.device.display());
                return Ok(None);
            }
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            log::warn!("Failed to stop camera pipeline: {}", e);
        }
    }
}

/// List capture-capable V4L2 device nodes, ordered by their number
///
/// GStreamer's device monitor only reports `Video/Source` devices, which
/// leaves out the metadata nodes UVC webcams expose next to the capture
/// node. When the monitor yields nothing, `/dev/video*` nodes are scanned
/// and filtered through sysfs instead.
pub fn list_devices() -> Vec<PathBuf> {
    let devices = match monitor_devices() {
        Ok(devices) if !devices.is_empty() => devices,
        Ok(_) => scan_dev_nodes(),
        Err(e) => {
            log::debug!("Device monitor unavailable: {:#}", e);
            scan_dev_nodes()
        }
    };
    sort_by_index(devices)
}

/// Device nodes of the video sources GStreamer knows about
fn monitor_devices() -> Result<Vec<PathBuf>> {
    gst::init().context("Failed to initialize GStreamer")?;

    let monitor = gst::DeviceMonitor::new();
    monitor.add_filter(Some("Video/Source"), None);
    monitor.start().context("Failed to start device monitor")?;
    let found = monitor.devices();
    monitor.stop();

    let mut devices = Vec::new();
    for device in found {
        let Some(props) = device.properties() else {
            continue;
        };
        // v4l2 provider names the node differently across GStreamer versions
        let path = props
            .get::<String>("api.v4l2.path")
            .or_else(|_| props.get::<String>("device.path"));
        match path {
            Ok(path) if path.starts_with("/dev/video") => {
                let path = PathBuf::from(path);
                if !devices.contains(&path) {
                    devices.push(path);
                }
            }
            _ => log::trace!("Skipping device {} without a V4L2 node", device.display_name()),
        }
    }
    Ok(devices)
}

/// `/dev/video*` nodes whose sysfs index marks them as the primary capture node
fn scan_dev_nodes() -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir("/dev") else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| video_index(path).is_some())
        .filter(|path| is_capture_node(path))
        .collect()
}

fn is_capture_node(path: &Path) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let index = Path::new("/sys/class/video4linux").join(name).join("index");
    match std::fs::read_to_string(index) {
        Ok(index) => index.trim() == "0",
        // No sysfs entry to go by
        Err(_) => true,
    }
}

/// Number after `video` in a device node name
fn video_index(path: &Path) -> Option<u32> {
    path.file_name()?
        .to_str()?
        .strip_prefix("video")?
        .parse()
        .ok()
}

fn sort_by_index(mut devices: Vec<PathBuf>) -> Vec<PathBuf> {
    devices.sort_by_key(|path| (video_index(path).unwrap_or(u32::MAX), path.clone()));
    devices
}

/// Pick a device for a facing mode
///
/// Front cameras are usually enumerated first, so `User` takes the first node
/// and `Environment` the last one.
pub fn device_for_facing(mode: FacingMode, devices: &[PathBuf]) -> Option<PathBuf> {
    match mode {
        FacingMode::User => devices.first().cloned(),
        FacingMode::Environment => devices.last().cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_for_facing() {
        let devices = vec![PathBuf::from("/dev/video0"), PathBuf::from("/dev/video2")];
        assert_eq!(
            device_for_facing(FacingMode::User, &devices),
            Some(PathBuf::from("/dev/video0"))
        );
        assert_eq!(
            device_for_facing(FacingMode::Environment, &devices),
            Some(PathBuf::from("/dev/video2"))
        );
        assert_eq!(device_for_facing(FacingMode::Environment, &[]), None);
    }

    #[test]
    fn test_devices_sorted_by_number() {
        let devices = sort_by_index(vec![
            PathBuf::from("/dev/video10"),
            PathBuf::from("/dev/video2"),
            PathBuf::from("/dev/video0"),
            PathBuf::from("/dev/video9"),
        ]);
        assert_eq!(
            devices,
            vec![
                PathBuf::from("/dev/video0"),
                PathBuf::from("/dev/video2"),
                PathBuf::from("/dev/video9"),
                PathBuf::from("/dev/video10"),
            ]
        );
        assert_eq!(
            device_for_facing(FacingMode::Environment, &devices),
            Some(PathBuf::from("/dev/video10"))
        );
    }

    #[test]
    fn test_video_index() {
        assert_eq!(video_index(Path::new("/dev/video12")), Some(12));
        assert_eq!(video_index(Path::new("/dev/video")), None);
        assert_eq!(video_index(Path::new("/dev/video-cam")), None);
        assert_eq!(video_index(Path::new("/dev/sda")), None);
    }

    #[test]
    fn test_list_devices_sorted() {
        // May be empty on machines without cameras
        let devices = list_devices();
        for pair in devices.windows(2) {
            assert!(video_index(&pair[0]) <= video_index(&pair[1]));
        }
    }
}
