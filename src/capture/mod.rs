//! Frame capture and decoding module
//!
//! This module consolidates:
//! - QR code detection (qr.rs)
//! - Frame type (image.rs)
//! - Camera capture through GStreamer (camera.rs)
//! - Image file replay (files.rs)

#[cfg(feature = "camera")]
pub mod camera;
pub mod files;
pub mod image;
pub mod qr;

use anyhow::Result;

pub use self::image::Frame;

/// A blocking producer of frames
pub trait FrameSource: Send {
    /// Pull the next frame. `Ok(None)` means the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }
}
