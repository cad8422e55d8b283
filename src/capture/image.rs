//! Frame type for captured camera and file images

use image::RgbaImage;

/// A single captured frame with raw RGBA data
#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: RgbaImage,
    /// Position of this frame in its source, starting at 0
    pub sequence: u64,
}

impl Frame {
    /// Create a new Frame from an RGBA image
    pub fn new(rgba: RgbaImage, sequence: u64) -> Self {
        log::trace!(
            "Frame {} captured: {}x{} pixels",
            sequence,
            rgba.width(),
            rgba.height()
        );
        Self { rgba, sequence }
    }

    /// Build a frame from tightly or loosely packed RGBA rows
    ///
    /// # Arguments
    /// * `data` - Raw pixel data
    /// * `width` - Frame width in pixels
    /// * `height` - Frame height in pixels
    /// * `stride` - Bytes per row in `data` (>= width * 4)
    pub fn from_strided(
        data: &[u8],
        width: u32,
        height: u32,
        stride: usize,
        sequence: u64,
    ) -> anyhow::Result<Self> {
        let row_len = width as usize * 4;
        anyhow::ensure!(
            stride >= row_len,
            "Stride {} is smaller than row length {}",
            stride,
            row_len
        );
        anyhow::ensure!(
            data.len() >= stride * height.saturating_sub(1) as usize + row_len,
            "Frame buffer too small for {}x{} (stride {})",
            width,
            height,
            stride
        );

        let mut pixels = Vec::with_capacity(row_len * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(&data[start..start + row_len]);
        }
        let rgba = RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow::anyhow!("Invalid frame dimensions {}x{}", width, height))?;
        Ok(Self::new(rgba, sequence))
    }

    /// Get the width of the frame
    pub fn width(&self) -> u32 {
        self.rgba.width()
    }

    /// Get the height of the frame
    pub fn height(&self) -> u32 {
        self.rgba.height()
    }
}
