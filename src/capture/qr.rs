//! QR code detection module using rqrr

use image::RgbaImage;

/// Detected QR code with position and content
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedQrCode {
    /// Center position in frame pixel coordinates
    pub center_x: f32,
    pub center_y: f32,
    /// The decoded content of the QR code
    pub content: String,
}

/// Centered square region of a frame that is searched for codes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanBox {
    /// Side length in pixels (0 = whole frame)
    pub size: u32,
}

impl ScanBox {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    /// Region `(x, y, width, height)` this box covers in a `width`x`height` frame
    pub fn region(self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        if self.size == 0 {
            return (0, 0, width, height);
        }
        let side = self.size.min(width).min(height);
        ((width - side) / 2, (height - side) / 2, side, side)
    }
}

impl Default for ScanBox {
    fn default() -> Self {
        Self::new(250)
    }
}

/// Detect QR codes inside the scan box of a frame
/// max_dim: maximum dimension to downsample to (0 = no downsampling)
pub fn detect_qr_codes(img: &RgbaImage, scan_box: ScanBox, max_dim: u32) -> Vec<DetectedQrCode> {
    use rqrr::PreparedImage;

    let (x0, y0, w, h) = scan_box.region(img.width(), img.height());
    if w == 0 || h == 0 {
        return Vec::new();
    }

    let region = image::imageops::crop_imm(img, x0, y0, w, h).to_image();

    let downsample_factor = if max_dim > 0 && (w > max_dim || h > max_dim) {
        w.max(h) as f32 / max_dim as f32
    } else {
        1.0
    };

    let gray = if downsample_factor > 1.0 {
        let new_w = ((w as f32 / downsample_factor) as u32).max(1);
        let new_h = ((h as f32 / downsample_factor) as u32).max(1);
        let resized =
            image::imageops::resize(&region, new_w, new_h, image::imageops::FilterType::Nearest);
        image::DynamicImage::ImageRgba8(resized).to_luma8()
    } else {
        image::DynamicImage::ImageRgba8(region).to_luma8()
    };

    let mut prepared = PreparedImage::prepare(gray);
    let grids = prepared.detect_grids();
    log::trace!("{} candidate grids in {}x{} scan box", grids.len(), w, h);

    let mut results = Vec::new();
    for grid in grids {
        match grid.decode() {
            Ok((_, content)) => {
                let bounds = &grid.bounds;
                let cx = (bounds[0].x + bounds[1].x + bounds[2].x + bounds[3].x) as f32 / 4.0;
                let cy = (bounds[0].y + bounds[1].y + bounds[2].y + bounds[3].y) as f32 / 4.0;

                results.push(DetectedQrCode {
                    center_x: cx * downsample_factor + x0 as f32,
                    center_y: cy * downsample_factor + y0 as f32,
                    content,
                });
            }
            Err(e) => log::trace!("Skipping undecodable grid: {}", e),
        }
    }

    results
}

/// Decoded texts of a frame in detection order, without repeats
pub fn distinct_contents(codes: &[DetectedQrCode]) -> Vec<&str> {
    let mut seen: Vec<&str> = Vec::new();
    for code in codes {
        if !seen.contains(&code.content.as_str()) {
            seen.push(&code.content);
        }
    }
    seen
}

/// White `width`x`height` frame with `text` drawn as a QR code centered on `center`
#[cfg(test)]
pub fn render_qr(
    text: &str,
    width: u32,
    height: u32,
    center: (u32, u32),
    module: u32,
) -> RgbaImage {
    use image::Rgba;
    use qrcode::{Color, QrCode};

    let code = QrCode::new(text.as_bytes()).unwrap();
    let modules = code.width() as u32;
    let side = modules * module;
    let left = center.0 - side / 2;
    let top = center.1 - side / 2;

    let mut img = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    for (i, color) in code.to_colors().into_iter().enumerate() {
        if color != Color::Dark {
            continue;
        }
        let mx = i as u32 % modules;
        let my = i as u32 / modules;
        for y in 0..module {
            for x in 0..module {
                img.put_pixel(left + mx * module + x, top + my * module + y, Rgba([0, 0, 0, 255]));
            }
        }
    }
    img
}
