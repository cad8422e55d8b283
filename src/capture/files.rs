//! Frame source replaying image files from disk

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::{Frame, FrameSource};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "webp"];

/// Replays a single image or every image in a directory as frames
#[derive(Debug)]
pub struct ImageFilesSource {
    paths: Vec<PathBuf>,
    next_index: usize,
    sequence: u64,
    loop_forever: bool,
}

impl ImageFilesSource {
    /// Create a source from a file or directory path
    ///
    /// Directory entries are filtered by image extension and sorted by name.
    pub fn open(path: &Path, loop_forever: bool) -> Result<Self> {
        let paths = if path.is_dir() {
            let mut paths: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("Failed to read directory {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_image_path(p))
                .collect();
            paths.sort();
            paths
        } else {
            anyhow::ensure!(path.exists(), "Image not found: {}", path.display());
            vec![path.to_path_buf()]
        };

        anyhow::ensure!(!paths.is_empty(), "No images found in {}", path.display());
        log::info!("Replaying {} image(s) from {}", paths.len(), path.display());

        Ok(Self::from_paths(paths, loop_forever))
    }

    pub fn from_paths(paths: Vec<PathBuf>, loop_forever: bool) -> Self {
        Self {
            paths,
            next_index: 0,
            sequence: 0,
            loop_forever,
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl FrameSource for ImageFilesSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.next_index >= self.paths.len() {
            if !self.loop_forever || self.paths.is_empty() {
                return Ok(None);
            }
            self.next_index = 0;
        }

        let path = &self.paths[self.next_index];
        let rgba = image::open(path)
            .with_context(|| format!("Failed to open image {}", path.display()))?
            .to_rgba8();
        log::debug!("Loaded frame from {}", path.display());

        let frame = Frame::new(rgba, self.sequence);
        self.next_index += 1;
        self.sequence += 1;
        Ok(Some(frame))
    }
}

fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
