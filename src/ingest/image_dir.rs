#![cfg(feature = "image-io")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::frame::{Frame, PixelArrangement, PixelFormat};
use crate::pipeline::{Lifecycle, Source};

/// Decodes the PNG and JPEG files of a directory in file-name order.
pub struct ImageDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
            next: 0,
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
        .unwrap_or(false)
}

impl Lifecycle for ImageDirSource {
    fn name(&self) -> &str {
        "ImageDirSource"
    }

    fn open(&mut self) -> Result<()> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("reading image directory {}", self.dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_image(&path) {
                files.push(path);
            }
        }
        files.sort();
        log::info!("ImageDirSource: {} images in {}", files.len(), self.dir.display());
        self.files = files;
        self.next = 0;
        Ok(())
    }
}

impl Source for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        let image = image::open(path)
            .with_context(|| format!("decoding {}", path.display()))?
            .to_rgb8();
        let (width, height) = image.dimensions();
        let frame = Frame::from_u8(
            image.into_raw(),
            PixelFormat::RgbU8,
            PixelArrangement::Hwc,
            width,
            height,
        )
        .map_err(|err| anyhow!("{}: {:#}", path.display(), err))?
        .with_sequence(self.next as u64);
        self.next += 1;
        Ok(Some(frame))
    }
}
