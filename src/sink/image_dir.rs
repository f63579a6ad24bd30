use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

use crate::frame::{Frame, PixelArrangement};
use crate::pipeline::{Lifecycle, Sink, SinkControl};

/// Writes each frame as `frame_NNNNNN.png` into a directory.
pub struct ImageDirSink {
    dir: PathBuf,
    written: u64,
}

impl ImageDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: 0,
        }
    }
}

impl Lifecycle for ImageDirSink {
    fn name(&self) -> &str {
        "ImageDirSink"
    }

    fn open(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating output directory {}", self.dir.display()))
    }

    fn close(&mut self) -> Result<()> {
        log::info!("ImageDirSink: wrote {} frames to {}", self.written, self.dir.display());
        Ok(())
    }
}

impl Sink for ImageDirSink {
    fn consume(&mut self, frame: Frame) -> Result<SinkControl> {
        let frame = frame.to_arrangement(PixelArrangement::Hwc);
        let (width, height) = (frame.width(), frame.height());
        let path = self.dir.join(format!("frame_{:06}.png", frame.sequence));
        let saved = if frame.format().has_alpha() {
            let rgba = frame.as_rgba()?.into_owned();
            image::RgbaImage::from_raw(width, height, rgba)
                .ok_or_else(|| anyhow!("rgba buffer does not match {}x{}", width, height))?
                .save(&path)
        } else {
            let rgb = frame.as_rgb()?.into_owned();
            image::RgbImage::from_raw(width, height, rgb)
                .ok_or_else(|| anyhow!("rgb buffer does not match {}x{}", width, height))?
                .save(&path)
        };
        saved.with_context(|| format!("writing {}", path.display()))?;
        self.written += 1;
        Ok(SinkControl::Continue)
    }
}
