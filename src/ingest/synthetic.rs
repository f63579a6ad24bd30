use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::frame::{Frame, PixelArrangement, PixelFormat};
use crate::pipeline::{Lifecycle, Source};

/// Synthetic camera for `stub://` URIs.
///
/// Produces interleaved BGR frames, as a capture device would. The pattern
/// shifts every frame and the scene changes every 50 frames.
pub struct SyntheticSource {
    uri: String,
    width: u32,
    height: u32,
    limit: Option<u64>,
    interval: Option<Duration>,
    frame_count: u64,
    scene_state: u8,
    last_emit: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(uri: impl Into<String>, width: u32, height: u32) -> Result<Self> {
        let uri = uri.into();
        if !uri.starts_with("stub://") {
            return Err(anyhow!("synthetic source only serves stub:// URIs, got {}", uri));
        }
        if width == 0 || height == 0 {
            return Err(anyhow!("synthetic source needs non-zero dimensions"));
        }
        Ok(Self {
            uri,
            width,
            height,
            limit: None,
            interval: None,
            frame_count: 0,
            scene_state: 0,
            last_emit: None,
        })
    }

    /// End the stream after `frames` frames.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    /// Pace output like a live camera running at `fps`.
    pub fn with_fps(mut self, fps: f64) -> Self {
        if fps > 0.0 {
            self.interval = Some(Duration::from_secs_f64(1.0 / fps));
        }
        self
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = self.width as usize * self.height as usize * 3;
        if self.frame_count.is_multiple_of(50) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        (0..pixel_count)
            .map(|i| ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8)
            .collect()
    }

    fn pace(&mut self) {
        if let (Some(interval), Some(last)) = (self.interval, self.last_emit) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_emit = Some(Instant::now());
    }
}

impl Lifecycle for SyntheticSource {
    fn name(&self) -> &str {
        "SyntheticSource"
    }

    fn open(&mut self) -> Result<()> {
        log::info!(
            "SyntheticSource: serving {} at {}x{}",
            self.uri,
            self.width,
            self.height
        );
        Ok(())
    }
}

impl Source for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        self.pace();
        let pixels = self.generate_pixels();
        let frame = Frame::from_u8(
            pixels,
            PixelFormat::BgrU8,
            PixelArrangement::Hwc,
            self.width,
            self.height,
        )?
        .with_sequence(self.frame_count);
        self.frame_count += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_bgr_frames_until_limit() -> Result<()> {
        let mut source = SyntheticSource::new("stub://test", 64, 48)?.with_limit(2);
        source.open()?;
        let first = source.next_frame()?.ok_or_else(|| anyhow!("missing frame"))?;
        assert_eq!((first.width(), first.height()), (64, 48));
        assert_eq!(first.format(), PixelFormat::BgrU8);
        let second = source.next_frame()?.ok_or_else(|| anyhow!("missing frame"))?;
        assert_eq!(second.sequence, 1);
        assert_ne!(first.data(), second.data());
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn rejects_non_stub_uris() {
        assert!(SyntheticSource::new("rtsp://camera", 64, 48).is_err());
    }
}
