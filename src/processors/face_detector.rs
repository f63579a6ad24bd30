use anyhow::{anyhow, Result};

use crate::detect::DetectorBackend;
use crate::frame::{BoundingBox, Frame, PixelArrangement, PixelFormat};
use crate::pipeline::{Lifecycle, Stage};

pub const DEFAULT_EXPAND_SCALE: f32 = 1.5;

/// Runs a detector backend and attaches square face regions to the frame.
///
/// Expects interleaved `RgbU8` input.
pub struct FaceDetector {
    backend: Box<dyn DetectorBackend>,
    expand_scale: f32,
}

impl FaceDetector {
    pub fn new(backend: Box<dyn DetectorBackend>) -> Self {
        Self {
            backend,
            expand_scale: DEFAULT_EXPAND_SCALE,
        }
    }

    pub fn with_expand_scale(mut self, scale: f32) -> Self {
        self.expand_scale = scale;
        self
    }
}

impl Lifecycle for FaceDetector {
    fn name(&self) -> &str {
        "FaceDetector"
    }

    fn open(&mut self) -> Result<()> {
        self.backend.open()?;
        if let Err(err) = self.backend.warm_up() {
            if let Err(close_err) = self.backend.close() {
                log::warn!("{}: close after failed warm-up: {:#}", self.backend.name(), close_err);
            }
            return Err(err.context(format!("{} warm-up failed", self.backend.name())));
        }
        log::info!("FaceDetector: backend {} ready", self.backend.name());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.backend.close()
    }
}

impl Stage for FaceDetector {
    fn apply(&mut self, mut frame: Frame) -> Result<Frame> {
        if frame.format() != PixelFormat::RgbU8 || frame.arrangement() != PixelArrangement::Hwc {
            return Err(anyhow!(
                "FaceDetector expects rgb_u8 hwc frames, got {:?} {:?}",
                frame.format(),
                frame.arrangement()
            ));
        }
        let detections = self.backend.detect(&frame)?;
        let (width, height) = (frame.width(), frame.height());
        frame.regions = detections
            .iter()
            .map(|d| BoundingBox::expand_square(d.ltwh(), self.expand_scale, width, height))
            .collect();
        log::debug!("FaceDetector: frame {} -> {} faces", frame.sequence, frame.regions.len());
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::FixedBackend;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn attaches_expanded_regions() -> Result<()> {
        let backend = FixedBackend::single([100.0, 100.0, 40.0, 20.0], 0.9);
        let mut stage = FaceDetector::new(Box::new(backend));
        stage.open()?;
        let frame = Frame::filled(PixelFormat::RgbU8, PixelArrangement::Hwc, 640, 480, 0)?;
        let out = stage.apply(frame)?;
        assert_eq!(out.regions, vec![BoundingBox::new(90, 80, 60, 60)]);
        stage.close()
    }

    #[test]
    fn rejects_non_rgb_frames() -> Result<()> {
        let mut stage = FaceDetector::new(Box::new(FixedBackend::default()));
        let frame = Frame::filled(PixelFormat::BgrU8, PixelArrangement::Hwc, 4, 4, 0)?;
        assert!(stage.apply(frame).is_err());
        Ok(())
    }

    struct BrokenWarmUp {
        closed: Arc<AtomicBool>,
    }

    impl DetectorBackend for BrokenWarmUp {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<crate::detect::Detection>> {
            Err(anyhow!("device lost"))
        }
    }

    #[test]
    fn failed_warm_up_fails_open() {
        let closed = Arc::new(AtomicBool::new(false));
        let mut stage = FaceDetector::new(Box::new(BrokenWarmUp {
            closed: Arc::clone(&closed),
        }));
        let err = stage.open().unwrap_err();
        assert!(format!("{:#}", err).contains("device lost"));
        assert!(closed.load(Ordering::SeqCst));
    }
}
