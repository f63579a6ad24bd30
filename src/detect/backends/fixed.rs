use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Backend that reports the same detections for every frame.
#[derive(Clone, Debug, Default)]
pub struct FixedBackend {
    detections: Vec<Detection>,
}

impl FixedBackend {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    /// A single detection covering `[left, top, width, height]`.
    pub fn single(ltwh: [f32; 4], score: f32) -> Self {
        let [l, t, w, h] = ltwh;
        Self::new(vec![Detection::new([l, t, l + w, t + h], score)])
    }
}

impl DetectorBackend for FixedBackend {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self.detections.clone())
    }
}
