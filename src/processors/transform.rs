use anyhow::{Context, Result};

use crate::frame::{Frame, PixelArrangement, PixelFormat};
use crate::pipeline::{Lifecycle, Stage};

/// Converts every frame to a fixed pixel format, and optionally arrangement.
#[derive(Clone, Debug)]
pub struct PixelFormatTransformer {
    target: PixelFormat,
    arrangement: Option<PixelArrangement>,
}

impl PixelFormatTransformer {
    pub fn new(target: PixelFormat) -> Self {
        Self {
            target,
            arrangement: None,
        }
    }

    pub fn with_arrangement(mut self, arrangement: PixelArrangement) -> Self {
        self.arrangement = Some(arrangement);
        self
    }
}

impl Lifecycle for PixelFormatTransformer {
    fn name(&self) -> &str {
        "PixelFormatTransformer"
    }
}

impl Stage for PixelFormatTransformer {
    fn apply(&mut self, frame: Frame) -> Result<Frame> {
        let from = frame.format();
        let frame = frame
            .convert(self.target)
            .with_context(|| format!("converting {:?} to {:?}", from, self.target))?;
        Ok(match self.arrangement {
            Some(arrangement) => frame.to_arrangement(arrangement),
            None => frame,
        })
    }
}
