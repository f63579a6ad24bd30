use anyhow::Result;

use crate::frame::{BoundingBox, Frame};
use crate::pipeline::{Lifecycle, Stage};

pub const DEFAULT_MARK_SIZE: u32 = 10;

/// Blacks out a small square at the top-left corner of each region.
#[derive(Clone, Debug)]
pub struct ObjectMarker {
    size: u32,
}

impl Default for ObjectMarker {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectMarker {
    pub fn new() -> Self {
        Self {
            size: DEFAULT_MARK_SIZE,
        }
    }

    pub fn with_size(size: u32) -> Self {
        Self { size }
    }
}

impl Lifecycle for ObjectMarker {
    fn name(&self) -> &str {
        "ObjectMarker"
    }
}

impl Stage for ObjectMarker {
    fn apply(&mut self, mut frame: Frame) -> Result<Frame> {
        let corners: Vec<BoundingBox> = frame
            .regions
            .iter()
            .map(|r| BoundingBox::new(r.left, r.top, self.size, self.size))
            .collect();
        for corner in corners {
            frame.clear_rect(corner);
        }
        Ok(frame)
    }
}
