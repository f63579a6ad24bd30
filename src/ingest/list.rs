use std::collections::VecDeque;

use anyhow::Result;

use crate::frame::Frame;
use crate::pipeline::{Lifecycle, Source};

/// Replays a fixed list of frames, numbering them in order.
pub struct FrameListSource {
    frames: VecDeque<Frame>,
    next_sequence: u64,
}

impl FrameListSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
            next_sequence: 0,
        }
    }

    /// `count` copies of `frame`.
    pub fn repeat(frame: Frame, count: usize) -> Self {
        Self::new(vec![frame; count])
    }
}

impl Lifecycle for FrameListSource {
    fn name(&self) -> &str {
        "FrameListSource"
    }
}

impl Source for FrameListSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.frames.pop_front().map(|frame| {
            let frame = frame.with_sequence(self.next_sequence);
            self.next_sequence += 1;
            frame
        }))
    }
}
