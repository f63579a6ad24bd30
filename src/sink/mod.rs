//! Frame sinks.

#[cfg(feature = "image-io")]
mod image_dir;

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;

use crate::frame::Frame;
use crate::pipeline::{Lifecycle, Sink, SinkControl};

#[cfg(feature = "image-io")]
pub use image_dir::ImageDirSink;

/// Discards frames.
#[derive(Debug, Default)]
pub struct NullSink {
    consumed: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Lifecycle for NullSink {
    fn name(&self) -> &str {
        "NullSink"
    }

    fn close(&mut self) -> Result<()> {
        log::info!("NullSink: discarded {} frames", self.consumed);
        Ok(())
    }
}

impl Sink for NullSink {
    fn consume(&mut self, _frame: Frame) -> Result<SinkControl> {
        self.consumed += 1;
        Ok(SinkControl::Continue)
    }
}

/// Shared handle onto the frames a `CollectSink` received.
#[derive(Clone, Default)]
pub struct Collected {
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl Collected {
    fn lock(&self) -> MutexGuard<'_, Vec<Frame>> {
        self.frames.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn take(&self) -> Vec<Frame> {
        std::mem::take(&mut *self.lock())
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.lock().iter().map(|f| f.sequence).collect()
    }
}

/// Keeps every frame in memory; optionally requests a stop after `limit` frames.
#[derive(Default)]
pub struct CollectSink {
    collected: Collected,
    limit: Option<usize>,
    main_thread: bool,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Ask the threaded scheduler to run this sink on its calling thread.
    pub fn on_main_thread(mut self) -> Self {
        self.main_thread = true;
        self
    }

    pub fn collected(&self) -> Collected {
        self.collected.clone()
    }
}

impl Lifecycle for CollectSink {
    fn name(&self) -> &str {
        "CollectSink"
    }
}

impl Sink for CollectSink {
    fn consume(&mut self, frame: Frame) -> Result<SinkControl> {
        let mut frames = self.collected.lock();
        frames.push(frame);
        Ok(match self.limit {
            Some(limit) if frames.len() >= limit => SinkControl::Stop,
            _ => SinkControl::Continue,
        })
    }

    fn requires_main_thread(&self) -> bool {
        self.main_thread
    }
}
