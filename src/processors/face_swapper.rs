use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

use crate::accel::ExecutionContext;
use crate::compose::composite_all;
use crate::frame::{BoundingBox, Frame, PixelArrangement, PixelFormat};
use crate::imaging::{chw_f32_to_hwc_u8, crop_hwc, hwc_u8_to_chw_f32, resize_bilinear};
use crate::pipeline::{Lifecycle, Stage};
use crate::timer::Timer;

pub const DEFAULT_SWAP_INPUT_SIZE: u32 = 512;

/// Replaces detected faces with the output of an RGBA generator model.
///
/// Each region is cropped, resized to `input_size`, fed as a `[1, 3, S, S]`
/// float tensor in `[0, 1]`, and the `[1, 4, S, S]` RGBA output is alpha
/// composited back over the region. Frames without regions pass through.
pub struct FaceSwapper {
    context: ExecutionContext,
    input_size: u32,
    max_faces: usize,
    timer: Timer,
}

impl FaceSwapper {
    pub fn new(context: ExecutionContext) -> Self {
        Self {
            context,
            input_size: DEFAULT_SWAP_INPUT_SIZE,
            max_faces: 1,
            timer: Timer::new(),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(ExecutionContext::on_host(path))
    }

    pub fn with_input_size(mut self, size: u32) -> Self {
        self.input_size = size;
        self
    }

    pub fn with_max_faces(mut self, max_faces: usize) -> Self {
        self.max_faces = max_faces;
        self
    }

    fn check_bindings(&self) -> Result<()> {
        let size = self.input_size as usize;
        let input = &self.context.inputs()?[0];
        if input.shape() != [1, 3, size, size] {
            return Err(anyhow!(
                "swapper input {} has shape {:?}, expected [1, 3, {}, {}]",
                input.name(),
                input.shape(),
                size,
                size
            ));
        }
        let output = &self.context.outputs()?[0];
        if output.element_count() != 4 * size * size {
            return Err(anyhow!(
                "swapper output {} has shape {:?}, expected 4 x {} x {}",
                output.name(),
                output.shape(),
                size,
                size
            ));
        }
        Ok(())
    }

    fn swap_region(&mut self, rgb: &[u8], width: u32, height: u32, region: BoundingBox) -> Result<Frame> {
        let size = self.input_size;
        let tensor = {
            let _span = self.timer.span("FaceSwapper.preprocess");
            let crop = crop_hwc(rgb, width, height, 3, region)?;
            let resized = resize_bilinear(&crop, region.width, region.height, 3, size, size)?;
            hwc_u8_to_chw_f32(&resized, size, size, 3, 1.0 / 255.0, 0.0)
        };
        let outputs = {
            let _span = self.timer.span("FaceSwapper.infer");
            self.context.infer_f32(&tensor).context("swapper inference")?
        };
        let _span = self.timer.span("FaceSwapper.postprocess");
        let rgba = outputs
            .first()
            .ok_or_else(|| anyhow!("swapper produced no outputs"))?;
        let pixels = chw_f32_to_hwc_u8(rgba, size, size, 4);
        Frame::from_u8(pixels, PixelFormat::RgbaU8, PixelArrangement::Hwc, size, size)
    }
}

impl Lifecycle for FaceSwapper {
    fn name(&self) -> &str {
        "FaceSwapper"
    }

    fn open(&mut self) -> Result<()> {
        self.context.open()?;
        if let Err(err) = self.check_bindings() {
            if let Err(close_err) = self.context.close() {
                log::warn!("FaceSwapper: close after failed open: {:#}", close_err);
            }
            return Err(err);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.context.close()
    }
}

impl Stage for FaceSwapper {
    fn apply(&mut self, frame: Frame) -> Result<Frame> {
        if frame.regions.is_empty() {
            return Ok(frame);
        }
        if frame.arrangement() != PixelArrangement::Hwc {
            return Err(anyhow!("FaceSwapper expects interleaved frames"));
        }
        let (width, height) = (frame.width(), frame.height());
        let regions: Vec<BoundingBox> = frame
            .regions
            .iter()
            .take(self.max_faces)
            .map(|r| r.clamp_to(width, height))
            .filter(|r| !r.is_empty())
            .collect();

        let mut patches = Vec::with_capacity(regions.len());
        {
            let rgb = frame.as_rgb()?;
            for region in regions {
                patches.push((self.swap_region(&rgb, width, height, region)?, region));
            }
        }

        let _span = self.timer.span("FaceSwapper.composite");
        let refs: Vec<(&Frame, BoundingBox)> = patches.iter().map(|(p, r)| (p, *r)).collect();
        composite_all(frame, &refs)
    }

    fn bind_timer(&mut self, timer: &Timer) {
        self.timer = timer.clone();
    }
}
