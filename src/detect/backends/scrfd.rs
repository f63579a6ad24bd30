use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

use crate::accel::ExecutionContext;
use crate::detect::anchors::AnchorGrid;
use crate::detect::backend::DetectorBackend;
use crate::detect::decode::{decode, letterbox, postprocess, ScrfdParams};
use crate::detect::result::Detection;
use crate::frame::{Frame, PixelArrangement};

/// SCRFD face detector running on an accelerator execution context.
pub struct ScrfdBackend {
    context: ExecutionContext,
    params: ScrfdParams,
    grid: AnchorGrid,
}

impl ScrfdBackend {
    pub fn new(context: ExecutionContext, params: ScrfdParams) -> Self {
        let grid = AnchorGrid::new(params.input_size, &params.strides, params.anchors_per_cell);
        Self {
            context,
            params,
            grid,
        }
    }

    /// Backend for a model file on the host device.
    pub fn from_path(path: impl Into<PathBuf>, params: ScrfdParams) -> Self {
        Self::new(ExecutionContext::on_host(path), params)
    }

    pub fn params(&self) -> &ScrfdParams {
        &self.params
    }

    fn check_bindings(&self) -> Result<()> {
        let size = self.params.input_size as usize;
        let input = &self.context.inputs()?[0];
        if input.shape() != [1, 3, size, size] {
            return Err(anyhow!(
                "detector input {} has shape {:?}, expected [1, 3, {}, {}]",
                input.name(),
                input.shape(),
                size,
                size
            ));
        }
        let outputs = self.context.outputs()?;
        if outputs.len() != self.params.expected_outputs() {
            return Err(anyhow!(
                "detector model has {} outputs, expected {}",
                outputs.len(),
                self.params.expected_outputs()
            ));
        }
        Ok(())
    }
}

impl DetectorBackend for ScrfdBackend {
    fn name(&self) -> &'static str {
        "scrfd"
    }

    fn open(&mut self) -> Result<()> {
        self.context.open()?;
        if let Err(err) = self.check_bindings() {
            if let Err(close_err) = self.context.close() {
                log::warn!("scrfd: closing after failed open: {:#}", close_err);
            }
            return Err(err);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.context.close()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if frame.arrangement() != PixelArrangement::Hwc {
            return Err(anyhow!("scrfd expects interleaved frames"));
        }
        let rgb = frame.as_rgb()?;
        let canvas = letterbox(&rgb, frame.width(), frame.height(), self.params.input_size)?;
        let outputs = self
            .context
            .infer_f32(&canvas.tensor)
            .context("scrfd inference")?;
        let candidates = decode(&self.grid, &self.params, &outputs)?;
        Ok(postprocess(candidates, canvas.scale, self.params.nms_threshold))
    }
}
