//! SCRFD pre and post processing.
//!
//! The network sees a square letterboxed canvas and returns, per stride, a score
//! tensor, a box-distance tensor and optionally a keypoint-distance tensor. The
//! outputs are grouped by kind: all score tensors first, then all box tensors,
//! then all keypoint tensors.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::imaging::resize_bilinear;

use super::anchors::AnchorGrid;
use super::nms::suppress;
use super::result::Detection;

pub const KEYPOINTS_PER_FACE: usize = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrfdParams {
    pub input_size: u32,
    pub strides: Vec<u32>,
    pub anchors_per_cell: usize,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    /// Model carries a keypoint head (9 outputs instead of 6).
    pub keypoints: bool,
}

impl Default for ScrfdParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            strides: vec![8, 16, 32],
            anchors_per_cell: 2,
            score_threshold: 0.3,
            nms_threshold: 0.4,
            keypoints: true,
        }
    }
}

impl ScrfdParams {
    pub fn outputs_per_stride(&self) -> usize {
        if self.keypoints {
            3
        } else {
            2
        }
    }

    pub fn expected_outputs(&self) -> usize {
        self.strides.len() * self.outputs_per_stride()
    }
}

/// A source image mapped onto the square model canvas.
#[derive(Clone, Debug)]
pub struct Letterbox {
    /// Resized size divided by source size; detections are divided by it.
    pub scale: f32,
    pub width: u32,
    pub height: u32,
    /// CHW float canvas, `3 x size x size`, normalized to `[-1, 1]`.
    pub tensor: Vec<f32>,
}

/// Resize interleaved RGB to fit `size` preserving aspect, anchored top-left.
pub fn letterbox(rgb: &[u8], width: u32, height: u32, size: u32) -> Result<Letterbox> {
    let aspect = height as f32 / width as f32;
    let (new_w, new_h) = if height > width {
        (((size as f32 / aspect) as u32).max(1), size)
    } else {
        (size, ((size as f32 * aspect) as u32).max(1))
    };
    let scale = new_h as f32 / height as f32;
    let resized = resize_bilinear(rgb, width, height, 3, new_w, new_h)?;

    let plane = size as usize * size as usize;
    let mut tensor = vec![0.0f32; 3 * plane];
    for y in 0..new_h as usize {
        for x in 0..new_w as usize {
            for c in 0..3 {
                let v = resized[(y * new_w as usize + x) * 3 + c];
                tensor[c * plane + y * size as usize + x] = v as f32 / 127.5 - 1.0;
            }
        }
    }
    Ok(Letterbox {
        scale,
        width: new_w,
        height: new_h,
        tensor,
    })
}

/// Turn raw outputs into thresholded candidates in canvas coordinates.
pub fn decode(grid: &AnchorGrid, params: &ScrfdParams, outputs: &[Vec<f32>]) -> Result<Vec<Detection>> {
    let levels = grid.levels.len();
    if levels != params.strides.len() {
        return Err(anyhow!(
            "anchor grid has {} levels for {} strides",
            levels,
            params.strides.len()
        ));
    }
    if outputs.len() != params.expected_outputs() {
        return Err(anyhow!(
            "expected {} output tensors, got {}",
            params.expected_outputs(),
            outputs.len()
        ));
    }
    for (idx, level) in grid.levels.iter().enumerate() {
        let n = level.centers.len();
        let mut expected = vec![(idx, n), (idx + levels, 4 * n)];
        if params.keypoints {
            expected.push((idx + 2 * levels, 2 * KEYPOINTS_PER_FACE * n));
        }
        for (slot, len) in expected {
            if outputs[slot].len() != len {
                return Err(anyhow!(
                    "output {} for stride {} has {} values, expected {}",
                    slot,
                    level.stride,
                    outputs[slot].len(),
                    len
                ));
            }
        }
    }

    let mut candidates = Vec::new();
    for (idx, level) in grid.levels.iter().enumerate() {
        let stride = level.stride as f32;
        let scores = &outputs[idx];
        let boxes = &outputs[idx + levels];
        let kps = params.keypoints.then(|| &outputs[idx + 2 * levels]);
        for (a, &[cx, cy]) in level.centers.iter().enumerate() {
            let score = scores[a];
            // NaN never passes.
            if !(score >= params.score_threshold) {
                continue;
            }
            let d = &boxes[4 * a..4 * a + 4];
            let bbox = [
                cx - d[0] * stride,
                cy - d[1] * stride,
                cx + d[2] * stride,
                cy + d[3] * stride,
            ];
            let keypoints = match kps {
                Some(kps) => kps[2 * KEYPOINTS_PER_FACE * a..2 * KEYPOINTS_PER_FACE * (a + 1)]
                    .chunks_exact(2)
                    .map(|p| [cx + p[0] * stride, cy + p[1] * stride])
                    .collect(),
                None => Vec::new(),
            };
            candidates.push(Detection {
                bbox,
                score,
                keypoints,
            });
        }
    }
    Ok(candidates)
}

/// Map candidates back to source coordinates and suppress overlaps.
pub fn postprocess(candidates: Vec<Detection>, scale: f32, nms_threshold: f32) -> Vec<Detection> {
    let scaled = candidates.into_iter().map(|d| d.scaled(scale)).collect();
    suppress(scaled, nms_threshold)
}
