use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use tempfile::NamedTempFile;

use rtvideo::detect::DetectorBackend;
use rtvideo::{
    BoundingBox, Device, Engine, EngineLoader, ExecutionContext, FaceDetector, Frame, HostDevice, Lifecycle,
    PixelArrangement, PixelFormat, ScrfdBackend, ScrfdParams, Stage, TensorDesc,
};

const CANVAS: usize = 64;
// Anchors per stride level on a 64x64 canvas with 2 anchors per cell.
const ANCHORS_16: usize = 4 * 4 * 2;
const ANCHORS_32: usize = 2 * 2 * 2;

fn params() -> ScrfdParams {
    ScrfdParams {
        input_size: CANVAS as u32,
        strides: vec![16, 32],
        ..ScrfdParams::default()
    }
}

fn scrfd_tensors(input_size: usize) -> Vec<TensorDesc> {
    vec![
        TensorDesc::input("input.1", vec![1, 3, input_size, input_size]),
        TensorDesc::output("score_16", vec![ANCHORS_16, 1]),
        TensorDesc::output("score_32", vec![ANCHORS_32, 1]),
        TensorDesc::output("bbox_16", vec![ANCHORS_16, 4]),
        TensorDesc::output("bbox_32", vec![ANCHORS_32, 4]),
        TensorDesc::output("kps_16", vec![ANCHORS_16, 10]),
        TensorDesc::output("kps_32", vec![ANCHORS_32, 10]),
    ]
}

/// Emits one face on the stride-32 level: anchor 3, center (32, 0).
struct OneFaceEngine {
    tensors: Vec<TensorDesc>,
    score: f32,
    last_input: Arc<Mutex<Vec<f32>>>,
}

impl Engine for OneFaceEngine {
    fn name(&self) -> &str {
        "one-face"
    }

    fn tensors(&self) -> Vec<TensorDesc> {
        self.tensors.clone()
    }

    fn execute(&mut self, inputs: &[&[u8]], outputs: &mut [&mut [u8]]) -> Result<()> {
        if inputs[0].len() != 3 * CANVAS * CANVAS * 4 {
            return Err(anyhow!("unexpected input of {} bytes", inputs[0].len()));
        }
        *self.last_input.lock().expect("lock") = bytemuck::pod_collect_to_vec(inputs[0]);

        let mut values: Vec<Vec<f32>> = self
            .tensors
            .iter()
            .skip(1)
            .map(|t| vec![0.0; t.element_count()])
            .collect();
        values[1][3] = self.score;
        values[3][12..16].copy_from_slice(&[0.25, 0.0, 0.5, 1.0]);
        for (out, vals) in outputs.iter_mut().zip(values.iter()) {
            out.copy_from_slice(bytemuck::cast_slice(vals));
        }
        Ok(())
    }
}

struct Harness {
    file: NamedTempFile,
    device: Arc<HostDevice>,
    last_input: Arc<Mutex<Vec<f32>>>,
}

impl Harness {
    fn new() -> Result<Self> {
        Ok(Self {
            file: NamedTempFile::new()?,
            device: Arc::new(HostDevice::new()),
            last_input: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn backend(&self, tensors: Vec<TensorDesc>, score: f32) -> ScrfdBackend {
        let last_input = Arc::clone(&self.last_input);
        let loader: Arc<dyn EngineLoader> =
            Arc::new(move |_path: &Path| -> Result<Box<dyn Engine>> {
                Ok(Box::new(OneFaceEngine {
                    tensors: tensors.clone(),
                    score,
                    last_input: Arc::clone(&last_input),
                }))
            });
        let context = ExecutionContext::new(self.file.path(), self.device.clone(), loader);
        ScrfdBackend::new(context, params())
    }
}

fn white_frame(width: u32, height: u32) -> Result<Frame> {
    Frame::filled(PixelFormat::RgbU8, PixelArrangement::Hwc, width, height, 255)
}

#[test]
fn detects_face_in_source_coordinates() -> Result<()> {
    let harness = Harness::new()?;
    let mut backend = harness.backend(scrfd_tensors(CANVAS), 0.9);
    backend.open()?;

    // 128x64 letterboxes into the top half of the 64x64 canvas at scale 0.5.
    let found = backend.detect(&white_frame(128, 64)?)?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].bbox, [48.0, 0.0, 96.0, 64.0]);
    assert_eq!(found[0].score, 0.9);
    assert_eq!(found[0].keypoints.len(), 5);

    let input = harness.last_input.lock().expect("lock").clone();
    assert_eq!(input.len(), 3 * CANVAS * CANVAS);
    assert_eq!(input[0], 1.0);
    // Row 40 lies in the zero padding below the image.
    assert_eq!(input[40 * CANVAS], 0.0);

    backend.close()?;
    assert_eq!(harness.device.allocated_bytes(), 0);
    Ok(())
}

#[test]
fn low_scores_yield_no_detections() -> Result<()> {
    let harness = Harness::new()?;
    let mut backend = harness.backend(scrfd_tensors(CANVAS), 0.1);
    backend.open()?;
    assert!(backend.detect(&white_frame(128, 64)?)?.is_empty());
    backend.close()
}

#[test]
fn face_detector_expands_scrfd_box() -> Result<()> {
    let harness = Harness::new()?;
    let mut stage = FaceDetector::new(Box::new(harness.backend(scrfd_tensors(CANVAS), 0.9)));
    stage.open()?;
    let out = stage.apply(white_frame(128, 64)?)?;
    // 48x64 box at 1.5x caps at the 64 px frame height, centered on x = 72.
    assert_eq!(out.regions, vec![BoundingBox::new(40, 0, 64, 64)]);
    stage.close()
}

#[test]
fn wrong_input_shape_is_rejected_at_open() -> Result<()> {
    let harness = Harness::new()?;
    let mut backend = harness.backend(scrfd_tensors(32), 0.9);
    let err = backend.open().expect_err("input shape mismatch");
    assert!(err.to_string().contains("expected [1, 3, 64, 64]"), "{err}");
    assert_eq!(harness.device.allocated_bytes(), 0);
    Ok(())
}

#[test]
fn wrong_output_count_is_rejected_at_open() -> Result<()> {
    let harness = Harness::new()?;
    let mut tensors = scrfd_tensors(CANVAS);
    tensors.pop();
    let mut backend = harness.backend(tensors, 0.9);
    let err = backend.open().expect_err("output count mismatch");
    assert!(err.to_string().contains("5 outputs, expected 6"), "{err}");
    assert_eq!(harness.device.allocated_bytes(), 0);
    Ok(())
}
