#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use super::engine::{DataType, Engine, EngineLoader, TensorDesc, TensorRole};

/// Loads ONNX models into tract plans.
#[derive(Clone, Debug, Default)]
pub struct TractLoader {
    input_shape: Option<Vec<usize>>,
}

impl TractLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the input shape for models exported with symbolic dimensions.
    pub fn with_input_shape(mut self, shape: Vec<usize>) -> Self {
        self.input_shape = Some(shape);
        self
    }
}

impl EngineLoader for TractLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn Engine>> {
        let mut model = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to load ONNX model from {}", path.display()))?;
        if let Some(shape) = &self.input_shape {
            model = model
                .with_input_fact(
                    0,
                    InferenceFact::dt_shape(f32::datum_type(), shape.iter().copied().collect::<TVec<_>>()),
                )
                .context("failed to set input fact")?;
        }
        let model = model
            .into_optimized()
            .context("failed to optimize ONNX model")?;

        let mut tensors = Vec::new();
        for (role, outlets) in [
            (TensorRole::Input, model.input_outlets()?),
            (TensorRole::Output, model.output_outlets()?),
        ] {
            for outlet in outlets {
                let fact = model.outlet_fact(*outlet)?;
                let shape = fact
                    .shape
                    .as_concrete()
                    .ok_or_else(|| anyhow!("tensor {:?} has a symbolic shape", outlet))?
                    .to_vec();
                let dtype = data_type(fact.datum_type)?;
                if dtype != DataType::F32 {
                    return Err(anyhow!("tensor {:?} is {:?}; only f32 is supported", outlet, dtype));
                }
                let name = model.node(outlet.node).name.clone();
                tensors.push(TensorDesc::new(name, shape, dtype, role));
            }
        }

        let plan = model
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());
        Ok(Box::new(TractEngine {
            name,
            plan,
            tensors,
        }))
    }
}

fn data_type(dt: DatumType) -> Result<DataType> {
    Ok(match dt {
        DatumType::F32 => DataType::F32,
        DatumType::F16 => DataType::F16,
        DatumType::I32 => DataType::I32,
        DatumType::I8 => DataType::I8,
        DatumType::U8 => DataType::U8,
        other => return Err(anyhow!("unsupported tensor type {:?}", other)),
    })
}

struct TractEngine {
    name: String,
    plan: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    tensors: Vec<TensorDesc>,
}

impl Engine for TractEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn tensors(&self) -> Vec<TensorDesc> {
        self.tensors.clone()
    }

    fn execute(&mut self, inputs: &[&[u8]], outputs: &mut [&mut [u8]]) -> Result<()> {
        let input_desc = self
            .tensors
            .iter()
            .find(|t| t.role == TensorRole::Input)
            .ok_or_else(|| anyhow!("model has no input"))?;
        let bytes = inputs.first().ok_or_else(|| anyhow!("missing input buffer"))?;
        let values = bytemuck::pod_collect_to_vec::<u8, f32>(bytes);
        let input = tract_ndarray::ArrayD::from_shape_vec(tract_ndarray::IxDyn(&input_desc.shape), values)
            .context("input buffer does not match model shape")?
            .into_tensor();

        let results = self
            .plan
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        if results.len() != outputs.len() {
            return Err(anyhow!(
                "model produced {} outputs, {} bound",
                results.len(),
                outputs.len()
            ));
        }
        for (result, out) in results.iter().zip(outputs.iter_mut()) {
            let values = result
                .as_slice::<f32>()
                .context("model output tensor was not f32")?;
            let src: &[u8] = bytemuck::cast_slice(values);
            if src.len() != out.len() {
                return Err(anyhow!(
                    "model output is {} bytes, binding holds {}",
                    src.len(),
                    out.len()
                ));
            }
            out.copy_from_slice(src);
        }
        Ok(())
    }
}
