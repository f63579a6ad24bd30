use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Scalar type of a tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    F32,
    F16,
    I32,
    I8,
    U8,
}

impl DataType {
    pub fn size_bytes(self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F16 => 2,
            DataType::I8 | DataType::U8 => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorRole {
    Input,
    Output,
}

/// Declared name, shape and type of one engine tensor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorDesc {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: DataType,
    pub role: TensorRole,
}

impl TensorDesc {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, dtype: DataType, role: TensorRole) -> Self {
        Self {
            name: name.into(),
            shape,
            dtype,
            role,
        }
    }

    pub fn input(name: impl Into<String>, shape: Vec<usize>) -> Self {
        Self::new(name, shape, DataType::F32, TensorRole::Input)
    }

    pub fn output(name: impl Into<String>, shape: Vec<usize>) -> Self {
        Self::new(name, shape, DataType::F32, TensorRole::Output)
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn byte_len(&self) -> usize {
        self.element_count() * self.dtype.size_bytes()
    }
}

/// A loaded inference engine.
///
/// `execute` reads the device-side inputs and fills the device-side outputs,
/// both in `tensors()` order restricted to their role.
pub trait Engine: Send {
    fn name(&self) -> &str;

    fn tensors(&self) -> Vec<TensorDesc>;

    fn execute(&mut self, inputs: &[&[u8]], outputs: &mut [&mut [u8]]) -> Result<()>;
}

/// Deserializes an engine from a model file.
pub trait EngineLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn Engine>>;
}

impl<F> EngineLoader for F
where
    F: Fn(&Path) -> Result<Box<dyn Engine>> + Send + Sync,
{
    fn load(&self, path: &Path) -> Result<Box<dyn Engine>> {
        self(path)
    }
}

/// Loader for the runtime compiled into this build.
#[cfg(feature = "backend-tract")]
pub fn default_loader() -> Arc<dyn EngineLoader> {
    Arc::new(super::tract::TractLoader::new())
}

/// Loader for the runtime compiled into this build.
#[cfg(not(feature = "backend-tract"))]
pub fn default_loader() -> Arc<dyn EngineLoader> {
    Arc::new(|path: &Path| -> Result<Box<dyn Engine>> {
        Err(anyhow::anyhow!(
            "no inference runtime compiled in (enable feature backend-tract) to load {}",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_len_uses_dtype_width() {
        let desc = TensorDesc::new("x", vec![1, 3, 4, 4], DataType::F16, TensorRole::Input);
        assert_eq!(desc.element_count(), 48);
        assert_eq!(desc.byte_len(), 96);
    }
}
