use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};

use super::device::{lock_bytes, Device, DeviceBuffer, HostBuffer, HostDevice};
use super::engine::{default_loader, Engine, EngineLoader, TensorDesc, TensorRole};
use super::stream::Stream;

/// One engine tensor with its pinned host buffer and device buffer.
///
/// Both buffers are exactly `desc.byte_len()` bytes and are owned by the binding
/// until the context releases them.
#[derive(Debug)]
pub struct TensorMemoryBinding {
    desc: TensorDesc,
    host: HostBuffer,
    device: DeviceBuffer,
}

impl TensorMemoryBinding {
    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.desc.shape
    }

    pub fn element_count(&self) -> usize {
        self.desc.element_count()
    }

    pub fn byte_len(&self) -> usize {
        self.desc.byte_len()
    }

    pub fn host(&self) -> &HostBuffer {
        &self.host
    }

    fn release(self, device: &dyn Device) {
        device.free_device(self.device);
        device.free_pinned(self.host);
    }
}

type SharedEngine = Arc<Mutex<Box<dyn Engine>>>;

fn lock_engine(engine: &SharedEngine) -> MutexGuard<'_, Box<dyn Engine>> {
    engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct OpenContext {
    engine: SharedEngine,
    inputs: Vec<TensorMemoryBinding>,
    outputs: Vec<TensorMemoryBinding>,
    stream: Stream,
}

enum ContextState {
    Unopened,
    Open(Box<OpenContext>),
    Closed,
}

/// Owns a loaded engine, its tensor bindings and one execution stream.
///
/// `infer` takes `&mut self`, so at most one inference is in flight per context.
pub struct ExecutionContext {
    path: PathBuf,
    device: Arc<dyn Device>,
    loader: Arc<dyn EngineLoader>,
    state: ContextState,
}

impl ExecutionContext {
    pub fn new(
        path: impl Into<PathBuf>,
        device: Arc<dyn Device>,
        loader: Arc<dyn EngineLoader>,
    ) -> Self {
        Self {
            path: path.into(),
            device,
            loader,
            state: ContextState::Unopened,
        }
    }

    /// Context on the emulated host device with the compiled-in runtime.
    pub fn on_host(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Arc::new(HostDevice::new()), default_loader())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ContextState::Open(_))
    }

    pub fn open(&mut self) -> Result<()> {
        match self.state {
            ContextState::Open(_) => return Err(anyhow!("execution context already open")),
            ContextState::Closed => return Err(anyhow!("execution context already closed")),
            ContextState::Unopened => {}
        }
        if !self.path.is_file() {
            return Err(anyhow!("engine file not found: {}", self.path.display()));
        }
        let engine = self
            .loader
            .load(&self.path)
            .with_context(|| format!("failed to load engine from {}", self.path.display()))?;

        let tensors = engine.tensors();
        let (input_descs, output_descs): (Vec<TensorDesc>, Vec<TensorDesc>) = tensors
            .into_iter()
            .partition(|t| t.role == TensorRole::Input);
        if input_descs.len() != 1 {
            return Err(anyhow!(
                "engine {} declares {} input tensors; exactly one is supported",
                engine.name(),
                input_descs.len()
            ));
        }
        if let Some(batch) = input_descs[0].shape.first() {
            if *batch != 1 {
                return Err(anyhow!(
                    "engine {} input batch size is {}; only 1 is supported",
                    engine.name(),
                    batch
                ));
            }
        }
        if output_descs.is_empty() {
            return Err(anyhow!("engine {} declares no outputs", engine.name()));
        }

        let inputs = self.allocate(input_descs, Vec::new())?;
        let outputs = match self.allocate(output_descs, Vec::new()) {
            Ok(outputs) => outputs,
            Err(err) => {
                self.release(inputs);
                return Err(err);
            }
        };
        let stream = match Stream::new(format!("{}-stream", engine.name())) {
            Ok(stream) => stream,
            Err(err) => {
                self.release(inputs);
                self.release(outputs);
                return Err(err);
            }
        };

        for binding in inputs.iter().chain(outputs.iter()) {
            log::info!(
                "engine {}: {:?} {} {:?} {:?} ({} bytes)",
                engine.name(),
                binding.desc.role,
                binding.name(),
                binding.shape(),
                binding.desc.dtype,
                binding.byte_len()
            );
        }

        self.state = ContextState::Open(Box::new(OpenContext {
            engine: Arc::new(Mutex::new(engine)),
            inputs,
            outputs,
            stream,
        }));
        Ok(())
    }

    fn allocate(
        &self,
        descs: Vec<TensorDesc>,
        mut bindings: Vec<TensorMemoryBinding>,
    ) -> Result<Vec<TensorMemoryBinding>> {
        for desc in descs {
            let len = desc.byte_len();
            let host = match self.device.alloc_pinned(len) {
                Ok(host) => host,
                Err(err) => {
                    self.release(bindings);
                    return Err(err.context(format!("allocating pinned buffer for {}", desc.name)));
                }
            };
            let device = match self.device.alloc_device(len) {
                Ok(device) => device,
                Err(err) => {
                    self.device.free_pinned(host);
                    self.release(bindings);
                    return Err(err.context(format!("allocating device buffer for {}", desc.name)));
                }
            };
            bindings.push(TensorMemoryBinding { desc, host, device });
        }
        Ok(bindings)
    }

    fn release(&self, bindings: Vec<TensorMemoryBinding>) {
        for binding in bindings {
            binding.release(self.device.as_ref());
        }
    }

    fn opened(&self) -> Result<&OpenContext> {
        match &self.state {
            ContextState::Open(ctx) => Ok(ctx),
            ContextState::Unopened => Err(anyhow!("execution context not opened")),
            ContextState::Closed => Err(anyhow!("execution context already closed")),
        }
    }

    pub fn inputs(&self) -> Result<&[TensorMemoryBinding]> {
        Ok(&self.opened()?.inputs)
    }

    pub fn outputs(&self) -> Result<&[TensorMemoryBinding]> {
        Ok(&self.opened()?.outputs)
    }

    /// Run one inference on raw input bytes, returning every output in engine order.
    pub fn infer(&mut self, input: &[u8]) -> Result<Vec<Vec<u8>>> {
        let ctx = self.opened()?;
        let binding = &ctx.inputs[0];
        if input.len() != binding.byte_len() {
            return Err(anyhow!(
                "input is {} bytes but tensor {} {:?} expects {}",
                input.len(),
                binding.name(),
                binding.shape(),
                binding.byte_len()
            ));
        }
        binding.host.write(input)?;

        let (host_in, device_in) = (binding.host.share(), binding.device.share());
        ctx.stream.enqueue("copy input to device", move || {
            lock_bytes(&device_in).copy_from_slice(&lock_bytes(&host_in));
            Ok(())
        })?;

        let engine = Arc::clone(&ctx.engine);
        let device_in = binding.device.share();
        let device_out: Vec<_> = ctx.outputs.iter().map(|b| b.device.share()).collect();
        ctx.stream.enqueue("execute", move || {
            let input = lock_bytes(&device_in);
            let mut guards: Vec<_> = device_out.iter().map(lock_bytes).collect();
            let mut outputs: Vec<&mut [u8]> = guards.iter_mut().map(|g| g.as_mut_slice()).collect();
            let inputs = [input.as_slice()];
            let result = lock_engine(&engine).execute(&inputs, &mut outputs);
            result
        })?;

        for output in &ctx.outputs {
            let (device_out, host_out) = (output.device.share(), output.host.share());
            ctx.stream.enqueue("copy output to host", move || {
                lock_bytes(&host_out).copy_from_slice(&lock_bytes(&device_out));
                Ok(())
            })?;
        }

        ctx.stream.synchronize().context("inference failed")?;
        Ok(ctx.outputs.iter().map(|b| b.host.to_vec()).collect())
    }

    /// `infer` over f32 tensors.
    pub fn infer_f32(&mut self, input: &[f32]) -> Result<Vec<Vec<f32>>> {
        let outputs = self.infer(bytemuck::cast_slice(input))?;
        Ok(outputs
            .iter()
            .map(|bytes| bytemuck::pod_collect_to_vec::<u8, f32>(bytes))
            .collect())
    }

    /// Drain the stream and release every binding and the engine.
    pub fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, ContextState::Closed) {
            ContextState::Closed => Err(anyhow!("execution context already closed")),
            ContextState::Unopened => Ok(()),
            ContextState::Open(ctx) => {
                let OpenContext {
                    engine,
                    inputs,
                    outputs,
                    stream,
                } = *ctx;
                let drained = stream.synchronize();
                drop(stream);
                self.release(inputs);
                self.release(outputs);
                drop(engine);
                log::info!(
                    "execution context {} closed ({} bytes still allocated on {})",
                    self.path.display(),
                    self.device.allocated_bytes(),
                    self.device.name()
                );
                drained.context("draining stream on close")
            }
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(err) = self.close() {
                log::warn!("execution context {}: {:#}", self.path.display(), err);
            }
        }
    }
}
