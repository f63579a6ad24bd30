//! Accelerator execution context.
//!
//! An `ExecutionContext` owns one loaded `Engine`, a pinned-host/device buffer
//! pair per tensor and an ordered `Stream`. `infer` queues the host to device
//! copy, the execution and the device to host copies on the stream and waits
//! on a single fence before returning.

mod context;
mod device;
mod engine;
mod stream;

#[cfg(feature = "backend-tract")]
mod tract;

pub use context::{ExecutionContext, TensorMemoryBinding};
pub use device::{Device, DeviceBuffer, HostBuffer, HostDevice};
pub use engine::{default_loader, DataType, Engine, EngineLoader, TensorDesc, TensorRole};
pub use stream::Stream;

#[cfg(feature = "backend-tract")]
pub use tract::TractLoader;
