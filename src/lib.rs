//! rtvideo - real-time frame processing pipeline
//!
//! Frames flow from a source, through an ordered chain of stages, into a sink
//! while the scheduler holds a target frame rate under variable stage latency.
//!
//! # Architecture
//!
//! 1. **Frame model**: owned pixel buffers with an explicit format and arrangement.
//! 2. **Accelerator context**: host/device bindings and an ordered async stream
//!    wrapped around a loaded inference engine.
//! 3. **Detection**: SCRFD anchor decoding and greedy non-maximum suppression.
//! 4. **Compositing**: bilinear resize plus alpha blending of inference patches.
//! 5. **Scheduling**: inline (single thread) or threaded (one thread per stage,
//!    bounded mailboxes with frame-interval deadlines and drop-on-full).
//!
//! # Module Structure
//!
//! - `frame`: Frame, PixelFormat, PixelArrangement, BoundingBox
//! - `imaging` / `compose`: the minimum image algebra for blending results back
//! - `timer`: span timing and percentile summaries
//! - `accel`: ExecutionContext, TensorMemoryBinding, Stream, Engine
//! - `detect`: Detection, anchors, SCRFD decode, NMS, detector backends
//! - `processors`: the concrete pipeline stages
//! - `pipeline`: Stage/Source/Sink contracts and both schedulers
//! - `ingest` / `sink`: sources and sinks at the pipeline boundary
//! - `config`: file + environment configuration

pub mod accel;
pub mod compose;
pub mod config;
pub mod detect;
pub mod frame;
pub mod imaging;
pub mod ingest;
pub mod pipeline;
pub mod processors;
pub mod sink;
pub mod timer;

pub use accel::{
    DataType, Device, Engine, EngineLoader, ExecutionContext, HostDevice, Stream, TensorDesc,
    TensorMemoryBinding, TensorRole,
};
pub use config::{PipelineConfig, SinkKind};
pub use detect::{Detection, DetectorBackend, FixedBackend, ScrfdBackend, ScrfdParams};
pub use frame::{BoundingBox, Frame, PixelArrangement, PixelData, PixelFormat};
pub use ingest::{FrameListSource, SyntheticSource};
pub use pipeline::{
    ExecutionMode, Lifecycle, Pipeline, PipelineContext, PipelineOptions, RunOutcome, RunReport,
    Sink, SinkControl, Source, Stage, StageFailure,
};
pub use processors::{FaceDetector, FaceSwapper, ObjectMarker, PixelFormatTransformer};
pub use sink::{CollectSink, Collected, NullSink};
pub use timer::{SpanSummary, Timer};
