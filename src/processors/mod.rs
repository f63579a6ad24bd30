//! Concrete pipeline stages.

mod face_detector;
mod face_swapper;
mod marker;
mod transform;

pub use face_detector::{FaceDetector, DEFAULT_EXPAND_SCALE};
pub use face_swapper::{FaceSwapper, DEFAULT_SWAP_INPUT_SIZE};
pub use marker::{ObjectMarker, DEFAULT_MARK_SIZE};
pub use transform::PixelFormatTransformer;
