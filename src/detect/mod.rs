mod anchors;
mod backend;
mod backends;
mod decode;
mod nms;
mod result;

pub use anchors::{AnchorGrid, AnchorLevel};
pub use backend::DetectorBackend;
pub use backends::{FixedBackend, ScrfdBackend};
pub use decode::{decode, letterbox, postprocess, Letterbox, ScrfdParams, KEYPOINTS_PER_FACE};
pub use nms::{iou, nms, score_order, suppress, IOU_EPSILON};
pub use result::Detection;
