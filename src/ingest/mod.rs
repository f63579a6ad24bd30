//! Frame sources.
//!
//! - `stub://` synthetic camera (default, no hardware)
//! - in-memory frame lists (tests, replays)
//! - image directories (feature: image-io)

#[cfg(feature = "image-io")]
mod image_dir;
mod list;
mod synthetic;

#[cfg(feature = "image-io")]
pub use image_dir::ImageDirSource;
pub use list::FrameListSource;
pub use synthetic::SyntheticSource;
