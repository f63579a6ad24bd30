pub mod fixed;
pub mod scrfd;

pub use fixed::FixedBackend;
pub use scrfd::ScrfdBackend;
