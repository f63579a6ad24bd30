use anyhow::Result;

use crate::frame::{Frame, PixelArrangement, PixelFormat};

use super::result::Detection;

/// Face detector backend.
///
/// Backends own whatever accelerator state they need between `open` and `close`.
/// `detect` receives interleaved RGB frames and returns detections in source
/// coordinates, highest score first.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, run once after `open`.
    ///
    /// The default runs one detection on a black canvas.
    fn warm_up(&mut self) -> Result<()> {
        let canvas = Frame::filled(PixelFormat::RgbU8, PixelArrangement::Hwc, 64, 64, 0)?;
        self.detect(&canvas).map(|_| ())
    }
}
