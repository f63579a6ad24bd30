//! Frame and geometry model.
//!
//! - `Frame`: owned pixel buffer plus its `PixelFormat`, `PixelArrangement`
//!   and the regions detected so far.
//! - `BoundingBox`: integer region, clamped to the frame it was created for.
//!
//! Frames move through the pipeline by value. Conversions never mutate in place:
//! the `as_*` views borrow when the format already matches and allocate otherwise.

use std::borrow::Cow;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::imaging::sample_index;

// ----------------------------------------------------------------------------
// Pixel formats
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    RgbU8,
    RgbaU8,
    BgrU8,
    BgraU8,
    RgbF32,
    RgbaF32,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 6] = [
        PixelFormat::RgbU8,
        PixelFormat::RgbaU8,
        PixelFormat::BgrU8,
        PixelFormat::BgraU8,
        PixelFormat::RgbF32,
        PixelFormat::RgbaF32,
    ];

    pub fn channels(self) -> usize {
        match self {
            PixelFormat::RgbU8 | PixelFormat::BgrU8 | PixelFormat::RgbF32 => 3,
            PixelFormat::RgbaU8 | PixelFormat::BgraU8 | PixelFormat::RgbaF32 => 4,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, PixelFormat::RgbF32 | PixelFormat::RgbaF32)
    }

    pub fn has_alpha(self) -> bool {
        self.channels() == 4
    }

    /// Position of the R, G, B and A samples within one pixel of this format.
    fn rgba_positions(self) -> [Option<usize>; 4] {
        match self {
            PixelFormat::RgbU8 | PixelFormat::RgbF32 => [Some(0), Some(1), Some(2), None],
            PixelFormat::RgbaU8 | PixelFormat::RgbaF32 => [Some(0), Some(1), Some(2), Some(3)],
            PixelFormat::BgrU8 => [Some(2), Some(1), Some(0), None],
            PixelFormat::BgraU8 => [Some(2), Some(1), Some(0), Some(3)],
        }
    }
}

/// Memory layout of the pixel buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelArrangement {
    /// Planar: all samples of channel 0, then channel 1, ...
    Chw,
    /// Interleaved: all channels of pixel 0, then pixel 1, ...
    Hwc,
}

/// Owned sample storage. The variant always agrees with `PixelFormat::is_float`.
#[derive(Clone, Debug, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    F32(Vec<f32>),
}

impl PixelData {
    pub fn len(&self) -> usize {
        match self {
            PixelData::U8(v) => v.len(),
            PixelData::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_float(&self) -> bool {
        matches!(self, PixelData::F32(_))
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A decoded image plus the regions detected on it.
///
/// Invariant: `data.len() == width * height * format.channels()`.
#[derive(Clone, Debug)]
pub struct Frame {
    data: PixelData,
    format: PixelFormat,
    arrangement: PixelArrangement,
    width: u32,
    height: u32,
    /// Detected regions, in detector output order.
    pub regions: Vec<BoundingBox>,
    /// Monotonic sequence number assigned by the source.
    pub sequence: u64,
}

impl Frame {
    pub fn new(
        data: PixelData,
        format: PixelFormat,
        arrangement: PixelArrangement,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero, got {}x{}", width, height));
        }
        if data.is_float() != format.is_float() {
            return Err(anyhow!(
                "pixel storage does not match format {:?}",
                format
            ));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(format.channels()))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "{:?} {}x{} frame expects {} samples, received {}",
                format,
                width,
                height,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            format,
            arrangement,
            width,
            height,
            regions: Vec::new(),
            sequence: 0,
        })
    }

    pub fn from_u8(
        pixels: Vec<u8>,
        format: PixelFormat,
        arrangement: PixelArrangement,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        Self::new(PixelData::U8(pixels), format, arrangement, width, height)
    }

    pub fn from_f32(
        pixels: Vec<f32>,
        format: PixelFormat,
        arrangement: PixelArrangement,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        Self::new(PixelData::F32(pixels), format, arrangement, width, height)
    }

    /// A frame filled with a single sample value.
    pub fn filled(
        format: PixelFormat,
        arrangement: PixelArrangement,
        width: u32,
        height: u32,
        value: u8,
    ) -> Result<Self> {
        let len = width as usize * height as usize * format.channels();
        let data = if format.is_float() {
            PixelData::F32(vec![value as f32 / 255.0; len])
        } else {
            PixelData::U8(vec![value; len])
        };
        Self::new(data, format, arrangement, width, height)
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_regions(mut self, regions: Vec<BoundingBox>) -> Self {
        self.regions = regions;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn arrangement(&self) -> PixelArrangement {
        self.arrangement
    }

    /// Buffer shape in arrangement order: `[c, h, w]` for CHW, `[h, w, c]` for HWC.
    pub fn shape(&self) -> [usize; 3] {
        let (c, h, w) = (self.channels(), self.height as usize, self.width as usize);
        match self.arrangement {
            PixelArrangement::Chw => [c, h, w],
            PixelArrangement::Hwc => [h, w, c],
        }
    }

    pub fn data(&self) -> &PixelData {
        &self.data
    }

    pub fn into_data(self) -> PixelData {
        self.data
    }

    pub fn pixels_u8(&self) -> Option<&[u8]> {
        match &self.data {
            PixelData::U8(v) => Some(v),
            PixelData::F32(_) => None,
        }
    }

    pub fn pixels_u8_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.data {
            PixelData::U8(v) => Some(v),
            PixelData::F32(_) => None,
        }
    }

    pub fn pixels_f32(&self) -> Option<&[f32]> {
        match &self.data {
            PixelData::F32(v) => Some(v),
            PixelData::U8(_) => None,
        }
    }

    /// Zero every channel inside `region` (clipped to the frame).
    pub fn clear_rect(&mut self, region: BoundingBox) {
        let region = region.clamp_to(self.width, self.height);
        let (w, h, c, arrangement) = (self.width, self.height, self.channels(), self.arrangement);
        for y in region.top..region.bottom() {
            for x in region.left..region.right() {
                for ch in 0..c {
                    let idx = sample_index(arrangement, w, h, c, x, y, ch);
                    match &mut self.data {
                        PixelData::U8(v) => v[idx] = 0,
                        PixelData::F32(v) => v[idx] = 0.0,
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Conversions
    // ------------------------------------------------------------------------

    pub fn as_rgb(&self) -> Result<Cow<'_, [u8]>> {
        self.as_u8(PixelFormat::RgbU8)
    }

    pub fn as_rgba(&self) -> Result<Cow<'_, [u8]>> {
        self.as_u8(PixelFormat::RgbaU8)
    }

    pub fn as_bgr(&self) -> Result<Cow<'_, [u8]>> {
        self.as_u8(PixelFormat::BgrU8)
    }

    pub fn as_bgra(&self) -> Result<Cow<'_, [u8]>> {
        self.as_u8(PixelFormat::BgraU8)
    }

    pub fn as_rgb_f32(&self) -> Result<Cow<'_, [f32]>> {
        self.as_f32(PixelFormat::RgbF32)
    }

    pub fn as_rgba_f32(&self) -> Result<Cow<'_, [f32]>> {
        self.as_f32(PixelFormat::RgbaF32)
    }

    fn as_u8(&self, target: PixelFormat) -> Result<Cow<'_, [u8]>> {
        if self.format == target {
            if let PixelData::U8(v) = &self.data {
                return Ok(Cow::Borrowed(v));
            }
        }
        match self.convert_data(target)? {
            PixelData::U8(v) => Ok(Cow::Owned(v)),
            PixelData::F32(_) => Err(anyhow!("{:?} is not an 8-bit format", target)),
        }
    }

    fn as_f32(&self, target: PixelFormat) -> Result<Cow<'_, [f32]>> {
        if self.format == target {
            if let PixelData::F32(v) = &self.data {
                return Ok(Cow::Borrowed(v));
            }
        }
        match self.convert_data(target)? {
            PixelData::F32(v) => Ok(Cow::Owned(v)),
            PixelData::U8(_) => Err(anyhow!("{:?} is not a float format", target)),
        }
    }

    /// Consuming conversion. Returns `self` untouched when the format already matches.
    pub fn convert(self, target: PixelFormat) -> Result<Frame> {
        if self.format == target {
            return Ok(self);
        }
        let data = self.convert_data(target)?;
        Ok(Frame {
            data,
            format: target,
            ..self
        })
    }

    /// Re-lay the buffer in `target` arrangement.
    pub fn to_arrangement(self, target: PixelArrangement) -> Frame {
        if self.arrangement == target {
            return self;
        }
        let (w, h, c) = (self.width, self.height, self.channels());
        let data = match &self.data {
            PixelData::U8(src) => PixelData::U8(relayout(src, self.arrangement, target, w, h, c)),
            PixelData::F32(src) => PixelData::F32(relayout(src, self.arrangement, target, w, h, c)),
        };
        Frame {
            data,
            arrangement: target,
            ..self
        }
    }

    fn convert_data(&self, target: PixelFormat) -> Result<PixelData> {
        let (w, h) = (self.width, self.height);
        let src_c = self.format.channels();
        let dst_c = target.channels();
        let src_pos = self.format.rgba_positions();
        let dst_pos = target.rgba_positions();
        let plane = w as usize * h as usize;
        let arrangement = self.arrangement;

        // Samples are read in the source scale: 0..=255 for u8, 0..=1 for f32.
        let src_float = self.format.is_float();
        let opaque = if src_float { 1.0 } else { 255.0 };
        let read = |y: u32, x: u32, ch: Option<usize>| -> f32 {
            match ch {
                Some(ch) => {
                    let idx = sample_index(arrangement, w, h, src_c, x, y, ch);
                    match &self.data {
                        PixelData::U8(v) => v[idx] as f32,
                        PixelData::F32(v) => v[idx],
                    }
                }
                None => opaque,
            }
        };

        if target.is_float() {
            let mut out = vec![0.0f32; plane * dst_c];
            for y in 0..h {
                for x in 0..w {
                    for (component, dst_ch) in dst_pos.iter().enumerate() {
                        let Some(dst_ch) = dst_ch else { continue };
                        let value = read(y, x, src_pos[component]);
                        let value = if src_float { value } else { value / 255.0 };
                        out[sample_index(arrangement, w, h, dst_c, x, y, *dst_ch)] = value;
                    }
                }
            }
            Ok(PixelData::F32(out))
        } else {
            let mut out = vec![0u8; plane * dst_c];
            for y in 0..h {
                for x in 0..w {
                    for (component, dst_ch) in dst_pos.iter().enumerate() {
                        let Some(dst_ch) = dst_ch else { continue };
                        let value = read(y, x, src_pos[component]);
                        let value = if src_float {
                            (value.clamp(0.0, 1.0) * 255.0) as u8
                        } else {
                            value as u8
                        };
                        out[sample_index(arrangement, w, h, dst_c, x, y, *dst_ch)] = value;
                    }
                }
            }
            Ok(PixelData::U8(out))
        }
    }
}

fn relayout<T: Copy + Default>(
    src: &[T],
    from: PixelArrangement,
    to: PixelArrangement,
    w: u32,
    h: u32,
    c: usize,
) -> Vec<T> {
    let mut out = vec![T::default(); src.len()];
    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                out[sample_index(to, w, h, c, x, y, ch)] = src[sample_index(from, w, h, c, x, y, ch)];
            }
        }
    }
    out
}

// ----------------------------------------------------------------------------
// BoundingBox
// ----------------------------------------------------------------------------

/// Integer region (left, top, width, height) in frame pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.left.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.top.saturating_add(self.height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn center(&self) -> (f32, f32) {
        (
            self.left as f32 + self.width as f32 / 2.0,
            self.top as f32 + self.height as f32 / 2.0,
        )
    }

    /// Intersect with a `frame_width` x `frame_height` frame.
    pub fn clamp_to(self, frame_width: u32, frame_height: u32) -> Self {
        let left = self.left.min(frame_width);
        let top = self.top.min(frame_height);
        Self {
            left,
            top,
            width: self.right().min(frame_width) - left,
            height: self.bottom().min(frame_height) - top,
        }
    }

    /// Expand a detection `[left, top, width, height]` into a square region.
    ///
    /// The side is `max(w, h) * scale`, clamped to the shorter frame edge. The square
    /// is centered on the detection and then shifted, never shrunk, to lie fully
    /// inside the frame.
    pub fn expand_square(ltwh: [f32; 4], scale: f32, frame_width: u32, frame_height: u32) -> Self {
        let [x, y, w, h] = ltwh;
        let center_x = x + w / 2.0;
        let center_y = y + h / 2.0;
        let limit = frame_width.min(frame_height).max(1);
        let dim = ((w.max(h) * scale) as u32).clamp(1, limit);
        Self {
            left: centered_origin(center_x, dim, frame_width),
            top: centered_origin(center_y, dim, frame_height),
            width: dim,
            height: dim,
        }
    }
}

fn centered_origin(center: f32, dim: u32, extent: u32) -> u32 {
    let origin = (center - dim as f32 / 2.0).floor();
    let max_origin = extent.saturating_sub(dim);
    if origin <= 0.0 {
        0
    } else {
        (origin as u32).min(max_origin)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(format: PixelFormat, arrangement: PixelArrangement) -> Frame {
        let (w, h) = (5u32, 3u32);
        let len = w as usize * h as usize * format.channels();
        if format.is_float() {
            let data = (0..len).map(|i| (i % 256) as f32 / 255.0).collect();
            Frame::from_f32(data, format, arrangement, w, h).unwrap()
        } else {
            let data = (0..len).map(|i| (i * 7 % 256) as u8).collect();
            Frame::from_u8(data, format, arrangement, w, h).unwrap()
        }
    }

    #[test]
    fn rejects_mismatched_buffer_length() {
        let err = Frame::from_u8(vec![0; 10], PixelFormat::RgbU8, PixelArrangement::Hwc, 2, 2)
            .unwrap_err();
        assert!(err.to_string().contains("expects 12 samples"));
    }

    #[test]
    fn rejects_storage_format_mismatch() {
        assert!(Frame::from_u8(vec![0; 12], PixelFormat::RgbF32, PixelArrangement::Hwc, 2, 2).is_err());
    }

    #[test]
    fn shape_follows_arrangement() {
        let hwc = gradient(PixelFormat::RgbaU8, PixelArrangement::Hwc);
        assert_eq!(hwc.shape(), [3, 5, 4]);
        let chw = gradient(PixelFormat::RgbaU8, PixelArrangement::Chw);
        assert_eq!(chw.shape(), [4, 3, 5]);
        assert_eq!(chw.width(), 5);
        assert_eq!(chw.height(), 3);
        assert_eq!(chw.channels(), 4);
    }

    #[test]
    fn matching_format_borrows() {
        let frame = gradient(PixelFormat::RgbU8, PixelArrangement::Hwc);
        assert!(matches!(frame.as_rgb().unwrap(), Cow::Borrowed(_)));
        assert!(matches!(frame.as_bgr().unwrap(), Cow::Owned(_)));
    }

    #[test]
    fn bgr_to_rgb_swaps_channels() {
        let frame = Frame::from_u8(
            vec![1, 2, 3, 4, 5, 6],
            PixelFormat::BgrU8,
            PixelArrangement::Hwc,
            2,
            1,
        )
        .unwrap();
        assert_eq!(frame.as_rgb().unwrap().as_ref(), &[3, 2, 1, 6, 5, 4]);
        assert_eq!(frame.as_rgba().unwrap().as_ref(), &[3, 2, 1, 255, 6, 5, 4, 255]);
    }

    #[test]
    fn planar_conversion_permutes_planes() {
        // Two pixels, planes B=[1,2] G=[3,4] R=[5,6].
        let frame = Frame::from_u8(
            vec![1, 2, 3, 4, 5, 6],
            PixelFormat::BgrU8,
            PixelArrangement::Chw,
            2,
            1,
        )
        .unwrap();
        assert_eq!(frame.as_rgb().unwrap().as_ref(), &[5, 6, 3, 4, 1, 2]);
    }

    #[test]
    fn float_conversion_clips() {
        let frame = Frame::from_f32(
            vec![-0.5, 0.5, 1.5],
            PixelFormat::RgbF32,
            PixelArrangement::Hwc,
            1,
            1,
        )
        .unwrap();
        assert_eq!(frame.as_rgb().unwrap().as_ref(), &[0, 127, 255]);
    }

    #[test]
    fn u8_permutations_round_trip_exactly() {
        let u8_formats = [
            PixelFormat::RgbU8,
            PixelFormat::RgbaU8,
            PixelFormat::BgrU8,
            PixelFormat::BgraU8,
        ];
        for arrangement in [PixelArrangement::Hwc, PixelArrangement::Chw] {
            for from in u8_formats {
                for to in u8_formats {
                    if from.channels() != to.channels() {
                        continue;
                    }
                    let original = gradient(from, arrangement);
                    let back = original.clone().convert(to).unwrap().convert(from).unwrap();
                    assert_eq!(back.data(), original.data(), "{:?} -> {:?}", from, to);
                }
            }
        }
    }

    #[test]
    fn float_round_trip_within_one_lsb() {
        for arrangement in [PixelArrangement::Hwc, PixelArrangement::Chw] {
            for (from, via) in [
                (PixelFormat::RgbU8, PixelFormat::RgbF32),
                (PixelFormat::RgbaU8, PixelFormat::RgbaF32),
                (PixelFormat::BgrU8, PixelFormat::RgbF32),
                (PixelFormat::BgraU8, PixelFormat::RgbaF32),
            ] {
                let original = gradient(from, arrangement);
                let back = original.clone().convert(via).unwrap().convert(from).unwrap();
                let a = original.pixels_u8().unwrap();
                let b = back.pixels_u8().unwrap();
                for (x, y) in a.iter().zip(b) {
                    assert!((*x as i16 - *y as i16).abs() <= 1, "{:?} via {:?}", from, via);
                }
            }
        }
    }

    #[test]
    fn relayout_round_trip() {
        let hwc = gradient(PixelFormat::RgbaU8, PixelArrangement::Hwc);
        let chw = hwc.clone().to_arrangement(PixelArrangement::Chw);
        assert_eq!(chw.arrangement(), PixelArrangement::Chw);
        assert_ne!(chw.data(), hwc.data());
        assert_eq!(chw.to_arrangement(PixelArrangement::Hwc).data(), hwc.data());
    }

    #[test]
    fn conversion_keeps_regions_and_sequence() {
        let frame = gradient(PixelFormat::BgrU8, PixelArrangement::Hwc)
            .with_sequence(9)
            .with_regions(vec![BoundingBox::new(1, 1, 2, 2)]);
        let rgb = frame.convert(PixelFormat::RgbU8).unwrap();
        assert_eq!(rgb.sequence, 9);
        assert_eq!(rgb.regions, vec![BoundingBox::new(1, 1, 2, 2)]);
    }

    #[test]
    fn clear_rect_is_clipped() {
        let mut frame =
            Frame::filled(PixelFormat::RgbU8, PixelArrangement::Hwc, 4, 4, 200).unwrap();
        frame.clear_rect(BoundingBox::new(2, 2, 10, 10));
        let px = frame.pixels_u8().unwrap();
        assert_eq!(&px[(3 * 4 + 3) * 3..(3 * 4 + 3) * 3 + 3], &[0, 0, 0]);
        assert_eq!(&px[0..3], &[200, 200, 200]);
    }

    #[test]
    fn expand_square_matches_scaled_max_dim() {
        let region = BoundingBox::expand_square([100.0, 100.0, 40.0, 20.0], 1.5, 640, 480);
        assert_eq!(region, BoundingBox::new(90, 80, 60, 60));
    }

    #[test]
    fn expand_square_shifts_inside_frame() {
        let region = BoundingBox::expand_square([600.0, 440.0, 40.0, 40.0], 1.5, 640, 480);
        assert_eq!(region.width, 60);
        assert_eq!(region.right(), 640);
        assert_eq!(region.bottom(), 480);
    }

    #[test]
    fn expand_square_caps_at_short_edge() {
        let region = BoundingBox::expand_square([0.0, 0.0, 600.0, 400.0], 1.5, 640, 480);
        assert_eq!(region, BoundingBox::new(0, 0, 480, 480));
    }

    #[test]
    fn expanded_regions_are_square_contained_and_centered() {
        let (fw, fh) = (320u32, 240u32);
        let mut state = 0x2545_f491_u32;
        let mut next = |bound: u32| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state % bound
        };
        for _ in 0..2000 {
            let x = next(fw) as f32;
            let y = next(fh) as f32;
            let w = (next(200) + 1) as f32;
            let h = (next(200) + 1) as f32;
            let scale = 1.0 + next(100) as f32 / 100.0;
            let region = BoundingBox::expand_square([x, y, w, h], scale, fw, fh);
            assert_eq!(region.width, region.height);
            assert!(region.right() <= fw && region.bottom() <= fh);

            let (cx, cy) = (x + w / 2.0, y + h / 2.0);
            let half = region.width as f32 / 2.0;
            let fits = cx - half >= 0.0
                && cy - half >= 0.0
                && cx + half <= fw as f32
                && cy + half <= fh as f32;
            if fits {
                let (rx, ry) = region.center();
                assert!((rx - cx).abs() <= 1.0 && (ry - cy).abs() <= 1.0);
            }
        }
    }

    #[test]
    fn clamp_to_intersects() {
        let region = BoundingBox::new(630, 470, 20, 20).clamp_to(640, 480);
        assert_eq!(region, BoundingBox::new(630, 470, 10, 10));
        assert!(BoundingBox::new(700, 0, 5, 5).clamp_to(640, 480).is_empty());
    }
}
