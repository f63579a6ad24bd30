//! Minimal image algebra: sample addressing, interleaved crop/resize and the
//! HWC/CHW tensor conversions needed around inference.

use anyhow::{anyhow, Result};

use crate::frame::{BoundingBox, PixelArrangement};

/// Index of sample `(x, y, ch)` in a `w` x `h` x `c` buffer.
#[inline]
pub fn sample_index(
    arrangement: PixelArrangement,
    w: u32,
    h: u32,
    c: usize,
    x: u32,
    y: u32,
    ch: usize,
) -> usize {
    let (w, h, x, y) = (w as usize, h as usize, x as usize, y as usize);
    match arrangement {
        PixelArrangement::Hwc => (y * w + x) * c + ch,
        PixelArrangement::Chw => ch * w * h + y * w + x,
    }
}

/// Copy `region` out of an interleaved `w` x `h` x `c` buffer.
pub fn crop_hwc(src: &[u8], w: u32, h: u32, c: usize, region: BoundingBox) -> Result<Vec<u8>> {
    if src.len() != w as usize * h as usize * c {
        return Err(anyhow!("crop source length {} does not match {}x{}x{}", src.len(), w, h, c));
    }
    if region.is_empty() || region.right() > w || region.bottom() > h {
        return Err(anyhow!("crop region {:?} outside {}x{} frame", region, w, h));
    }
    let row = region.width as usize * c;
    let mut out = Vec::with_capacity(row * region.height as usize);
    for y in region.top..region.bottom() {
        let start = sample_index(PixelArrangement::Hwc, w, h, c, region.left, y, 0);
        out.extend_from_slice(&src[start..start + row]);
    }
    Ok(out)
}

/// Bilinear resize of an interleaved u8 buffer, pixel centers at +0.5.
pub fn resize_bilinear(
    src: &[u8],
    src_w: u32,
    src_h: u32,
    c: usize,
    dst_w: u32,
    dst_h: u32,
) -> Result<Vec<u8>> {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return Err(anyhow!(
            "cannot resize {}x{} to {}x{}",
            src_w,
            src_h,
            dst_w,
            dst_h
        ));
    }
    if src.len() != src_w as usize * src_h as usize * c {
        return Err(anyhow!("resize source length {} does not match {}x{}x{}", src.len(), src_w, src_h, c));
    }
    if src_w == dst_w && src_h == dst_h {
        return Ok(src.to_vec());
    }

    let scale_x = src_w as f32 / dst_w as f32;
    let scale_y = src_h as f32 / dst_h as f32;
    let column_taps: Vec<(usize, usize, f32)> = (0..dst_w)
        .map(|x| taps((x as f32 + 0.5) * scale_x - 0.5, src_w))
        .collect();

    let mut out = vec![0u8; dst_w as usize * dst_h as usize * c];
    for y in 0..dst_h {
        let (y0, y1, fy) = taps((y as f32 + 0.5) * scale_y - 0.5, src_h);
        for (x, &(x0, x1, fx)) in column_taps.iter().enumerate() {
            for ch in 0..c {
                let at = |xx: usize, yy: usize| src[(yy * src_w as usize + xx) * c + ch] as f32;
                let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
                let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
                let value = top * (1.0 - fy) + bottom * fy;
                out[(y as usize * dst_w as usize + x) * c + ch] = (value + 0.5).clamp(0.0, 255.0) as u8;
            }
        }
    }
    Ok(out)
}

fn taps(pos: f32, len: u32) -> (usize, usize, f32) {
    let max = (len - 1) as f32;
    let pos = pos.clamp(0.0, max);
    let lo = pos.floor();
    let hi = (lo + 1.0).min(max);
    (lo as usize, hi as usize, pos - lo)
}

/// Interleaved u8 to planar f32 with `v * scale + offset`.
pub fn hwc_u8_to_chw_f32(src: &[u8], w: u32, h: u32, c: usize, scale: f32, offset: f32) -> Vec<f32> {
    let mut out = vec![0.0f32; src.len()];
    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                let from = sample_index(PixelArrangement::Hwc, w, h, c, x, y, ch);
                let to = sample_index(PixelArrangement::Chw, w, h, c, x, y, ch);
                out[to] = src[from] as f32 * scale + offset;
            }
        }
    }
    out
}

/// Planar f32 in `[0, 1]` to interleaved u8; values outside the range are clipped.
pub fn chw_f32_to_hwc_u8(src: &[f32], w: u32, h: u32, c: usize) -> Vec<u8> {
    let mut out = vec![0u8; src.len()];
    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                let from = sample_index(PixelArrangement::Chw, w, h, c, x, y, ch);
                let to = sample_index(PixelArrangement::Hwc, w, h, c, x, y, ch);
                out[to] = (src[from].clamp(0.0, 1.0) * 255.0) as u8;
            }
        }
    }
    out
}
