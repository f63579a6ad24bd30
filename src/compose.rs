//! Alpha compositing of inference patches back onto a frame.

use anyhow::{anyhow, Context, Result};

use crate::frame::{BoundingBox, Frame, PixelArrangement, PixelFormat};
use crate::imaging::resize_bilinear;

/// Blend an RGBA `foreground` patch into `region` of `background`.
///
/// The patch is resized to the clamped region, then composited with
/// `out = (1 - a) * bg + a * fg`. Alpha inside the region is set to opaque and
/// the output is `RgbaU8`. An empty region returns the background unchanged.
pub fn composite(background: Frame, foreground: &Frame, region: BoundingBox) -> Result<Frame> {
    composite_all(background, &[(foreground, region)])
}

/// Composite several patches in order. An empty list is a passthrough that
/// preserves the background's format.
pub fn composite_all(background: Frame, patches: &[(&Frame, BoundingBox)]) -> Result<Frame> {
    let (width, height) = (background.width(), background.height());
    let regions: Vec<(&Frame, BoundingBox)> = patches
        .iter()
        .map(|(fg, region)| (*fg, region.clamp_to(width, height)))
        .filter(|(_, region)| !region.is_empty())
        .collect();
    if regions.is_empty() {
        return Ok(background);
    }
    if background.arrangement() != PixelArrangement::Hwc {
        return Err(anyhow!("compositing requires an interleaved background"));
    }

    let mut out = background
        .convert(PixelFormat::RgbaU8)
        .context("converting background to rgba")?;
    for (foreground, region) in regions {
        let patch = patch_rgba(foreground, region)?;
        blend_into(&mut out, &patch, region)?;
    }
    Ok(out)
}

fn patch_rgba(foreground: &Frame, region: BoundingBox) -> Result<Vec<u8>> {
    if foreground.arrangement() != PixelArrangement::Hwc {
        return Err(anyhow!("compositing requires an interleaved foreground"));
    }
    let rgba = foreground.as_rgba().context("converting foreground to rgba")?;
    resize_bilinear(
        &rgba,
        foreground.width(),
        foreground.height(),
        4,
        region.width,
        region.height,
    )
}

fn blend_into(out: &mut Frame, patch: &[u8], region: BoundingBox) -> Result<()> {
    let width = out.width() as usize;
    let pixels = out
        .pixels_u8_mut()
        .ok_or_else(|| anyhow!("composite target is not 8-bit"))?;
    for row in 0..region.height as usize {
        for col in 0..region.width as usize {
            let src = (row * region.width as usize + col) * 4;
            let dst = ((region.top as usize + row) * width + region.left as usize + col) * 4;
            let alpha = patch[src + 3] as f32 / 255.0;
            for ch in 0..3 {
                let bg = pixels[dst + ch] as f32;
                let fg = patch[src + ch] as f32;
                pixels[dst + ch] = ((1.0 - alpha) * bg + alpha * fg) as u8;
            }
            pixels[dst + 3] = 255;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(format: PixelFormat, w: u32, h: u32, px: &[u8]) -> Frame {
        let data = px.iter().copied().cycle().take(w as usize * h as usize * px.len()).collect();
        Frame::from_u8(data, format, PixelArrangement::Hwc, w, h).unwrap()
    }

    #[test]
    fn opaque_patch_replaces_region() {
        let bg = solid(PixelFormat::RgbU8, 8, 8, &[10, 20, 30]);
        let fg = solid(PixelFormat::RgbaU8, 3, 3, &[200, 100, 50, 255]);
        let out = composite(bg, &fg, BoundingBox::new(2, 2, 4, 4)).unwrap();
        assert_eq!(out.format(), PixelFormat::RgbaU8);
        let px = out.pixels_u8().unwrap();
        let at = |x: usize, y: usize| &px[(y * 8 + x) * 4..(y * 8 + x) * 4 + 4];
        assert_eq!(at(3, 3), &[200, 100, 50, 255]);
        assert_eq!(at(0, 0), &[10, 20, 30, 255]);
        assert_eq!(at(6, 6), &[10, 20, 30, 255]);
    }

    #[test]
    fn transparent_patch_keeps_background() {
        let bg = solid(PixelFormat::RgbaU8, 4, 4, &[10, 20, 30, 40]);
        let fg = solid(PixelFormat::RgbaU8, 4, 4, &[200, 100, 50, 0]);
        let out = composite(bg, &fg, BoundingBox::new(0, 0, 2, 2)).unwrap();
        let px = out.pixels_u8().unwrap();
        assert_eq!(&px[0..4], &[10, 20, 30, 255]);
        // Outside the region the original alpha survives.
        assert_eq!(&px[12..16], &[10, 20, 30, 40]);
    }

    #[test]
    fn half_alpha_blends() {
        let bg = solid(PixelFormat::RgbU8, 2, 2, &[0, 0, 0]);
        let fg = solid(PixelFormat::RgbaU8, 2, 2, &[200, 100, 50, 128]);
        let out = composite(bg, &fg, BoundingBox::new(0, 0, 2, 2)).unwrap();
        let px = out.pixels_u8().unwrap();
        assert_eq!(&px[0..4], &[100, 50, 25, 255]);
    }

    #[test]
    fn no_patches_is_passthrough() {
        let bg = solid(PixelFormat::BgrU8, 4, 4, &[1, 2, 3]);
        let out = composite_all(bg.clone(), &[]).unwrap();
        assert_eq!(out.format(), PixelFormat::BgrU8);
        assert_eq!(out.data(), bg.data());
    }

    #[test]
    fn region_outside_frame_is_passthrough() {
        let bg = solid(PixelFormat::RgbU8, 4, 4, &[1, 2, 3]);
        let fg = solid(PixelFormat::RgbaU8, 2, 2, &[9, 9, 9, 255]);
        let out = composite(bg, &fg, BoundingBox::new(10, 10, 2, 2)).unwrap();
        assert_eq!(out.format(), PixelFormat::RgbU8);
    }
}
