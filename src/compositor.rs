//! In-place composition of annotations onto raw BGRA pixel buffers.
//!
//! Mask zones are painted first, then strokes, so pen marks stay visible
//! over masked regions. All coordinates are clipped to the frame; pixels
//! outside it are skipped silently.

use crate::annotations::{AnnotationSnapshot, MaskStyle, MaskZone, Stroke};
use crate::frame::BGRA_BYTES_PER_PIXEL;

#[inline]
fn offset(stride: usize, x: i32, y: i32) -> usize {
    y as usize * stride + x as usize * BGRA_BYTES_PER_PIXEL
}

/// Apply a snapshot to a pixel buffer in place.
///
/// `pixels` is `stride * height` bytes of BGRA data. An empty snapshot
/// is a no-op; mosaic and stroke passes are idempotent for a fixed
/// snapshot.
pub fn apply(
    pixels: &mut [u8],
    stride: usize,
    width: u32,
    height: u32,
    snapshot: &AnnotationSnapshot,
) {
    for zone in &snapshot.zones {
        apply_zone(pixels, stride, width, height, zone);
    }
    for stroke in &snapshot.strokes {
        apply_stroke(pixels, stride, width, height, stroke);
    }
}

fn apply_zone(pixels: &mut [u8], stride: usize, width: u32, height: u32, zone: &MaskZone) {
    if zone.w <= 0 || zone.h <= 0 {
        return;
    }

    // Zone bounds clipped to the frame
    let zx0 = zone.x.max(0);
    let zy0 = zone.y.max(0);
    let zx1 = (zone.x + zone.w).min(width as i32);
    let zy1 = (zone.y + zone.h).min(height as i32);
    if zx0 >= zx1 || zy0 >= zy1 {
        return;
    }

    match zone.style {
        MaskStyle::Mosaic { block } => {
            mosaic_pass(pixels, stride, zone, zx0, zy0, zx1, zy1, block.max(1) as i32)
        }
        MaskStyle::Blur { radius } => blur_pass(pixels, stride, zx0, zy0, zx1, zy1, radius as i32),
    }
}

/// Flatten every cell of the zone's block grid to the cell's top-left
/// pixel. The grid is anchored at the zone origin; edge cells are
/// clipped to the zone and the frame.
#[allow(clippy::too_many_arguments)]
fn mosaic_pass(
    pixels: &mut [u8],
    stride: usize,
    zone: &MaskZone,
    zx0: i32,
    zy0: i32,
    zx1: i32,
    zy1: i32,
    block: i32,
) {
    let mut cy = zone.y;
    while cy < zone.y + zone.h {
        let mut cx = zone.x;
        while cx < zone.x + zone.w {
            let x0 = cx.max(zx0);
            let y0 = cy.max(zy0);
            let x1 = (cx + block).min(zx1);
            let y1 = (cy + block).min(zy1);

            if x0 < x1 && y0 < y1 {
                let rep_off = offset(stride, x0, y0);
                let mut rep = [0u8; 4];
                rep.copy_from_slice(&pixels[rep_off..rep_off + 4]);

                for y in y0..y1 {
                    for x in x0..x1 {
                        let off = offset(stride, x, y);
                        pixels[off..off + 4].copy_from_slice(&rep);
                    }
                }
            }
            cx += block;
        }
        cy += block;
    }
}

/// Box blur over the clipped zone. Samples come from a scratch copy of
/// the region, with the window clamped to the zone bounds. Alpha is
/// preserved.
fn blur_pass(pixels: &mut [u8], stride: usize, zx0: i32, zy0: i32, zx1: i32, zy1: i32, radius: i32) {
    let radius = radius.max(1);
    let rw = (zx1 - zx0) as usize;
    let rh = (zy1 - zy0) as usize;

    // Scratch copy of the region so the sample source stays fixed
    let mut scratch = vec![0u8; rw * rh * BGRA_BYTES_PER_PIXEL];
    for ry in 0..rh {
        let src = offset(stride, zx0, zy0 + ry as i32);
        let dst = ry * rw * BGRA_BYTES_PER_PIXEL;
        scratch[dst..dst + rw * BGRA_BYTES_PER_PIXEL]
            .copy_from_slice(&pixels[src..src + rw * BGRA_BYTES_PER_PIXEL]);
    }

    for ry in 0..rh as i32 {
        for rx in 0..rw as i32 {
            let wx0 = (rx - radius).max(0);
            let wy0 = (ry - radius).max(0);
            let wx1 = (rx + radius + 1).min(rw as i32);
            let wy1 = (ry + radius + 1).min(rh as i32);

            let mut sum = [0u64; 3];
            let mut count = 0u64;
            for wy in wy0..wy1 {
                for wx in wx0..wx1 {
                    let s = (wy as usize * rw + wx as usize) * BGRA_BYTES_PER_PIXEL;
                    sum[0] += scratch[s] as u64;
                    sum[1] += scratch[s + 1] as u64;
                    sum[2] += scratch[s + 2] as u64;
                    count += 1;
                }
            }

            let off = offset(stride, zx0 + rx, zy0 + ry);
            pixels[off] = (sum[0] / count) as u8;
            pixels[off + 1] = (sum[1] / count) as u8;
            pixels[off + 2] = (sum[2] / count) as u8;
        }
    }
}

/// Paint a filled square of the stroke color centered on the stroke
/// point, clipped to the frame.
fn apply_stroke(pixels: &mut [u8], stride: usize, width: u32, height: u32, stroke: &Stroke) {
    let r = stroke.radius.max(0);
    let x0 = (stroke.x - r).max(0);
    let y0 = (stroke.y - r).max(0);
    let x1 = (stroke.x + r + 1).min(width as i32);
    let y1 = (stroke.y + r + 1).min(height as i32);

    for y in y0..y1 {
        for x in x0..x1 {
            let off = offset(stride, x, y);
            pixels[off..off + 4].copy_from_slice(&stroke.color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::DEFAULT_STROKE_COLOR;
    use crate::frame::Frame;

    /// Frame with a deterministic per-pixel gradient
    fn gradient_frame(width: u32, height: u32) -> Frame {
        let mut frame = Frame::blank(width, height, 0);
        for y in 0..height {
            for x in 0..width {
                let off = y as usize * frame.stride + x as usize * 4;
                frame.data[off] = (x * 3 + y) as u8;
                frame.data[off + 1] = (x + y * 5) as u8;
                frame.data[off + 2] = (x ^ y) as u8;
                frame.data[off + 3] = 255;
            }
        }
        frame
    }

    fn snapshot_with_zone(zone: MaskZone) -> AnnotationSnapshot {
        AnnotationSnapshot {
            strokes: Vec::new(),
            zones: vec![zone],
        }
    }

    #[test]
    fn test_empty_snapshot_is_noop() {
        let mut frame = gradient_frame(16, 16);
        let original = frame.data.clone();
        apply(
            &mut frame.data,
            frame.stride,
            16,
            16,
            &AnnotationSnapshot::default(),
        );
        assert_eq!(frame.data, original);
    }

    #[test]
    fn test_mosaic_cells_are_uniform() {
        let mut frame = gradient_frame(32, 32);
        let original = gradient_frame(32, 32);
        let zone = MaskZone::mosaic(4, 4, 16, 16).with_block(5);
        apply(&mut frame.data, frame.stride, 32, 32, &snapshot_with_zone(zone));

        // Each cell equals the original top-left pixel of that cell
        for cy in (4..20).step_by(5) {
            for cx in (4..20).step_by(5) {
                let rep = original.pixel(cx as u32, cy as u32).unwrap();
                for y in cy..(cy + 5).min(20) {
                    for x in cx..(cx + 5).min(20) {
                        assert_eq!(frame.pixel(x as u32, y as u32).unwrap(), rep);
                    }
                }
            }
        }

        // Pixels outside the zone are untouched
        assert_eq!(frame.pixel(0, 0), original.pixel(0, 0));
        assert_eq!(frame.pixel(21, 21), original.pixel(21, 21));
    }

    #[test]
    fn test_mosaic_is_idempotent() {
        let mut once = gradient_frame(40, 40);
        let zone = MaskZone::mosaic(3, 3, 30, 30);
        let snapshot = snapshot_with_zone(zone);

        apply(&mut once.data, once.stride, 40, 40, &snapshot);
        let mut twice = once.clone();
        apply(&mut twice.data, twice.stride, 40, 40, &snapshot);

        assert_eq!(once.data, twice.data);
    }

    #[test]
    fn test_mosaic_clips_to_frame() {
        let mut frame = gradient_frame(20, 20);
        // Zone hangs off every edge
        let zone = MaskZone::mosaic(-10, -10, 40, 40).with_block(7);
        apply(&mut frame.data, frame.stride, 20, 20, &snapshot_with_zone(zone));
        // Just verifying no panic and the frame is fully masked in a
        // grid anchored at (-10, -10)
        assert!(frame.validate_size());
    }

    #[test]
    fn test_fully_offscreen_zone_is_noop() {
        let mut frame = gradient_frame(16, 16);
        let original = frame.data.clone();
        let zone = MaskZone::mosaic(100, 100, 50, 50);
        apply(&mut frame.data, frame.stride, 16, 16, &snapshot_with_zone(zone));
        assert_eq!(frame.data, original);
    }

    #[test]
    fn test_stroke_paints_exact_square() {
        let mut frame = gradient_frame(32, 32);
        let original = gradient_frame(32, 32);
        let snapshot = AnnotationSnapshot {
            strokes: vec![Stroke::new(10, 10), Stroke::new(10, 11)],
            zones: Vec::new(),
        };
        apply(&mut frame.data, frame.stride, 32, 32, &snapshot);

        for y in 0..32u32 {
            for x in 0..32u32 {
                let in_first = (8..=12).contains(&x) && (8..=12).contains(&y);
                let in_second = (8..=12).contains(&x) && (9..=13).contains(&y);
                if in_first || in_second {
                    assert_eq!(frame.pixel(x, y).unwrap(), DEFAULT_STROKE_COLOR);
                } else {
                    assert_eq!(frame.pixel(x, y), original.pixel(x, y));
                }
            }
        }
    }

    #[test]
    fn test_stroke_clips_at_frame_corner() {
        let mut frame = gradient_frame(8, 8);
        let snapshot = AnnotationSnapshot {
            strokes: vec![Stroke::new(0, 0)],
            zones: Vec::new(),
        };
        apply(&mut frame.data, frame.stride, 8, 8, &snapshot);

        assert_eq!(frame.pixel(0, 0).unwrap(), DEFAULT_STROKE_COLOR);
        assert_eq!(frame.pixel(2, 2).unwrap(), DEFAULT_STROKE_COLOR);
        assert_ne!(frame.pixel(3, 3).unwrap(), DEFAULT_STROKE_COLOR);
    }

    #[test]
    fn test_strokes_paint_over_masks() {
        let mut frame = gradient_frame(32, 32);
        let snapshot = AnnotationSnapshot {
            strokes: vec![Stroke::new(10, 10)],
            zones: vec![MaskZone::mosaic(0, 0, 32, 32)],
        };
        apply(&mut frame.data, frame.stride, 32, 32, &snapshot);
        assert_eq!(frame.pixel(10, 10).unwrap(), DEFAULT_STROKE_COLOR);
    }

    #[test]
    fn test_blur_keeps_uniform_region_uniform() {
        let mut frame = Frame::blank(16, 16, 0);
        for px in frame.data.chunks_exact_mut(4) {
            px.copy_from_slice(&[100, 150, 200, 255]);
        }
        let zone = MaskZone::blur(2, 2, 10, 10, 3);
        apply(&mut frame.data, frame.stride, 16, 16, &snapshot_with_zone(zone));

        for y in 2..12 {
            for x in 2..12 {
                assert_eq!(frame.pixel(x, y).unwrap(), [100, 150, 200, 255]);
            }
        }
    }

    #[test]
    fn test_blur_softens_edges_within_zone_only() {
        let mut frame = Frame::blank(16, 16, 0);
        // Left half black, right half white
        for y in 0..16 {
            for x in 8..16 {
                let off = y * frame.stride + x * 4;
                frame.data[off..off + 4].copy_from_slice(&[255, 255, 255, 255]);
            }
        }
        let original = frame.clone();

        let zone = MaskZone::blur(4, 4, 8, 8, 2);
        apply(&mut frame.data, frame.stride, 16, 16, &snapshot_with_zone(zone));

        // The edge inside the zone is softened
        let edge = frame.pixel(8, 8).unwrap();
        assert!(edge[0] > 0 && edge[0] < 255);
        // Outside the zone the hard edge survives
        assert_eq!(frame.pixel(8, 0), original.pixel(8, 0));
        assert_eq!(frame.pixel(7, 0), original.pixel(7, 0));
    }
}
