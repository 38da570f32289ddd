//! Pixel buffer and region primitives shared by the drawing surface, the
//! undo stack and the page store.
//!
//! Pages are plain RGBA8 buffers (white background, grayscale ink). All
//! region arithmetic clamps to buffer bounds so callers can pass raw stroke
//! geometry without pre-validating it.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

// ============================================================================
// REGION
// ============================================================================

/// An axis-aligned pixel rectangle, `max` exclusive, always within the
/// bounds of the buffer it was clamped against.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Region {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl Region {
    /// Build a region from float bounds, outset by `margin` pixels and
    /// clamped into a `bounds_w` × `bounds_h` buffer.
    pub fn from_bounds(
        (min_x, min_y, max_x, max_y): (f32, f32, f32, f32),
        margin: f32,
        bounds_w: u32,
        bounds_h: u32,
    ) -> Self {
        let clamp = |v: f32, hi: u32| (v.max(0.0) as u32).min(hi);
        Self {
            min_x: clamp((min_x - margin).floor(), bounds_w),
            min_y: clamp((min_y - margin).floor(), bounds_h),
            max_x: clamp((max_x + margin).ceil(), bounds_w),
            max_y: clamp((max_y + margin).ceil(), bounds_h),
        }
    }

    pub fn width(&self) -> u32 {
        self.max_x.saturating_sub(self.min_x)
    }

    pub fn height(&self) -> u32 {
        self.max_y.saturating_sub(self.min_y)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

// ============================================================================
// PIXEL PATCH
// ============================================================================

/// A rectangular copy of pixel data, remembering where it came from.
/// Pre/post stroke snapshots of these are what the undo stack retains.
#[derive(Clone)]
pub struct PixelPatch {
    pub origin_x: u32,
    pub origin_y: u32,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Rgba<u8>>,
}

impl PixelPatch {
    /// 4 bytes per RGBA pixel.
    pub fn byte_size(&self) -> usize {
        self.pixels.len() * 4
    }
}

// ============================================================================
// STROKE PATH
// ============================================================================

#[derive(Clone, Copy, Debug)]
enum PathSeg {
    Quad { ctrl: (f32, f32), end: (f32, f32) },
    Line { end: (f32, f32) },
}

/// An open stroke path: one `move_to` origin followed by quadratic and
/// straight segments. Bounds are tracked incrementally and include control
/// points (conservative, matching the region-diff capture).
#[derive(Clone, Debug, Default)]
pub struct StrokePath {
    start: Option<(f32, f32)>,
    segs: Vec<PathSeg>,
    bounds: Option<(f32, f32, f32, f32)>,
}

impl StrokePath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.start = None;
        self.segs.clear();
        self.bounds = None;
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none()
    }

    pub fn move_to(&mut self, x: f32, y: f32) {
        self.reset();
        self.start = Some((x, y));
        self.grow_bounds(x, y);
    }

    pub fn quad_to(&mut self, ctrl: (f32, f32), end: (f32, f32)) {
        if self.start.is_none() {
            return;
        }
        self.grow_bounds(ctrl.0, ctrl.1);
        self.grow_bounds(end.0, end.1);
        self.segs.push(PathSeg::Quad { ctrl, end });
    }

    pub fn line_to(&mut self, x: f32, y: f32) {
        if self.start.is_none() {
            return;
        }
        self.grow_bounds(x, y);
        self.segs.push(PathSeg::Line { end: (x, y) });
    }

    pub fn bounds(&self) -> Option<(f32, f32, f32, f32)> {
        self.bounds
    }

    fn grow_bounds(&mut self, x: f32, y: f32) {
        self.bounds = Some(match self.bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }

    /// Flatten to a polyline. Quadratic segments are subdivided by chord
    /// length so curvature stays below a pixel at stroke scale.
    pub fn flatten(&self) -> Vec<(f32, f32)> {
        let Some(start) = self.start else {
            return Vec::new();
        };
        let mut pts = vec![start];
        let mut cur = start;
        for seg in &self.segs {
            match *seg {
                PathSeg::Line { end } => {
                    pts.push(end);
                    cur = end;
                }
                PathSeg::Quad { ctrl, end } => {
                    let len = dist(cur, ctrl) + dist(ctrl, end);
                    let steps = (len / 2.0).ceil().clamp(1.0, 64.0) as u32;
                    for i in 1..=steps {
                        let t = i as f32 / steps as f32;
                        let u = 1.0 - t;
                        let x = u * u * cur.0 + 2.0 * u * t * ctrl.0 + t * t * end.0;
                        let y = u * u * cur.1 + 2.0 * u * t * ctrl.1 + t * t * end.1;
                        pts.push((x, y));
                    }
                    cur = end;
                }
            }
        }
        pts
    }
}

fn dist(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = b.0 - a.0;
    let dy = b.1 - a.1;
    (dx * dx + dy * dy).sqrt()
}

// ============================================================================
// STROKE PAINT
// ============================================================================

/// Rendering parameters for one tool: round cap/join stroking at a fixed
/// width. `anti_aliased` selects a smoothstep edge vs. a hard radius test.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokePaint {
    pub width: f32,
    pub color: Rgba<u8>,
    pub anti_aliased: bool,
}

impl StrokePaint {
    /// Coverage at `d` pixels from the stamp center.
    fn alpha(&self, d: f32) -> f32 {
        let radius = self.width / 2.0;
        if !self.anti_aliased {
            return if d <= radius { 1.0 } else { 0.0 };
        }
        // ~1.5px fade ring straddling the nominal radius; smoothstep falloff.
        let fade = 1.5_f32;
        let outer = radius + fade * 0.5;
        let solid = (outer - fade).max(0.0);
        if d <= solid {
            1.0
        } else if d >= outer {
            0.0
        } else {
            let x = 1.0 - (d - solid) / fade;
            x * x * (3.0 - 2.0 * x)
        }
    }
}

// ============================================================================
// PIXEL BUFFER
// ============================================================================

/// The fixed-format (RGBA8, white-initialised) raster everything draws on.
#[derive(Clone)]
pub struct PixelBuffer {
    image: RgbaImage,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, WHITE),
        }
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Owned copy of the raster, for cross-thread consumers.
    pub fn snapshot(&self) -> RgbaImage {
        self.image.clone()
    }

    pub fn fill_white(&mut self) {
        for px in self.image.pixels_mut() {
            *px = WHITE;
        }
    }

    /// Copy out a sub-rectangle. `region` must already be clamped.
    pub fn extract(&self, region: Region) -> PixelPatch {
        let mut pixels = Vec::with_capacity((region.width() * region.height()) as usize);
        for y in region.min_y..region.max_y {
            for x in region.min_x..region.max_x {
                pixels.push(*self.image.get_pixel(x, y));
            }
        }
        PixelPatch {
            origin_x: region.min_x,
            origin_y: region.min_y,
            width: region.width(),
            height: region.height(),
            pixels,
        }
    }

    /// Copy a patch back in at its recorded origin, bounds-guarded.
    pub fn paint(&mut self, patch: &PixelPatch) {
        let mut idx = 0;
        for y in 0..patch.height {
            for x in 0..patch.width {
                let px = patch.origin_x + x;
                let py = patch.origin_y + y;
                if px < self.width() && py < self.height() && idx < patch.pixels.len() {
                    self.image.put_pixel(px, py, patch.pixels[idx]);
                }
                idx += 1;
            }
        }
    }

    /// Stretch-blit `src` over the whole buffer with nearest sampling.
    pub fn blit_scaled(&mut self, src: &RgbaImage) {
        let (sw, sh) = src.dimensions();
        if sw == 0 || sh == 0 {
            return;
        }
        let (dw, dh) = self.image.dimensions();
        for y in 0..dh {
            let sy = (y as u64 * sh as u64 / dh as u64) as u32;
            for x in 0..dw {
                let sx = (x as u64 * sw as u64 / dw as u64) as u32;
                self.image.put_pixel(x, y, *src.get_pixel(sx, sy));
            }
        }
    }

    /// Rasterize a stroke path: round stamps along the flattened polyline.
    /// Touched pixels are blended with the paint's coverage; ink is opaque
    /// so repeated stamping converges on the paint color.
    pub fn stroke_path(&mut self, path: &StrokePath, paint: &StrokePaint) {
        let pts = path.flatten();
        if pts.is_empty() {
            return;
        }
        let radius = (paint.width / 2.0).max(0.5);
        let spacing = (radius * 0.5).max(0.5);

        self.stamp(pts[0], radius, paint);
        for pair in pts.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let len = dist(a, b);
            if len < f32::EPSILON {
                continue;
            }
            let steps = (len / spacing).ceil() as u32;
            for i in 1..=steps {
                let t = i as f32 / steps as f32;
                let p = (a.0 + (b.0 - a.0) * t, a.1 + (b.1 - a.1) * t);
                self.stamp(p, radius, paint);
            }
        }
    }

    fn stamp(&mut self, center: (f32, f32), radius: f32, paint: &StrokePaint) {
        // AA stamps reach slightly past the nominal radius.
        let reach = radius + 2.0;
        let (w, h) = self.image.dimensions();
        let min_x = ((center.0 - reach).floor().max(0.0)) as u32;
        let min_y = ((center.1 - reach).floor().max(0.0)) as u32;
        let max_x = (((center.0 + reach).ceil().max(0.0)) as u32).min(w);
        let max_y = (((center.1 + reach).ceil().max(0.0)) as u32).min(h);

        for y in min_y..max_y {
            for x in min_x..max_x {
                let d = dist((x as f32 + 0.5, y as f32 + 0.5), center);
                let alpha = paint.alpha(d);
                if alpha <= 0.0 {
                    continue;
                }
                let dst = self.image.get_pixel_mut(x, y);
                for c in 0..3 {
                    let s = paint.color[c] as f32;
                    let d0 = dst[c] as f32;
                    dst[c] = (d0 + (s - d0) * alpha).round().clamp(0.0, 255.0) as u8;
                }
                dst[3] = 255;
            }
        }
    }

    /// Display-time composite of the committed ink over an optional
    /// background raster, multiplicative blend: black ink stays black, white
    /// ink lets the background show through. Never written back to storage.
    pub fn composite_multiply(&self, background: &RgbaImage) -> RgbaImage {
        let (w, h) = self.image.dimensions();
        let mut bg = PixelBuffer::new(w, h);
        bg.blit_scaled(background);

        let mut out = self.image.clone();
        let stride = w as usize * 4;
        out.par_chunks_mut(stride)
            .zip(bg.image.par_chunks(stride))
            .for_each(|(orow, brow)| {
                for (o, b) in orow.iter_mut().zip(brow.iter()) {
                    *o = ((*o as u16 * *b as u16) / 255) as u8;
                }
            });
        out
    }
}
