//! The drawing surface: owns the committed raster for the active page and
//! turns pointer gestures into rasterized strokes plus undo commands.
//!
//! Stroke assembly is a small state machine (idle → assembling → idle).
//! While assembling, move points are accepted only past a jitter tolerance
//! and joined with quadratic segments through the midpoints of consecutive
//! raw points, which is what keeps slow stylus strokes smooth on a
//! refresh-limited panel. The committed bitmap sits behind a shared mutex;
//! the foreground holds it only for the rasterize/snapshot step so the
//! autosave worker can take copies without blocking input for long.

use std::sync::{Arc, Mutex};

use image::RgbaImage;

use crate::history::{StrokeRegion, UndoStack};
use crate::raster::{BLACK, PixelBuffer, Region, StrokePaint, StrokePath, WHITE};

/// Jitter suppression: a move must travel this far (per axis) from the last
/// accepted point before it extends the path.
pub const TOUCH_TOLERANCE: f32 = 4.0;
/// Stroke bounding boxes are outset by this margin before capture, so round
/// caps and the AA fringe are inside the undo region.
pub const STROKE_MARGIN: f32 = 5.0;

pub const PENCIL_WIDTH: f32 = 3.0;
pub const ERASER_WIDTH: f32 = 30.0;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Tool {
    #[default]
    Pencil,
    Eraser,
}

/// Paint parameters per tool. The eraser paints opaque background color
/// (not alpha removal) and ships non-anti-aliased; both are plain fields
/// rather than rules, since the AA split mirrors observed device behavior.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToolConfig {
    pub pencil: StrokePaint,
    pub eraser: StrokePaint,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            pencil: StrokePaint {
                width: PENCIL_WIDTH,
                color: BLACK,
                anti_aliased: true,
            },
            eraser: StrokePaint {
                width: ERASER_WIDTH,
                color: WHITE,
                anti_aliased: false,
            },
        }
    }
}

impl ToolConfig {
    pub fn paint_for(&self, tool: Tool) -> StrokePaint {
        match tool {
            Tool::Pencil => self.pencil,
            Tool::Eraser => self.eraser,
        }
    }
}

/// Fired after any committed change to the page raster (stroke commit,
/// undo/redo, resize). Consumers pull `snapshot()` when they need pixels.
pub type BitmapObserver = Box<dyn Fn() + Send>;
/// Fired with `(can_undo, can_redo)` when availability changes.
pub type UndoStateObserver = Box<dyn Fn(bool, bool) + Send>;

pub struct DrawingSurface {
    /// The committed page raster. Shared so the autosave worker can take
    /// copy-on-read snapshots; locked only for rasterize/copy steps.
    bitmap: Arc<Mutex<PixelBuffer>>,
    width: u32,
    height: u32,

    undo: UndoStack,

    tools: ToolConfig,
    tool: Tool,
    /// Paint latched at pointer-down; tool switches mid-stroke only apply
    /// to the next stroke.
    latched_paint: Option<StrokePaint>,

    path: StrokePath,
    assembling: bool,
    prev_x: f32,
    prev_y: f32,

    background: Option<RgbaImage>,
    view_mode: bool,
    page_idx: usize,

    on_bitmap_updated: Option<BitmapObserver>,
    on_undo_state_changed: Option<UndoStateObserver>,
    last_undo_state: (bool, bool),
}

impl DrawingSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            bitmap: Arc::new(Mutex::new(PixelBuffer::new(width, height))),
            width,
            height,
            undo: UndoStack::new(),
            tools: ToolConfig::default(),
            tool: Tool::Pencil,
            latched_paint: None,
            path: StrokePath::new(),
            assembling: false,
            prev_x: 0.0,
            prev_y: 0.0,
            background: None,
            view_mode: false,
            page_idx: 0,
            on_bitmap_updated: None,
            on_undo_state_changed: None,
            last_undo_state: (false, false),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn current_page(&self) -> usize {
        self.page_idx
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn set_tool_config(&mut self, tools: ToolConfig) {
        self.tools = tools;
    }

    /// While set, all pointer input is ignored.
    pub fn set_view_mode(&mut self, view_mode: bool) {
        self.view_mode = view_mode;
    }

    pub fn is_view_mode(&self) -> bool {
        self.view_mode
    }

    pub fn set_on_bitmap_updated(&mut self, f: BitmapObserver) {
        self.on_bitmap_updated = Some(f);
    }

    pub fn set_on_undo_state_changed(&mut self, f: UndoStateObserver) {
        self.on_undo_state_changed = Some(f);
    }

    /// Handle to the canonical bitmap for cross-thread copy-on-read access.
    pub fn shared_bitmap(&self) -> Arc<Mutex<PixelBuffer>> {
        Arc::clone(&self.bitmap)
    }

    /// Owned copy of the committed raster, taken under the lock.
    pub fn snapshot(&self) -> RgbaImage {
        self.bitmap.lock().expect("bitmap lock poisoned").snapshot()
    }

    /// Blit an initial raster (scaled to surface bounds) into the committed
    /// bitmap. Used when the first page comes up.
    pub fn load_initial(&mut self, initial: Option<&RgbaImage>) {
        {
            let mut buf = self.bitmap.lock().expect("bitmap lock poisoned");
            buf.fill_white();
            if let Some(img) = initial {
                buf.blit_scaled(img);
            }
        }
        self.notify_undo_state();
    }

    // ------------------------------------------------------------------
    // Stroke assembly
    // ------------------------------------------------------------------

    pub fn pointer_down(&mut self, x: f32, y: f32) {
        if self.view_mode {
            return;
        }
        // A down while still assembling force-closes the previous stroke.
        if self.assembling {
            self.pointer_up(self.prev_x, self.prev_y);
        }
        self.latched_paint = Some(self.tools.paint_for(self.tool));
        self.path.move_to(x, y);
        self.prev_x = x;
        self.prev_y = y;
        self.assembling = true;
    }

    pub fn pointer_move(&mut self, x: f32, y: f32) {
        if !self.assembling {
            return;
        }
        let dx = (x - self.prev_x).abs();
        let dy = (y - self.prev_y).abs();
        if dx >= TOUCH_TOLERANCE || dy >= TOUCH_TOLERANCE {
            self.path.quad_to(
                (self.prev_x, self.prev_y),
                ((x + self.prev_x) / 2.0, (y + self.prev_y) / 2.0),
            );
            self.prev_x = x;
            self.prev_y = y;
        }
    }

    /// Close the open path, rasterize it, and push the region diff.
    pub fn pointer_up(&mut self, x: f32, y: f32) {
        if !self.assembling {
            return;
        }
        self.assembling = false;
        self.path.line_to(x, y);

        let paint = self.latched_paint.take().unwrap_or_else(|| self.tools.paint_for(self.tool));
        let Some(bounds) = self.path.bounds() else {
            self.path.reset();
            return;
        };
        let region = Region::from_bounds(bounds, STROKE_MARGIN, self.width, self.height);
        if region.is_empty() {
            // stroke entirely off-surface
            self.path.reset();
            return;
        }

        {
            let mut buf = self.bitmap.lock().expect("bitmap lock poisoned");
            let before = buf.extract(region);
            buf.stroke_path(&self.path, &paint);
            let after = buf.extract(region);
            self.undo.push(StrokeRegion { before, after });
        }
        self.path.reset();

        self.notify_bitmap_updated();
        self.notify_undo_state();
    }

    /// True while a stroke is between pointer-down and pointer-up.
    pub fn is_assembling(&self) -> bool {
        self.assembling
    }

    // ------------------------------------------------------------------
    // Undo / redo
    // ------------------------------------------------------------------

    pub fn undo(&mut self) -> bool {
        let applied = {
            let mut buf = self.bitmap.lock().expect("bitmap lock poisoned");
            self.undo.undo(&mut buf)
        };
        if applied {
            self.notify_bitmap_updated();
            self.notify_undo_state();
        }
        applied
    }

    pub fn redo(&mut self) -> bool {
        let applied = {
            let mut buf = self.bitmap.lock().expect("bitmap lock poisoned");
            self.undo.redo(&mut buf)
        };
        if applied {
            self.notify_bitmap_updated();
            self.notify_undo_state();
        }
        applied
    }

    // ------------------------------------------------------------------
    // Page switch / resize / background
    // ------------------------------------------------------------------

    /// Switch the committed bitmap to another page. No-op when `idx` is the
    /// current page. Undo history never crosses page boundaries.
    pub fn goto_page<F>(&mut self, idx: usize, loader: F)
    where
        F: FnOnce(usize) -> Option<RgbaImage>,
    {
        if self.page_idx == idx {
            return;
        }
        self.page_idx = idx;

        let loaded = loader(idx);
        {
            let mut buf = self.bitmap.lock().expect("bitmap lock poisoned");
            buf.fill_white();
            if let Some(img) = &loaded {
                buf.blit_scaled(img);
            }
        }
        self.undo.clear();
        self.notify_undo_state();
    }

    /// Surface size change (e.g. display rotation): the committed content is
    /// re-blitted scaled into a fresh buffer.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == self.width && height == self.height {
            return;
        }
        let old = self.snapshot();
        self.width = width;
        self.height = height;
        {
            let mut buf = self.bitmap.lock().expect("bitmap lock poisoned");
            *buf = PixelBuffer::new(width, height);
            buf.blit_scaled(&old);
        }
        self.notify_bitmap_updated();
    }

    /// Optional book-wide background raster, composited under the ink at
    /// display time only.
    pub fn set_background(&mut self, background: Option<RgbaImage>) {
        self.background = background;
    }

    pub fn has_background(&self) -> bool {
        self.background.is_some()
    }

    /// What the shell should present: committed ink, multiplied over the
    /// background when one is set.
    pub fn composite_view(&self) -> RgbaImage {
        let buf = self.bitmap.lock().expect("bitmap lock poisoned");
        match &self.background {
            Some(bg) => buf.composite_multiply(bg),
            None => buf.snapshot(),
        }
    }

    // ------------------------------------------------------------------

    fn notify_bitmap_updated(&self) {
        if let Some(f) = &self.on_bitmap_updated {
            f();
        }
    }

    fn notify_undo_state(&mut self) {
        let state = (self.undo.can_undo(), self.undo.can_redo());
        if state != self.last_undo_state {
            self.last_undo_state = state;
            if let Some(f) = &self.on_undo_state_changed {
                f(state.0, state.1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn draw_line(surface: &mut DrawingSurface, from: (f32, f32), to: (f32, f32)) {
        surface.pointer_down(from.0, from.1);
        surface.pointer_move((from.0 + to.0) / 2.0, (from.1 + to.1) / 2.0);
        surface.pointer_up(to.0, to.1);
    }

    fn ink_count(img: &RgbaImage) -> usize {
        img.pixels().filter(|p| p[0] < 128).count()
    }

    #[test]
    fn stroke_commit_is_undoable() {
        let mut surface = DrawingSurface::new(64, 64);
        draw_line(&mut surface, (10.0, 10.0), (40.0, 30.0));
        assert!(surface.can_undo());
        assert!(ink_count(&surface.snapshot()) > 0);

        surface.undo();
        assert_eq!(ink_count(&surface.snapshot()), 0);
        assert!(surface.can_redo());

        surface.redo();
        assert!(ink_count(&surface.snapshot()) > 0);
    }

    #[test]
    fn jitter_below_tolerance_is_suppressed() {
        let mut surface = DrawingSurface::new(64, 64);
        surface.pointer_down(20.0, 20.0);
        // all moves inside the 4px tolerance: path stays a dot
        surface.pointer_move(21.0, 21.0);
        surface.pointer_move(19.5, 20.5);
        surface.pointer_up(20.5, 20.0);

        let snap = surface.snapshot();
        // ink confined to a small disc around the down point
        for (x, y, p) in snap.enumerate_pixels() {
            if p[0] < 128 {
                let dx = x as f32 - 20.0;
                let dy = y as f32 - 20.0;
                assert!(dx * dx + dy * dy < 36.0, "ink at ({x},{y})");
            }
        }
    }

    #[test]
    fn tool_switch_mid_stroke_takes_effect_next_stroke() {
        let mut surface = DrawingSurface::new(64, 64);
        surface.pointer_down(10.0, 32.0);
        surface.set_tool(Tool::Eraser);
        surface.pointer_move(30.0, 32.0);
        surface.pointer_up(50.0, 32.0);

        // latched pencil: the stroke is black ink, not 30px-wide white
        assert!(ink_count(&surface.snapshot()) > 0);
        assert_eq!(surface.tool(), Tool::Eraser);
    }

    #[test]
    fn eraser_paints_background_color() {
        let mut surface = DrawingSurface::new(64, 64);
        draw_line(&mut surface, (10.0, 32.0), (50.0, 32.0));
        let inked = ink_count(&surface.snapshot());
        assert!(inked > 0);

        surface.set_tool(Tool::Eraser);
        draw_line(&mut surface, (10.0, 32.0), (50.0, 32.0));
        assert_eq!(ink_count(&surface.snapshot()), 0);
        // erasing is a stroke too, so it is undoable
        surface.undo();
        assert_eq!(ink_count(&surface.snapshot()), inked);
    }

    #[test]
    fn page_switch_clears_undo_history() {
        let mut surface = DrawingSurface::new(64, 64);
        draw_line(&mut surface, (10.0, 10.0), (40.0, 40.0));
        assert!(surface.can_undo());

        surface.goto_page(1, |_| None);
        assert!(!surface.can_undo());
        assert!(!surface.can_redo());
        assert_eq!(ink_count(&surface.snapshot()), 0);

        // same-index switch is a no-op and must not reload or clear
        draw_line(&mut surface, (10.0, 10.0), (40.0, 40.0));
        surface.goto_page(1, |_| panic!("loader must not run"));
        assert!(surface.can_undo());
    }

    #[test]
    fn view_mode_ignores_input() {
        let mut surface = DrawingSurface::new(64, 64);
        surface.set_view_mode(true);
        draw_line(&mut surface, (10.0, 10.0), (40.0, 40.0));
        assert_eq!(ink_count(&surface.snapshot()), 0);
        assert!(!surface.can_undo());
    }

    #[test]
    fn observers_fire_on_commit_and_undo_state_change() {
        static UPDATES: AtomicUsize = AtomicUsize::new(0);
        static UNDO_CHANGES: AtomicUsize = AtomicUsize::new(0);

        let mut surface = DrawingSurface::new(64, 64);
        surface.set_on_bitmap_updated(Box::new(|| {
            UPDATES.fetch_add(1, Ordering::SeqCst);
        }));
        surface.set_on_undo_state_changed(Box::new(|_, _| {
            UNDO_CHANGES.fetch_add(1, Ordering::SeqCst);
        }));

        draw_line(&mut surface, (10.0, 10.0), (40.0, 40.0));
        assert_eq!(UPDATES.load(Ordering::SeqCst), 1);
        assert_eq!(UNDO_CHANGES.load(Ordering::SeqCst), 1); // (false,false) -> (true,false)

        draw_line(&mut surface, (10.0, 20.0), (40.0, 50.0));
        assert_eq!(UPDATES.load(Ordering::SeqCst), 2);
        // undo availability unchanged, no second undo-state callback
        assert_eq!(UNDO_CHANGES.load(Ordering::SeqCst), 1);

        surface.undo();
        assert_eq!(UNDO_CHANGES.load(Ordering::SeqCst), 2); // redo became available
    }

    #[test]
    fn second_down_force_closes_previous_stroke() {
        let mut surface = DrawingSurface::new(64, 64);
        surface.pointer_down(10.0, 10.0);
        surface.pointer_move(30.0, 10.0);
        // new down without an up: previous stroke commits first
        surface.pointer_down(10.0, 40.0);
        assert!(surface.can_undo());
        surface.pointer_up(30.0, 40.0);
    }

    #[test]
    fn resize_rescales_ink_and_notifies() {
        static UPDATES: AtomicUsize = AtomicUsize::new(0);

        let mut surface = DrawingSurface::new(64, 64);
        draw_line(&mut surface, (10.0, 32.0), (50.0, 32.0));
        surface.set_on_bitmap_updated(Box::new(|| {
            UPDATES.fetch_add(1, Ordering::SeqCst);
        }));

        surface.resize(128, 128);
        assert_eq!(UPDATES.load(Ordering::SeqCst), 1);
        let snap = surface.snapshot();
        assert_eq!(snap.dimensions(), (128, 128));
        // the stroke follows the scale: source (30, 32) maps to (60, 64)
        assert!(snap.get_pixel(60, 64)[0] < 128);

        // history survives the resize; the bounds-guarded patch applies
        // without panicking
        assert!(surface.can_undo());
        assert!(surface.undo());
        assert_eq!(UPDATES.load(Ordering::SeqCst), 2);

        // same-size resize is a no-op
        surface.resize(128, 128);
        assert_eq!(UPDATES.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn background_multiplies_under_ink() {
        let mut surface = DrawingSurface::new(8, 8);
        surface.set_background(Some(RgbaImage::from_pixel(
            8,
            8,
            Rgba([100, 100, 100, 255]),
        )));
        let view = surface.composite_view();
        // blank white page: the background shows through everywhere
        assert!(view.pixels().all(|p| p[0] == 100));
        // the persisted raster itself stays white
        assert!(surface.snapshot().pixels().all(|p| p[0] == 255));
    }
}
