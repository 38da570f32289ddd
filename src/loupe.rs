//! Loupe/magnifier controller.
//!
//! The loupe is a panel docked over the page: a small drag handle on top of
//! a magnified paint area showing the "navigator" sub-rectangle of the page.
//! Drawing inside the paint area is remapped to full-page coordinates and
//! forwarded into the drawing surface's stroke assembly, so a stroke made in
//! the loupe is indistinguishable from one made directly on the page.
//!
//! Touch routing has two layers, matching the device behavior: a press on
//! the page outside the panel places the navigator and drags it around
//! (`navigator_dragging`), while presses on the panel itself run the
//! `DORMANT → MOVING/DRAWING → DORMANT` machine.

use crate::input::{PointerEvent, PointerPhase};
use crate::surface::DrawingSurface;

pub const DEFAULT_SCALE: f32 = 1.5;
/// Fixed horizontal panel offset from the left page edge.
const PANEL_X: f32 = 5.0;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum LoupeState {
    #[default]
    Dormant,
    /// Panel drag handle held; the panel follows vertically.
    Moving,
    /// Pressed inside the magnified paint area; forwarding stroke points.
    Drawing,
}

pub struct LoupeController {
    x: f32,
    y: f32,
    /// Side length of the square drag handle (also the panel header height).
    handle_size: f32,
    viewport_w: f32,
    viewport_h: f32,
    scale: f32,
    page_w: f32,
    page_h: f32,

    /// Navigator rect origin, in page coordinates.
    nav_x: f32,
    nav_y: f32,

    state: LoupeState,
    move_touch_y: f32,
    move_origin_y: f32,

    navigator_dragging: bool,
    drag_start_touch: (f32, f32),
    drag_start_origin: (f32, f32),

    /// When set, only stylus contact may draw inside the paint area; finger
    /// presses there are swallowed. The handle stays finger-draggable.
    stylus_only: bool,
}

impl LoupeController {
    /// Lay out the panel for a page of the given size: paint area one third
    /// of the page height, docked at the bottom.
    pub fn new(page_w: u32, page_h: u32) -> Self {
        let viewport_h = page_h as f32 / 3.0;
        let handle_size = viewport_h / 5.0;
        let mut loupe = Self {
            x: PANEL_X,
            y: 0.0,
            handle_size,
            viewport_w: page_w as f32,
            viewport_h,
            scale: DEFAULT_SCALE,
            page_w: page_w as f32,
            page_h: page_h as f32,
            nav_x: 0.0,
            nav_y: 0.0,
            state: LoupeState::Dormant,
            move_touch_y: 0.0,
            move_origin_y: 0.0,
            navigator_dragging: false,
            drag_start_touch: (0.0, 0.0),
            drag_start_origin: (0.0, 0.0),
            stylus_only: true,
        };
        loupe.try_set_y(page_h as f32);
        loupe
    }

    pub fn state(&self) -> LoupeState {
        self.state
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale.max(1.0);
        let (nx, ny) = self.clamp_navigator(self.nav_x, self.nav_y);
        self.nav_x = nx;
        self.nav_y = ny;
    }

    pub fn set_stylus_only(&mut self, stylus_only: bool) {
        self.stylus_only = stylus_only;
    }

    /// `(left, top, width, height)` of the navigator in page coordinates.
    /// The size is always `viewport / scale`.
    pub fn navigator_rect(&self) -> (f32, f32, f32, f32) {
        (
            self.nav_x,
            self.nav_y,
            self.viewport_w / self.scale,
            self.viewport_h / self.scale,
        )
    }

    /// Drag-handle rect in page coordinates.
    pub fn handle_rect(&self) -> (f32, f32, f32, f32) {
        (self.x, self.y, self.handle_size, self.handle_size)
    }

    /// Magnified paint-area rect in page coordinates.
    pub fn paint_rect(&self) -> (f32, f32, f32, f32) {
        (
            self.x,
            self.y + self.handle_size,
            self.viewport_w,
            self.viewport_h,
        )
    }

    /// Place the navigator so it is centered on `(cx, cy)`, clamped so the
    /// whole rectangle stays on the page.
    pub fn place_navigator(&mut self, cx: f32, cy: f32) {
        let (_, _, nw, nh) = self.navigator_rect();
        let (nx, ny) = self.clamp_navigator(cx - nw / 2.0, cy - nh / 2.0);
        self.nav_x = nx;
        self.nav_y = ny;
    }

    /// Map a point local to the magnified viewport into page space.
    pub fn local_to_page(&self, lx: f32, ly: f32) -> (f32, f32) {
        (self.nav_x + lx / self.scale, self.nav_y + ly / self.scale)
    }

    /// Inverse of [`local_to_page`](Self::local_to_page).
    pub fn page_to_local(&self, px: f32, py: f32) -> (f32, f32) {
        ((px - self.nav_x) * self.scale, (py - self.nav_y) * self.scale)
    }

    /// Route one pointer event. Returns true when consumed (always, while
    /// the loupe is active: presses outside the panel place the navigator).
    pub fn handle_event(&mut self, ev: &PointerEvent, surface: &mut DrawingSurface) -> bool {
        if self.navigator_dragging {
            match ev.phase {
                PointerPhase::Down => self.begin_navigator_drag(ev.x, ev.y),
                PointerPhase::Move => self.drag_navigator(ev.x, ev.y),
                PointerPhase::Up => {
                    self.drag_navigator(ev.x, ev.y);
                    self.navigator_dragging = false;
                }
            }
            return true;
        }

        match ev.phase {
            PointerPhase::Down => {
                if self.on_touch_down(ev.x, ev.y, ev.contact.is_stylus(), surface) {
                    return true;
                }
                self.begin_navigator_drag(ev.x, ev.y);
                true
            }
            PointerPhase::Move => self.on_touch_move(ev.x, ev.y, surface),
            PointerPhase::Up => self.on_touch_up(ev.x, ev.y, surface),
        }
    }

    // ------------------------------------------------------------------
    // Navigator placement / dragging (page-level)
    // ------------------------------------------------------------------

    fn begin_navigator_drag(&mut self, cx: f32, cy: f32) {
        self.place_navigator(cx, cy);
        self.drag_start_touch = (cx, cy);
        self.drag_start_origin = (self.nav_x, self.nav_y);
        self.navigator_dragging = true;
    }

    fn drag_navigator(&mut self, cx: f32, cy: f32) {
        let cand_x = self.drag_start_origin.0 + (cx - self.drag_start_touch.0);
        let cand_y = self.drag_start_origin.1 + (cy - self.drag_start_touch.1);
        let (nx, ny) = self.clamp_navigator(cand_x, cand_y);
        self.nav_x = nx;
        self.nav_y = ny;
    }

    fn clamp_navigator(&self, x: f32, y: f32) -> (f32, f32) {
        let (_, _, nw, nh) = self.navigator_rect();
        (
            x.clamp(0.0, (self.page_w - nw).max(0.0)),
            y.clamp(0.0, (self.page_h - nh).max(0.0)),
        )
    }

    // ------------------------------------------------------------------
    // Panel state machine
    // ------------------------------------------------------------------

    fn is_inside(pt: f32, origin: f32, len: f32) -> bool {
        pt > origin && pt < origin + len + 1.0
    }

    fn inside_handle(&self, gx: f32, gy: f32) -> bool {
        Self::is_inside(gx, self.x, self.handle_size) && Self::is_inside(gy, self.y, self.handle_size)
    }

    fn inside_paint_area(&self, gx: f32, gy: f32) -> bool {
        Self::is_inside(gx, self.x, self.viewport_w)
            && Self::is_inside(gy, self.y + self.handle_size, self.viewport_h)
    }

    fn to_local(&self, gx: f32, gy: f32) -> (f32, f32) {
        (gx - self.x, gy - (self.y + self.handle_size))
    }

    fn on_touch_down(
        &mut self,
        gx: f32,
        gy: f32,
        is_stylus: bool,
        surface: &mut DrawingSurface,
    ) -> bool {
        // A down arriving while a loupe stroke is still open force-closes it.
        if self.state == LoupeState::Drawing {
            self.send_touch_up(gx, gy, surface);
            self.state = LoupeState::Dormant;
        }

        if self.inside_handle(gx, gy) {
            self.state = LoupeState::Moving;
            self.move_touch_y = gy;
            self.move_origin_y = self.y;
            return true;
        }
        if self.inside_paint_area(gx, gy) {
            if self.stylus_only && !is_stylus {
                // swallow the finger press so it neither draws nor moves
                // the navigator underneath the panel
                return true;
            }
            self.state = LoupeState::Drawing;
            let (lx, ly) = self.to_local(gx, gy);
            let (px, py) = self.local_to_page(lx, ly);
            surface.pointer_down(px, py);
            return true;
        }
        false
    }

    fn on_touch_move(&mut self, gx: f32, gy: f32, surface: &mut DrawingSurface) -> bool {
        match self.state {
            LoupeState::Dormant => false,
            LoupeState::Moving => {
                self.update_panel_pos(gy);
                true
            }
            LoupeState::Drawing => {
                if self.inside_paint_area(gx, gy) {
                    let (lx, ly) = self.to_local(gx, gy);
                    let (px, py) = self.local_to_page(lx, ly);
                    surface.pointer_move(px, py);
                }
                true
            }
        }
    }

    fn on_touch_up(&mut self, gx: f32, gy: f32, surface: &mut DrawingSurface) -> bool {
        match self.state {
            LoupeState::Dormant => false,
            LoupeState::Moving => {
                self.update_panel_pos(gy);
                self.state = LoupeState::Dormant;
                true
            }
            LoupeState::Drawing => {
                self.send_touch_up(gx, gy, surface);
                self.state = LoupeState::Dormant;
                true
            }
        }
    }

    /// Close the forwarded stroke, clamping the release point into the
    /// viewport first so a finger sliding off the panel ends the stroke at
    /// its edge instead of somewhere random on the page.
    fn send_touch_up(&mut self, gx: f32, gy: f32, surface: &mut DrawingSurface) {
        let (lx, ly) = self.to_local(gx, gy);
        let lx = lx.clamp(0.0, self.viewport_w);
        let ly = ly.clamp(0.0, self.viewport_h);
        let (px, py) = self.local_to_page(lx, ly);
        surface.pointer_up(px, py);
    }

    fn update_panel_pos(&mut self, gy: f32) {
        self.y = self.move_origin_y + (gy - self.move_touch_y);
        self.adjust_y_inside_page();
    }

    fn try_set_y(&mut self, y_candidate: f32) {
        self.y = y_candidate;
        self.adjust_y_inside_page();
    }

    fn adjust_y_inside_page(&mut self) {
        let max_y = self.page_h - (self.handle_size + self.viewport_h);
        self.y = self.y.clamp(0.0, max_y.max(0.0));
    }
}
