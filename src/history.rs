//! Region-diff undo/redo stack.
//!
//! One command per committed stroke: pre/post pixel snapshots of the
//! stroke's bounding rectangle. The whole history is kept under a fixed
//! byte budget by evicting from the oldest end; the cursor model is a
//! single list plus `pos` (index of the last applied command) so that
//! eviction never leaves `can_undo` claiming history that is gone.

use crate::raster::{PixelBuffer, PixelPatch};

/// Total byte budget for retained commands (pre+post patches, 4 B/pixel).
pub const UNDO_BUDGET_BYTES: usize = 1024 * 1024;

/// One completed stroke's effect on a rectangular sub-area of the page.
pub struct StrokeRegion {
    pub before: PixelPatch,
    pub after: PixelPatch,
}

impl StrokeRegion {
    fn byte_size(&self) -> usize {
        self.before.byte_size() + self.after.byte_size()
    }
}

pub struct UndoStack {
    commands: Vec<StrokeRegion>,
    /// Index of the last applied command; -1 when nothing is applied.
    pos: isize,
    budget: usize,
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoStack {
    pub fn new() -> Self {
        Self::with_budget(UNDO_BUDGET_BYTES)
    }

    pub fn with_budget(budget: usize) -> Self {
        Self {
            commands: Vec::new(),
            pos: -1,
            budget,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.pos >= 0
    }

    pub fn can_redo(&self) -> bool {
        self.pos < self.commands.len() as isize - 1
    }

    pub fn retained_bytes(&self) -> usize {
        self.commands.iter().map(|c| c.byte_size()).sum()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Append a command. Any redo tail past the cursor is discarded first
    /// (linear history), then the oldest commands are evicted while the
    /// total exceeds the budget — but never the one the cursor sits on at
    /// position 0, so a just-pushed oversized command survives.
    pub fn push(&mut self, command: StrokeRegion) {
        self.commands.truncate((self.pos + 1) as usize);
        self.commands.push(command);
        self.pos += 1;

        while self.pos > 0 && self.retained_bytes() > self.budget {
            self.commands.remove(0);
            self.pos -= 1;
        }
    }

    /// Paint the cursor command's pre-image back onto `target` and step the
    /// cursor back. No-op (returns false) on empty reachable history.
    pub fn undo(&mut self, target: &mut PixelBuffer) -> bool {
        if !self.can_undo() {
            return false;
        }
        target.paint(&self.commands[self.pos as usize].before);
        self.pos -= 1;
        true
    }

    /// Step the cursor forward and paint that command's post-image.
    pub fn redo(&mut self, target: &mut PixelBuffer) -> bool {
        if !self.can_redo() {
            return false;
        }
        self.pos += 1;
        target.paint(&self.commands[self.pos as usize].after);
        true
    }

    pub fn clear(&mut self) {
        self.commands.clear();
        self.pos = -1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{BLACK, Region, StrokePaint, StrokePath, WHITE};

    const PENCIL: StrokePaint = StrokePaint {
        width: 3.0,
        color: BLACK,
        anti_aliased: false,
    };

    fn draw_stroke(buf: &mut PixelBuffer, stack: &mut UndoStack, x: f32, y: f32) {
        let mut path = StrokePath::new();
        path.move_to(x, y);
        path.line_to(x + 4.0, y);
        let region = Region::from_bounds(path.bounds().unwrap(), 5.0, buf.width(), buf.height());
        let before = buf.extract(region);
        buf.stroke_path(&path, &PENCIL);
        let after = buf.extract(region);
        stack.push(StrokeRegion { before, after });
    }

    #[test]
    fn undo_redo_round_trip_restores_pixels() {
        let mut buf = PixelBuffer::new(64, 64);
        let mut stack = UndoStack::new();
        for i in 0..4 {
            draw_stroke(&mut buf, &mut stack, 8.0 + i as f32 * 10.0, 20.0);
        }
        let final_image = buf.snapshot();

        for _ in 0..4 {
            assert!(stack.undo(&mut buf));
        }
        assert!(!stack.can_undo());
        assert!(buf.image().pixels().all(|p| *p == WHITE));

        for _ in 0..4 {
            assert!(stack.redo(&mut buf));
        }
        assert!(!stack.can_redo());
        assert_eq!(buf.snapshot(), final_image);
    }

    #[test]
    fn push_invalidates_redo() {
        let mut buf = PixelBuffer::new(64, 64);
        let mut stack = UndoStack::new();
        draw_stroke(&mut buf, &mut stack, 10.0, 10.0);
        draw_stroke(&mut buf, &mut stack, 30.0, 10.0);
        stack.undo(&mut buf);
        assert!(stack.can_redo());

        draw_stroke(&mut buf, &mut stack, 10.0, 40.0);
        assert!(!stack.can_redo());
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn undo_redo_on_empty_history_are_noops() {
        let mut buf = PixelBuffer::new(8, 8);
        let mut stack = UndoStack::new();
        assert!(!stack.undo(&mut buf));
        assert!(!stack.redo(&mut buf));
        stack.clear();
        assert!(!stack.can_undo());
    }

    #[test]
    fn eviction_drops_oldest_and_keeps_cursor_consistent() {
        let mut buf = PixelBuffer::new(64, 64);
        // each stroke region is (14x13)x2 patches x4 B ~ 1.4 KiB; budget fits ~3
        let mut stack = UndoStack::with_budget(4 * 1024);
        for i in 0..6 {
            draw_stroke(&mut buf, &mut stack, 8.0, 4.0 + i as f32 * 2.0);
        }
        assert!(stack.retained_bytes() <= 4 * 1024);
        assert!(stack.len() < 6);

        // every retained command is actually undoable
        let mut undone = 0;
        while stack.undo(&mut buf) {
            undone += 1;
        }
        assert_eq!(undone, stack.len());
        assert!(!stack.can_undo());
    }

    #[test]
    fn oversized_single_command_is_retained() {
        let mut buf = PixelBuffer::new(64, 64);
        let mut stack = UndoStack::with_budget(16);
        draw_stroke(&mut buf, &mut stack, 20.0, 20.0);
        assert_eq!(stack.len(), 1);
        assert!(stack.can_undo());
    }
}
