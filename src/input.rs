//! Abstract pointer input: the engine consumes batches of timestamped 2D
//! points and only needs to distinguish precise (stylus) from imprecise
//! (finger) contact. The vendor event pipeline lives in the host shell.

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ContactKind {
    Stylus,
    Finger,
}

impl ContactKind {
    pub fn is_stylus(self) -> bool {
        self == ContactKind::Stylus
    }
}

/// One timestamped contact sample. A stroke arrives as a Down, any number
/// of Moves, and an Up — either in one batch or incrementally.
#[derive(Clone, Copy, Debug)]
pub struct PointerEvent {
    pub phase: PointerPhase,
    pub x: f32,
    pub y: f32,
    pub contact: ContactKind,
    pub timestamp_ms: u64,
}

impl PointerEvent {
    pub fn new(phase: PointerPhase, x: f32, y: f32, contact: ContactKind, timestamp_ms: u64) -> Self {
        Self {
            phase,
            x,
            y,
            contact,
            timestamp_ms,
        }
    }

    pub fn pos(&self) -> (f32, f32) {
        (self.x, self.y)
    }
}
