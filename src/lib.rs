//! inkbook — a paginated freehand-ink annotation engine.
//!
//! The crate models one open "book": a directory of PNG page rasters that
//! the user draws on with a pencil or a wide eraser. It owns stroke capture
//! and smoothing, region-diff undo with a fixed memory budget, a loupe
//! magnifier that remaps drawing into page coordinates, and a sparse page
//! store with debounced autosave. Rendering to an actual display and the
//! vendor input pipeline stay in the host shell; the engine hands out
//! composited RGBA snapshots and consumes abstract pointer events.
//!
//! [`session::BookSession`] is the front door; the layers underneath
//! ([`surface`], [`history`], [`loupe`], [`store`]) are public for shells
//! that need finer control.

pub mod history;
pub mod input;
pub mod logger;
pub mod loupe;
pub mod raster;
pub mod session;
pub mod store;
pub mod surface;

pub use history::UndoStack;
pub use input::{ContactKind, PointerEvent, PointerPhase};
pub use loupe::{LoupeController, LoupeState};
pub use raster::{PixelBuffer, PixelPatch, Region, StrokePaint, StrokePath};
pub use session::BookSession;
pub use store::{BookStorage, DirStorage, PageStore, StoreError};
pub use surface::{DrawingSurface, Tool, ToolConfig};
