//! Book session: the single entry point a host shell drives.
//!
//! Owns the drawing surface, the loupe controller and the page store for
//! one open book, and wires them together: stroke commits mark the store
//! dirty for debounced autosave, page navigation force-flushes first, and
//! pointer events are routed either straight to the surface or through the
//! loupe when it is up.

use std::sync::{Arc, Mutex};

use crate::input::{PointerEvent, PointerPhase};
use crate::log_err;
use crate::loupe::LoupeController;
use crate::raster::PixelBuffer;
use crate::store::{BookStorage, PageStore, StoreError};
use crate::surface::{DrawingSurface, Tool};

/// Fired with `(page_count, dirty)` after anything that changes either.
/// Background autosave completions fire it from the worker thread; all other
/// transitions fire it on the calling context.
pub type BookObserver = Box<dyn Fn(usize, bool) + Send>;

pub struct BookSession {
    store: PageStore,
    surface: DrawingSurface,
    loupe: LoupeController,
    loupe_enabled: bool,
    /// Shared with the store's autosave worker so debounced flushes report
    /// the dirty→clean transition too.
    on_book_changed: Arc<Mutex<Option<BookObserver>>>,
}

impl BookSession {
    /// Open a book on the given storage with a fixed page size. An empty
    /// book gets its first page created on the spot so there is always a
    /// page to draw on. Page 0 (and the background, if any) is loaded.
    pub fn open(
        storage: Arc<dyn BookStorage>,
        width: u32,
        height: u32,
    ) -> Result<Self, StoreError> {
        let store = PageStore::open(storage)?;
        Self::assemble(store, width, height)
    }

    /// Like [`open`](Self::open) with a custom autosave debounce interval.
    pub fn open_with_interval(
        storage: Arc<dyn BookStorage>,
        width: u32,
        height: u32,
        interval: std::time::Duration,
    ) -> Result<Self, StoreError> {
        let store = PageStore::open_with_interval(storage, interval)?;
        Self::assemble(store, width, height)
    }

    fn assemble(mut store: PageStore, width: u32, height: u32) -> Result<Self, StoreError> {
        if store.page_count() == 0 {
            store.add_page()?;
        }
        let mut surface = DrawingSurface::new(width, height);

        store.attach_surface(surface.shared_bitmap());
        store.set_active_page(0);

        let initial = store.load_page(0)?;
        surface.load_initial(initial.as_ref());
        surface.set_background(store.load_background());

        let autosave = store.autosave_handle();
        surface.set_on_bitmap_updated(Box::new(move || autosave.mark_dirty()));

        let on_book_changed: Arc<Mutex<Option<BookObserver>>> = Arc::new(Mutex::new(None));
        let shared = Arc::clone(&on_book_changed);
        store.set_on_flushed(Box::new(move |count, dirty| {
            if let Some(f) = shared.lock().expect("book observer lock poisoned").as_ref() {
                f(count, dirty);
            }
        }));

        let loupe = LoupeController::new(width, height);
        Ok(Self {
            store,
            surface,
            loupe,
            loupe_enabled: false,
            on_book_changed,
        })
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    /// Route one pointer event. With the loupe up, the loupe consumes all
    /// input (including navigator placement); otherwise events feed stroke
    /// assembly directly.
    pub fn handle_event(&mut self, ev: &PointerEvent) {
        if self.surface.is_view_mode() {
            return;
        }
        let was_dirty = self.store.is_dirty();
        if self.loupe_enabled {
            self.loupe.handle_event(ev, &mut self.surface);
        } else {
            match ev.phase {
                PointerPhase::Down => self.surface.pointer_down(ev.x, ev.y),
                PointerPhase::Move => self.surface.pointer_move(ev.x, ev.y),
                PointerPhase::Up => self.surface.pointer_up(ev.x, ev.y),
            }
        }
        // a committed stroke turns the unsaved-changes indicator on
        if self.store.is_dirty() != was_dirty {
            self.notify_book_changed();
        }
    }

    /// Convenience for shells that deliver coalesced event batches.
    pub fn handle_events(&mut self, batch: &[PointerEvent]) {
        for ev in batch {
            self.handle_event(ev);
        }
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    pub fn current_page(&self) -> usize {
        self.surface.current_page()
    }

    pub fn page_count(&self) -> usize {
        self.store.page_count()
    }

    /// Switch to page `idx`. Any unsaved ink on the current page is flushed
    /// synchronously first, so switching away can never lose strokes. Undo
    /// history does not survive the switch. Out-of-range indices are a
    /// logged no-op.
    pub fn goto_page(&mut self, idx: usize) -> Result<(), StoreError> {
        if idx >= self.store.page_count() {
            crate::log_warn!(
                "goto_page({}) out of range (page count {})",
                idx,
                self.store.page_count()
            );
            return Ok(());
        }
        if idx == self.surface.current_page() {
            return Ok(());
        }
        self.store.flush()?;
        self.store.set_active_page(idx);
        let loaded = self.store.load_page(idx)?;
        self.surface.goto_page(idx, move |_| loaded);
        self.notify_book_changed();
        Ok(())
    }

    pub fn next_page(&mut self) -> Result<(), StoreError> {
        self.goto_page(self.current_page().saturating_add(1))
    }

    pub fn prev_page(&mut self) -> Result<(), StoreError> {
        if self.current_page() == 0 {
            return Ok(());
        }
        self.goto_page(self.current_page() - 1)
    }

    pub fn first_page(&mut self) -> Result<(), StoreError> {
        self.goto_page(0)
    }

    pub fn last_page(&mut self) -> Result<(), StoreError> {
        let count = self.store.page_count();
        if count == 0 {
            return Ok(());
        }
        self.goto_page(count - 1)
    }

    /// Append a new blank page and navigate to it. The page is persisted as
    /// a white raster immediately, not left as a zero-byte file, so a crash
    /// right after creation still leaves a well-formed book.
    pub fn add_page(&mut self) -> Result<usize, StoreError> {
        self.store.flush()?;
        let idx = self.store.add_page()?;
        let blank = PixelBuffer::new(self.surface.width(), self.surface.height()).snapshot();
        self.store.save_page(idx, &blank)?;
        self.goto_page(idx)?;
        self.notify_book_changed();
        Ok(idx)
    }

    // ------------------------------------------------------------------
    // Editing state
    // ------------------------------------------------------------------

    pub fn undo(&mut self) -> bool {
        let was_dirty = self.store.is_dirty();
        let applied = self.surface.undo();
        if self.store.is_dirty() != was_dirty {
            self.notify_book_changed();
        }
        applied
    }

    pub fn redo(&mut self) -> bool {
        let was_dirty = self.store.is_dirty();
        let applied = self.surface.redo();
        if self.store.is_dirty() != was_dirty {
            self.notify_book_changed();
        }
        applied
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.surface.set_tool(tool);
    }

    pub fn set_view_mode(&mut self, view_mode: bool) {
        self.surface.set_view_mode(view_mode);
    }

    pub fn set_loupe_enabled(&mut self, enabled: bool) {
        self.loupe_enabled = enabled;
    }

    pub fn loupe_enabled(&self) -> bool {
        self.loupe_enabled
    }

    pub fn loupe(&self) -> &LoupeController {
        &self.loupe
    }

    pub fn loupe_mut(&mut self) -> &mut LoupeController {
        &mut self.loupe
    }

    pub fn surface(&self) -> &DrawingSurface {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut DrawingSurface {
        &mut self.surface
    }

    pub fn store(&self) -> &PageStore {
        &self.store
    }

    pub fn set_on_book_changed(&mut self, f: BookObserver) {
        *self
            .on_book_changed
            .lock()
            .expect("book observer lock poisoned") = Some(f);
    }

    /// Pass-through to the surface's undo-availability observer, for shells
    /// that gray out their undo/redo buttons.
    pub fn set_on_undo_state_changed(&mut self, f: crate::surface::UndoStateObserver) {
        self.surface.set_on_undo_state_changed(f);
    }

    /// Synchronously write the active page out if it is dirty. Shells call
    /// this from pause/teardown paths where the debounce must not be waited
    /// out. Returns whether a write happened.
    pub fn force_flush(&mut self) -> Result<bool, StoreError> {
        let wrote = self.store.flush()?;
        if wrote {
            self.notify_book_changed();
        }
        Ok(wrote)
    }

    fn notify_book_changed(&self) {
        if let Some(f) = self
            .on_book_changed
            .lock()
            .expect("book observer lock poisoned")
            .as_ref()
        {
            f(self.store.page_count(), self.store.is_dirty());
        }
    }
}

impl Drop for BookSession {
    fn drop(&mut self) {
        // last-chance flush; losing ink on teardown is worse than a
        // duplicate write
        if let Err(e) = self.store.flush() {
            log_err!("flush on session teardown failed: {}", e);
        }
    }
}
