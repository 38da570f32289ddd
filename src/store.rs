//! Page storage: maps a book directory onto a dense, ordered set of page
//! files and drives the debounced autosave worker.
//!
//! A book is just a directory. Pages are PNG files named by a 4-digit
//! zero-padded index (`0009.png`); one reserved `background.png` supplies an
//! optional book-wide backdrop. There is no manifest — the page count is
//! derived from the directory contents at load time, and any index gap
//! below the highest observed page is materialized as a zero-byte file so
//! the page list is always contiguous.
//!
//! Persistence is lazy: strokes mark the active page dirty and schedule a
//! debounce check; the check flushes only if the page stayed quiet for the
//! whole interval. Page navigation and teardown use the synchronous
//! `flush()` path instead.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, RgbaImage, imageops};

use crate::raster::PixelBuffer;
use crate::{log_err, log_info, log_warn};

/// Reserved background raster; read-only from the editor's perspective.
pub const BACKGROUND_FILE: &str = "background.png";
/// Quiet interval a dirty page must sit through before autosave flushes it.
pub const AUTOSAVE_INTERVAL: Duration = Duration::from_millis(5000);

/// Subsampling factor for the book-cover thumbnail (page 0 / background).
pub const COVER_SAMPLE: u32 = 3;
/// Subsampling factor for grid-view page thumbnails.
pub const GRID_SAMPLE: u32 = 4;

/// e.g. index 9 → "0009.png"
pub fn page_file_name(idx: usize) -> String {
    format!("{:04}.png", idx)
}

/// Inverse of [`page_file_name`]. Anything that is not exactly four ASCII
/// digits plus `.png` is not a page and is silently ignored.
pub fn parse_page_name(name: &str) -> Option<usize> {
    let stem = name.strip_suffix(".png")?;
    if stem.len() != 4 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum StoreError {
    /// Directory or file could not be opened/read/written. Recoverable by
    /// the shell (re-pick the storage location); never auto-retried here.
    Io(std::io::Error),
    Decode(String),
    Encode(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "I/O error: {}", e),
            StoreError::Decode(e) => write!(f, "Decode error: {}", e),
            StoreError::Encode(e) => write!(f, "Encode error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

// ============================================================================
// STORAGE CAPABILITY
// ============================================================================

/// Directory entry metadata captured at list time.
#[derive(Clone, Debug)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
}

/// The abstract storage a book lives in: flat named files inside one
/// directory-like container. Keeping this a trait keeps the
/// scan-the-directory-as-schema decision swappable for other backends.
/// No atomic-rename or partial-write guarantee is assumed.
pub trait BookStorage: Send + Sync {
    fn list(&self) -> Result<Vec<FileInfo>, StoreError>;
    fn read(&self, name: &str) -> Result<Vec<u8>, StoreError>;
    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError>;
    fn create_empty(&self, name: &str) -> Result<(), StoreError>;
}

/// Plain-filesystem backend.
pub struct DirStorage {
    dir: PathBuf,
}

impl DirStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl BookStorage for DirStorage {
    fn list(&self) -> Result<Vec<FileInfo>, StoreError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            out.push(FileInfo {
                name,
                size: meta.len(),
            });
        }
        Ok(out)
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        Ok(fs::read(self.dir.join(name))?)
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        Ok(fs::write(self.dir.join(name), bytes)?)
    }

    fn create_empty(&self, name: &str) -> Result<(), StoreError> {
        fs::File::create(self.dir.join(name))?;
        Ok(())
    }
}

// ============================================================================
// BOOK
// ============================================================================

#[derive(Clone, Copy, Debug)]
struct Page {
    has_content: bool,
}

/// The logical page list. Indices are dense `0..N`; N only grows via
/// `add_page` and never shrinks.
pub struct Book {
    pages: Vec<Page>,
    has_background: bool,
}

impl Book {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn has_background(&self) -> bool {
        self.has_background
    }

    /// Whether the page's backing file held pixels the last time we looked.
    pub fn has_content(&self, idx: usize) -> bool {
        self.pages.get(idx).map(|p| p.has_content).unwrap_or(false)
    }

    fn add_page(&mut self) -> usize {
        self.pages.push(Page { has_content: false });
        self.pages.len() - 1
    }

    fn mark_page_saved(&mut self, idx: usize, non_empty: bool) {
        if let Some(page) = self.pages.get_mut(idx) {
            page.has_content = non_empty;
        }
    }
}

// ============================================================================
// AUTOSAVE PLUMBING
// ============================================================================

struct DirtyState {
    dirty: bool,
    last_mutation: Instant,
    /// Bumped on every mutation and page switch; a scheduled check is valid
    /// only while the generation it captured is still current.
    generation: u64,
    page_idx: usize,
}

enum AutosaveMsg {
    Check {
        page_idx: usize,
        generation: u64,
        deadline: Instant,
    },
    Shutdown,
}

/// Fired from the autosave worker after a successful background flush, with
/// `(page_count, dirty)`. Runs on the worker thread.
pub type FlushObserver = Box<dyn Fn(usize, bool) + Send>;

/// Cheap clonable handle for marking the active page dirty; wired to the
/// drawing surface's bitmap-updated observer.
#[derive(Clone)]
pub struct AutosaveHandle {
    state: Arc<Mutex<DirtyState>>,
    tx: Sender<AutosaveMsg>,
    interval: Duration,
}

impl AutosaveHandle {
    /// Record a mutation of the active page and schedule a debounce check
    /// one interval out. Checks superseded by later mutations become no-ops
    /// at fire time; nothing is cancelled eagerly.
    pub fn mark_dirty(&self) {
        let msg = {
            let mut st = self.state.lock().expect("dirty state lock poisoned");
            st.dirty = true;
            st.last_mutation = Instant::now();
            st.generation += 1;
            AutosaveMsg::Check {
                page_idx: st.page_idx,
                generation: st.generation,
                deadline: st.last_mutation + self.interval,
            }
        };
        let _ = self.tx.send(msg);
    }
}

// ============================================================================
// PAGE STORE
// ============================================================================

pub struct PageStore {
    storage: Arc<dyn BookStorage>,
    book: Arc<Mutex<Book>>,
    state: Arc<Mutex<DirtyState>>,
    tx: Sender<AutosaveMsg>,
    /// Taken by `attach_surface` when the worker spawns.
    rx: Option<Receiver<AutosaveMsg>>,
    worker: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    bitmap: Option<Arc<Mutex<PixelBuffer>>>,
    on_flushed: Arc<Mutex<Option<FlushObserver>>>,
    interval: Duration,
}

impl PageStore {
    /// Open a book directory: enumerate entries, keep page-pattern names,
    /// and materialize zero-byte files for any index gaps so the page list
    /// comes out dense. An empty directory yields a zero-page book.
    pub fn open(storage: Arc<dyn BookStorage>) -> Result<Self, StoreError> {
        Self::open_with_interval(storage, AUTOSAVE_INTERVAL)
    }

    /// The debounce interval is a global parameter; this exists so tests
    /// do not have to wait out five real seconds.
    pub fn open_with_interval(
        storage: Arc<dyn BookStorage>,
        interval: Duration,
    ) -> Result<Self, StoreError> {
        let mut index_map = BTreeMap::new();
        let mut has_background = false;
        for entry in storage.list()? {
            if entry.name == BACKGROUND_FILE {
                has_background = true;
            } else if let Some(idx) = parse_page_name(&entry.name) {
                index_map.insert(idx, entry.size);
            }
        }

        let count = index_map.keys().next_back().map(|m| m + 1).unwrap_or(0);
        let mut pages = Vec::with_capacity(count);
        for idx in 0..count {
            match index_map.get(&idx) {
                Some(size) => pages.push(Page {
                    has_content: *size > 0,
                }),
                None => {
                    // gap: filling holes is a side effect of load, not save
                    storage.create_empty(&page_file_name(idx))?;
                    log_info!("materialized missing page {} as empty file", idx);
                    pages.push(Page { has_content: false });
                }
            }
        }
        log_info!("opened book: {} page(s), background={}", count, has_background);

        let (tx, rx) = mpsc::channel();
        Ok(Self {
            storage,
            book: Arc::new(Mutex::new(Book {
                pages,
                has_background,
            })),
            state: Arc::new(Mutex::new(DirtyState {
                dirty: false,
                last_mutation: Instant::now(),
                generation: 0,
                page_idx: 0,
            })),
            tx,
            rx: Some(rx),
            worker: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            bitmap: None,
            on_flushed: Arc::new(Mutex::new(None)),
            interval,
        })
    }

    pub fn page_count(&self) -> usize {
        self.book.lock().expect("book lock poisoned").page_count()
    }

    pub fn has_content(&self, idx: usize) -> bool {
        self.book.lock().expect("book lock poisoned").has_content(idx)
    }

    pub fn has_background(&self) -> bool {
        self.book.lock().expect("book lock poisoned").has_background()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().expect("dirty state lock poisoned").dirty
    }

    pub fn autosave_handle(&self) -> AutosaveHandle {
        AutosaveHandle {
            state: Arc::clone(&self.state),
            tx: self.tx.clone(),
            interval: self.interval,
        }
    }

    /// Observe background autosave completions. Forced `flush()` calls are
    /// synchronous and report to their caller directly; this covers the
    /// debounced writes nobody is around to see.
    pub fn set_on_flushed(&self, f: FlushObserver) {
        *self.on_flushed.lock().expect("flush observer lock poisoned") = Some(f);
    }

    /// Wire the committed-page bitmap in and spawn the autosave worker.
    /// The worker only ever takes copy-on-read snapshots under the bitmap
    /// lock; file I/O happens outside it.
    pub fn attach_surface(&mut self, bitmap: Arc<Mutex<PixelBuffer>>) {
        self.bitmap = Some(Arc::clone(&bitmap));
        let Some(rx) = self.rx.take() else {
            return; // already attached
        };
        let storage = Arc::clone(&self.storage);
        let book = Arc::clone(&self.book);
        let state = Arc::clone(&self.state);
        let shutdown = Arc::clone(&self.shutdown);
        let on_flushed = Arc::clone(&self.on_flushed);
        let interval = self.interval;

        self.worker = Some(thread::spawn(move || {
            autosave_worker(
                rx, storage, book, state, bitmap, shutdown, on_flushed, interval,
            );
        }));
    }

    /// Tell the autosave machinery which page is the active edit target.
    /// Resets the dirty flag and invalidates any pending debounce checks.
    pub fn set_active_page(&self, idx: usize) {
        let mut st = self.state.lock().expect("dirty state lock poisoned");
        st.page_idx = idx;
        st.dirty = false;
        st.generation += 1;
    }

    /// Load a page raster. A zero-size (never-written) backing file loads
    /// as `None`; so does a file that fails to decode — from the user's
    /// perspective both are just an empty page, though the latter is logged.
    pub fn load_page(&self, idx: usize) -> Result<Option<RgbaImage>, StoreError> {
        let bytes = self.storage.read(&page_file_name(idx))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        match image::load_from_memory(&bytes) {
            Ok(img) => Ok(Some(img.into_rgba8())),
            Err(e) => {
                log_warn!("page {} exists but failed to decode: {}", idx, e);
                Ok(None)
            }
        }
    }

    /// Write a page raster as PNG, overwriting in place, and update the
    /// page's has-content flag.
    pub fn save_page(&self, idx: usize, raster: &RgbaImage) -> Result<(), StoreError> {
        save_raster(&*self.storage, &self.book, idx, raster)
    }

    /// Append a new page: creates its empty backing file immediately so the
    /// directory stays the source of truth for the page count.
    pub fn add_page(&self) -> Result<usize, StoreError> {
        let mut book = self.book.lock().expect("book lock poisoned");
        let idx = book.page_count();
        self.storage.create_empty(&page_file_name(idx))?;
        book.add_page();
        log_info!("appended page {}", idx);
        Ok(idx)
    }

    /// Forced synchronous flush for page navigation and teardown: if the
    /// active page is dirty, snapshot and write it on the calling context,
    /// bypassing the debounce wait. On failure the dirty flag is restored
    /// and the error surfaced — silently losing ink is not an option.
    /// Returns whether anything was written.
    pub fn flush(&self) -> Result<bool, StoreError> {
        let Some(bitmap) = &self.bitmap else {
            return Ok(false);
        };
        let (page_idx, snapshot) = {
            let mut st = self.state.lock().expect("dirty state lock poisoned");
            if !st.dirty {
                return Ok(false);
            }
            st.dirty = false;
            st.generation += 1;
            let snap = bitmap.lock().expect("bitmap lock poisoned").snapshot();
            (st.page_idx, snap)
        };
        if let Err(e) = save_raster(&*self.storage, &self.book, page_idx, &snapshot) {
            self.state.lock().expect("dirty state lock poisoned").dirty = true;
            return Err(e);
        }
        Ok(true)
    }

    pub fn load_background(&self) -> Option<RgbaImage> {
        if !self.has_background() {
            return None;
        }
        self.decode_or_none(BACKGROUND_FILE, 1)
    }

    /// Book-cover thumbnail: page 0 at the coarse cover subsampling.
    pub fn cover_thumbnail(&self) -> Option<RgbaImage> {
        self.decode_or_none(&page_file_name(0), COVER_SAMPLE)
    }

    pub fn page_thumbnail(&self, idx: usize) -> Option<RgbaImage> {
        self.decode_or_none(&page_file_name(idx), GRID_SAMPLE)
    }

    pub fn background_thumbnail(&self) -> Option<RgbaImage> {
        self.decode_or_none(BACKGROUND_FILE, COVER_SAMPLE)
    }

    pub fn background_grid_thumbnail(&self) -> Option<RgbaImage> {
        self.decode_or_none(BACKGROUND_FILE, GRID_SAMPLE)
    }

    /// Thumbnail-grade decode: same file, reduced resolution; every failure
    /// mode degrades to "no image" because an unreadable thumbnail should
    /// look exactly like an empty page.
    fn decode_or_none(&self, name: &str, sample: u32) -> Option<RgbaImage> {
        let bytes = match self.storage.read(name) {
            Ok(b) => b,
            Err(e) => {
                log_warn!("cannot read {}: {}", name, e);
                return None;
            }
        };
        if bytes.is_empty() {
            return None;
        }
        match image::load_from_memory(&bytes) {
            Ok(img) => {
                let img = img.into_rgba8();
                if sample <= 1 {
                    return Some(img);
                }
                let (w, h) = img.dimensions();
                Some(imageops::thumbnail(
                    &img,
                    (w / sample).max(1),
                    (h / sample).max(1),
                ))
            }
            Err(e) => {
                log_warn!("cannot decode {}: {}", name, e);
                None
            }
        }
    }
}

impl Drop for PageStore {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.tx.send(AutosaveMsg::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn encode_png(raster: &RgbaImage) -> Result<Vec<u8>, StoreError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(
            raster.as_raw(),
            raster.width(),
            raster.height(),
            ColorType::Rgba8,
        )
        .map_err(|e| StoreError::Encode(e.to_string()))?;
    Ok(bytes)
}

fn save_raster(
    storage: &dyn BookStorage,
    book: &Arc<Mutex<Book>>,
    idx: usize,
    raster: &RgbaImage,
) -> Result<(), StoreError> {
    let bytes = encode_png(raster)?;
    storage.write(&page_file_name(idx), &bytes)?;
    book.lock()
        .expect("book lock poisoned")
        .mark_page_saved(idx, !bytes.is_empty());
    Ok(())
}

/// Debounce worker: sleeps each check out to its deadline, then re-validates
/// against the live dirty state. A check that lost its generation (newer
/// mutation, page switch, forced flush) is a benign no-op; the superseding
/// event scheduled its own check.
#[allow(clippy::too_many_arguments)]
fn autosave_worker(
    rx: Receiver<AutosaveMsg>,
    storage: Arc<dyn BookStorage>,
    book: Arc<Mutex<Book>>,
    state: Arc<Mutex<DirtyState>>,
    bitmap: Arc<Mutex<PixelBuffer>>,
    shutdown: Arc<AtomicBool>,
    on_flushed: Arc<Mutex<Option<FlushObserver>>>,
    interval: Duration,
) {
    while let Ok(msg) = rx.recv() {
        let AutosaveMsg::Check {
            page_idx,
            generation,
            deadline,
        } = msg
        else {
            break; // Shutdown
        };

        // sleep in slices so teardown stays responsive
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(50)));
        }

        let snapshot = {
            let mut st = state.lock().expect("dirty state lock poisoned");
            if !st.dirty
                || st.generation != generation
                || st.last_mutation.elapsed() < interval
            {
                continue;
            }
            st.dirty = false;
            // copy under the bitmap lock; the write happens outside it
            bitmap.lock().expect("bitmap lock poisoned").snapshot()
        };

        match save_raster(&*storage, &book, page_idx, &snapshot) {
            Ok(()) => {
                log_info!("autosaved page {}", page_idx);
                if let Some(f) = on_flushed
                    .lock()
                    .expect("flush observer lock poisoned")
                    .as_ref()
                {
                    let count = book.lock().expect("book lock poisoned").page_count();
                    let dirty = state.lock().expect("dirty state lock poisoned").dirty;
                    f(count, dirty);
                }
            }
            Err(e) => {
                log_err!("autosave of page {} failed: {}", page_idx, e);
                // leave it dirty so a later check (or forced flush) retries
                state.lock().expect("dirty state lock poisoned").dirty = true;
            }
        }
    }
}
