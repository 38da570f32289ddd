//! End-to-end session tests against a real on-disk book directory.

use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use inkbook::input::{ContactKind, PointerEvent, PointerPhase};
use inkbook::{BookSession, DirStorage, Tool};
use tempfile::TempDir;

const W: u32 = 120;
const H: u32 = 120;

/// Long debounce so only explicit flushes write in these tests.
fn open_session(dir: &TempDir) -> BookSession {
    BookSession::open_with_interval(
        Arc::new(DirStorage::new(dir.path())),
        W,
        H,
        Duration::from_secs(600),
    )
    .expect("open book session")
}

fn stylus(phase: PointerPhase, x: f32, y: f32) -> PointerEvent {
    PointerEvent::new(phase, x, y, ContactKind::Stylus, 0)
}

fn stroke(session: &mut BookSession, from: (f32, f32), to: (f32, f32)) {
    session.handle_event(&stylus(PointerPhase::Down, from.0, from.1));
    session.handle_event(&stylus(
        PointerPhase::Move,
        (from.0 + to.0) / 2.0,
        (from.1 + to.1) / 2.0,
    ));
    session.handle_event(&stylus(PointerPhase::Up, to.0, to.1));
}

fn ink_count(img: &image::RgbaImage) -> usize {
    img.pixels().filter(|p| p[0] < 128).count()
}

fn file_len(dir: &TempDir, name: &str) -> u64 {
    fs::metadata(dir.path().join(name)).expect("page file").len()
}

#[test]
fn opening_empty_directory_creates_first_page() {
    let dir = TempDir::new().unwrap();
    let session = open_session(&dir);
    assert_eq!(session.page_count(), 1);
    assert_eq!(session.current_page(), 0);
    assert!(dir.path().join("0000.png").exists());
}

#[test]
fn drawn_ink_survives_flush_and_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let mut session = open_session(&dir);
        stroke(&mut session, (20.0, 20.0), (90.0, 80.0));
        assert!(ink_count(&session.surface().snapshot()) > 0);
        assert!(session.force_flush().unwrap());
        // flushed: a second flush has nothing to do
        assert!(!session.force_flush().unwrap());
    }
    assert!(file_len(&dir, "0000.png") > 0);

    let session = open_session(&dir);
    assert!(ink_count(&session.surface().snapshot()) > 0);
}

#[test]
fn add_page_persists_blank_page_and_navigates() {
    let dir = TempDir::new().unwrap();
    let mut session = open_session(&dir);
    stroke(&mut session, (20.0, 20.0), (90.0, 80.0));

    let idx = session.add_page().unwrap();
    assert_eq!(idx, 1);
    assert_eq!(session.page_count(), 2);
    assert_eq!(session.current_page(), 1);

    // adding flushed page 0 and wrote page 1 as a real white PNG
    assert!(file_len(&dir, "0000.png") > 0);
    assert!(file_len(&dir, "0001.png") > 0);
    assert_eq!(ink_count(&session.surface().snapshot()), 0);
}

#[test]
fn page_switch_restores_ink_and_drops_undo_history() {
    let dir = TempDir::new().unwrap();
    let mut session = open_session(&dir);
    stroke(&mut session, (20.0, 20.0), (90.0, 80.0));
    let page0_ink = ink_count(&session.surface().snapshot());
    assert!(page0_ink > 0);

    session.add_page().unwrap();
    stroke(&mut session, (30.0, 60.0), (80.0, 60.0));
    assert!(session.surface().can_undo());

    session.goto_page(0).unwrap();
    assert_eq!(ink_count(&session.surface().snapshot()), page0_ink);
    // undo never crosses a page boundary
    assert!(!session.surface().can_undo());
    assert!(!session.undo());

    session.goto_page(1).unwrap();
    assert!(ink_count(&session.surface().snapshot()) > 0);
}

#[test]
fn out_of_range_navigation_is_a_noop() {
    let dir = TempDir::new().unwrap();
    let mut session = open_session(&dir);
    session.goto_page(5).unwrap();
    assert_eq!(session.current_page(), 0);
    session.prev_page().unwrap();
    assert_eq!(session.current_page(), 0);
    session.next_page().unwrap();
    assert_eq!(session.current_page(), 0);
}

#[test]
fn eraser_removes_ink_through_the_session() {
    let dir = TempDir::new().unwrap();
    let mut session = open_session(&dir);
    stroke(&mut session, (20.0, 50.0), (100.0, 50.0));
    assert!(ink_count(&session.surface().snapshot()) > 0);

    session.set_tool(Tool::Eraser);
    stroke(&mut session, (20.0, 50.0), (100.0, 50.0));
    assert_eq!(ink_count(&session.surface().snapshot()), 0);
}

#[test]
fn loupe_strokes_land_at_remapped_page_coordinates() {
    let dir = TempDir::new().unwrap();
    let mut session = open_session(&dir);
    session.set_loupe_enabled(true);

    // panel is bottom-docked: handle 8px over a 40px viewport at x=5
    let (ax, ay, _, _) = session.loupe().paint_rect();
    let (gx, gy) = (ax + 30.0, ay + 15.0);
    session.handle_event(&stylus(PointerPhase::Down, gx, gy));
    session.handle_event(&stylus(PointerPhase::Up, gx, gy));

    // navigator at origin, scale 1.5: the dot lands at (20, 10)
    let snap = session.surface().snapshot();
    assert!(snap.get_pixel(20, 10)[0] < 200);
    assert!(session.surface().can_undo());

    // with the loupe down the same coordinates draw directly
    session.set_loupe_enabled(false);
    session.handle_event(&stylus(PointerPhase::Down, gx, gy));
    session.handle_event(&stylus(PointerPhase::Up, gx, gy));
    let snap = session.surface().snapshot();
    assert!(snap.get_pixel(gx as u32, gy as u32)[0] < 200);
}

#[test]
fn book_observer_tracks_dirty_transitions() {
    let dir = TempDir::new().unwrap();
    let mut session = open_session(&dir);

    let seen: Arc<Mutex<Vec<(usize, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    session.set_on_book_changed(Box::new(move |count, dirty| {
        sink.lock().unwrap().push((count, dirty));
    }));

    // a committed stroke turns the indicator on
    stroke(&mut session, (20.0, 20.0), (90.0, 80.0));
    assert_eq!(seen.lock().unwrap().last(), Some(&(1, true)));

    // a forced flush turns it back off
    assert!(session.force_flush().unwrap());
    assert_eq!(seen.lock().unwrap().last(), Some(&(1, false)));

    // undoing the flushed stroke re-dirties the page
    assert!(session.undo());
    assert_eq!(seen.lock().unwrap().last(), Some(&(1, true)));
}

#[test]
fn book_observer_sees_background_autosave_complete() {
    let dir = TempDir::new().unwrap();
    let mut session = BookSession::open_with_interval(
        Arc::new(DirStorage::new(dir.path())),
        W,
        H,
        Duration::from_millis(150),
    )
    .unwrap();

    let seen: Arc<Mutex<Vec<(usize, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    session.set_on_book_changed(Box::new(move |count, dirty| {
        sink.lock().unwrap().push((count, dirty));
    }));

    stroke(&mut session, (20.0, 20.0), (90.0, 80.0));
    std::thread::sleep(Duration::from_millis(500));
    // the debounced worker flushed and reported the clean state
    assert_eq!(seen.lock().unwrap().last(), Some(&(1, false)));
    assert!(file_len(&dir, "0000.png") > 0);
}

#[test]
fn autosave_writes_without_an_explicit_flush() {
    let dir = TempDir::new().unwrap();
    let mut session = BookSession::open_with_interval(
        Arc::new(DirStorage::new(dir.path())),
        W,
        H,
        Duration::from_millis(150),
    )
    .unwrap();

    stroke(&mut session, (20.0, 20.0), (90.0, 80.0));
    std::thread::sleep(Duration::from_millis(500));
    assert!(file_len(&dir, "0000.png") > 0);
    assert!(!session.store().is_dirty());
}
