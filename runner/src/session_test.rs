use crate::session::{
    layout::SlotLayout, monitor::RoundMonitor, FileWriteSession, OpenMode, SessionError,
};
use std::{fs, path::PathBuf};
use tempfile::TempDir;

fn layout(dir: &TempDir, files: usize) -> SlotLayout {
    SlotLayout::new(dir.path().join("out/Data_"), 5, files)
}

#[test]
pub fn slot_paths_are_zero_padded() {
    let layout = SlotLayout::new("plt/Cell_D_", 5, 12);

    assert_eq!(layout.path(0), PathBuf::from("plt/Cell_D_00000"));
    assert_eq!(layout.path(11), PathBuf::from("plt/Cell_D_00011"));
    assert_eq!(layout.paths().count(), 12);
    assert_eq!(layout.directory(), Some(PathBuf::from("plt")));

    assert_eq!(SlotLayout::new("Data_", 5, 1).directory(), None);
    assert_eq!(
        SlotLayout::new("plt/", 2, 1).path(0),
        PathBuf::from("plt/00")
    );
}

#[test]
pub fn truncate_then_append() {
    let dir = TempDir::new().unwrap();
    let layout = layout(&dir, 1);
    let monitor = RoundMonitor::new(1);
    layout.create_directory().unwrap();
    fs::write(layout.path(0), b"stale bytes from an older round").unwrap();

    let mut session =
        FileWriteSession::open(&layout, 0, OpenMode::Truncate, None, &monitor).unwrap();
    session.write_payload(b"first").unwrap();
    assert_eq!(session.finish().unwrap(), 5);

    let mut session =
        FileWriteSession::open(&layout, 0, OpenMode::Append, Some(4), &monitor).unwrap();
    session.write_payload(b"-second").unwrap();
    session.write_payload(b"-third").unwrap();
    assert_eq!(session.finish().unwrap(), 13);

    assert_eq!(fs::read(layout.path(0)).unwrap(), b"first-second-third");
    assert_eq!(monitor.bytes(), 18);
    assert_eq!(monitor.writes(), 2);
    assert_eq!(monitor.open(), 0);
}

#[test]
pub fn buffered_session_flushes_on_finish() {
    let dir = TempDir::new().unwrap();
    let layout = layout(&dir, 2);
    let monitor = RoundMonitor::new(2);
    layout.create_directory().unwrap();

    let mut session =
        FileWriteSession::open(&layout, 1, OpenMode::Truncate, Some(1 << 20), &monitor).unwrap();
    session.write_payload(&[7u8; 128]).unwrap();

    // still in the local buffer
    assert_eq!(fs::metadata(layout.path(1)).unwrap().len(), 0);

    session.finish().unwrap();
    assert_eq!(fs::read(layout.path(1)).unwrap(), vec![7u8; 128]);
}

#[test]
pub fn open_failure_is_reported() {
    let dir = TempDir::new().unwrap();
    // directory was never created
    let layout = layout(&dir, 1);
    let monitor = RoundMonitor::new(1);

    match FileWriteSession::open(&layout, 0, OpenMode::Append, None, &monitor) {
        Err(SessionError::OpenFailed { path, .. }) => assert_eq!(path, layout.path(0)),
        other => panic!("expected open failure, got {other:?}"),
    }

    assert_eq!(monitor.open(), 0);
    assert_eq!(monitor.peak_open(), 0);
}

#[test]
pub fn monitor_tracks_open_sessions() {
    let dir = TempDir::new().unwrap();
    let layout = layout(&dir, 2);
    let monitor = RoundMonitor::new(2);
    layout.create_directory().unwrap();

    let first = FileWriteSession::open(&layout, 0, OpenMode::Truncate, None, &monitor).unwrap();
    let second = FileWriteSession::open(&layout, 1, OpenMode::Truncate, None, &monitor).unwrap();
    assert_eq!(monitor.open(), 2);
    assert_eq!(monitor.collisions(), 0);

    // a session dropped without finishing still closes and releases its slot
    drop(first);
    assert_eq!(monitor.open(), 1);

    let third = FileWriteSession::open(&layout, 1, OpenMode::Append, None, &monitor).unwrap();
    assert_eq!(monitor.collisions(), 1);
    assert_eq!(monitor.peak_open(), 2);

    drop(second);
    drop(third);
    assert_eq!(monitor.open(), 0);
}

#[test]
pub fn remove_files_only_touches_slots() {
    let dir = TempDir::new().unwrap();
    let layout = layout(&dir, 3);
    layout.create_directory().unwrap();

    fs::write(layout.path(0), b"a").unwrap();
    fs::write(layout.path(2), b"c").unwrap();
    fs::write(dir.path().join("out/Header"), b"h").unwrap();

    assert_eq!(layout.remove_files().unwrap(), 2);
    assert!(!layout.path(0).exists());
    assert!(dir.path().join("out/Header").exists());
    assert_eq!(layout.remove_files().unwrap(), 0);
}
