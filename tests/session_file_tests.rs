// Tests for the on-disk session record
use chrono::{Duration, TimeZone, Utc};
use serde_json::{Value, json};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use virtpilot::session::{
    FileSessionStorage, ManualClock, SessionStorage, SESSION_TTL_MINUTES,
};
use virtpilot::{ConnectParams, HypervisorPath, Protocol, SessionStore};

fn store_in(dir: &TempDir) -> (SessionStore, Arc<ManualClock>, std::path::PathBuf) {
    let path = dir.path().join("state").join("session.json");
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
    ));
    let store = SessionStore::with_clock(
        Arc::new(FileSessionStorage::new(path.clone())),
        clock.clone(),
    );
    (store, clock, path)
}

#[test]
fn test_record_shape_on_disk() {
    let dir = TempDir::new().unwrap();
    let (store, _, path) = store_in(&dir);

    store.create(
        ConnectParams::remote(Protocol::QemuSsh, "172.19.5.99")
            .with_user("user")
            .with_path(HypervisorPath::Session),
    );

    let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(
        written,
        json!({
            "connection": {
                "protocol": "qemu+ssh",
                "user": "user",
                "host": "172.19.5.99",
                "path": "session"
            },
            "createdAt": Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap().timestamp_millis()
        })
    );
}

#[test]
fn test_session_survives_new_store() {
    let dir = TempDir::new().unwrap();
    let (store, clock, path) = store_in(&dir);
    store.create(ConnectParams::local());

    let reopened = SessionStore::with_clock(Arc::new(FileSessionStorage::new(path)), clock);
    let session = reopened.read().expect("session should persist");
    assert_eq!(session.connection, ConnectParams::local());
}

#[test]
fn test_expired_session_removes_file() {
    let dir = TempDir::new().unwrap();
    let (store, clock, path) = store_in(&dir);
    store.create(ConnectParams::local());

    clock.advance(Duration::minutes(SESSION_TTL_MINUTES) + Duration::milliseconds(1));

    assert!(store.read().is_none());
    assert!(!path.exists());
}

#[test]
fn test_corrupt_file_is_treated_as_absent() {
    let dir = TempDir::new().unwrap();
    let (store, _, path) = store_in(&dir);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "{not json").unwrap();

    assert!(store.read().is_none());
    assert!(!path.exists());
    assert!(store.connection().unwrap_err().is_not_connected());
}

#[test]
fn test_clear_without_file_is_noop() {
    let dir = TempDir::new().unwrap();
    let storage = FileSessionStorage::new(dir.path().join("missing").join("session.json"));

    storage.remove().unwrap();
    assert!(storage.load().unwrap().is_none());
}
