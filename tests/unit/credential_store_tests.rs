//! Unit tests for on-disk credential material: save, load, existence,
//! and irreversible purge.

use courier::credentials::CredentialStore;

fn store() -> (CredentialStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    (CredentialStore::new(dir.path()), dir)
}

#[tokio::test]
async fn save_then_load_roundtrips() {
    let (store, _dir) = store();
    store.save("abc123", b"token-material").await.expect("save");

    assert!(store.exists("abc123").await);
    assert_eq!(store.load("abc123").await.expect("load"), b"token-material");
}

#[tokio::test]
async fn material_is_namespaced_by_key() {
    let (store, dir) = store();
    store.save("k1", b"one").await.expect("save");

    assert!(dir.path().join("sessions").join("k1").is_dir());
    assert!(!store.exists("k2").await);
}

#[tokio::test]
async fn purge_removes_the_whole_session_dir() {
    let (store, dir) = store();
    store.save("gone", b"secret").await.expect("save");
    assert!(store.exists("gone").await);

    store.purge("gone").await.expect("purge");

    assert!(!store.exists("gone").await);
    assert!(!dir.path().join("sessions").join("gone").exists());
}

#[tokio::test]
async fn purge_of_absent_key_is_ok() {
    let (store, _dir) = store();
    store.purge("never-existed").await.expect("purge is idempotent");
}

#[tokio::test]
async fn load_of_absent_key_fails() {
    let (store, _dir) = store();
    assert!(store.load("missing").await.is_err());
}
