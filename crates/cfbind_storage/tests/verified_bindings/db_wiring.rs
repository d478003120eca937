#![forbid(unsafe_code)]

use std::sync::Arc;
use std::thread;

use cfbind_contracts::binding::{ExternalHandle, PlatformUserId, VerifiedBinding};
use cfbind_contracts::UnixTimeMs;
use cfbind_storage::bindings::{InMemoryBindingStore, SqliteBindingStore, VERIFIED_USERS_TABLE};
use cfbind_storage::repo::VerifiedBindingRepo;
use cfbind_storage::StorageError;

fn user(id: &str) -> PlatformUserId {
    PlatformUserId::new(id).unwrap()
}

fn binding(user_id: &str, handle: &str, at: u64) -> VerifiedBinding {
    VerifiedBinding::v1(
        user(user_id),
        ExternalHandle::new(handle).unwrap(),
        UnixTimeMs(at),
    )
    .unwrap()
}

#[test]
fn at_bind_db_01_schema_creation_is_idempotent_and_rows_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cfbind.sqlite3");

    {
        let store = SqliteBindingStore::open(&path).unwrap();
        store.put(binding("111", "tourist", 1_000)).unwrap();
    }

    let reopened = SqliteBindingStore::open(&path).unwrap();
    assert_eq!(reopened.count(), Ok(1));
    assert_eq!(
        reopened.get(&user("111")).unwrap(),
        Some(binding("111", "tourist", 1_000))
    );
}

#[test]
fn at_bind_db_02_write_once_enforced_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cfbind.sqlite3");

    SqliteBindingStore::open(&path)
        .unwrap()
        .put(binding("222", "petr", 5))
        .unwrap();

    let store = SqliteBindingStore::open(&path).unwrap();
    let err = store.put(binding("222", "Petr", 6)).unwrap_err();
    assert_eq!(
        err,
        StorageError::DuplicateKey {
            table: VERIFIED_USERS_TABLE,
            key: "222".to_string(),
        }
    );
    // First write wins; nothing was overwritten.
    assert_eq!(
        store.get(&user("222")).unwrap().unwrap().handle.as_str(),
        "petr"
    );
}

#[test]
fn at_bind_db_03_missing_key_is_absent_not_error() {
    let sqlite = SqliteBindingStore::open_in_memory().unwrap();
    let mem = InMemoryBindingStore::new();
    assert_eq!(sqlite.get(&user("nobody")), Ok(None));
    assert_eq!(mem.get(&user("nobody")), Ok(None));
}

#[test]
fn at_bind_db_04_concurrent_duplicate_puts_commit_once() {
    let stores: Vec<Arc<dyn VerifiedBindingRepo>> = vec![
        Arc::new(InMemoryBindingStore::new()),
        Arc::new(SqliteBindingStore::open_in_memory().unwrap()),
    ];

    for store in stores {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.put(binding("333", &format!("handle{i}"), i)))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let dup = results
            .iter()
            .filter(|r| matches!(r, Err(StorageError::DuplicateKey { .. })))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(dup, 7);
        assert_eq!(store.count(), Ok(1));
    }
}

fn seed(path: &std::path::Path, ddl: &str) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(ddl).unwrap();
}

#[test]
fn at_bind_db_05_legacy_column_layout_is_migrated_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.sqlite3");
    seed(
        &path,
        "CREATE TABLE verified_users (userId TEXT PRIMARY KEY, codeforcesHandle TEXT, verifiedAt INTEGER);
         INSERT INTO verified_users VALUES ('42', 'tourist', 1700000000000);
         INSERT INTO verified_users VALUES ('43', NULL, NULL);",
    );

    let store = SqliteBindingStore::open(&path).unwrap();
    assert_eq!(
        store.get(&user("42")).unwrap(),
        Some(binding("42", "tourist", 1_700_000_000_000))
    );
    let sparse = store.get(&user("43")).unwrap().unwrap();
    assert_eq!(sparse.handle.as_str(), "");
    assert_eq!(sparse.verified_at, UnixTimeMs(0));
    assert!(matches!(
        store.put(binding("42", "petr", 1)),
        Err(StorageError::DuplicateKey { .. })
    ));
    store.put(binding("44", "petr", 2)).unwrap();
    drop(store);

    let reopened = SqliteBindingStore::open(&path).unwrap();
    assert_eq!(reopened.count(), Ok(3));
}

#[test]
fn at_bind_db_06_unknown_column_layout_refuses_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("foreign.sqlite3");
    seed(
        &path,
        "CREATE TABLE verified_users (id INTEGER PRIMARY KEY, payload BLOB);",
    );

    assert!(matches!(
        SqliteBindingStore::open(&path),
        Err(StorageError::SchemaMismatch {
            table: VERIFIED_USERS_TABLE,
            ..
        })
    ));
}

#[test]
fn at_bind_db_07_stored_handle_is_not_revalidated_on_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cfbind.sqlite3");
    drop(SqliteBindingStore::open(&path).unwrap());
    seed(
        &path,
        "INSERT INTO verified_users (user_id, handle, verified_at) VALUES ('555', 'old;handle', 9);",
    );

    let store = SqliteBindingStore::open(&path).unwrap();
    let row = store.get(&user("555")).unwrap().unwrap();
    assert_eq!(row.handle.as_str(), "old;handle");
    assert_eq!(row.verified_at, UnixTimeMs(9));
}
