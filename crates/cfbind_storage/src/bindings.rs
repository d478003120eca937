#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use cfbind_contracts::binding::{ExternalHandle, PlatformUserId, VerifiedBinding};
use cfbind_contracts::{UnixTimeMs, Validate};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::repo::VerifiedBindingRepo;
use crate::StorageError;

pub const VERIFIED_USERS_TABLE: &str = "verified_users";

const VERIFIED_USERS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS verified_users (
        user_id     TEXT PRIMARY KEY,
        handle      TEXT NOT NULL,
        verified_at INTEGER NOT NULL
    );
";

const CURRENT_COLUMNS: [&str; 3] = ["user_id", "handle", "verified_at"];

/// Column layout written by the first bot release.
const LEGACY_COLUMNS: [&str; 3] = ["userId", "codeforcesHandle", "verifiedAt"];

const LEGACY_RENAME: &str = "
    BEGIN;
    ALTER TABLE verified_users RENAME COLUMN userId TO user_id;
    ALTER TABLE verified_users RENAME COLUMN codeforcesHandle TO handle;
    ALTER TABLE verified_users RENAME COLUMN verifiedAt TO verified_at;
    COMMIT;
";

fn backend(err: rusqlite::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

/// Process-local durable store. Used by tests and by deployments without a database file.
#[derive(Debug, Default)]
pub struct InMemoryBindingStore {
    rows: Mutex<BTreeMap<PlatformUserId, VerifiedBinding>>,
}

impl InMemoryBindingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, BTreeMap<PlatformUserId, VerifiedBinding>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl VerifiedBindingRepo for InMemoryBindingStore {
    fn put(&self, binding: VerifiedBinding) -> Result<(), StorageError> {
        binding.validate()?;
        let mut rows = self.rows();
        if rows.contains_key(&binding.user_id) {
            return Err(StorageError::DuplicateKey {
                table: VERIFIED_USERS_TABLE,
                key: binding.user_id.as_str().to_string(),
            });
        }
        rows.insert(binding.user_id.clone(), binding);
        Ok(())
    }

    fn get(&self, user_id: &PlatformUserId) -> Result<Option<VerifiedBinding>, StorageError> {
        Ok(self.rows().get(user_id).cloned())
    }

    fn count(&self) -> Result<u64, StorageError> {
        Ok(self.rows().len() as u64)
    }
}

/// SQLite-backed durable store. The primary key on `user_id` enforces write-once.
#[derive(Debug)]
pub struct SqliteBindingStore {
    conn: Mutex<Connection>,
}

impl SqliteBindingStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(backend)?;
        Self::bootstrap(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(VERIFIED_USERS_SCHEMA).map_err(backend)?;
        let columns = table_columns(&conn)?;
        if same_columns(&columns, &LEGACY_COLUMNS) {
            conn.execute_batch(LEGACY_RENAME).map_err(backend)?;
            tracing::info!(table = VERIFIED_USERS_TABLE, "legacy columns renamed");
        } else if !same_columns(&columns, &CURRENT_COLUMNS) {
            return Err(StorageError::SchemaMismatch {
                table: VERIFIED_USERS_TABLE,
                detail: format!("unexpected columns {columns:?}"),
            });
        }
        tracing::debug!(table = VERIFIED_USERS_TABLE, "schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn same_columns(found: &[String], expected: &[&str]) -> bool {
    found.len() == expected.len() && expected.iter().all(|e| found.iter().any(|f| f == e))
}

fn table_columns(conn: &Connection) -> Result<Vec<String>, StorageError> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info('verified_users')")
        .map_err(backend)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(backend)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(backend)?;
    Ok(names)
}

impl VerifiedBindingRepo for SqliteBindingStore {
    fn put(&self, binding: VerifiedBinding) -> Result<(), StorageError> {
        binding.validate()?;
        let verified_at = i64::try_from(binding.verified_at.0).map_err(|_| {
            StorageError::Backend(format!(
                "verified_at {} does not fit an INTEGER column",
                binding.verified_at.0
            ))
        })?;
        let conn = self.conn();
        let res = conn.execute(
            "INSERT INTO verified_users (user_id, handle, verified_at) VALUES (?1, ?2, ?3)",
            params![binding.user_id.as_str(), binding.handle.as_str(), verified_at],
        );
        match res {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::DuplicateKey {
                    table: VERIFIED_USERS_TABLE,
                    key: binding.user_id.as_str().to_string(),
                })
            }
            Err(err) => Err(backend(err)),
        }
    }

    fn get(&self, user_id: &PlatformUserId) -> Result<Option<VerifiedBinding>, StorageError> {
        let conn = self.conn();
        // Legacy rows may carry NULLs; they still count as verified.
        let row: Option<(Option<String>, Option<i64>)> = conn
            .query_row(
                "SELECT handle, verified_at FROM verified_users WHERE user_id = ?1",
                params![user_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(backend)?;
        let Some((handle, verified_at)) = row else {
            return Ok(None);
        };
        let verified_at = u64::try_from(verified_at.unwrap_or(0)).map_err(|_| {
            StorageError::Backend(format!("negative verified_at for {}", user_id.as_str()))
        })?;
        Ok(Some(VerifiedBinding::from_stored(
            user_id.clone(),
            ExternalHandle::from_stored(handle.unwrap_or_default()),
            UnixTimeMs(verified_at),
        )))
    }

    fn count(&self) -> Result<u64, StorageError> {
        let conn = self.conn();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM verified_users", [], |row| row.get(0))
            .map_err(backend)?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}
