#![forbid(unsafe_code)]

pub mod bindings;
pub mod pending;
pub mod repo;

use cfbind_contracts::ContractViolation;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("duplicate key in {table}: {key}")]
    DuplicateKey { table: &'static str, key: String },
    #[error("contract violation: {0}")]
    ContractViolation(#[from] ContractViolation),
    #[error("schema mismatch in {table}: {detail}")]
    SchemaMismatch { table: &'static str, detail: String },
    #[error("storage backend failure: {0}")]
    Backend(String),
}
