#![forbid(unsafe_code)]

use cfbind_contracts::binding::{PlatformUserId, VerifiedBinding};

use crate::StorageError;

/// Typed repository interface for the durable `verified_users` table.
///
/// Write-once per key: there is no update or delete path.
pub trait VerifiedBindingRepo: Send + Sync {
    /// Fails with `StorageError::DuplicateKey` when the user already has a row.
    fn put(&self, binding: VerifiedBinding) -> Result<(), StorageError>;
    /// A missing key is `Ok(None)`, never an error.
    fn get(&self, user_id: &PlatformUserId) -> Result<Option<VerifiedBinding>, StorageError>;
    fn count(&self) -> Result<u64, StorageError>;
}
