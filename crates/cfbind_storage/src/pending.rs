#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use cfbind_contracts::binding::{PendingChallenge, PlatformUserId};
use cfbind_contracts::UnixTimeMs;

/// In-memory registry of issued, unconfirmed challenges. Lives as long as the process.
///
/// Every method is one critical section. Callers that need several steps to be atomic
/// with respect to other registry users (the verification commit) take a
/// [`PendingChallengeGuard`] through [`PendingChallengeRegistry::lock`].
#[derive(Debug, Default)]
pub struct PendingChallengeRegistry {
    rows: Mutex<BTreeMap<PlatformUserId, PendingChallenge>>,
}

/// Exclusive view of the registry. Other registry callers block until it is dropped.
#[derive(Debug)]
pub struct PendingChallengeGuard<'a> {
    rows: MutexGuard<'a, BTreeMap<PlatformUserId, PendingChallenge>>,
}

impl PendingChallengeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> PendingChallengeGuard<'_> {
        // No operation panics between mutations, so a poisoned map is still consistent.
        PendingChallengeGuard {
            rows: self.rows.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn set(&self, challenge: PendingChallenge) {
        self.lock().set(challenge);
    }

    pub fn get(&self, user_id: &PlatformUserId) -> Option<PendingChallenge> {
        self.lock().get(user_id).cloned()
    }

    pub fn delete(&self, user_id: &PlatformUserId) -> bool {
        self.lock().delete(user_id)
    }

    /// Removes every challenge with `started_at < cutoff` and returns how many were removed.
    pub fn sweep_older_than(&self, cutoff: UnixTimeMs) -> u32 {
        let mut guard = self.lock();
        let before = guard.rows.len();
        guard.rows.retain(|_, c| c.started_at >= cutoff);
        let removed = before - guard.rows.len();
        u32::try_from(removed).unwrap_or(u32::MAX)
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PendingChallengeGuard<'_> {
    /// Unconditional upsert: replaces any previous challenge for the same user.
    pub fn set(&mut self, challenge: PendingChallenge) {
        self.rows.insert(challenge.user_id.clone(), challenge);
    }

    pub fn get(&self, user_id: &PlatformUserId) -> Option<&PendingChallenge> {
        self.rows.get(user_id)
    }

    pub fn delete(&mut self, user_id: &PlatformUserId) -> bool {
        self.rows.remove(user_id).is_some()
    }
}
