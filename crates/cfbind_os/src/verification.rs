#![forbid(unsafe_code)]

use std::sync::Arc;

use cfbind_contracts::binding::{
    AttemptOutcome, BeginOutcome, ExternalHandle, InspectOutcome, PendingChallenge,
    PlatformUserId, ProfileLookupOutcome, RoleGrantStatus, SweepResult, VerifiedBinding,
};
use cfbind_contracts::{ContractViolation, UnixTimeMs};
use cfbind_engines::codeforces::ProfileLookup;
use cfbind_engines::role_grant::CapabilityGrant;
use cfbind_engines::token::TokenSource;
use cfbind_storage::pending::PendingChallengeRegistry;
use cfbind_storage::repo::VerifiedBindingRepo;
use cfbind_storage::StorageError;

pub mod reason_codes {
    use cfbind_contracts::ReasonCodeId;

    pub const VERIFY_OK_CHALLENGE_ISSUED: ReasonCodeId = ReasonCodeId(0x5600_0001);
    pub const VERIFY_OK_COMMITTED: ReasonCodeId = ReasonCodeId(0x5600_0002);
    pub const VERIFY_OK_SWEEP: ReasonCodeId = ReasonCodeId(0x5600_0003);
    pub const VERIFY_REFUSE_ALREADY_BOUND: ReasonCodeId = ReasonCodeId(0x5600_00F1);
    pub const VERIFY_REFUSE_NOT_STARTED: ReasonCodeId = ReasonCodeId(0x5600_00F2);
    pub const VERIFY_REFUSE_UNKNOWN_IDENTITY: ReasonCodeId = ReasonCodeId(0x5600_00F3);
    pub const VERIFY_REFUSE_FIELD_UNSET: ReasonCodeId = ReasonCodeId(0x5600_00F4);
    pub const VERIFY_REFUSE_MISMATCH: ReasonCodeId = ReasonCodeId(0x5600_00F5);
    pub const VERIFY_RETRY_TRANSIENT: ReasonCodeId = ReasonCodeId(0x5600_00F6);
    pub const VERIFY_WARN_ROLE_GRANT_FAILED: ReasonCodeId = ReasonCodeId(0x5600_00F7);
    pub const VERIFY_FAIL_INVARIANT: ReasonCodeId = ReasonCodeId(0x5600_00FF);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
    #[error("invariant violation: {detail}")]
    InvariantViolation { detail: String },
}

enum Commit {
    Committed(VerifiedBinding),
    AlreadyBound(VerifiedBinding),
}

/// Challenge-response state machine: `Unstarted -> Pending -> Verified`.
///
/// Lock order is registry first, durable store second. No lock is held across the
/// external lookup or the capability grant.
pub struct VerificationRuntime {
    bindings: Arc<dyn VerifiedBindingRepo>,
    pending: Arc<PendingChallengeRegistry>,
    lookup: Arc<dyn ProfileLookup>,
    grant: Arc<dyn CapabilityGrant>,
    tokens: Arc<dyn TokenSource>,
}

impl VerificationRuntime {
    pub fn new(
        bindings: Arc<dyn VerifiedBindingRepo>,
        pending: Arc<PendingChallengeRegistry>,
        lookup: Arc<dyn ProfileLookup>,
        grant: Arc<dyn CapabilityGrant>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            bindings,
            pending,
            lookup,
            grant,
            tokens,
        }
    }

    pub fn bindings(&self) -> &Arc<dyn VerifiedBindingRepo> {
        &self.bindings
    }

    pub fn pending(&self) -> &Arc<PendingChallengeRegistry> {
        &self.pending
    }

    pub fn begin(
        &self,
        now: UnixTimeMs,
        user_id: &PlatformUserId,
    ) -> Result<BeginOutcome, VerificationError> {
        let mut pending = self.pending.lock();
        if let Some(binding) = self.bindings.get(user_id)? {
            tracing::debug!(
                user_id = user_id.as_str(),
                reason_code = ?reason_codes::VERIFY_REFUSE_ALREADY_BOUND,
                "begin on verified user"
            );
            return Ok(BeginOutcome::AlreadyBound { binding });
        }
        let token = self.tokens.next_token()?;
        let challenge = PendingChallenge::v1(user_id.clone(), token, now)?;
        pending.set(challenge.clone());
        drop(pending);

        tracing::info!(
            user_id = user_id.as_str(),
            started_at = now.0,
            reason_code = ?reason_codes::VERIFY_OK_CHALLENGE_ISSUED,
            "challenge issued"
        );
        tracing::debug!(user_id = user_id.as_str(), token = challenge.token.as_str(), "challenge token");
        Ok(BeginOutcome::ChallengeIssued { challenge })
    }

    pub fn attempt(
        &self,
        now: UnixTimeMs,
        user_id: &PlatformUserId,
        claimed_handle: &str,
    ) -> Result<AttemptOutcome, VerificationError> {
        // Verified check happens-before the pending check, both against one snapshot.
        let challenge = {
            let pending = self.pending.lock();
            if let Some(binding) = self.bindings.get(user_id)? {
                return Ok(AttemptOutcome::AlreadyBound { binding });
            }
            match pending.get(user_id) {
                Some(c) => c.clone(),
                None => {
                    tracing::debug!(
                        user_id = user_id.as_str(),
                        reason_code = ?reason_codes::VERIFY_REFUSE_NOT_STARTED,
                        "attempt without challenge"
                    );
                    return Ok(AttemptOutcome::NotStarted);
                }
            }
        };

        let Ok(handle) = ExternalHandle::new(claimed_handle) else {
            return Ok(AttemptOutcome::UnknownExternalIdentity {
                handle: claimed_handle.to_string(),
            });
        };

        let field_value = match self.lookup.lookup(&handle) {
            ProfileLookupOutcome::NotFound => {
                tracing::info!(
                    user_id = user_id.as_str(),
                    handle = handle.as_str(),
                    reason_code = ?reason_codes::VERIFY_REFUSE_UNKNOWN_IDENTITY,
                    "external identity not found"
                );
                return Ok(AttemptOutcome::UnknownExternalIdentity {
                    handle: handle.as_str().to_string(),
                });
            }
            ProfileLookupOutcome::TransientFailure { detail } => {
                tracing::warn!(
                    user_id = user_id.as_str(),
                    handle = handle.as_str(),
                    detail = detail.as_str(),
                    reason_code = ?reason_codes::VERIFY_RETRY_TRANSIENT,
                    "external lookup failed"
                );
                return Ok(AttemptOutcome::TryAgainLater);
            }
            ProfileLookupOutcome::Profile { field_value: None } => {
                tracing::info!(
                    user_id = user_id.as_str(),
                    handle = handle.as_str(),
                    reason_code = ?reason_codes::VERIFY_REFUSE_FIELD_UNSET,
                    "external field unset"
                );
                return Ok(AttemptOutcome::FieldUnset);
            }
            ProfileLookupOutcome::Profile {
                field_value: Some(v),
            } => v,
        };

        // Compare against the token captured before the lookup, even if a concurrent
        // begin has replaced it since.
        if !challenge.token.matches(&field_value) {
            tracing::info!(
                user_id = user_id.as_str(),
                handle = handle.as_str(),
                reason_code = ?reason_codes::VERIFY_REFUSE_MISMATCH,
                "external field mismatch"
            );
            return Ok(AttemptOutcome::Mismatch {
                found: field_value,
                expected: challenge.token,
            });
        }

        let binding = match self.commit(now, user_id, handle)? {
            Commit::Committed(binding) => binding,
            Commit::AlreadyBound(binding) => return Ok(AttemptOutcome::AlreadyBound { binding }),
        };
        tracing::info!(
            user_id = user_id.as_str(),
            handle = binding.handle.as_str(),
            verified_at = binding.verified_at.0,
            reason_code = ?reason_codes::VERIFY_OK_COMMITTED,
            "binding committed"
        );

        // Post-commit side effect; its failure never rolls the binding back.
        let role_grant = match self.grant.grant(user_id) {
            Ok(()) => RoleGrantStatus::Granted,
            Err(err) => {
                tracing::warn!(
                    user_id = user_id.as_str(),
                    error = %err,
                    reason_code = ?reason_codes::VERIFY_WARN_ROLE_GRANT_FAILED,
                    "role grant failed after commit"
                );
                RoleGrantStatus::Failed {
                    detail: err.to_string(),
                }
            }
        };
        Ok(AttemptOutcome::Verified {
            binding,
            role_grant,
        })
    }

    /// Durable insert and pending delete as one critical section.
    fn commit(
        &self,
        now: UnixTimeMs,
        user_id: &PlatformUserId,
        handle: ExternalHandle,
    ) -> Result<Commit, VerificationError> {
        let mut pending = self.pending.lock();
        if let Some(existing) = self.bindings.get(user_id)? {
            return Ok(Commit::AlreadyBound(existing));
        }
        if pending.get(user_id).is_none() {
            return Err(invariant(user_id, "pending challenge missing at commit"));
        }
        let binding = VerifiedBinding::v1(user_id.clone(), handle, now)?;
        match self.bindings.put(binding.clone()) {
            Ok(()) => {}
            Err(StorageError::DuplicateKey { .. }) => {
                return Err(invariant(user_id, "duplicate durable insert"));
            }
            Err(err) => {
                tracing::error!(user_id = user_id.as_str(), error = %err, "durable insert failed");
                return Err(err.into());
            }
        }
        pending.delete(user_id);
        Ok(Commit::Committed(binding))
    }

    pub fn inspect(&self, user_id: &PlatformUserId) -> Result<InspectOutcome, VerificationError> {
        let pending = self.pending.lock();
        if let Some(binding) = self.bindings.get(user_id)? {
            return Ok(InspectOutcome::Verified { binding });
        }
        Ok(match pending.get(user_id) {
            Some(challenge) => InspectOutcome::Pending {
                challenge: challenge.clone(),
            },
            None => InspectOutcome::NotStarted,
        })
    }

    /// Drops pending challenges issued more than `max_age_days` before `now`.
    /// Privilege checks are the caller's job.
    pub fn sweep(&self, now: UnixTimeMs, max_age_days: u32) -> SweepResult {
        let cutoff = now.saturating_sub_days(max_age_days);
        let removed = self.pending.sweep_older_than(cutoff);
        tracing::info!(
            cutoff = cutoff.0,
            max_age_days,
            removed,
            reason_code = ?reason_codes::VERIFY_OK_SWEEP,
            "pending challenges swept"
        );
        SweepResult { cutoff, removed }
    }
}

fn invariant(user_id: &PlatformUserId, detail: &str) -> VerificationError {
    tracing::error!(
        user_id = user_id.as_str(),
        detail,
        reason_code = ?reason_codes::VERIFY_FAIL_INVARIANT,
        "verification invariant violated"
    );
    VerificationError::InvariantViolation {
        detail: detail.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use cfbind_contracts::binding::ChallengeToken;
    use cfbind_engines::role_grant::CapabilityGrantError;
    use cfbind_storage::bindings::InMemoryBindingStore;

    pub struct ScriptedLookup {
        pub outcome: Mutex<ProfileLookupOutcome>,
        pub calls: AtomicUsize,
    }

    impl ScriptedLookup {
        pub fn new(outcome: ProfileLookupOutcome) -> Self {
            Self {
                outcome: Mutex::new(outcome),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn set(&self, outcome: ProfileLookupOutcome) {
            *self.outcome.lock().unwrap() = outcome;
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ProfileLookup for ScriptedLookup {
        fn lookup(&self, _handle: &ExternalHandle) -> ProfileLookupOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    pub struct RecordingGrant {
        pub fail: bool,
        pub granted: Mutex<Vec<PlatformUserId>>,
    }

    impl CapabilityGrant for RecordingGrant {
        fn grant(&self, user_id: &PlatformUserId) -> Result<(), CapabilityGrantError> {
            if self.fail {
                return Err(CapabilityGrantError::HttpStatus { status: 403 });
            }
            self.granted.lock().unwrap().push(user_id.clone());
            Ok(())
        }
    }

    pub struct FixedTokens(pub Mutex<VecDeque<&'static str>>);

    impl FixedTokens {
        pub fn new(tokens: &[&'static str]) -> Self {
            Self(Mutex::new(tokens.iter().copied().collect()))
        }
    }

    impl TokenSource for FixedTokens {
        fn next_token(&self) -> Result<ChallengeToken, ContractViolation> {
            let next = self.0.lock().unwrap().pop_front().unwrap_or("ZZZZZZZZ");
            ChallengeToken::new(next)
        }
    }

    pub fn profile(v: Option<&str>) -> ProfileLookupOutcome {
        ProfileLookupOutcome::Profile {
            field_value: v.map(str::to_string),
        }
    }

    pub fn user(id: &str) -> PlatformUserId {
        PlatformUserId::new(id).unwrap()
    }

    pub struct Harness {
        pub rt: VerificationRuntime,
        pub lookup: Arc<ScriptedLookup>,
        pub grant: Arc<RecordingGrant>,
        pub store: Arc<InMemoryBindingStore>,
        pub registry: Arc<PendingChallengeRegistry>,
    }

    pub fn harness_with(
        outcome: ProfileLookupOutcome,
        grant: RecordingGrant,
        tokens: &[&'static str],
    ) -> Harness {
        let lookup = Arc::new(ScriptedLookup::new(outcome));
        let grant = Arc::new(grant);
        let store = Arc::new(InMemoryBindingStore::new());
        let registry = Arc::new(PendingChallengeRegistry::new());
        let rt = VerificationRuntime::new(
            store.clone(),
            registry.clone(),
            lookup.clone(),
            grant.clone(),
            Arc::new(FixedTokens::new(tokens)),
        );
        Harness {
            rt,
            lookup,
            grant,
            store,
            registry,
        }
    }

    pub fn harness(outcome: ProfileLookupOutcome) -> Harness {
        harness_with(
            outcome,
            RecordingGrant::default(),
            &["AbC123Xy", "QwErTy12", "Zx9Yw8Vu"],
        )
    }
}
