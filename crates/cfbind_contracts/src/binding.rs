#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::{ContractViolation, SchemaVersion, UnixTimeMs, Validate};

pub const BINDING_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const CHALLENGE_TOKEN_LEN: usize = 8;

pub const EXTERNAL_HANDLE_MIN_LEN: usize = 3;
pub const EXTERNAL_HANDLE_MAX_LEN: usize = 24;

fn validate_compact_ascii(
    field: &'static str,
    value: &str,
    max_len: usize,
) -> Result<(), ContractViolation> {
    if value.trim().is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not be empty",
        });
    }
    if value.len() > max_len {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "too long",
        });
    }
    if !value.is_ascii() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be ASCII",
        });
    }
    if value
        .chars()
        .any(|c| c.is_ascii_whitespace() || c.is_ascii_control())
    {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not contain whitespace or control characters",
        });
    }
    Ok(())
}

/// Chat-platform account identity (a Discord snowflake in practice).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlatformUserId(String);

impl PlatformUserId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for PlatformUserId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_compact_ascii("platform_user_id", &self.0, 64)
    }
}

/// External handle exactly as claimed by the user. No case folding.
///
/// Claims are limited to the Codeforces handle alphabet (`[A-Za-z0-9_.-]`, 3..=24 chars),
/// so list separators such as `;` never reach the lookup query.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExternalHandle(String);

impl ExternalHandle {
    pub fn new(handle: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(handle.into());
        v.validate()?;
        Ok(v)
    }

    /// Rebuilds a handle read back from durable storage. Stored handles were validated
    /// when committed and are not re-validated against the current claim rules.
    pub fn from_stored(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for ExternalHandle {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_compact_ascii("external_handle", &self.0, EXTERNAL_HANDLE_MAX_LEN)?;
        if self.0.len() < EXTERNAL_HANDLE_MIN_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "external_handle",
                reason: "too short",
            });
        }
        if !self
            .0
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
        {
            return Err(ContractViolation::InvalidValue {
                field: "external_handle",
                reason: "must use only ASCII letters, digits, '_', '.' or '-'",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChallengeToken(String);

impl ChallengeToken {
    pub fn new(token: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(token.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Byte-exact comparison against a value read back from the external profile.
    pub fn matches(&self, field_value: &str) -> bool {
        self.0.as_bytes() == field_value.as_bytes()
    }
}

impl Validate for ChallengeToken {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0.len() != CHALLENGE_TOKEN_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "challenge_token",
                reason: "must be exactly CHALLENGE_TOKEN_LEN chars",
            });
        }
        if !self.0.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(ContractViolation::InvalidValue {
                field: "challenge_token",
                reason: "must be ASCII alphanumeric",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedBinding {
    pub schema_version: SchemaVersion,
    pub user_id: PlatformUserId,
    pub handle: ExternalHandle,
    pub verified_at: UnixTimeMs,
}

impl VerifiedBinding {
    pub fn v1(
        user_id: PlatformUserId,
        handle: ExternalHandle,
        verified_at: UnixTimeMs,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            schema_version: BINDING_CONTRACT_VERSION,
            user_id,
            handle,
            verified_at,
        };
        r.validate()?;
        Ok(r)
    }

    /// Row read back from durable storage. The handle keeps whatever was committed.
    pub fn from_stored(
        user_id: PlatformUserId,
        handle: ExternalHandle,
        verified_at: UnixTimeMs,
    ) -> Self {
        Self {
            schema_version: BINDING_CONTRACT_VERSION,
            user_id,
            handle,
            verified_at,
        }
    }
}

impl Validate for VerifiedBinding {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != BINDING_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "verified_binding.schema_version",
                reason: "must match BINDING_CONTRACT_VERSION",
            });
        }
        self.user_id.validate()?;
        self.handle.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChallenge {
    pub schema_version: SchemaVersion,
    pub user_id: PlatformUserId,
    pub token: ChallengeToken,
    pub started_at: UnixTimeMs,
}

impl PendingChallenge {
    pub fn v1(
        user_id: PlatformUserId,
        token: ChallengeToken,
        started_at: UnixTimeMs,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            schema_version: BINDING_CONTRACT_VERSION,
            user_id,
            token,
            started_at,
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for PendingChallenge {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != BINDING_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "pending_challenge.schema_version",
                reason: "must match BINDING_CONTRACT_VERSION",
            });
        }
        self.user_id.validate()?;
        self.token.validate()?;
        Ok(())
    }
}

/// Classification of one read-only query against the external profile service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileLookupOutcome {
    NotFound,
    TransientFailure { detail: String },
    /// `None` when the comparable field was never set; `Some("")` is a set-but-empty field.
    Profile { field_value: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleGrantStatus {
    Granted,
    Failed { detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    AlreadyBound { binding: VerifiedBinding },
    ChallengeIssued { challenge: PendingChallenge },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    AlreadyBound {
        binding: VerifiedBinding,
    },
    NotStarted,
    UnknownExternalIdentity {
        handle: String,
    },
    TryAgainLater,
    FieldUnset,
    Mismatch {
        found: String,
        expected: ChallengeToken,
    },
    Verified {
        binding: VerifiedBinding,
        role_grant: RoleGrantStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectOutcome {
    Verified { binding: VerifiedBinding },
    Pending { challenge: PendingChallenge },
    NotStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepResult {
    pub cutoff: UnixTimeMs,
    pub removed: u32,
}
