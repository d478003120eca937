#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub const MS_PER_DAY: u64 = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SchemaVersion(pub u32);

/// Wall-clock milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    pub fn saturating_sub_days(self, days: u32) -> Self {
        Self(self.0.saturating_sub(u64::from(days).saturating_mul(MS_PER_DAY)))
    }

    pub fn as_unix_secs(self) -> u64 {
        self.0 / 1_000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReasonCodeId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
}

pub trait Validate {
    fn validate(&self) -> Result<(), ContractViolation>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_days_saturates_at_epoch() {
        assert_eq!(UnixTimeMs(5).saturating_sub_days(1), UnixTimeMs(0));
        assert_eq!(
            UnixTimeMs(3 * MS_PER_DAY + 7).saturating_sub_days(2),
            UnixTimeMs(MS_PER_DAY + 7)
        );
        assert_eq!(UnixTimeMs(42).saturating_sub_days(0), UnixTimeMs(42));
    }

    #[test]
    fn unix_secs_truncates() {
        assert_eq!(UnixTimeMs(1_700_000_000_999).as_unix_secs(), 1_700_000_000);
    }
}
