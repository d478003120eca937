#![forbid(unsafe_code)]

pub mod binding;
pub mod common;

pub use common::{ContractViolation, ReasonCodeId, SchemaVersion, UnixTimeMs, Validate, MS_PER_DAY};
