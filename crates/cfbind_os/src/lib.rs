#![forbid(unsafe_code)]

pub mod commands;
pub mod verification;
