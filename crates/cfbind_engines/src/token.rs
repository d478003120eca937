#![forbid(unsafe_code)]

use cfbind_contracts::binding::{ChallengeToken, CHALLENGE_TOKEN_LEN};
use cfbind_contracts::ContractViolation;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;

/// Source of fresh challenge tokens.
pub trait TokenSource: Send + Sync {
    fn next_token(&self) -> Result<ChallengeToken, ContractViolation>;
}

/// Uniform draw over `[A-Za-z0-9]` from the OS generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRngTokenSource;

impl TokenSource for OsRngTokenSource {
    fn next_token(&self) -> Result<ChallengeToken, ContractViolation> {
        generate_challenge_token(&mut OsRng)
    }
}

pub fn generate_challenge_token<R: Rng + ?Sized>(
    rng: &mut R,
) -> Result<ChallengeToken, ContractViolation> {
    let raw: String = (0..CHALLENGE_TOKEN_LEN)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect();
    ChallengeToken::new(raw)
}
