//! Keyed message digests over ordered field lists.
//!
//! The gateway signs every message by concatenating `name=value` for each
//! field in a contractually fixed order, appending the shared secret, and
//! hashing the result. Field order is part of the contract: sender and
//! verifier must use the identical order. The secret is never transmitted.

use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::str::FromStr;

/// Digest algorithm configured per merchant. The provider defaults to SHA-1;
/// SHA-256 is the drop-in alternative offered on newer merchant profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAlgorithm {
    Sha1,
    Sha256,
}

impl MacAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            MacAlgorithm::Sha1 => "sha1",
            MacAlgorithm::Sha256 => "sha256",
        }
    }
}

impl Default for MacAlgorithm {
    fn default() -> Self {
        MacAlgorithm::Sha1
    }
}

impl std::fmt::Display for MacAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MacAlgorithm {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "sha1" => Ok(MacAlgorithm::Sha1),
            "sha256" => Ok(MacAlgorithm::Sha256),
            other => Err(format!("unsupported MAC algorithm: {}", other)),
        }
    }
}

/// Compute the hex digest over `fields` in the caller-supplied order with the
/// secret appended. Deterministic and stateless.
pub fn sign(fields: &[(&str, &str)], secret: &str, algorithm: MacAlgorithm) -> String {
    let mut message = String::new();
    for (name, value) in fields {
        message.push_str(name);
        message.push('=');
        message.push_str(value);
    }
    message.push_str(secret);

    match algorithm {
        MacAlgorithm::Sha1 => {
            let mut hasher = Sha1::new();
            hasher.update(message.as_bytes());
            hex::encode(hasher.finalize())
        }
        MacAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(message.as_bytes());
            hex::encode(hasher.finalize())
        }
    }
}

/// Recompute the digest and compare against `candidate`. Hex case of the
/// candidate is not significant. Uses a constant-time comparison so a
/// mismatch position is not observable through timing.
pub fn verify(
    fields: &[(&str, &str)],
    secret: &str,
    algorithm: MacAlgorithm,
    candidate: &str,
) -> bool {
    let expected = sign(fields, secret, algorithm);
    let candidate = candidate.trim().to_lowercase();
    secure_eq(expected.as_bytes(), candidate.as_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
