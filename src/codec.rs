//! Derivation of provider-safe transaction codes.
//!
//! The gateway limits its transaction identifier to a short field, so the
//! local payment identity is never sent verbatim. Instead a code is derived
//! by hashing the payment id together with the merchant namespace, a private
//! salt and the attempt counter, truncated to 18 hex characters. The mapping
//! is one-way: codes are only ever re-derived, never reversed.

use crate::store::PaymentId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of the derived code. Bounded by the provider's field limit.
pub const TRANSACTION_CODE_LEN: usize = 18;

/// A derived, provider-safe transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionCode(String);

impl TransactionCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a code echoed back by the provider.
    pub fn from_wire(value: impl Into<String>) -> Self {
        TransactionCode(value.into())
    }
}

impl std::fmt::Display for TransactionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derive the transaction code for one attempt of one payment.
///
/// Stable for a given `(payment, attempt)` pair; a new attempt (new redirect
/// after a prior failure) produces a different code. The salt keeps codes
/// unguessable across merchants sharing a namespace prefix.
pub fn transaction_code(
    payment: &PaymentId,
    namespace: &str,
    code_secret: &str,
    attempt: u32,
) -> TransactionCode {
    let mut hasher = Sha256::new();
    hasher.update(payment.as_str().as_bytes());
    hasher.update(namespace.as_bytes());
    hasher.update(code_secret.as_bytes());
    hasher.update(attempt.to_string().as_bytes());
    let digest = hex::encode(hasher.finalize());
    TransactionCode(digest[..TRANSACTION_CODE_LEN].to_string())
}
