//! Payment persistence: domain types and the store collaborator interface.
//!
//! Payments are owned by the hosting order system; this engine only loads
//! them and applies state transitions through [`PaymentStore`]. Every
//! mutation runs under an exclusive per-payment row lock so that the
//! synchronous return handler, the periodic sweep and operator actions can
//! race safely.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgres::PgPaymentStore;

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Opaque local payment identifier assigned by the hosting order system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentId(String);

impl PaymentId {
    pub fn new(value: impl Into<String>) -> Self {
        PaymentId(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local payment lifecycle state. Advances monotonically; terminal states
/// are never left by this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Created,
    Pending,
    Confirmed,
    Failed,
    Canceled,
}

impl PaymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentState::Confirmed | PaymentState::Failed | PaymentState::Canceled
        )
    }

    pub fn valid_transitions(&self) -> &'static [PaymentState] {
        match self {
            PaymentState::Created => &[
                PaymentState::Pending,
                PaymentState::Confirmed,
                PaymentState::Failed,
                PaymentState::Canceled,
            ],
            PaymentState::Pending => &[
                PaymentState::Confirmed,
                PaymentState::Failed,
                PaymentState::Canceled,
            ],
            // Confirmed is reverted to Pending only by the engine's own
            // compensating step after an ambiguous capture outcome.
            PaymentState::Confirmed => &[PaymentState::Pending],
            PaymentState::Failed => &[],
            PaymentState::Canceled => &[],
        }
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            PaymentState::Created => "created",
            PaymentState::Pending => "pending",
            PaymentState::Confirmed => "confirmed",
            PaymentState::Failed => "failed",
            PaymentState::Canceled => "canceled",
        }
    }

    pub fn from_db_str(value: &str) -> Option<Self> {
        match value {
            "created" => Some(PaymentState::Created),
            "pending" => Some(PaymentState::Pending),
            "confirmed" => Some(PaymentState::Confirmed),
            "failed" => Some(PaymentState::Failed),
            "canceled" => Some(PaymentState::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// Snapshot of a payment row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: PaymentId,
    pub state: PaymentState,
    /// Amount in minor currency units (cents).
    pub amount_minor: u64,
    /// Redirects issued so far. The active attempt number is `attempts - 1`;
    /// zero means no redirect has been minted yet.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Locked-transition outcomes
// ---------------------------------------------------------------------------

/// Result of a row-locked compare-and-set transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The payment was in one of the expected states and has been moved.
    Applied,
    /// The payment had already reached a terminal state; nothing was done.
    /// Benign under concurrent invocation and never shown to the user.
    AlreadyFinal,
    /// The payment was in a non-terminal state outside the expected set;
    /// nothing was done.
    Unchanged,
}

/// Result of a row-locked confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// This caller won the transition to `Confirmed`.
    Confirmed,
    /// Another caller confirmed first; the benign race outcome.
    AlreadyConfirmed,
    /// The payment was already failed or canceled; nothing was done.
    AlreadyFinal,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("payment {0} not found")]
    NotFound(PaymentId),

    /// The hosting system's capacity/quota check rejected the confirmation.
    /// Triggers the compensating refund path in the reconciler.
    #[error("capacity exhausted for payment {payment}: {message}")]
    CapacityExceeded { payment: PaymentId, message: String },

    #[error("storage backend error: {message}")]
    Backend { message: String, retryable: bool },
}

impl StoreError {
    pub fn backend(message: impl Into<String>, retryable: bool) -> Self {
        StoreError::Backend {
            message: message.into(),
            retryable,
        }
    }
}

// ---------------------------------------------------------------------------
// Store interface
// ---------------------------------------------------------------------------

/// Narrow persistence interface consumed by the reconciler.
///
/// `transition`, `confirm` and `next_attempt` must serialize per payment:
/// acquire an exclusive lock on the row, re-read the freshest state, decide,
/// write, release. The lock must never be held across a network call; the
/// reconciler issues gateway requests only outside these methods.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Load a snapshot without locking.
    async fn load(&self, id: &PaymentId) -> StoreResult<PaymentRecord>;

    /// Row-locked compare-and-set: if the freshest state is in `from`, move
    /// it to `to`. A terminal row reports `AlreadyFinal` without writing,
    /// except when the transition itself targets leaving `Confirmed` (the
    /// engine's compensating revert, which names `Confirmed` in `from`).
    async fn transition(
        &self,
        id: &PaymentId,
        from: &[PaymentState],
        to: PaymentState,
    ) -> StoreResult<TransitionOutcome>;

    /// Row-locked confirmation: re-reads the freshest state, returns
    /// `AlreadyConfirmed` for a confirmed row, runs the hosting system's
    /// capacity check and moves Created/Pending to `Confirmed`. A failed
    /// capacity check surfaces as [`StoreError::CapacityExceeded`] and
    /// leaves the row untouched.
    async fn confirm(&self, id: &PaymentId) -> StoreResult<ConfirmOutcome>;

    /// Atomically advance the persisted redirect counter and return the
    /// attempt number to use for the new redirect (starting at 0). Called
    /// exactly once per new redirect issuance, never on status polls, so the
    /// code used for capture/void stays in sync with the one used at
    /// initiation.
    async fn next_attempt(&self, id: &PaymentId) -> StoreResult<u32>;

    /// Payments still inside the reconcilable window: non-terminal state and
    /// younger than `max_age`. Bounded by `limit` to cap sweep cost.
    async fn outstanding(
        &self,
        max_age: chrono::Duration,
        limit: i64,
    ) -> StoreResult<Vec<PaymentRecord>>;
}
