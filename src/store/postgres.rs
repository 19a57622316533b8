//! PostgreSQL store adapter.
//!
//! The row lock required by the reconciler maps directly onto
//! `SELECT … FOR UPDATE` inside a transaction: the freshest state is
//! re-read under the lock, the decision is made, the row is written and the
//! transaction commits. The capacity check runs inside the lock but is a
//! local host call; no network request ever happens while a row is locked.

use crate::host::CapacityCheck;
use crate::store::{
    ConfirmOutcome, PaymentId, PaymentRecord, PaymentState, PaymentStore, StoreError, StoreResult,
    TransitionOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::sync::Arc;

pub struct PgPaymentStore {
    pool: PgPool,
    capacity: Arc<dyn CapacityCheck>,
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: String,
    state: String,
    amount_minor: i64,
    attempts: i32,
    created_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_record(self) -> StoreResult<PaymentRecord> {
        let state = PaymentState::from_db_str(&self.state).ok_or_else(|| {
            StoreError::backend(format!("unknown payment state {:?}", self.state), false)
        })?;
        Ok(PaymentRecord {
            id: PaymentId::new(self.id),
            state,
            amount_minor: self.amount_minor.max(0) as u64,
            attempts: self.attempts.max(0) as u32,
            created_at: self.created_at,
        })
    }
}

fn from_sqlx(e: sqlx::Error) -> StoreError {
    let retryable = matches!(e, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut);
    StoreError::backend(e.to_string(), retryable)
}

const SELECT_COLUMNS: &str = "id, state, amount_minor, attempts, created_at";

impl PgPaymentStore {
    pub fn new(pool: PgPool, capacity: Arc<dyn CapacityCheck>) -> Self {
        Self { pool, capacity }
    }

    /// Lock one row and return its freshest snapshot.
    async fn lock_row(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: &PaymentId,
    ) -> StoreResult<PaymentRecord> {
        let row: Option<PaymentRow> = sqlx::query_as(
            "SELECT id, state, amount_minor, attempts, created_at
             FROM gateway_payments WHERE id = $1 FOR UPDATE",
        )
        .bind(id.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(from_sqlx)?;

        row.ok_or_else(|| StoreError::NotFound(id.clone()))?.into_record()
    }

    async fn write_state(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: &PaymentId,
        state: PaymentState,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE gateway_payments SET state = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_str())
            .bind(state.as_db_str())
            .execute(&mut **tx)
            .await
            .map_err(from_sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn load(&self, id: &PaymentId) -> StoreResult<PaymentRecord> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM gateway_payments WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;

        row.ok_or_else(|| StoreError::NotFound(id.clone()))?.into_record()
    }

    async fn transition(
        &self,
        id: &PaymentId,
        from: &[PaymentState],
        to: PaymentState,
    ) -> StoreResult<TransitionOutcome> {
        let mut tx = self.pool.begin().await.map_err(from_sqlx)?;
        let record = self.lock_row(&mut tx, id).await?;

        let outcome = if from.contains(&record.state) {
            self.write_state(&mut tx, id, to).await?;
            TransitionOutcome::Applied
        } else if record.state.is_terminal() {
            TransitionOutcome::AlreadyFinal
        } else {
            TransitionOutcome::Unchanged
        };

        tx.commit().await.map_err(from_sqlx)?;
        Ok(outcome)
    }

    async fn confirm(&self, id: &PaymentId) -> StoreResult<ConfirmOutcome> {
        let mut tx = self.pool.begin().await.map_err(from_sqlx)?;
        let record = self.lock_row(&mut tx, id).await?;

        let outcome = match record.state {
            PaymentState::Confirmed => ConfirmOutcome::AlreadyConfirmed,
            PaymentState::Failed | PaymentState::Canceled => ConfirmOutcome::AlreadyFinal,
            PaymentState::Created | PaymentState::Pending => {
                // Dropping the transaction on the error path releases the
                // lock and leaves the row untouched.
                self.capacity
                    .reserve(&record)
                    .await
                    .map_err(|message| StoreError::CapacityExceeded {
                        payment: id.clone(),
                        message,
                    })?;
                self.write_state(&mut tx, id, PaymentState::Confirmed).await?;
                ConfirmOutcome::Confirmed
            }
        };

        tx.commit().await.map_err(from_sqlx)?;
        Ok(outcome)
    }

    async fn next_attempt(&self, id: &PaymentId) -> StoreResult<u32> {
        let attempts: Option<(i32,)> = sqlx::query_as(
            "UPDATE gateway_payments SET attempts = attempts + 1, updated_at = NOW()
             WHERE id = $1 RETURNING attempts",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;

        let (attempts,) = attempts.ok_or_else(|| StoreError::NotFound(id.clone()))?;
        Ok((attempts - 1).max(0) as u32)
    }

    async fn outstanding(
        &self,
        max_age: chrono::Duration,
        limit: i64,
    ) -> StoreResult<Vec<PaymentRecord>> {
        let cutoff = Utc::now() - max_age;
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM gateway_payments
             WHERE state IN ('created', 'pending') AND created_at >= $1
             ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(from_sqlx)?;

        rows.into_iter().map(PaymentRow::into_record).collect()
    }
}
