//! In-memory store adapter.
//!
//! One tokio mutex per record plays the role of the database row lock: a
//! transition holds the record's mutex for the whole read-decide-write
//! sequence, so concurrent return handling and sweeping serialize exactly as
//! they would against the SQL adapter. Used by the test-suite and by hosts
//! that keep payment state elsewhere.

use crate::host::{CapacityCheck, UnlimitedCapacity};
use crate::store::{
    ConfirmOutcome, PaymentId, PaymentRecord, PaymentState, PaymentStore, StoreError, StoreResult,
    TransitionOutcome,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub struct MemoryStore {
    records: RwLock<HashMap<PaymentId, Arc<Mutex<PaymentRecord>>>>,
    capacity: Arc<dyn CapacityCheck>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity_check(Arc::new(UnlimitedCapacity))
    }

    pub fn with_capacity_check(capacity: Arc<dyn CapacityCheck>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Seed a fresh payment in `Created` state and return its snapshot.
    pub async fn insert(&self, id: PaymentId, amount_minor: u64) -> PaymentRecord {
        let record = PaymentRecord {
            id: id.clone(),
            state: PaymentState::Created,
            amount_minor,
            attempts: 0,
            created_at: Utc::now(),
        };
        self.records
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(record.clone())));
        record
    }

    async fn entry(&self, id: &PaymentId) -> StoreResult<Arc<Mutex<PaymentRecord>>> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn load(&self, id: &PaymentId) -> StoreResult<PaymentRecord> {
        let entry = self.entry(id).await?;
        let record = entry.lock().await;
        Ok(record.clone())
    }

    async fn transition(
        &self,
        id: &PaymentId,
        from: &[PaymentState],
        to: PaymentState,
    ) -> StoreResult<TransitionOutcome> {
        let entry = self.entry(id).await?;
        let mut record = entry.lock().await;

        if from.contains(&record.state) {
            record.state = to;
            Ok(TransitionOutcome::Applied)
        } else if record.state.is_terminal() {
            Ok(TransitionOutcome::AlreadyFinal)
        } else {
            Ok(TransitionOutcome::Unchanged)
        }
    }

    async fn confirm(&self, id: &PaymentId) -> StoreResult<ConfirmOutcome> {
        let entry = self.entry(id).await?;
        let mut record = entry.lock().await;

        match record.state {
            PaymentState::Confirmed => Ok(ConfirmOutcome::AlreadyConfirmed),
            PaymentState::Failed | PaymentState::Canceled => Ok(ConfirmOutcome::AlreadyFinal),
            PaymentState::Created | PaymentState::Pending => {
                self.capacity
                    .reserve(&record)
                    .await
                    .map_err(|message| StoreError::CapacityExceeded {
                        payment: id.clone(),
                        message,
                    })?;
                record.state = PaymentState::Confirmed;
                Ok(ConfirmOutcome::Confirmed)
            }
        }
    }

    async fn next_attempt(&self, id: &PaymentId) -> StoreResult<u32> {
        let entry = self.entry(id).await?;
        let mut record = entry.lock().await;
        let attempt = record.attempts;
        record.attempts += 1;
        Ok(attempt)
    }

    async fn outstanding(
        &self,
        max_age: chrono::Duration,
        limit: i64,
    ) -> StoreResult<Vec<PaymentRecord>> {
        let cutoff = Utc::now() - max_age;
        let entries: Vec<_> = self.records.read().await.values().cloned().collect();

        let mut result = Vec::new();
        for entry in entries {
            let record = entry.lock().await;
            if !record.state.is_terminal() && record.created_at >= cutoff {
                result.push(record.clone());
            }
        }
        result.sort_by_key(|r| r.created_at);
        result.truncate(limit.max(0) as usize);
        Ok(result)
    }
}
