use super::OtpBackend;
use crate::otp::error::StoreError;
use crate::otp::models::{IssuanceStats, OtpRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Process-local backend for development and tests. Records are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<Uuid, OtpRecord>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl OtpBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert_superseding(&self, record: OtpRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        records
            .values_mut()
            .filter(|existing| existing.email == record.email && !existing.verified)
            .for_each(|existing| existing.superseded = true);
        records.insert(record.id, record);
        Ok(())
    }

    async fn latest_candidate(&self, email: &str) -> Result<Option<OtpRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|record| record.email == email && !record.verified && !record.superseded)
            .max_by_key(|record| record.created_at)
            .cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.records.lock().await.remove(&id).is_some())
    }

    async fn retire(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        match records.get_mut(&id) {
            Some(record) if !record.verified && !record.superseded => {
                record.superseded = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_failure(&self, id: Uuid, expected_attempts: u32) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        match records.get_mut(&id) {
            Some(record) if !record.verified && record.attempts == expected_attempts => {
                record.attempts = record.attempts.saturating_add(1);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_verified(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        match records.get_mut(&id) {
            Some(record) if !record.verified && !record.superseded => {
                record.verified = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_stale(
        &self,
        email: Option<&str>,
        now_ms: i64,
        max_attempts: u32,
        created_before: i64,
    ) -> Result<u64, StoreError> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| {
            let in_scope = email.map_or(true, |email| record.email == email);
            let stale =
                record.created_at < created_before && !record.is_active(now_ms, max_attempts);
            !(in_scope && stale)
        });
        Ok(u64::try_from(before - records.len()).unwrap_or(u64::MAX))
    }

    async fn issuance_stats(
        &self,
        email: &str,
        since_ms: i64,
    ) -> Result<IssuanceStats, StoreError> {
        let records = self.records.lock().await;
        let created: Vec<i64> = records
            .values()
            .filter(|record| record.email == email && record.created_at >= since_ms)
            .map(|record| record.created_at)
            .collect();

        Ok(IssuanceStats {
            count: u64::try_from(created.len()).unwrap_or(u64::MAX),
            first_request_at: created.iter().min().copied(),
            last_request_at: created.iter().max().copied(),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
