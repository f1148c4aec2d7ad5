//! Hashed one-time code persistence.
//!
//! `CodeStore` owns the record lifecycle (issue, verify, discard, cleanup)
//! and delegates raw persistence to an `OtpBackend`. Every operation on an
//! email runs under a per-email lock, and backends apply compare-and-swap
//! updates so several processes sharing one database cannot lose an attempt
//! increment or verify the same record twice.
use super::clock::{Clock, duration_ms};
use super::code::CodeHasher;
use super::error::StoreError;
use super::models::{IssuanceStats, OtpRecord, Provenance, VerifyOutcome};
use super::rate_limit::{IssuanceLimiter, RateLimitDecision};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

mod locks;
mod memory;
mod postgres;

pub use locks::{KeyGuard, KeyedLocks};
pub use memory::MemoryBackend;
pub use postgres::{PgBackend, SCHEMA_SQL};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

// A lost compare-and-swap means another worker touched the record; re-read it a few times.
const MAX_CAS_RETRIES: usize = 5;

/// Raw record persistence. Implementations must make `insert_superseding`
/// atomic and apply the conditional updates only when the stored row still
/// matches the expected state.
#[async_trait]
pub trait OtpBackend: Send + Sync {
    /// Short identifier reported by the health endpoint.
    fn name(&self) -> &'static str;

    /// Flag every unverified record for the email as superseded, then insert `record`.
    async fn insert_superseding(&self, record: OtpRecord) -> Result<(), StoreError>;

    /// Newest unverified, non-superseded record for the email.
    async fn latest_candidate(&self, email: &str) -> Result<Option<OtpRecord>, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Take an unverified record out of lookups while keeping it as issuance history.
    async fn retire(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Increment attempts if they still equal `expected_attempts` and the record is unverified.
    async fn record_failure(&self, id: Uuid, expected_attempts: u32) -> Result<bool, StoreError>;

    /// Set `verified` if the record is still unverified and not superseded.
    async fn mark_verified(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Delete records created before `created_before` that can no longer be verified.
    async fn purge_stale(
        &self,
        email: Option<&str>,
        now_ms: i64,
        max_attempts: u32,
        created_before: i64,
    ) -> Result<u64, StoreError>;

    /// Records created for the email at or after `since_ms`.
    async fn issuance_stats(&self, email: &str, since_ms: i64)
    -> Result<IssuanceStats, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Result of an issuance that was subject to the per-email limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Issuance {
    Issued(Uuid),
    Limited { retry_after_secs: u64 },
}

pub struct CodeStore {
    backend: Arc<dyn OtpBackend>,
    hasher: CodeHasher,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    retention: Duration,
    locks: KeyedLocks,
}

impl CodeStore {
    #[must_use]
    pub fn new(backend: Arc<dyn OtpBackend>, hasher: CodeHasher, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            hasher,
            clock,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retention: DEFAULT_RETENTION,
            locks: KeyedLocks::new(),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// How long finished records are kept as issuance history.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        self.retention
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Replace any pending code for `email` with a freshly hashed one.
    /// # Errors
    /// Returns an error if hashing or persistence fails.
    #[instrument(skip(self, code, provenance))]
    pub async fn issue(
        &self,
        email: &str,
        code: &str,
        ttl: Duration,
        provenance: Provenance,
    ) -> Result<Uuid, StoreError> {
        let _guard = self.locks.lock(email).await;
        self.issue_locked(email, code, ttl, provenance).await
    }

    /// Like `issue`, but only when `limiter` allows another code for `email`.
    /// The check and the insert run under the same per-email lock.
    /// # Errors
    /// Returns an error if hashing or persistence fails.
    #[instrument(skip(self, code, provenance, limiter))]
    pub async fn issue_if_allowed(
        &self,
        email: &str,
        code: &str,
        ttl: Duration,
        provenance: Provenance,
        limiter: &IssuanceLimiter,
    ) -> Result<Issuance, StoreError> {
        let _guard = self.locks.lock(email).await;

        if let RateLimitDecision::Limited { retry_after_secs } = limiter.check(self, email).await {
            return Ok(Issuance::Limited { retry_after_secs });
        }

        self.issue_locked(email, code, ttl, provenance)
            .await
            .map(Issuance::Issued)
    }

    async fn issue_locked(
        &self,
        email: &str,
        code: &str,
        ttl: Duration,
        provenance: Provenance,
    ) -> Result<Uuid, StoreError> {
        if let Err(err) = self.cleanup_expired(Some(email)).await {
            warn!("Failed to clean up stale codes before issuing: {err}");
        }

        let hasher = self.hasher.clone();
        let code = code.to_string();
        let hashed = tokio::task::spawn_blocking(move || hasher.hash(&code))
            .await
            .map_err(|err| StoreError::Hashing(err.into()))?
            .map_err(StoreError::Hashing)?;

        let now = self.clock.now_ms();
        let record = OtpRecord {
            id: Uuid::new_v4(),
            email: email.to_string(),
            code_hash: hashed.code_hash,
            salt: hashed.salt,
            created_at: now,
            expires_at: now.saturating_add(duration_ms(ttl)),
            attempts: 0,
            verified: false,
            superseded: false,
            client_address: provenance.client_address,
            client_agent: provenance.client_agent,
        };
        let id = record.id;

        self.backend.insert_superseding(record).await?;

        debug!(%id, "issued verification code");

        Ok(id)
    }

    /// Check `candidate` against the pending code for `email`.
    /// # Errors
    /// Returns an error on storage failure or persistent write contention.
    #[instrument(skip(self, candidate))]
    pub async fn verify(&self, email: &str, candidate: &str) -> Result<VerifyOutcome, StoreError> {
        let _guard = self.locks.lock(email).await;

        for _ in 0..MAX_CAS_RETRIES {
            let Some(record) = self.backend.latest_candidate(email).await? else {
                return Ok(VerifyOutcome::NotFound);
            };

            // Spent records stay as issuance history until `cleanup_expired`.
            if record.is_expired(self.clock.now_ms()) {
                self.backend.retire(record.id).await?;
                return Ok(VerifyOutcome::Expired);
            }

            if record.attempts >= self.max_attempts {
                self.backend.retire(record.id).await?;
                return Ok(VerifyOutcome::AttemptsExhausted);
            }

            if self.matches(candidate, &record.code_hash).await? {
                if self.backend.mark_verified(record.id).await? {
                    return Ok(VerifyOutcome::Success);
                }
            } else if self
                .backend
                .record_failure(record.id, record.attempts)
                .await?
            {
                let attempts = record.attempts.saturating_add(1);
                return Ok(VerifyOutcome::Mismatch {
                    remaining_attempts: self.max_attempts.saturating_sub(attempts),
                });
            }

            debug!(id = %record.id, "record changed during verification, retrying");
        }

        Err(StoreError::Contention)
    }

    /// Delete a record, used when the code could not be delivered.
    /// # Errors
    /// Returns an error if the backend fails.
    pub async fn discard(&self, id: Uuid) -> Result<bool, StoreError> {
        self.backend.delete(id).await
    }

    /// Remove finished records older than the retention window, for one email or all.
    /// # Errors
    /// Returns an error if the backend fails.
    pub async fn cleanup_expired(&self, email: Option<&str>) -> Result<u64, StoreError> {
        let now = self.clock.now_ms();
        let created_before = now.saturating_sub(duration_ms(self.retention));
        self.backend
            .purge_stale(email, now, self.max_attempts, created_before)
            .await
    }

    /// Issuance history for `email` over the trailing `window`.
    /// # Errors
    /// Returns an error if the backend fails.
    pub async fn rate_limit_info(
        &self,
        email: &str,
        window: Duration,
    ) -> Result<IssuanceStats, StoreError> {
        let since = self.clock.now_ms().saturating_sub(duration_ms(window));
        self.backend.issuance_stats(email, since).await
    }

    /// # Errors
    /// Returns an error if the backend is unreachable.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.backend.ping().await
    }

    async fn matches(&self, candidate: &str, code_hash: &str) -> Result<bool, StoreError> {
        let hasher = self.hasher.clone();
        let candidate = candidate.to_string();
        let code_hash = code_hash.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&candidate, &code_hash))
            .await
            .map_err(|err| StoreError::Hashing(err.into()))?
            .map_err(StoreError::Hashing)
    }
}
