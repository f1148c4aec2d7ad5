use sqlx::{Row, postgres::PgRow};
use std::net::IpAddr;
use uuid::Uuid;

/// Hashed one-time code as persisted by an `OtpBackend`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtpRecord {
    pub id: Uuid,
    pub email: String,
    pub code_hash: String,
    pub salt: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub attempts: u32,
    pub verified: bool,
    /// Replaced by a newer code, or retired after expiry or attempt exhaustion.
    pub superseded: bool,
    pub client_address: Option<IpAddr>,
    pub client_agent: Option<String>,
}

impl OtpRecord {
    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }

    /// Active means it can still be verified: not consumed, not replaced,
    /// not expired and under the attempt limit.
    #[must_use]
    pub fn is_active(&self, now_ms: i64, max_attempts: u32) -> bool {
        !self.verified
            && !self.superseded
            && !self.is_expired(now_ms)
            && self.attempts < max_attempts
    }
}

/// Where an issuance request came from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Provenance {
    pub client_address: Option<IpAddr>,
    pub client_agent: Option<String>,
}

/// Issuance history for one email over a trailing window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IssuanceStats {
    pub count: u64,
    pub first_request_at: Option<i64>,
    pub last_request_at: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    Success,
    NotFound,
    Expired,
    AttemptsExhausted,
    Mismatch { remaining_attempts: u32 },
}

impl<'r> sqlx::FromRow<'r, PgRow> for OtpRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let attempts: i32 = row.try_get("attempts")?;

        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            code_hash: row.try_get("code_hash")?,
            salt: row.try_get("salt")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            attempts: u32::try_from(attempts).unwrap_or(0),
            verified: row.try_get("verified")?,
            superseded: row.try_get("superseded")?,
            client_address: row.try_get("client_address")?,
            client_agent: row.try_get("client_agent")?,
        })
    }
}
