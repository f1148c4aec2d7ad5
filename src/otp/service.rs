//! Request-code and verify-code orchestration.
//!
//! Flow Overview:
//! 1) `request_code`: validate email -> generate -> issuance limit and store
//!    under one per-email lock (supersedes older codes) -> email. A failed
//!    email discards the record.
//! 2) `verify_code`: validate input -> per-address limit -> store lookup and
//!    comparison -> on success clear the address counter and mint a token.
//!
//! Validation and rate limits run before any storage or hashing work.
use super::clock::Clock;
use super::code::{self, CodeHasher, DEFAULT_CODE_LENGTH, HashParams};
use super::error::{OtpError, StoreError};
use super::models::{Provenance, VerifyOutcome};
use super::rate_limit::{
    IssuanceLimiter, IssuancePolicy, MemoryCounterStore, RateLimitDecision, VerificationLimiter,
    VerificationPolicy,
};
use super::store::{CodeStore, DEFAULT_MAX_ATTEMPTS, Issuance, OtpBackend};
use super::token::{DEFAULT_TOKEN_TTL, TokenIssuer, TokenStatus};
use super::validation::{DomainBlocklist, validate_email, validate_otp};
use crate::api::email::{EmailMessage, EmailSender};
use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_BRAND_NAME: &str = "Fan-Permit";

#[derive(Clone, Debug)]
pub struct OtpConfig {
    code_length: usize,
    code_ttl: Duration,
    max_attempts: u32,
    hash_params: HashParams,
    issuance: IssuancePolicy,
    verification: VerificationPolicy,
    token_ttl: Duration,
    blocklist: DomainBlocklist,
    debug_codes: bool,
    brand_name: String,
}

impl OtpConfig {
    /// Default config: 6 digit codes valid for 5 minutes, 3 attempts,
    /// 30 minute tokens, disposable domains blocked, codes never echoed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            code_length: DEFAULT_CODE_LENGTH,
            code_ttl: DEFAULT_CODE_TTL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            hash_params: HashParams::new(),
            issuance: IssuancePolicy::new(),
            verification: VerificationPolicy::new(),
            token_ttl: DEFAULT_TOKEN_TTL,
            blocklist: DomainBlocklist::disposable(),
            debug_codes: false,
            brand_name: DEFAULT_BRAND_NAME.to_string(),
        }
    }

    #[must_use]
    pub fn with_code_length(mut self, code_length: usize) -> Self {
        self.code_length = code_length;
        self
    }

    #[must_use]
    pub fn with_code_ttl(mut self, code_ttl: Duration) -> Self {
        self.code_ttl = code_ttl;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_hash_params(mut self, hash_params: HashParams) -> Self {
        self.hash_params = hash_params;
        self
    }

    #[must_use]
    pub fn with_issuance_policy(mut self, issuance: IssuancePolicy) -> Self {
        self.issuance = issuance;
        self
    }

    #[must_use]
    pub fn with_verification_policy(mut self, verification: VerificationPolicy) -> Self {
        self.verification = verification;
        self
    }

    #[must_use]
    pub fn with_token_ttl(mut self, token_ttl: Duration) -> Self {
        self.token_ttl = token_ttl;
        self
    }

    #[must_use]
    pub fn with_blocklist(mut self, blocklist: DomainBlocklist) -> Self {
        self.blocklist = blocklist;
        self
    }

    /// Echo generated codes in responses. Development only.
    #[must_use]
    pub fn with_debug_codes(mut self, debug_codes: bool) -> Self {
        self.debug_codes = debug_codes;
        self
    }

    #[must_use]
    pub fn with_brand_name(mut self, brand_name: String) -> Self {
        self.brand_name = brand_name;
        self
    }

    #[must_use]
    pub fn code_length(&self) -> usize {
        self.code_length
    }

    #[must_use]
    pub fn code_ttl(&self) -> Duration {
        self.code_ttl
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn issuance_policy(&self) -> IssuancePolicy {
        self.issuance
    }

    #[must_use]
    pub fn verification_policy(&self) -> VerificationPolicy {
        self.verification
    }

    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    #[must_use]
    pub fn debug_codes(&self) -> bool {
        self.debug_codes
    }

    #[must_use]
    pub fn brand_name(&self) -> &str {
        &self.brand_name
    }

    /// Finished records must outlive both the code and the issuance window
    /// so the issuance limiter can still count them.
    #[must_use]
    pub fn retention(&self) -> Duration {
        self.code_ttl.max(self.issuance.time_window())
    }
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A code was stored and handed to the email sender.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedCode {
    pub email: String,
    pub expires_in_secs: u64,
    pub resend_after_secs: u64,
    pub debug_code: Option<String>,
}

/// The caller proved control of `email`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedEmail {
    pub email: String,
    pub token: String,
    pub expires_in_secs: u64,
}

pub struct OtpService {
    config: OtpConfig,
    store: CodeStore,
    issuance: IssuanceLimiter,
    verification: VerificationLimiter,
    tokens: TokenIssuer,
    sender: Arc<dyn EmailSender>,
}

impl OtpService {
    /// Wire the store, limiters and token issuer from `config`.
    ///
    /// Without `token_key` a random per-process key is used, so tokens stop
    /// validating after a restart.
    /// # Errors
    /// Returns an error if the hash parameters are invalid or key generation fails.
    pub fn new(
        config: OtpConfig,
        backend: Arc<dyn OtpBackend>,
        token_key: Option<SecretString>,
        sender: Arc<dyn EmailSender>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let hasher = CodeHasher::new(config.hash_params)?;
        let store = CodeStore::new(backend, hasher, clock.clone())
            .with_max_attempts(config.max_attempts)
            .with_retention(config.retention());

        let issuance = IssuanceLimiter::new(config.issuance, clock.clone());
        let verification = VerificationLimiter::new(
            config.verification,
            Arc::new(MemoryCounterStore::new()),
            clock.clone(),
        );

        let tokens = match token_key {
            Some(key) => TokenIssuer::new(key, clock),
            None => {
                warn!("No token secret configured, using a random key for this process");
                TokenIssuer::with_random_key(clock)?
            }
        }
        .with_ttl(config.token_ttl);

        Ok(Self {
            config,
            store,
            issuance,
            verification,
            tokens,
            sender,
        })
    }

    #[must_use]
    pub fn config(&self) -> &OtpConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &CodeStore {
        &self.store
    }

    #[must_use]
    pub fn verification_limiter(&self) -> &VerificationLimiter {
        &self.verification
    }

    /// Issue and deliver a new code for `email`.
    /// # Errors
    /// Returns validation, rate limit, storage or delivery errors.
    #[instrument(skip_all)]
    pub async fn request_code(
        &self,
        email: Option<&str>,
        provenance: Provenance,
    ) -> Result<IssuedCode, OtpError> {
        let email = validate_email(email, &self.config.blocklist)?;

        let code = code::generate(self.config.code_length);
        let record_id = match self
            .store
            .issue_if_allowed(
                &email,
                &code,
                self.config.code_ttl,
                provenance,
                &self.issuance,
            )
            .await?
        {
            Issuance::Issued(id) => id,
            Issuance::Limited { retry_after_secs } => {
                return Err(OtpError::RateLimited { retry_after_secs });
            }
        };

        let message = EmailMessage::verification_code(
            &email,
            &code,
            self.config.code_ttl,
            &self.config.brand_name,
        );
        if let Err(err) = self.sender.send(&message).await {
            if let Err(discard_err) = self.store.discard(record_id).await {
                error!("Failed to discard undelivered code {record_id}: {discard_err}");
            }
            return Err(OtpError::Delivery(err));
        }

        info!(email = %email, "verification code sent");

        Ok(IssuedCode {
            email,
            expires_in_secs: self.config.code_ttl.as_secs(),
            resend_after_secs: self.config.issuance.cooldown().as_secs(),
            debug_code: self.config.debug_codes.then_some(code),
        })
    }

    /// Check a submitted code and mint a verification token on success.
    /// # Errors
    /// Returns validation, rate limit, outcome or storage errors.
    #[instrument(skip_all)]
    pub async fn verify_code(
        &self,
        email: Option<&str>,
        otp: Option<&str>,
        client: Option<&str>,
    ) -> Result<VerifiedEmail, OtpError> {
        let email = validate_email(email, &self.config.blocklist)?;
        let otp = validate_otp(otp, self.config.code_length)?;

        if let RateLimitDecision::Limited { retry_after_secs } = self.verification.check(client) {
            return Err(OtpError::RateLimited { retry_after_secs });
        }

        match self.store.verify(&email, &otp).await? {
            VerifyOutcome::Success => {
                self.verification.record_success(client);
                let token = self.tokens.mint(&email).map_err(OtpError::Internal)?;
                info!(email = %email, "email verified");
                Ok(VerifiedEmail {
                    email,
                    token,
                    expires_in_secs: self.tokens.ttl().as_secs(),
                })
            }
            VerifyOutcome::NotFound => Err(OtpError::NotFound),
            VerifyOutcome::Expired => Err(OtpError::Expired),
            VerifyOutcome::AttemptsExhausted => Err(OtpError::AttemptsExhausted),
            VerifyOutcome::Mismatch { remaining_attempts } => {
                Err(OtpError::Mismatch { remaining_attempts })
            }
        }
    }

    /// Validate a verification token presented at form submission.
    #[must_use]
    pub fn inspect_token(&self, token: Option<&str>) -> TokenStatus {
        self.tokens.inspect(token.unwrap_or_default())
    }

    /// # Errors
    /// Returns an error if the storage backend is unreachable.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }
}
