//! Signed "this email was verified" assertions.
//!
//! Format: `v1.<base64url(json claims)>.<base64url(hmac-sha256)>`. The MAC
//! covers the encoded payload part. Tokens are bearer credentials until
//! `expires`; there is no server-side revocation list.
use super::clock::{Clock, duration_ms};
use anyhow::{Context, Result, anyhow};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);
const TOKEN_VERSION_V1: &str = "v1";
const MAX_TOKEN_LEN: usize = 2048;
const NONCE_LEN: usize = 16;
const GENERATED_KEY_LEN: usize = 32;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub email: String,
    pub verified: bool,
    pub timestamp: i64,
    pub expires: i64,
    pub nonce: String,
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("email not verified")]
    NotVerified,
}

/// Result of checking a token on behalf of a caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenStatus {
    pub valid: bool,
    pub email: Option<String>,
    pub error: Option<TokenError>,
}

pub struct TokenIssuer {
    key: SecretString,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(key: SecretString, clock: Arc<dyn Clock>) -> Self {
        Self {
            key,
            ttl: DEFAULT_TOKEN_TTL,
            clock,
        }
    }

    /// Issuer with a key that only lives as long as the process.
    /// # Errors
    /// Returns an error if the OS random source fails.
    pub fn with_random_key(clock: Arc<dyn Clock>) -> Result<Self> {
        let mut key = [0u8; GENERATED_KEY_LEN];
        OsRng
            .try_fill_bytes(&mut key)
            .context("Failed to generate token key")?;
        Ok(Self::new(
            SecretString::from(Base64UrlUnpadded::encode_string(&key)),
            clock,
        ))
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(self.key.expose_secret().as_bytes())
            .map_err(|e| anyhow!("invalid token key: {e}"))
    }

    /// Mint a token asserting `email` was verified now.
    /// # Errors
    /// Returns an error if the nonce cannot be generated or claims cannot be encoded.
    pub fn mint(&self, email: &str) -> Result<String> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .context("Failed to generate token nonce")?;

        let timestamp = self.clock.now_ms();
        let claims = TokenClaims {
            email: email.to_string(),
            verified: true,
            timestamp,
            expires: timestamp.saturating_add(duration_ms(self.ttl)),
            nonce: Base64UrlUnpadded::encode_string(&nonce),
        };

        let payload = serde_json::to_vec(&claims).context("Failed to encode token claims")?;
        let payload_part = Base64UrlUnpadded::encode_string(&payload);

        let mut mac = self.mac()?;
        mac.update(payload_part.as_bytes());
        let sig_part = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());

        Ok(format!("{TOKEN_VERSION_V1}.{payload_part}.{sig_part}"))
    }

    /// Check signature, verification flag and expiry.
    /// # Errors
    /// Returns the first check the token fails.
    pub fn decode(&self, token: &str) -> Result<TokenClaims, TokenError> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(TokenError::Malformed);
        }

        let mut parts = token.trim().split('.');
        let (Some(version), Some(payload_part), Some(sig_part), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };
        if version != TOKEN_VERSION_V1 {
            return Err(TokenError::Malformed);
        }

        let signature =
            Base64UrlUnpadded::decode_vec(sig_part).map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac().map_err(|_| TokenError::BadSignature)?;
        mac.update(payload_part.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let payload =
            Base64UrlUnpadded::decode_vec(payload_part).map_err(|_| TokenError::Malformed)?;
        let claims: TokenClaims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;

        if !claims.verified {
            return Err(TokenError::NotVerified);
        }
        if self.clock.now_ms() > claims.expires {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    /// `decode` flattened into a caller-facing status.
    #[must_use]
    pub fn inspect(&self, token: &str) -> TokenStatus {
        match self.decode(token) {
            Ok(claims) => TokenStatus {
                valid: true,
                email: Some(claims.email),
                error: None,
            },
            Err(err) => TokenStatus {
                valid: false,
                email: None,
                error: Some(err),
            },
        }
    }
}
