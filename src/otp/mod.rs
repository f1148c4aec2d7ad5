//! Email one-time password verification core.
//!
//! Codes are numeric, short lived, stored only as Argon2id hashes, and
//! limited both per email (issuance) and per client address (verification).
//! A successful verification yields an HMAC-signed token the form submission
//! step can check without touching storage.

pub mod clock;
pub mod code;
pub mod error;
pub mod maintenance;
pub mod models;
pub mod rate_limit;
pub mod service;
pub mod store;
pub mod token;
pub mod validation;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::error::{OtpError, StoreError, ValidationError};
pub use self::models::{IssuanceStats, OtpRecord, Provenance, VerifyOutcome};
pub use self::service::{IssuedCode, OtpConfig, OtpService, VerifiedEmail};
