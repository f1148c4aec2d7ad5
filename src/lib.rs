//! # Fanpermit (Email OTP verification)
//!
//! `fanpermit` proves that a visitor of the Fan-Permit subscription form
//! controls the email address they typed, before the form is submitted.
//!
//! ## Flow
//!
//! 1. `POST /v1/otp/request` issues a short numeric code, stores only its
//!    Argon2id hash and emails the code.
//! 2. `POST /v1/otp/verify` checks the code and, on success, returns a signed
//!    verification token.
//! 3. `POST /v1/otp/token` lets the submission step check that token.
//!
//! ## Abuse controls
//!
//! - Issuance is limited per email (window cap plus resend cooldown).
//! - Verification is limited per client address with a lockout.
//! - Each code allows a fixed number of wrong guesses, and a new code
//!   invalidates the previous one.

pub mod api;
pub mod cli;
pub mod otp;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
