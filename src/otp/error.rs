use thiserror::Error;

/// Failures from the code store or its backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("hashing failed: {0:#}")]
    Hashing(#[source] anyhow::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("record kept changing during verification")]
    Contention,
}

/// Input problems that are safe to echo back to the caller.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing payload")]
    MissingPayload,
    #[error("Email is required")]
    MissingEmail,
    #[error("Email is too long")]
    EmailTooLong,
    #[error("Invalid email address")]
    InvalidEmail,
    #[error("Email domain is not allowed")]
    BlockedDomain,
    #[error("Verification code is required")]
    MissingOtp,
    #[error("Verification code must be {0} digits")]
    InvalidOtpFormat(usize),
}

impl ValidationError {
    /// Stable machine-readable code returned alongside the message.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingPayload => "INVALID_REQUEST",
            Self::MissingEmail | Self::EmailTooLong | Self::InvalidEmail => "INVALID_EMAIL",
            Self::BlockedDomain => "EMAIL_BLOCKED",
            Self::MissingOtp | Self::InvalidOtpFormat(_) => "INVALID_OTP_FORMAT",
        }
    }
}

#[derive(Debug, Error)]
pub enum OtpError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("no pending verification code")]
    NotFound,
    #[error("verification code expired")]
    Expired,
    #[error("too many failed attempts")]
    AttemptsExhausted,
    #[error("verification code mismatch, {remaining_attempts} attempts left")]
    Mismatch { remaining_attempts: u32 },
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
    #[error("email delivery failed: {0:#}")]
    Delivery(#[source] anyhow::Error),
    #[error("internal error: {0:#}")]
    Internal(#[source] anyhow::Error),
}

impl OtpError {
    /// True for failures caused by the service rather than the caller.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Delivery(_) | Self::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_codes_are_stable() {
        assert_eq!(ValidationError::MissingPayload.code(), "INVALID_REQUEST");
        assert_eq!(ValidationError::MissingEmail.code(), "INVALID_EMAIL");
        assert_eq!(ValidationError::EmailTooLong.code(), "INVALID_EMAIL");
        assert_eq!(ValidationError::InvalidEmail.code(), "INVALID_EMAIL");
        assert_eq!(ValidationError::BlockedDomain.code(), "EMAIL_BLOCKED");
        assert_eq!(ValidationError::MissingOtp.code(), "INVALID_OTP_FORMAT");
        assert_eq!(
            ValidationError::InvalidOtpFormat(6).code(),
            "INVALID_OTP_FORMAT"
        );
    }

    #[test]
    fn otp_format_message_names_length() {
        assert_eq!(
            ValidationError::InvalidOtpFormat(6).to_string(),
            "Verification code must be 6 digits"
        );
    }

    #[test]
    fn internal_classification() {
        assert!(OtpError::Storage(StoreError::Contention).is_internal());
        assert!(OtpError::Delivery(anyhow::anyhow!("smtp down")).is_internal());
        assert!(!OtpError::NotFound.is_internal());
        assert!(!OtpError::RateLimited { retry_after_secs: 5 }.is_internal());
        assert!(!OtpError::from(ValidationError::InvalidEmail).is_internal());
    }
}
