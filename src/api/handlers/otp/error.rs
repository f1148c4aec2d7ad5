//! Mapping of service errors to HTTP responses.
//!
//! Caller mistakes get a stable `code`; service failures are logged and
//! answered with a generic message so internal details never leak.

use super::types::ErrorResponse;
use crate::otp::OtpError;
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use tracing::error;

impl OtpError {
    fn status_and_body(&self) -> (StatusCode, ErrorResponse) {
        match self {
            Self::Validation(err) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(err.to_string()).with_code(err.code()),
            ),
            Self::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorResponse::new("Too many requests. Please try again later.")
                    .with_retry_after(*retry_after_secs),
            ),
            Self::NotFound => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("No verification code found. Please request a new code.")
                    .with_code("NOT_FOUND"),
            ),
            Self::Expired => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("Verification code has expired. Please request a new code.")
                    .with_code("EXPIRED"),
            ),
            Self::AttemptsExhausted => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("Too many failed attempts. Please request a new code.")
                    .with_code("TOO_MANY_ATTEMPTS"),
            ),
            Self::Mismatch { remaining_attempts } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("Invalid verification code")
                    .with_code("INVALID_OTP")
                    .with_remaining_attempts(*remaining_attempts),
            ),
            Self::Delivery(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("Failed to send verification code. Please try again."),
            ),
            Self::Storage(_) | Self::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("Verification service error. Please try again."),
            ),
        }
    }
}

impl IntoResponse for OtpError {
    fn into_response(self) -> Response {
        if self.is_internal() {
            error!("OTP request failed: {self}");
        }

        let (status, body) = self.status_and_body();
        let retry_after = body.retry_after;
        let mut response = (status, Json(body)).into_response();

        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::{StoreError, ValidationError};
    use anyhow::Result;
    use axum::body::to_bytes;

    async fn body_of(err: OtpError) -> Result<(StatusCode, Option<String>, ErrorResponse)> {
        let response = err.into_response();
        let status = response.status();
        let retry = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok((status, retry, serde_json::from_slice(&bytes)?))
    }

    #[tokio::test]
    async fn validation_maps_to_bad_request_with_code() -> Result<()> {
        let (status, retry, body) = body_of(ValidationError::BlockedDomain.into()).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(retry, None);
        assert_eq!(body.code.as_deref(), Some("EMAIL_BLOCKED"));
        Ok(())
    }

    #[tokio::test]
    async fn rate_limit_sets_header_and_body() -> Result<()> {
        let (status, retry, body) = body_of(OtpError::RateLimited {
            retry_after_secs: 42,
        })
        .await?;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(retry.as_deref(), Some("42"));
        assert_eq!(body.retry_after, Some(42));
        assert_eq!(body.code, None);
        Ok(())
    }

    #[tokio::test]
    async fn outcome_codes() -> Result<()> {
        for (err, code) in [
            (OtpError::NotFound, "NOT_FOUND"),
            (OtpError::Expired, "EXPIRED"),
            (OtpError::AttemptsExhausted, "TOO_MANY_ATTEMPTS"),
        ] {
            let (status, _, body) = body_of(err).await?;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body.code.as_deref(), Some(code));
        }

        let (_, _, body) = body_of(OtpError::Mismatch {
            remaining_attempts: 1,
        })
        .await?;
        assert_eq!(body.code.as_deref(), Some("INVALID_OTP"));
        assert_eq!(body.remaining_attempts, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn internal_errors_hide_details() -> Result<()> {
        let (status, _, body) =
            body_of(OtpError::Delivery(anyhow::anyhow!("smtp password rejected"))).await?;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.error.contains("smtp"));

        let (status, _, body) = body_of(OtpError::Storage(StoreError::Contention)).await?;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, None);
        Ok(())
    }
}
