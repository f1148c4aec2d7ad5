//! Request/response types for the OTP endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct RequestCodeRequest {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RequestCodeResponse {
    pub success: bool,
    pub message: String,
    /// Seconds until the code expires.
    pub expires_in: u64,
    /// Seconds before another code may be requested.
    pub resend_after: u64,
    pub method: String,
    /// Only present when debug codes are enabled.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub debug_code: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct VerifyCodeRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub otp: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VerifyCodeResponse {
    pub success: bool,
    pub message: String,
    pub verification_token: String,
    pub verified: bool,
    /// Seconds until the verification token expires.
    pub expires_in: u64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct TokenCheckRequest {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenCheckResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub remaining_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
            remaining_attempts: None,
            retry_after: None,
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    #[must_use]
    pub fn with_remaining_attempts(mut self, remaining_attempts: u32) -> Self {
        self.remaining_attempts = Some(remaining_attempts);
        self
    }

    #[must_use]
    pub fn with_retry_after(mut self, retry_after: u64) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}
