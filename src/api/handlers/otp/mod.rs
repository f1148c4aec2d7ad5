//! OTP endpoints: request a code, verify it, check the resulting token.

pub mod error;
pub mod request;
pub mod token;
pub mod types;
mod utils;
pub mod verify;

pub use types::{
    ErrorResponse, RequestCodeRequest, RequestCodeResponse, TokenCheckRequest,
    TokenCheckResponse, VerifyCodeRequest, VerifyCodeResponse,
};
pub use utils::ClientAddressPolicy;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod test_support {
    use crate::api::email::LogEmailSender;
    use crate::otp::{
        ManualClock, OtpConfig, OtpService, Provenance, code::HashParams, store::MemoryBackend,
    };
    use axum::{body::to_bytes, response::Response};
    use secrecy::SecretString;
    use std::sync::Arc;

    /// Service over an in-memory backend with debug codes and cheap hashing.
    pub(crate) fn service() -> (Arc<OtpService>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let config = OtpConfig::new()
            .with_hash_params(HashParams::new().with_memory_kib(8).with_iterations(1))
            .with_debug_codes(true);
        let service = OtpService::new(
            config,
            Arc::new(MemoryBackend::new()),
            Some(SecretString::from("handler-test-secret")),
            Arc::new(LogEmailSender),
            clock.clone(),
        )
        .unwrap();
        (Arc::new(service), clock)
    }

    pub(crate) async fn issue_code(service: &OtpService, email: &str) -> String {
        service
            .request_code(Some(email), Provenance::default())
            .await
            .unwrap()
            .debug_code
            .unwrap()
    }

    pub(crate) async fn verify(service: &OtpService, email: &str) -> String {
        let code = issue_code(service, email).await;
        service
            .verify_code(Some(email), Some(code.as_str()), None)
            .await
            .unwrap()
            .token
    }

    pub(crate) async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
