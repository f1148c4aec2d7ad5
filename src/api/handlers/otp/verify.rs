//! Check a submitted code and hand out a verification token.

use super::types::{ErrorResponse, VerifyCodeRequest, VerifyCodeResponse};
use super::utils::ClientAddressPolicy;
use crate::otp::{OtpError, OtpService, ValidationError};
use axum::{
    Json,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::{net::SocketAddr, sync::Arc};

#[utoipa::path(
    post,
    path = "/v1/otp/verify",
    request_body = VerifyCodeRequest,
    responses(
        (status = 200, description = "Email verified", body = VerifyCodeResponse),
        (status = 400, description = "Invalid, expired or unknown code", body = ErrorResponse),
        (status = 429, description = "Too many verification attempts", body = ErrorResponse),
        (status = 500, description = "Verification failed", body = ErrorResponse)
    ),
    tag = "otp"
)]
pub async fn verify_code(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    service: Extension<Arc<OtpService>>,
    policy: Extension<ClientAddressPolicy>,
    payload: Option<Json<VerifyCodeRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return OtpError::from(ValidationError::MissingPayload).into_response();
    };

    let client_address = policy.resolve(&headers, peer.map(|ConnectInfo(addr)| addr));

    match service
        .verify_code(
            request.email.as_deref(),
            request.otp.as_deref(),
            client_address.as_deref(),
        )
        .await
    {
        Ok(verified) => (
            StatusCode::OK,
            Json(VerifyCodeResponse {
                success: true,
                message: "Email verified".to_string(),
                verification_token: verified.token,
                verified: true,
                expires_in: verified.expires_in_secs,
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}
