//! Issue a verification code for an email address.

use super::types::{ErrorResponse, RequestCodeRequest, RequestCodeResponse};
use super::utils::{ClientAddressPolicy, provenance};
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
    path = "/v1/otp/request",
    request_body = RequestCodeRequest,
    responses(
        (status = 200, description = "Code sent", body = RequestCodeResponse),
        (status = 400, description = "Invalid or blocked email", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse),
        (status = 500, description = "Code could not be stored or sent", body = ErrorResponse)
    ),
    tag = "otp"
)]
pub async fn request_code(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    service: Extension<Arc<OtpService>>,
    policy: Extension<ClientAddressPolicy>,
    payload: Option<Json<RequestCodeRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return OtpError::from(ValidationError::MissingPayload).into_response();
    };

    let client_address = policy.resolve(&headers, peer.map(|ConnectInfo(addr)| addr));
    let provenance = provenance(client_address.as_deref(), &headers);

    match service
        .request_code(request.email.as_deref(), provenance)
        .await
    {
        Ok(issued) => (
            StatusCode::OK,
            Json(RequestCodeResponse {
                success: true,
                message: "Verification code sent".to_string(),
                expires_in: issued.expires_in_secs,
                resend_after: issued.resend_after_secs,
                method: "email".to_string(),
                debug_code: issued.debug_code,
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}
