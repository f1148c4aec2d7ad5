//! Check a verification token at form submission time.

use super::types::{ErrorResponse, TokenCheckRequest, TokenCheckResponse};
use crate::otp::{OtpError, OtpService, ValidationError};
use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// Always answers 200 for a well-formed request; `valid` carries the verdict.
#[utoipa::path(
    post,
    path = "/v1/otp/token",
    request_body = TokenCheckRequest,
    responses(
        (status = 200, description = "Token checked", body = TokenCheckResponse),
        (status = 400, description = "Missing payload", body = ErrorResponse)
    ),
    tag = "otp"
)]
pub async fn check_token(
    service: Extension<Arc<OtpService>>,
    payload: Option<Json<TokenCheckRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return OtpError::from(ValidationError::MissingPayload).into_response();
    };

    let status = service.inspect_token(request.token.as_deref().map(str::trim));

    (
        StatusCode::OK,
        Json(TokenCheckResponse {
            valid: status.valid,
            email: status.email,
            error: status.error.map(|err| err.to_string()),
        }),
    )
        .into_response()
}
