use crate::{GIT_COMMIT_HASH, otp::OtpService};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    store: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Code store is reachable", body = [Health]),
        (status = 503, description = "Code store is unreachable", body = [Health])
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method, service: Extension<Arc<OtpService>>) -> impl IntoResponse {
    let result = match service.ping().await {
        Ok(()) => Ok(()),
        Err(error) => {
            error!("Failed to ping {} store: {}", service.backend_name(), error);

            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: if result.is_ok() {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();

            headers.insert("X-App", x_app_header_value);

            headers
        })
        .map_err(|err| {
            error!("Failed to parse X-App header: {}", err);
        });

    let headers = headers.unwrap_or_else(|()| HeaderMap::new());

    match result {
        Ok(()) => {
            debug!("{} store is healthy", service.backend_name());
            (StatusCode::OK, headers, body)
        }
        Err(status) => (status, headers, body),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::email::LogEmailSender;
    use crate::otp::{OtpConfig, SystemClock, store::PgBackend};
    use axum::body::to_bytes;
    use sqlx::postgres::PgPoolOptions;
    use std::time::Duration;

    #[tokio::test]
    async fn healthy_memory_store() {
        let (service, _clock) = super::super::otp::test_support::service();
        let response = health(Method::GET, Extension(service)).await.into_response();

        assert_eq!(response.status(), StatusCode::OK);
        let x_app = response.headers().get("X-App").unwrap().to_str().unwrap();
        assert!(x_app.starts_with(concat!(
            env!("CARGO_PKG_NAME"),
            ":",
            env!("CARGO_PKG_VERSION")
        )));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["store"], "ok");
        assert_eq!(json["name"], env!("CARGO_PKG_NAME"));
    }

    #[tokio::test]
    async fn options_has_no_body() {
        let (service, _clock) = super::super::otp::test_support::service();
        let response = health(Method::OPTIONS, Extension(service))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn unreachable_database_is_unavailable() {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(500))
            .connect_lazy("postgres://nobody@127.0.0.1:9/fanpermit")
            .unwrap();
        let service = OtpService::new(
            OtpConfig::new(),
            Arc::new(PgBackend::new(pool)),
            None,
            Arc::new(LogEmailSender),
            Arc::new(SystemClock),
        )
        .unwrap();

        let response = health(Method::GET, Extension(Arc::new(service)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["store"], "error");
    }
}
