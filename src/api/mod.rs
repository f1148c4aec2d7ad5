use crate::{
    api::handlers::{
        health,
        otp::{ClientAddressPolicy, ErrorResponse},
    },
    otp::{OtpService, maintenance::spawn_maintenance_worker},
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Json, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request, StatusCode,
        header::{
            ALLOW, CACHE_CONTROL, CONTENT_TYPE, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS,
            X_FRAME_OPTIONS,
        },
    },
    middleware,
    response::{IntoResponse, Response},
    routing::options,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::{SetRequestHeaderLayer, SetResponseHeaderLayer},
    trace::TraceLayer,
};
use tracing::{Span, error, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

pub mod email;
pub mod handlers;
mod openapi;

pub use openapi::openapi;

pub const SWAGGER_UI_PATH: &str = "/swagger-ui";
pub const OPENAPI_JSON_PATH: &str = "/api-docs/openapi.json";

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// HTTP surface settings that are not part of the OTP policy.
#[derive(Clone, Debug)]
pub struct HttpConfig {
    allowed_origin: Option<String>,
    trust_forwarded_headers: bool,
}

impl HttpConfig {
    /// Any origin, client address taken from the socket peer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            allowed_origin: None,
            trust_forwarded_headers: false,
        }
    }

    /// Restrict CORS to a single frontend origin.
    #[must_use]
    pub fn with_allowed_origin(mut self, allowed_origin: String) -> Self {
        self.allowed_origin = Some(allowed_origin);
        self
    }

    /// Read the client address from forwarded headers. Enable only behind a
    /// proxy that overwrites them.
    #[must_use]
    pub fn with_trust_forwarded_headers(mut self, trust_forwarded_headers: bool) -> Self {
        self.trust_forwarded_headers = trust_forwarded_headers;
        self
    }

    #[must_use]
    pub fn allowed_origin(&self) -> Option<&str> {
        self.allowed_origin.as_deref()
    }

    #[must_use]
    pub fn trust_forwarded_headers(&self) -> bool {
        self.trust_forwarded_headers
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble the routed application with middleware and shared state.
/// # Errors
/// Returns an error if the configured origin is not a valid URL.
pub fn app(service: Arc<OtpService>, http: &HttpConfig) -> Result<Router> {
    let allow_origin = match http.allowed_origin() {
        Some(origin) => AllowOrigin::exact(frontend_origin(origin)?),
        None => AllowOrigin::from(Any),
    };
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_origin(allow_origin);

    let (router, openapi) = router().split_for_parts();
    let app = router
        .route("/health", options(health::health))
        .merge(SwaggerUi::new(SWAGGER_UI_PATH).url(OPENAPI_JSON_PATH, openapi))
        .layer(middleware::map_response(method_not_allowed_json))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(SetResponseHeaderLayer::overriding(
                    X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    REFERRER_POLICY,
                    HeaderValue::from_static("no-referrer"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    CACHE_CONTROL,
                    HeaderValue::from_static("no-store"),
                ))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(ClientAddressPolicy::new(
                    http.trust_forwarded_headers(),
                )))
                .layer(Extension(service)),
        );

    Ok(app)
}

/// Start the server and the maintenance worker.
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    service: Arc<OtpService>,
    http: HttpConfig,
    maintenance_interval: Duration,
) -> Result<()> {
    let app = app(service.clone(), &http)?;

    let maintenance = spawn_maintenance_worker(service, maintenance_interval);

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    maintenance.abort();

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Gracefully shutdown"),
        Err(err) => {
            error!("Failed to listen for shutdown signal: {err}");
            std::future::pending::<()>().await;
        }
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// Replace axum's empty 405 body with the JSON error shape, keeping `Allow`.
async fn method_not_allowed_json(response: Response) -> Response {
    if response.status() != StatusCode::METHOD_NOT_ALLOWED {
        return response;
    }

    let allow = response.headers().get(ALLOW).cloned();
    let mut json = (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ErrorResponse::new("Method not allowed")),
    )
        .into_response();
    if let Some(allow) = allow {
        json.headers_mut().insert(ALLOW, allow);
    }
    json
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn frontend_origin_strips_path() {
        let origin = frontend_origin("https://fans.example.com:8443/subscribe?x=1").unwrap();
        assert_eq!(origin, "https://fans.example.com:8443");

        let origin = frontend_origin("https://fans.example.com/").unwrap();
        assert_eq!(origin, "https://fans.example.com");
    }

    #[test]
    fn frontend_origin_rejects_garbage() {
        assert!(frontend_origin("not a url").is_err());
        assert!(frontend_origin("mailto:fan@example.com").is_err());
    }

    #[test]
    fn http_config_defaults() {
        let config = HttpConfig::default();
        assert!(config.allowed_origin().is_none());
        assert!(!config.trust_forwarded_headers());

        let config = HttpConfig::new()
            .with_allowed_origin("https://fans.example.com".to_string())
            .with_trust_forwarded_headers(true);
        assert_eq!(config.allowed_origin(), Some("https://fans.example.com"));
        assert!(config.trust_forwarded_headers());
    }

    #[tokio::test]
    async fn non_method_not_allowed_passes_through() {
        let response = StatusCode::NO_CONTENT.into_response();
        let mapped = method_not_allowed_json(response).await;
        assert_eq!(mapped.status(), StatusCode::NO_CONTENT);
        assert!(mapped.headers().get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn app_rejects_invalid_origin() {
        let (service, _clock) = handlers::otp::test_support::service();
        let http = HttpConfig::new().with_allowed_origin("::nope".to_string());
        assert!(app(service, &http).is_err());
    }
}
