//! Email delivery abstractions.
//!
//! Issuing a code hands an `EmailMessage` to an `EmailSender` and waits for
//! the result: a failed delivery means the caller never got the code, so the
//! stored record is discarded and the request fails.
//!
//! - `LogEmailSender` logs the message and returns `Ok(())`; it is the default
//!   when no delivery API is configured. The payload (which contains the code)
//!   is only logged at debug level.
//! - `HttpEmailSender` posts the message as JSON to a transactional email API
//!   with a bearer key and a client timeout.
use crate::APP_USER_AGENT;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

pub const DEFAULT_FROM_ADDRESS: &str = "no-reply@fanpermit.dev";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const OTP_TEMPLATE: &str = "otp_code";

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub subject: String,
    pub template: String,
    pub payload_json: String,
}

impl EmailMessage {
    /// Message carrying a verification code.
    #[must_use]
    pub fn verification_code(to_email: &str, code: &str, ttl: Duration, brand: &str) -> Self {
        let payload = json!({
            "code": code,
            "expires_in_minutes": ttl.as_secs().div_ceil(60),
            "brand": brand,
        });

        Self {
            to_email: to_email.to_string(),
            subject: format!("Your {brand} verification code"),
            template: OTP_TEMPLATE.to_string(),
            payload_json: payload.to_string(),
        }
    }
}

/// Email delivery abstraction.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error so the caller can compensate.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the message instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            "email send stub"
        );
        debug!(payload = %message.payload_json, "email send stub payload");
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    api_url: Option<Url>,
    api_key: Option<SecretString>,
    from_address: String,
    timeout: Duration,
}

impl EmailConfig {
    /// Default config: log-only delivery, 10s HTTP timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_url: None,
            api_key: None,
            from_address: DEFAULT_FROM_ADDRESS.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_api_url(mut self, api_url: Url) -> Self {
        self.api_url = Some(api_url);
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    #[must_use]
    pub fn with_from_address(mut self, from_address: String) -> Self {
        self.from_address = from_address;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn api_url(&self) -> Option<&Url> {
        self.api_url.as_ref()
    }

    #[must_use]
    pub fn from_address(&self) -> &str {
        &self.from_address
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Pick the sender for this config: HTTP when an API URL is set, log otherwise.
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn build_sender(&self) -> Result<Arc<dyn EmailSender>> {
        match &self.api_url {
            Some(url) => Ok(Arc::new(HttpEmailSender::new(
                url.clone(),
                self.api_key.clone(),
                self.from_address.clone(),
                self.timeout,
            )?)),
            None => Ok(Arc::new(LogEmailSender)),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Sender for JSON transactional email APIs.
#[derive(Clone, Debug)]
pub struct HttpEmailSender {
    client: Client,
    url: Url,
    api_key: Option<SecretString>,
    from_address: String,
}

impl HttpEmailSender {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        url: Url,
        api_key: Option<SecretString>,
        from_address: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build email HTTP client")?;

        Ok(Self {
            client,
            url,
            api_key,
            from_address,
        })
    }

    fn request_body(&self, message: &EmailMessage) -> Result<Value> {
        let data: Value =
            serde_json::from_str(&message.payload_json).context("Invalid email payload JSON")?;

        Ok(json!({
            "from": self.from_address,
            "to": message.to_email,
            "subject": message.subject,
            "template": message.template,
            "data": data,
        }))
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    #[instrument(skip(self, message), fields(template = %message.template))]
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let mut request = self.client.post(self.url.clone()).json(&self.request_body(message)?);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .context("Email API request failed")?;

        let status = response.status();
        if status.is_success() {
            debug!(%status, "email accepted");
            Ok(())
        } else {
            Err(anyhow!("Email API returned {status}"))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn verification_message_contents() {
        let message = EmailMessage::verification_code(
            "fan@example.com",
            "012345",
            Duration::from_secs(300),
            "Fan-Permit",
        );
        assert_eq!(message.to_email, "fan@example.com");
        assert_eq!(message.subject, "Your Fan-Permit verification code");
        assert_eq!(message.template, OTP_TEMPLATE);

        let payload: Value = serde_json::from_str(&message.payload_json).unwrap();
        assert_eq!(payload["code"], "012345");
        assert_eq!(payload["expires_in_minutes"], 5);
        assert_eq!(payload["brand"], "Fan-Permit");
    }

    #[test]
    fn expiry_minutes_round_up() {
        let message =
            EmailMessage::verification_code("a@b.co", "1", Duration::from_secs(61), "Brand");
        let payload: Value = serde_json::from_str(&message.payload_json).unwrap();
        assert_eq!(payload["expires_in_minutes"], 2);
    }

    #[tokio::test]
    async fn log_sender_succeeds() {
        let message =
            EmailMessage::verification_code("a@b.co", "123456", DEFAULT_TIMEOUT, "Brand");
        assert!(LogEmailSender.send(&message).await.is_ok());
    }

    #[test]
    fn config_defaults() {
        let config = EmailConfig::default();
        assert!(config.api_url().is_none());
        assert_eq!(config.from_address(), DEFAULT_FROM_ADDRESS);
        assert_eq!(config.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn http_request_body_wraps_payload() {
        let sender = HttpEmailSender::new(
            Url::parse("https://mail.example.com/send").unwrap(),
            None,
            "from@example.com".to_string(),
            DEFAULT_TIMEOUT,
        )
        .unwrap();
        let message =
            EmailMessage::verification_code("to@example.com", "123456", DEFAULT_TIMEOUT, "Brand");

        let body = sender.request_body(&message).unwrap();
        assert_eq!(body["from"], "from@example.com");
        assert_eq!(body["to"], "to@example.com");
        assert_eq!(body["template"], OTP_TEMPLATE);
        assert_eq!(body["data"]["code"], "123456");
    }

    #[tokio::test]
    async fn http_sender_reports_unreachable_api() {
        let sender = HttpEmailSender::new(
            Url::parse("http://127.0.0.1:9/send").unwrap(),
            Some(SecretString::from("key")),
            DEFAULT_FROM_ADDRESS.to_string(),
            Duration::from_secs(2),
        )
        .unwrap();
        let message =
            EmailMessage::verification_code("to@example.com", "123456", DEFAULT_TIMEOUT, "Brand");

        assert!(sender.send(&message).await.is_err());
    }

    #[test]
    fn build_sender_without_url_is_log_sender() {
        assert!(EmailConfig::new().build_sender().is_ok());
        let http = EmailConfig::new()
            .with_api_url(Url::parse("https://mail.example.com/send").unwrap())
            .with_api_key(SecretString::from("key"))
            .with_from_address("from@example.com".to_string());
        assert!(http.build_sender().is_ok());
    }
}
