//! Request metadata helpers shared by the OTP handlers.

use crate::otp::Provenance;
use axum::http::{HeaderMap, header::USER_AGENT};
use std::net::{IpAddr, SocketAddr};

const MAX_USER_AGENT_LEN: usize = 512;

/// How the client address is derived for rate limiting and provenance.
#[derive(Clone, Copy, Debug)]
pub struct ClientAddressPolicy {
    trust_forwarded_headers: bool,
}

impl ClientAddressPolicy {
    #[must_use]
    pub fn new(trust_forwarded_headers: bool) -> Self {
        Self {
            trust_forwarded_headers,
        }
    }

    #[must_use]
    pub fn trust_forwarded_headers(&self) -> bool {
        self.trust_forwarded_headers
    }

    /// Forwarded headers first (when trusted), then the socket peer.
    #[must_use]
    pub fn resolve(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
        if self.trust_forwarded_headers {
            if let Some(forwarded) = extract_client_ip(headers) {
                return Some(forwarded);
            }
        }
        peer.map(|addr| addr.ip().to_string())
    }
}

/// Socket peer only.
impl Default for ClientAddressPolicy {
    fn default() -> Self {
        Self::new(false)
    }
}

/// First `X-Forwarded-For` entry, else `X-Real-IP`.
pub(super) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(super) fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    let agent = headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())?;
    Some(agent.chars().take(MAX_USER_AGENT_LEN).collect())
}

/// Addresses that do not parse as IPs are kept out of storage.
pub(super) fn provenance(client_address: Option<&str>, headers: &HeaderMap) -> Provenance {
    Provenance {
        client_address: client_address.and_then(|value| value.parse::<IpAddr>().ok()),
        client_agent: extract_user_agent(headers),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extract_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn extract_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("9.9.9.9".to_string()));
    }

    #[test]
    fn extract_client_ip_none_when_missing() {
        assert_eq!(extract_client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn policy_uses_peer_when_headers_untrusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        let peer: SocketAddr = ([10, 0, 0, 7], 4321).into();

        let trusted = ClientAddressPolicy::new(true);
        assert_eq!(trusted.resolve(&headers, Some(peer)), Some("1.2.3.4".to_string()));
        assert_eq!(trusted.resolve(&HeaderMap::new(), Some(peer)), Some("10.0.0.7".to_string()));

        let untrusted = ClientAddressPolicy::default();
        assert!(!untrusted.trust_forwarded_headers());
        assert_eq!(untrusted.resolve(&headers, Some(peer)), Some("10.0.0.7".to_string()));
        assert_eq!(untrusted.resolve(&headers, None), None);
    }

    #[test]
    fn user_agent_is_truncated() {
        let mut headers = HeaderMap::new();
        let long = "a".repeat(MAX_USER_AGENT_LEN + 100);
        if let Ok(value) = HeaderValue::from_str(&long) {
            headers.insert(USER_AGENT, value);
        }
        assert_eq!(
            extract_user_agent(&headers).map(|agent| agent.len()),
            Some(MAX_USER_AGENT_LEN)
        );
    }

    #[test]
    fn provenance_drops_unparseable_address() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("test-agent"));

        let parsed = provenance(Some("2001:db8::1"), &headers);
        assert!(parsed.client_address.is_some());
        assert_eq!(parsed.client_agent.as_deref(), Some("test-agent"));

        let garbage = provenance(Some("not-an-ip"), &HeaderMap::new());
        assert!(garbage.client_address.is_none());
        assert!(garbage.client_agent.is_none());
    }
}
