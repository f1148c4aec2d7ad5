//! Email and code input checks applied before any storage work.

use super::{code, error::ValidationError};
use regex::Regex;
use std::collections::HashSet;

pub const MAX_EMAIL_LENGTH: usize = 254;

/// Throwaway inbox providers rejected unless the operator overrides the list.
pub const DEFAULT_BLOCKED_DOMAINS: &[&str] = &[
    "10minutemail.com",
    "guerrillamail.com",
    "mailinator.com",
    "tempmail.com",
    "throwaway.email",
    "trashmail.com",
    "yopmail.com",
];

/// Normalize user-supplied email addresses for consistent lookups.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

/// Lower-cased set of email domains that may not request codes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainBlocklist {
    domains: HashSet<String>,
}

impl DomainBlocklist {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            domains: domains
                .into_iter()
                .map(|domain| domain.as_ref().trim().to_lowercase())
                .filter(|domain| !domain.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn disposable() -> Self {
        Self::new(DEFAULT_BLOCKED_DOMAINS.iter().copied())
    }

    /// True when the part after the last `@` is listed.
    #[must_use]
    pub fn is_blocked(&self, email: &str) -> bool {
        email
            .rsplit_once('@')
            .is_some_and(|(_, domain)| self.domains.contains(domain))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

/// Normalize and check an email address.
/// # Errors
/// Returns the first validation rule the address breaks.
pub fn validate_email(
    raw: Option<&str>,
    blocklist: &DomainBlocklist,
) -> Result<String, ValidationError> {
    let email = normalize_email(raw.unwrap_or_default());
    if email.is_empty() {
        return Err(ValidationError::MissingEmail);
    }
    if email.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::EmailTooLong);
    }
    if !valid_email(&email) {
        return Err(ValidationError::InvalidEmail);
    }
    if blocklist.is_blocked(&email) {
        return Err(ValidationError::BlockedDomain);
    }
    Ok(email)
}

/// Trim and check a submitted code.
/// # Errors
/// Returns an error when the code is missing or not `length` digits.
pub fn validate_otp(raw: Option<&str>, length: usize) -> Result<String, ValidationError> {
    let otp = raw.unwrap_or_default().trim();
    if otp.is_empty() {
        return Err(ValidationError::MissingOtp);
    }
    if !code::is_well_formed(otp, length) {
        return Err(ValidationError::InvalidOtpFormat(length));
    }
    Ok(otp.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  Fan@Example.COM "), "fan@example.com");
    }

    #[test]
    fn valid_email_accepts_and_rejects() {
        assert!(valid_email("user@example.com"));
        assert!(valid_email("first.last+tag@sub.example.co"));
        assert!(!valid_email("user@"));
        assert!(!valid_email("user@example"));
        assert!(!valid_email("user example@example.com"));
        assert!(!valid_email("@example.com"));
    }

    #[test]
    fn validate_email_normalizes() {
        let email = validate_email(Some(" Fan@Example.com"), &DomainBlocklist::default());
        assert_eq!(email, Ok("fan@example.com".to_string()));
    }

    #[test]
    fn validate_email_missing_and_blank() {
        let list = DomainBlocklist::default();
        assert_eq!(validate_email(None, &list), Err(ValidationError::MissingEmail));
        assert_eq!(
            validate_email(Some("   "), &list),
            Err(ValidationError::MissingEmail)
        );
    }

    #[test]
    fn validate_email_too_long() {
        let local = "a".repeat(250);
        let email = format!("{local}@example.com");
        assert_eq!(
            validate_email(Some(&email), &DomainBlocklist::default()),
            Err(ValidationError::EmailTooLong)
        );
    }

    #[test]
    fn validate_email_at_limit_passes() {
        let domain = "@example.com";
        let local = "a".repeat(MAX_EMAIL_LENGTH - domain.len());
        let email = format!("{local}{domain}");
        assert_eq!(email.len(), MAX_EMAIL_LENGTH);
        assert!(validate_email(Some(&email), &DomainBlocklist::default()).is_ok());
    }

    #[test]
    fn validate_email_blocked_domain() {
        let list = DomainBlocklist::disposable();
        assert_eq!(
            validate_email(Some("someone@Mailinator.com"), &list),
            Err(ValidationError::BlockedDomain)
        );
        assert!(validate_email(Some("someone@example.com"), &list).is_ok());
    }

    #[test]
    fn blocklist_matches_exact_domain_only() {
        let list = DomainBlocklist::new(["Blocked.test", " "]);
        assert_eq!(list.len(), 1);
        assert!(list.is_blocked("a@blocked.test"));
        assert!(!list.is_blocked("a@notblocked.test"));
        assert!(!list.is_blocked("a@sub.blocked.test"));
        assert!(!list.is_blocked("no-at-sign"));
    }

    #[test]
    fn validate_otp_rules() {
        assert_eq!(validate_otp(Some(" 012345 "), 6), Ok("012345".to_string()));
        assert_eq!(validate_otp(None, 6), Err(ValidationError::MissingOtp));
        assert_eq!(validate_otp(Some(""), 6), Err(ValidationError::MissingOtp));
        assert_eq!(
            validate_otp(Some("12345"), 6),
            Err(ValidationError::InvalidOtpFormat(6))
        );
        assert_eq!(
            validate_otp(Some("12345a"), 6),
            Err(ValidationError::InvalidOtpFormat(6))
        );
    }
}
