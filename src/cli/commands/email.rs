use crate::api::email::{DEFAULT_FROM_ADDRESS, EmailConfig};
use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;
use url::Url;

pub const ARG_EMAIL_API_URL: &str = "email-api-url";
pub const ARG_EMAIL_API_KEY: &str = "email-api-key";
pub const ARG_EMAIL_FROM: &str = "email-from";
pub const ARG_EMAIL_TIMEOUT_SECONDS: &str = "email-timeout-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub api_url: Option<Url>,
    pub api_key: Option<SecretString>,
    pub from_address: String,
    pub timeout_seconds: u64,
}

impl Options {
    /// Parse email delivery arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the API URL is not a valid URL.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let api_url = get_non_empty(ARG_EMAIL_API_URL)
            .map(|value| {
                Url::parse(value.trim())
                    .with_context(|| format!("invalid --{ARG_EMAIL_API_URL}: {value}"))
            })
            .transpose()?;

        Ok(Self {
            api_url,
            api_key: get_non_empty(ARG_EMAIL_API_KEY).map(SecretString::from),
            from_address: get_non_empty(ARG_EMAIL_FROM)
                .unwrap_or_else(|| DEFAULT_FROM_ADDRESS.to_string()),
            timeout_seconds: matches
                .get_one::<u64>(ARG_EMAIL_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(10),
        })
    }

    #[must_use]
    pub fn config(&self) -> EmailConfig {
        let mut config = EmailConfig::new()
            .with_from_address(self.from_address.clone())
            .with_timeout(Duration::from_secs(self.timeout_seconds));
        if let Some(url) = &self.api_url {
            config = config.with_api_url(url.clone());
        }
        if let Some(key) = &self.api_key {
            config = config.with_api_key(key.clone());
        }
        config
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_EMAIL_API_URL)
                .long(ARG_EMAIL_API_URL)
                .help("Transactional email API endpoint")
                .long_help(
                    "Transactional email API endpoint. When unset, codes are logged instead of emailed.",
                )
                .env("FANPERMIT_EMAIL_API_URL"),
        )
        .arg(
            Arg::new(ARG_EMAIL_API_KEY)
                .long(ARG_EMAIL_API_KEY)
                .help("Bearer key for the email API")
                .env("FANPERMIT_EMAIL_API_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_EMAIL_FROM)
                .long(ARG_EMAIL_FROM)
                .help("Sender address for verification emails")
                .env("FANPERMIT_EMAIL_FROM")
                .default_value(DEFAULT_FROM_ADDRESS),
        )
        .arg(
            Arg::new(ARG_EMAIL_TIMEOUT_SECONDS)
                .long(ARG_EMAIL_TIMEOUT_SECONDS)
                .help("Email API request timeout in seconds")
                .env("FANPERMIT_EMAIL_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
