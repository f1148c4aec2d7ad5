use crate::otp::{
    OtpConfig,
    code::{DEFAULT_CODE_LENGTH, HashParams},
    rate_limit::{IssuancePolicy, VerificationPolicy},
    validation::DomainBlocklist,
};
use anyhow::{Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_OTP_LENGTH: &str = "otp-length";
pub const ARG_OTP_TTL_SECONDS: &str = "otp-ttl-seconds";
pub const ARG_OTP_MAX_ATTEMPTS: &str = "otp-max-attempts";
pub const ARG_OTP_HASH_MEMORY_KIB: &str = "otp-hash-memory-kib";
pub const ARG_OTP_HASH_ITERATIONS: &str = "otp-hash-iterations";
pub const ARG_ISSUE_WINDOW_SECONDS: &str = "issue-window-seconds";
pub const ARG_ISSUE_MAX_REQUESTS: &str = "issue-max-requests";
pub const ARG_ISSUE_COOLDOWN_SECONDS: &str = "issue-cooldown-seconds";
pub const ARG_VERIFY_WINDOW_SECONDS: &str = "verify-window-seconds";
pub const ARG_VERIFY_MAX_ATTEMPTS: &str = "verify-max-attempts";
pub const ARG_VERIFY_LOCKOUT_SECONDS: &str = "verify-lockout-seconds";
pub const ARG_TOKEN_TTL_SECONDS: &str = "token-ttl-seconds";
pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_BLOCKED_DOMAINS: &str = "blocked-domains";
pub const ARG_DEBUG_CODES: &str = "debug-codes";
pub const ARG_BRAND_NAME: &str = "brand-name";

const MIN_CODE_LENGTH: usize = 4;
const MAX_CODE_LENGTH: usize = 10;

#[derive(Debug, Clone)]
pub struct Options {
    pub code_length: usize,
    pub code_ttl_seconds: u64,
    pub max_attempts: u32,
    pub hash_memory_kib: u32,
    pub hash_iterations: u32,
    pub issue_window_seconds: u64,
    pub issue_max_requests: u32,
    pub issue_cooldown_seconds: u64,
    pub verify_window_seconds: u64,
    pub verify_max_attempts: u32,
    pub verify_lockout_seconds: u64,
    pub token_ttl_seconds: u64,
    pub token_secret: Option<SecretString>,
    pub blocked_domains: Option<Vec<String>>,
    pub debug_codes: bool,
    pub brand_name: String,
}

impl Options {
    /// Parse OTP policy arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a value is out of range.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let number = |id: &str| matches.get_one::<u64>(id).copied().unwrap_or_default();
        let count = |id: &str| matches.get_one::<u32>(id).copied().unwrap_or_default();

        let code_length = matches
            .get_one::<usize>(ARG_OTP_LENGTH)
            .copied()
            .unwrap_or(DEFAULT_CODE_LENGTH);
        if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&code_length) {
            bail!("--{ARG_OTP_LENGTH} must be between {MIN_CODE_LENGTH} and {MAX_CODE_LENGTH}");
        }

        for id in [
            ARG_OTP_TTL_SECONDS,
            ARG_ISSUE_WINDOW_SECONDS,
            ARG_VERIFY_WINDOW_SECONDS,
            ARG_VERIFY_LOCKOUT_SECONDS,
            ARG_TOKEN_TTL_SECONDS,
        ] {
            if number(id) == 0 {
                bail!("--{id} must be greater than zero");
            }
        }
        for id in [
            ARG_OTP_MAX_ATTEMPTS,
            ARG_ISSUE_MAX_REQUESTS,
            ARG_VERIFY_MAX_ATTEMPTS,
        ] {
            if count(id) == 0 {
                bail!("--{id} must be greater than zero");
            }
        }

        let token_secret = matches
            .get_one::<String>(ARG_TOKEN_SECRET)
            .filter(|v| !v.trim().is_empty())
            .map(|v| SecretString::from(v.clone()));

        let blocked_domains = matches
            .get_many::<String>(ARG_BLOCKED_DOMAINS)
            .map(|values| {
                values
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect::<Vec<_>>()
            });

        Ok(Self {
            code_length,
            code_ttl_seconds: number(ARG_OTP_TTL_SECONDS),
            max_attempts: count(ARG_OTP_MAX_ATTEMPTS),
            hash_memory_kib: count(ARG_OTP_HASH_MEMORY_KIB),
            hash_iterations: count(ARG_OTP_HASH_ITERATIONS),
            issue_window_seconds: number(ARG_ISSUE_WINDOW_SECONDS),
            issue_max_requests: count(ARG_ISSUE_MAX_REQUESTS),
            issue_cooldown_seconds: number(ARG_ISSUE_COOLDOWN_SECONDS),
            verify_window_seconds: number(ARG_VERIFY_WINDOW_SECONDS),
            verify_max_attempts: count(ARG_VERIFY_MAX_ATTEMPTS),
            verify_lockout_seconds: number(ARG_VERIFY_LOCKOUT_SECONDS),
            token_ttl_seconds: number(ARG_TOKEN_TTL_SECONDS),
            token_secret,
            blocked_domains,
            debug_codes: matches.get_flag(ARG_DEBUG_CODES),
            brand_name: matches
                .get_one::<String>(ARG_BRAND_NAME)
                .cloned()
                .unwrap_or_default(),
        })
    }

    /// Service configuration for these options.
    #[must_use]
    pub fn config(&self) -> OtpConfig {
        let blocklist = match &self.blocked_domains {
            Some(domains) => DomainBlocklist::new(domains),
            None => DomainBlocklist::disposable(),
        };

        OtpConfig::new()
            .with_code_length(self.code_length)
            .with_code_ttl(Duration::from_secs(self.code_ttl_seconds))
            .with_max_attempts(self.max_attempts)
            .with_hash_params(
                HashParams::new()
                    .with_memory_kib(self.hash_memory_kib)
                    .with_iterations(self.hash_iterations),
            )
            .with_issuance_policy(
                IssuancePolicy::new()
                    .with_time_window(Duration::from_secs(self.issue_window_seconds))
                    .with_max_requests(self.issue_max_requests)
                    .with_cooldown(Duration::from_secs(self.issue_cooldown_seconds)),
            )
            .with_verification_policy(
                VerificationPolicy::new()
                    .with_time_window(Duration::from_secs(self.verify_window_seconds))
                    .with_max_attempts(self.verify_max_attempts)
                    .with_lockout_duration(Duration::from_secs(self.verify_lockout_seconds)),
            )
            .with_token_ttl(Duration::from_secs(self.token_ttl_seconds))
            .with_blocklist(blocklist)
            .with_debug_codes(self.debug_codes)
            .with_brand_name(self.brand_name.clone())
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_code_args(command);
    let command = with_limit_args(command);
    with_token_args(command)
}

fn with_code_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OTP_LENGTH)
                .long(ARG_OTP_LENGTH)
                .help("Number of digits in a verification code")
                .env("FANPERMIT_OTP_LENGTH")
                .default_value("6")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_OTP_TTL_SECONDS)
                .long(ARG_OTP_TTL_SECONDS)
                .help("Verification code lifetime in seconds")
                .env("FANPERMIT_OTP_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OTP_MAX_ATTEMPTS)
                .long(ARG_OTP_MAX_ATTEMPTS)
                .help("Wrong guesses allowed per code")
                .env("FANPERMIT_OTP_MAX_ATTEMPTS")
                .default_value("3")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_OTP_HASH_MEMORY_KIB)
                .long(ARG_OTP_HASH_MEMORY_KIB)
                .help("Argon2id memory cost in KiB for code hashes")
                .env("FANPERMIT_OTP_HASH_MEMORY_KIB")
                .default_value("19456")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_OTP_HASH_ITERATIONS)
                .long(ARG_OTP_HASH_ITERATIONS)
                .help("Argon2id iterations for code hashes")
                .env("FANPERMIT_OTP_HASH_ITERATIONS")
                .default_value("2")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_BLOCKED_DOMAINS)
                .long(ARG_BLOCKED_DOMAINS)
                .help("Comma separated email domains to reject")
                .long_help(
                    "Comma separated email domains to reject. Replaces the built-in list of disposable email providers.",
                )
                .env("FANPERMIT_BLOCKED_DOMAINS")
                .value_delimiter(','),
        )
        .arg(
            Arg::new(ARG_DEBUG_CODES)
                .long(ARG_DEBUG_CODES)
                .help("Echo issued codes in responses (development only)")
                .env("FANPERMIT_DEBUG_CODES")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_BRAND_NAME)
                .long(ARG_BRAND_NAME)
                .help("Brand name used in verification emails")
                .env("FANPERMIT_BRAND_NAME")
                .default_value("Fan-Permit"),
        )
}

fn with_limit_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ISSUE_WINDOW_SECONDS)
                .long(ARG_ISSUE_WINDOW_SECONDS)
                .help("Window for the per-email issuance cap in seconds")
                .env("FANPERMIT_ISSUE_WINDOW_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_ISSUE_MAX_REQUESTS)
                .long(ARG_ISSUE_MAX_REQUESTS)
                .help("Codes an email may request per window")
                .env("FANPERMIT_ISSUE_MAX_REQUESTS")
                .default_value("3")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_ISSUE_COOLDOWN_SECONDS)
                .long(ARG_ISSUE_COOLDOWN_SECONDS)
                .help("Minimum seconds between two codes for one email")
                .env("FANPERMIT_ISSUE_COOLDOWN_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_VERIFY_WINDOW_SECONDS)
                .long(ARG_VERIFY_WINDOW_SECONDS)
                .help("Window for the per-client verification cap in seconds")
                .env("FANPERMIT_VERIFY_WINDOW_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_VERIFY_MAX_ATTEMPTS)
                .long(ARG_VERIFY_MAX_ATTEMPTS)
                .help("Verification calls a client may make per window")
                .env("FANPERMIT_VERIFY_MAX_ATTEMPTS")
                .default_value("10")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_VERIFY_LOCKOUT_SECONDS)
                .long(ARG_VERIFY_LOCKOUT_SECONDS)
                .help("Lockout applied once a client exceeds the verification cap")
                .env("FANPERMIT_VERIFY_LOCKOUT_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_TTL_SECONDS)
                .long(ARG_TOKEN_TTL_SECONDS)
                .help("Verification token lifetime in seconds")
                .env("FANPERMIT_TOKEN_TTL_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HMAC key for verification tokens")
                .long_help(
                    "HMAC key for verification tokens. When unset a random key is generated at startup and tokens do not survive a restart.",
                )
                .env("FANPERMIT_TOKEN_SECRET")
                .hide_env_values(true),
        )
}
