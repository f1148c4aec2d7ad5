//! Map parsed command-line arguments to the action to run.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{
    ARG_ALLOWED_ORIGIN, ARG_DSN, ARG_MAINTENANCE_INTERVAL_SECONDS, ARG_PORT,
    ARG_TRUST_FORWARDED_HEADERS, email, otp,
};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if an argument group fails validation.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let get_non_empty = |id: &str| {
        matches
            .get_one::<String>(id)
            .cloned()
            .filter(|v| !v.trim().is_empty())
    };

    Ok(Action::Server(Args {
        port: matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080),
        dsn: get_non_empty(ARG_DSN),
        allowed_origin: get_non_empty(ARG_ALLOWED_ORIGIN),
        trust_forwarded_headers: matches
            .get_one::<bool>(ARG_TRUST_FORWARDED_HEADERS)
            .copied()
            .unwrap_or(false),
        maintenance_interval_seconds: matches
            .get_one::<u64>(ARG_MAINTENANCE_INTERVAL_SECONDS)
            .copied()
            .unwrap_or(60),
        otp: otp::Options::parse(matches)?,
        email: email::Options::parse(matches)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_action_from_args() {
        temp_env::with_vars_unset(["FANPERMIT_DSN", "FANPERMIT_ALLOWED_ORIGIN"], || {
            let matches = crate::cli::commands::new().get_matches_from(vec![
                "fanpermit",
                "--port",
                "9000",
                "--otp-length",
                "8",
            ]);
            let result = handler(&matches);
            assert!(result.is_ok());
            if let Ok(Action::Server(args)) = result {
                assert_eq!(args.port, 9000);
                assert!(args.dsn.is_none());
                assert!(args.allowed_origin.is_none());
                assert!(!args.trust_forwarded_headers);
                assert_eq!(args.otp.code_length, 8);
            }
        });
    }

    #[test]
    fn blank_dsn_means_memory_store() {
        temp_env::with_var("FANPERMIT_DSN", Some("  "), || {
            let matches = crate::cli::commands::new().get_matches_from(vec!["fanpermit"]);
            let result = handler(&matches);
            assert!(matches!(result, Ok(Action::Server(Args { dsn: None, .. }))));
        });
    }

    #[test]
    fn invalid_group_is_reported() {
        let matches = crate::cli::commands::new().get_matches_from(vec![
            "fanpermit",
            "--email-api-url",
            "nope",
        ]);
        assert!(handler(&matches).is_err());
    }
}
