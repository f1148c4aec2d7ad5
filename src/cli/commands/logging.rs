use clap::{Arg, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("FANPERMIT_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_counts_flags() {
        temp_env::with_var_unset("FANPERMIT_LOG_LEVEL", || {
            let command = with_args(Command::new("fanpermit"));
            let matches = command.get_matches_from(vec!["fanpermit", "-vvv"]);
            assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(3));
        });
    }

    #[test]
    fn verbosity_from_env_names() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_var("FANPERMIT_LOG_LEVEL", Some(level), || {
                let command = with_args(Command::new("fanpermit"));
                let matches = command.get_matches_from(vec!["fanpermit"]);
                assert_eq!(
                    matches.get_one::<u8>(ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }
}
