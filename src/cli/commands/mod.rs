pub mod email;
pub mod logging;
pub mod otp;

use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_ALLOWED_ORIGIN: &str = "allowed-origin";
pub const ARG_TRUST_FORWARDED_HEADERS: &str = "trust-forwarded-headers";
pub const ARG_MAINTENANCE_INTERVAL_SECONDS: &str = "maintenance-interval-seconds";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("fanpermit")
        .about("Email verification codes for the Fan-Permit subscription form")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("FANPERMIT_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .long_help(
                    "PostgreSQL connection string. When unset, codes are kept in memory and lost on restart.",
                )
                .env("FANPERMIT_DSN"),
        )
        .arg(
            Arg::new(ARG_ALLOWED_ORIGIN)
                .long(ARG_ALLOWED_ORIGIN)
                .help("Only allow CORS requests from this origin (default: any)")
                .env("FANPERMIT_ALLOWED_ORIGIN"),
        )
        .arg(
            Arg::new(ARG_TRUST_FORWARDED_HEADERS)
                .long(ARG_TRUST_FORWARDED_HEADERS)
                .help("Take the client address from X-Forwarded-For / X-Real-IP (only behind a proxy that sets them)")
                .env("FANPERMIT_TRUST_FORWARDED_HEADERS")
                .default_value("false")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_MAINTENANCE_INTERVAL_SECONDS)
                .long(ARG_MAINTENANCE_INTERVAL_SECONDS)
                .help("Seconds between purges of stale codes and counters")
                .env("FANPERMIT_MAINTENANCE_INTERVAL_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..)),
        );

    let command = otp::with_args(command);
    let command = email::with_args(command);
    logging::with_args(command)
}
