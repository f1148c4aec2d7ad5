use crate::{
    api::{self, HttpConfig},
    cli::commands::{email, otp},
    otp::{
        OtpService, SystemClock,
        store::{MemoryBackend, OtpBackend, PgBackend},
    },
};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub allowed_origin: Option<String>,
    pub trust_forwarded_headers: bool,
    pub maintenance_interval_seconds: u64,
    pub otp: otp::Options,
    pub email: email::Options,
}

/// Connect the configured store and serve until shutdown.
/// # Errors
/// Returns an error if the database is unreachable, the schema cannot be
/// applied, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let backend: Arc<dyn OtpBackend> = match &args.dsn {
        Some(dsn) => {
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(dsn)
                .await
                .context("Failed to connect to database")?;

            let backend = PgBackend::new(pool);
            backend
                .migrate()
                .await
                .context("Failed to apply database schema")?;
            info!("Using postgres code store");
            Arc::new(backend)
        }
        None => {
            warn!("No DSN configured, codes are kept in memory only");
            Arc::new(MemoryBackend::new())
        }
    };

    let sender = args.email.config().build_sender()?;

    let service = OtpService::new(
        args.otp.config(),
        backend,
        args.otp.token_secret.clone(),
        sender,
        Arc::new(SystemClock),
    )
    .context("Failed to build OTP service")?;

    let mut http = HttpConfig::new().with_trust_forwarded_headers(args.trust_forwarded_headers);
    if let Some(origin) = args.allowed_origin {
        http = http.with_allowed_origin(origin);
    }

    api::new(
        args.port,
        Arc::new(service),
        http,
        Duration::from_secs(args.maintenance_interval_seconds),
    )
    .await
}
