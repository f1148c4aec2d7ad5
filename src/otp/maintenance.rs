//! Periodic cleanup of finished codes and idle rate limit counters.

use super::error::StoreError;
use super::service::OtpService;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error};

pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub records_purged: u64,
    pub counters_swept: usize,
}

/// Run one cleanup pass.
/// # Errors
/// Returns an error if the storage backend fails; counters are swept regardless.
pub async fn run_once(service: &OtpService) -> Result<MaintenanceReport, StoreError> {
    let counters_swept = service.verification_limiter().sweep();
    let records_purged = service.store().cleanup_expired(None).await?;

    Ok(MaintenanceReport {
        records_purged,
        counters_swept,
    })
}

pub fn spawn_maintenance_worker(
    service: Arc<OtpService>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;

            match run_once(&service).await {
                Ok(report) => debug!(
                    records_purged = report.records_purged,
                    counters_swept = report.counters_swept,
                    "otp maintenance pass"
                ),
                Err(err) => error!("otp maintenance pass failed: {err}"),
            }
        }
    })
}
