use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use wakeline_core::{
    InventoryError, InventoryMetrics, InventoryResult, ReservationStore, SnapshotCache,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
}

/// Removes reservation entries whose expiry has passed but which the
/// cache's own TTL eviction has not purged yet, and drops the
/// availability snapshot of every affected departure.
///
/// TTL eviction remains the primary cleanup mechanism, so a healthy
/// cache usually gives this nothing to do.
pub async fn sweep_expired_reservations(
    reservations: &dyn ReservationStore,
    snapshots: &dyn SnapshotCache,
    metrics: &dyn InventoryMetrics,
) -> InventoryResult<SweepReport> {
    let now = Utc::now();
    let entries = reservations
        .list_all()
        .await
        .map_err(|e| InventoryError::dependency("reservation scan", e))?;

    let mut report = SweepReport {
        scanned: entries.len(),
        removed: 0,
    };
    let mut touched = HashSet::new();

    for entry in entries {
        if !entry.is_expired(now) {
            continue;
        }
        let removed = reservations
            .delete(entry.departure_id, &entry.holder_id)
            .await
            .map_err(|e| InventoryError::dependency("reservation delete", e))?;
        if removed {
            report.removed += 1;
            touched.insert(entry.departure_id);
        }
    }

    for departure_id in touched {
        snapshots.invalidate(departure_id).await;
    }

    metrics.reservations_swept(report.removed as u64);
    Ok(report)
}

/// Recurring sweep loop. Minutes-scale cadence is fine; failures are
/// logged and the loop keeps running.
pub async fn run_reservation_sweeper(
    reservations: Arc<dyn ReservationStore>,
    snapshots: Arc<dyn SnapshotCache>,
    metrics: Arc<dyn InventoryMetrics>,
    interval_seconds: u64,
) {
    let mut ticker = interval(Duration::from_secs(interval_seconds));
    info!("Reservation sweeper started (every {}s)", interval_seconds);

    loop {
        ticker.tick().await;
        match sweep_expired_reservations(
            reservations.as_ref(),
            snapshots.as_ref(),
            metrics.as_ref(),
        )
        .await
        {
            Ok(report) if report.removed > 0 => {
                info!(
                    "Sweep removed {} lapsed holds ({} scanned)",
                    report.removed, report.scanned
                );
            }
            Ok(_) => {}
            Err(e) => error!("Reservation sweep failed: {}", e),
        }
    }
}
