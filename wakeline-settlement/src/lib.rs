//! Payment settlement contract over the seat reservation manager.
//!
//! Webhook transports (signature checking, HTTP routing) live upstream;
//! this layer receives already-verified payment outcomes keyed by the
//! provider's event id and converts holds into durable bookings exactly
//! once per event, no matter how often the provider redelivers.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use wakeline_core::{DepartureCapacity, InventoryError, InventoryResult, SettlementJournal};
use wakeline_inventory::{CommitStatus, SeatReservationManager};

#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    /// Booking confirmed. `expired_hold` marks the re-validated path where
    /// the hold lapsed before the webhook arrived.
    Confirmed {
        departure: DepartureCapacity,
        expired_hold: bool,
    },
    /// The hold lapsed and the seats were resold in the meantime; the
    /// payment must be refunded upstream.
    CapacityExhausted { available: i32 },
    Aborted,
    /// The webhook event was already processed; nothing was touched.
    Duplicate,
}

pub struct SettlementHandler {
    manager: Arc<SeatReservationManager>,
    journal: Arc<dyn SettlementJournal>,
}

impl SettlementHandler {
    pub fn new(manager: Arc<SeatReservationManager>, journal: Arc<dyn SettlementJournal>) -> Self {
        Self { manager, journal }
    }

    async fn already_processed(&self, event_id: &str) -> InventoryResult<bool> {
        self.journal
            .is_processed(event_id)
            .await
            .map_err(|e| InventoryError::dependency("settlement journal", e))
    }

    async fn mark_processed(&self, event_id: &str) -> InventoryResult<()> {
        self.journal
            .mark_processed(event_id)
            .await
            .map_err(|e| InventoryError::dependency("settlement journal", e))
    }

    /// Converts the holder's reservation into a durable booking.
    ///
    /// `seats` comes from the booking record, not the reservation: when
    /// the hold has lapsed the reservation no longer exists, and the
    /// re-validated confirmation needs the seat count from the caller.
    pub async fn payment_succeeded(
        &self,
        event_id: &str,
        departure_id: Uuid,
        holder_id: &str,
        seats: i32,
    ) -> InventoryResult<SettlementOutcome> {
        if self.already_processed(event_id).await? {
            info!("Webhook event {} already processed, skipping", event_id);
            return Ok(SettlementOutcome::Duplicate);
        }

        let commit = self.manager.commit(departure_id, holder_id).await?;
        let outcome = match commit.status {
            CommitStatus::Settled { .. } => SettlementOutcome::Confirmed {
                departure: commit.departure,
                expired_hold: false,
            },
            CommitStatus::ReservationExpired => {
                // The hold lapsed before payment completed. The commit just
                // invalidated the snapshot, so this recomputes ground truth
                // rather than trusting a cached figure.
                let available = self.manager.available_seats(departure_id).await?;
                if available < seats {
                    warn!(
                        "Hold for {} on {} lapsed and capacity is gone ({} left, {} needed)",
                        holder_id, departure_id, available, seats
                    );
                    SettlementOutcome::CapacityExhausted { available }
                } else {
                    match self.manager.confirm_without_hold(departure_id, seats).await {
                        Ok(departure) => SettlementOutcome::Confirmed {
                            departure,
                            expired_hold: true,
                        },
                        // Lost a race between the re-validation and the
                        // guarded increment.
                        Err(InventoryError::InsufficientCapacity { available, .. }) => {
                            SettlementOutcome::CapacityExhausted { available }
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        };

        // Marked only after a terminal outcome, so a redelivery can
        // re-drive an attempt that failed on a dependency error.
        self.mark_processed(event_id).await?;
        Ok(outcome)
    }

    /// Discards the holder's reservation after a failed or cancelled
    /// payment.
    pub async fn payment_failed(
        &self,
        event_id: &str,
        departure_id: Uuid,
        holder_id: &str,
    ) -> InventoryResult<SettlementOutcome> {
        if self.already_processed(event_id).await? {
            info!("Webhook event {} already processed, skipping", event_id);
            return Ok(SettlementOutcome::Duplicate);
        }

        self.manager.abort(departure_id, holder_id).await?;
        info!(
            "Aborted settlement for {} on {} after failed payment",
            holder_id, departure_id
        );

        self.mark_processed(event_id).await?;
        Ok(SettlementOutcome::Aborted)
    }
}
