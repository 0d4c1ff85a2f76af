use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};
use uuid::Uuid;

use wakeline_core::{
    CapacityStore, DepartureCapacity, DepartureLock, InventoryError, InventoryMetrics,
    InventoryResult, Reservation, ReservationStore, SnapshotCache, StoreResult,
};

const LOCK_RETRY_ATTEMPTS: u32 = 10;
const LOCK_RETRY_DELAY_MS: u64 = 50;

#[derive(Debug, Clone)]
pub struct ReservationRules {
    pub reservation_ttl_seconds: u64,
    pub lock_ttl_seconds: u64,
    pub max_seats_per_request: i32,
    /// Upper bound on any single cache or durable-store call.
    pub dependency_timeout_ms: u64,
}

impl Default for ReservationRules {
    fn default() -> Self {
        Self {
            reservation_ttl_seconds: 600,
            lock_ttl_seconds: 5,
            max_seats_per_request: 10,
            dependency_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    Reserved(Reservation),
    /// The holder already has a live hold on this departure; returned
    /// unchanged, no capacity re-check.
    AlreadyHeld(Reservation),
}

impl ReserveOutcome {
    pub fn reservation(&self) -> &Reservation {
        match self {
            ReserveOutcome::Reserved(r) | ReserveOutcome::AlreadyHeld(r) => r,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitOutcome {
    pub departure: DepartureCapacity,
    pub status: CommitStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitStatus {
    Settled { seats: i32 },
    /// The hold lapsed (or was already settled) before this commit; the
    /// durable counter was not touched. The settlement layer must
    /// re-validate capacity before confirming the booking.
    ReservationExpired,
}

/// Orchestrates the durable capacity counters, the reservation layer and
/// the availability snapshot so that concurrent checkouts from stateless
/// processes can never oversell a departure.
///
/// The check-and-reserve sequence runs under a per-departure advisory
/// lock; the sum of active holds plus `booked_seats` therefore never
/// exceeds `capacity` regardless of interleaving.
pub struct SeatReservationManager {
    capacity: Arc<dyn CapacityStore>,
    reservations: Arc<dyn ReservationStore>,
    locks: Arc<dyn DepartureLock>,
    snapshots: Arc<dyn SnapshotCache>,
    metrics: Arc<dyn InventoryMetrics>,
    rules: ReservationRules,
}

impl SeatReservationManager {
    pub fn new(
        capacity: Arc<dyn CapacityStore>,
        reservations: Arc<dyn ReservationStore>,
        locks: Arc<dyn DepartureLock>,
        snapshots: Arc<dyn SnapshotCache>,
        metrics: Arc<dyn InventoryMetrics>,
        rules: ReservationRules,
    ) -> Self {
        Self {
            capacity,
            reservations,
            locks,
            snapshots,
            metrics,
            rules,
        }
    }

    /// Applies the per-call dependency bound. A store call that neither
    /// completes nor fails within the window is reported as unavailable
    /// instead of stalling the operation.
    async fn bounded<T, F>(&self, context: &str, fut: F) -> InventoryResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let window = Duration::from_millis(self.rules.dependency_timeout_ms);
        match timeout(window, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(InventoryError::dependency(context, e)),
            Err(_) => Err(InventoryError::DependencyUnavailable(format!(
                "{} timed out after {}ms",
                context, self.rules.dependency_timeout_ms
            ))),
        }
    }

    /// Same bound for the infallible snapshot calls: a timed-out snapshot
    /// operation yields `fallback` and the outcome is unaffected.
    async fn best_effort<T, F>(&self, context: &str, fallback: T, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let window = Duration::from_millis(self.rules.dependency_timeout_ms);
        match timeout(window, fut).await {
            Ok(value) => value,
            Err(_) => {
                warn!(
                    "{} timed out after {}ms",
                    context, self.rules.dependency_timeout_ms
                );
                fallback
            }
        }
    }

    /// Places a hold on `seats` seats for `holder_id`.
    ///
    /// Re-entrant per `(departure, holder)`: a retried checkout click
    /// finds its own live hold and returns it without re-checking
    /// capacity or double-counting seats.
    pub async fn reserve(
        &self,
        departure_id: Uuid,
        holder_id: &str,
        seats: i32,
    ) -> InventoryResult<ReserveOutcome> {
        if seats < 1 {
            return Err(InventoryError::InvalidRequest(format!(
                "seat count must be positive, got {}",
                seats
            )));
        }
        if seats > self.rules.max_seats_per_request {
            return Err(InventoryError::InvalidRequest(format!(
                "seat count {} exceeds per-request maximum {}",
                seats, self.rules.max_seats_per_request
            )));
        }

        let existing = self
            .bounded(
                "reservation lookup",
                self.reservations.get(departure_id, holder_id),
            )
            .await?;
        if let Some(reservation) = existing {
            info!("Hold already exists for {} on {}", holder_id, departure_id);
            return Ok(ReserveOutcome::AlreadyHeld(reservation));
        }

        let token = self.acquire_lock(departure_id).await?;
        let checked = self.check_and_reserve(departure_id, holder_id, seats).await;
        if let Err(e) = self
            .bounded("lock release", self.locks.release(departure_id, &token))
            .await
        {
            warn!("Failed to release departure lock for {}: {}", departure_id, e);
        }
        let (reservation, available) = checked?;

        self.metrics.reservation_created();
        info!("Reserved {} seats for {} on {}", seats, holder_id, departure_id);

        // Best-effort snapshot maintenance; never affects the outcome.
        if !self
            .best_effort(
                "snapshot narrow",
                false,
                self.snapshots.narrow(departure_id, seats),
            )
            .await
        {
            self.best_effort(
                "snapshot write",
                (),
                self.snapshots.put(departure_id, (available - seats).max(0)),
            )
            .await;
        }

        Ok(ReserveOutcome::Reserved(reservation))
    }

    /// Capacity check and reservation write, run under the departure lock.
    async fn check_and_reserve(
        &self,
        departure_id: Uuid,
        holder_id: &str,
        seats: i32,
    ) -> InventoryResult<(Reservation, i32)> {
        let departure = self
            .bounded("capacity read", self.capacity.get_departure(departure_id))
            .await?
            .ok_or(InventoryError::NotFound(departure_id))?;

        let held: i32 = self
            .bounded(
                "reservation scan",
                self.reservations.list_for_departure(departure_id),
            )
            .await?
            .iter()
            .map(|r| r.seats)
            .sum();

        let available = (departure.capacity - departure.booked_seats - held).max(0);
        if available < seats {
            return Err(InventoryError::InsufficientCapacity {
                requested: seats,
                available,
            });
        }

        let reservation = Reservation::new(
            departure_id,
            holder_id,
            seats,
            self.rules.reservation_ttl_seconds,
        );
        self.bounded("reservation write", self.reservations.put(&reservation))
            .await?;

        Ok((reservation, available))
    }

    async fn acquire_lock(&self, departure_id: Uuid) -> InventoryResult<String> {
        for attempt in 0..LOCK_RETRY_ATTEMPTS {
            match self
                .bounded(
                    "departure lock",
                    self.locks.try_acquire(departure_id, self.rules.lock_ttl_seconds),
                )
                .await
            {
                Ok(Some(token)) => return Ok(token),
                Ok(None) => {
                    if attempt + 1 < LOCK_RETRY_ATTEMPTS {
                        sleep(Duration::from_millis(LOCK_RETRY_DELAY_MS)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(InventoryError::DependencyUnavailable(format!(
            "departure lock contended for {}",
            departure_id
        )))
    }

    /// Drops the holder's reservation if present. Returns whether a
    /// deletion occurred.
    pub async fn release(&self, departure_id: Uuid, holder_id: &str) -> InventoryResult<bool> {
        let removed = self
            .bounded(
                "reservation delete",
                self.reservations.delete(departure_id, holder_id),
            )
            .await?;

        // Correctness over precision: drop the snapshot and let the next
        // read recompute, rather than trying to add the seats back.
        self.best_effort(
            "snapshot invalidate",
            (),
            self.snapshots.invalidate(departure_id),
        )
        .await;

        if removed {
            self.metrics.reservation_released();
            info!("Released hold for {} on {}", holder_id, departure_id);
        }
        Ok(removed)
    }

    /// Pushes the hold's expiry to `now + additional_seconds` (default:
    /// the reservation TTL). Returns false when no live hold exists; the
    /// caller must re-reserve, not treat this as a checkout failure.
    pub async fn extend(
        &self,
        departure_id: Uuid,
        holder_id: &str,
        additional_seconds: Option<u64>,
    ) -> InventoryResult<bool> {
        let existing = self
            .bounded(
                "reservation lookup",
                self.reservations.get(departure_id, holder_id),
            )
            .await?;
        let Some(mut reservation) = existing else {
            return Ok(false);
        };

        let ttl = additional_seconds.unwrap_or(self.rules.reservation_ttl_seconds);
        reservation.expires_at = Utc::now() + chrono::Duration::seconds(ttl as i64);
        self.bounded("reservation write", self.reservations.put(&reservation))
            .await?;
        Ok(true)
    }

    /// High-volume read path: snapshot fast path, ground-truth recompute
    /// on miss, bounded-stale fallback when the durable store is down.
    pub async fn available_seats(&self, departure_id: Uuid) -> InventoryResult<i32> {
        let snapshot = self
            .best_effort("snapshot read", None, self.snapshots.get(departure_id))
            .await;
        if let Some(available) = snapshot {
            self.metrics.snapshot_hit();
            return Ok(available);
        }
        self.metrics.snapshot_miss();

        let departure = match self
            .bounded("capacity read", self.capacity.get_departure(departure_id))
            .await
        {
            Ok(Some(departure)) => departure,
            Ok(None) => return Err(InventoryError::NotFound(departure_id)),
            Err(e) => {
                // Pure read path: bounded staleness beats hard failure.
                let stale = self
                    .best_effort(
                        "stale snapshot read",
                        None,
                        self.snapshots.get_stale(departure_id),
                    )
                    .await;
                if let Some(stale) = stale {
                    warn!(
                        "Durable store unreachable for {}, serving stale availability {}: {}",
                        departure_id, stale, e
                    );
                    return Ok(stale);
                }
                return Err(e);
            }
        };

        let held: i32 = match self
            .bounded(
                "reservation scan",
                self.reservations.list_for_departure(departure_id),
            )
            .await
        {
            Ok(reservations) => reservations.iter().map(|r| r.seats).sum(),
            Err(e) => {
                // The durable-only figure ignores active holds and can
                // overstate availability; serve it, never cache it.
                warn!(
                    "Reservation scan failed for {}, using durable-only availability: {}",
                    departure_id, e
                );
                return Ok((departure.capacity - departure.booked_seats).max(0));
            }
        };

        let available = (departure.capacity - departure.booked_seats - held).max(0);
        self.best_effort(
            "snapshot write",
            (),
            self.snapshots.put(departure_id, available),
        )
        .await;
        Ok(available)
    }

    /// Settles a hold into the durable counter. Used by the settlement
    /// layer on payment success.
    ///
    /// Claim-by-delete: only the caller whose delete actually removes the
    /// entry performs the durable increment, so a raced duplicate commit
    /// for the same reservation can never double-count.
    pub async fn commit(
        &self,
        departure_id: Uuid,
        holder_id: &str,
    ) -> InventoryResult<CommitOutcome> {
        let existing = self
            .bounded(
                "reservation lookup",
                self.reservations.get(departure_id, holder_id),
            )
            .await?;

        let outcome = match existing {
            Some(reservation) => {
                let claimed = self
                    .bounded(
                        "reservation delete",
                        self.reservations.delete(departure_id, holder_id),
                    )
                    .await?;
                if claimed {
                    let departure = self.add_booked(departure_id, reservation.seats).await?;
                    self.metrics.settlement_committed();
                    info!(
                        "Committed {} seats for {} on {}",
                        reservation.seats, holder_id, departure_id
                    );
                    CommitOutcome {
                        departure,
                        status: CommitStatus::Settled {
                            seats: reservation.seats,
                        },
                    }
                } else {
                    self.expired_commit(departure_id, holder_id).await?
                }
            }
            None => self.expired_commit(departure_id, holder_id).await?,
        };

        self.best_effort(
            "snapshot invalidate",
            (),
            self.snapshots.invalidate(departure_id),
        )
        .await;
        Ok(outcome)
    }

    async fn expired_commit(
        &self,
        departure_id: Uuid,
        holder_id: &str,
    ) -> InventoryResult<CommitOutcome> {
        let departure = self
            .bounded("capacity read", self.capacity.get_departure(departure_id))
            .await?
            .ok_or(InventoryError::NotFound(departure_id))?;

        self.metrics.settlement_expired();
        warn!(
            "Commit for {} on {} found no live hold, reporting expired reservation",
            holder_id, departure_id
        );
        Ok(CommitOutcome {
            departure,
            status: CommitStatus::ReservationExpired,
        })
    }

    /// Guarded durable increment shared by commit and
    /// `confirm_without_hold`. Durable failures are never swallowed.
    async fn add_booked(
        &self,
        departure_id: Uuid,
        seats: i32,
    ) -> InventoryResult<DepartureCapacity> {
        let updated = self
            .bounded(
                "booked seats increment",
                self.capacity.add_booked_seats(departure_id, seats),
            )
            .await?;
        match updated {
            Some(departure) => Ok(departure),
            None => {
                // Guard refused: either the departure vanished or the
                // increment would overbook. Distinguish with a fresh read.
                match self
                    .bounded("capacity read", self.capacity.get_departure(departure_id))
                    .await?
                {
                    Some(departure) => Err(InventoryError::InsufficientCapacity {
                        requested: seats,
                        available: departure.unbooked(),
                    }),
                    None => Err(InventoryError::NotFound(departure_id)),
                }
            }
        }
    }

    /// Confirms seats without a hold, after the settlement layer has
    /// re-validated capacity for an expired reservation.
    pub async fn confirm_without_hold(
        &self,
        departure_id: Uuid,
        seats: i32,
    ) -> InventoryResult<DepartureCapacity> {
        if seats < 1 {
            return Err(InventoryError::InvalidRequest(format!(
                "seat count must be positive, got {}",
                seats
            )));
        }
        let departure = self.add_booked(departure_id, seats).await?;
        self.best_effort(
            "snapshot invalidate",
            (),
            self.snapshots.invalidate(departure_id),
        )
        .await;
        self.metrics.settlement_committed();
        Ok(departure)
    }

    /// Discards a hold on payment failure. Equivalent to `release`.
    pub async fn abort(&self, departure_id: Uuid, holder_id: &str) -> InventoryResult<()> {
        self.release(departure_id, holder_id).await?;
        Ok(())
    }
}
