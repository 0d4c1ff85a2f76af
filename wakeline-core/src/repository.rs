use async_trait::async_trait;
use uuid::Uuid;

use crate::departure::DepartureCapacity;
use crate::reservation::Reservation;

pub type StoreResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Durable source of truth for per-departure capacity counters.
#[async_trait]
pub trait CapacityStore: Send + Sync {
    async fn get_departure(
        &self,
        departure_id: Uuid,
    ) -> StoreResult<Option<DepartureCapacity>>;

    /// Guarded atomic increment of `booked_seats`. Returns the updated row,
    /// or `None` when the departure is missing or the increment would push
    /// `booked_seats` past `capacity`. The check and the increment must be
    /// a single storage-level operation, never a read-then-write from the
    /// application.
    async fn add_booked_seats(
        &self,
        departure_id: Uuid,
        seats: i32,
    ) -> StoreResult<Option<DepartureCapacity>>;
}

/// Cache-resident seat holds, one entry per `(departure, holder)` pair.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn get(
        &self,
        departure_id: Uuid,
        holder_id: &str,
    ) -> StoreResult<Option<Reservation>>;

    /// Upserts the reservation with a TTL derived from its `expires_at`.
    async fn put(&self, reservation: &Reservation) -> StoreResult<()>;

    /// Returns `true` if an entry was actually removed.
    async fn delete(&self, departure_id: Uuid, holder_id: &str) -> StoreResult<bool>;

    /// Active (unexpired) reservations for one departure.
    async fn list_for_departure(&self, departure_id: Uuid) -> StoreResult<Vec<Reservation>>;

    /// Every reservation entry still physically present, lapsed ones
    /// included. Used by the background sweep.
    async fn list_all(&self) -> StoreResult<Vec<Reservation>>;
}

/// Per-departure advisory lock serializing check-and-reserve sequences.
#[async_trait]
pub trait DepartureLock: Send + Sync {
    /// Attempts to take the lock; returns a release token on success,
    /// `None` when another caller currently holds it.
    async fn try_acquire(
        &self,
        departure_id: Uuid,
        ttl_seconds: u64,
    ) -> StoreResult<Option<String>>;

    /// Releases the lock, but only if `token` still owns it.
    async fn release(&self, departure_id: Uuid, token: &str) -> StoreResult<()>;
}

/// Best-effort cache of "seats remaining" per departure.
///
/// Every method is infallible from the caller's point of view:
/// implementations log and swallow their own failures. The snapshot is an
/// optimization, never a correctness dependency, and this interface makes
/// it impossible to treat a snapshot write as load-bearing.
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    async fn get(&self, departure_id: Uuid) -> Option<i32>;

    /// Writes a fresh snapshot (and its long-lived stale copy).
    async fn put(&self, departure_id: Uuid, available: i32);

    /// Decrements an existing snapshot by `seats`, clamped at zero.
    /// Returns `false` when no snapshot is present to narrow.
    async fn narrow(&self, departure_id: Uuid, seats: i32) -> bool;

    async fn invalidate(&self, departure_id: Uuid);

    /// Last known value regardless of freshness, for serving bounded-stale
    /// reads while the durable store is unreachable.
    async fn get_stale(&self, departure_id: Uuid) -> Option<i32>;
}

/// Processed-event ledger guarding against webhook redelivery.
#[async_trait]
pub trait SettlementJournal: Send + Sync {
    async fn is_processed(&self, event_id: &str) -> StoreResult<bool>;

    async fn mark_processed(&self, event_id: &str) -> StoreResult<()>;
}

/// Injectable counters for lock churn and cache behavior.
///
/// The deployment model has no shared process memory, so anything worth
/// counting is pushed through this collaborator instead of a global.
pub trait InventoryMetrics: Send + Sync {
    fn reservation_created(&self) {}
    fn reservation_released(&self) {}
    fn reservations_swept(&self, _count: u64) {}
    fn snapshot_hit(&self) {}
    fn snapshot_miss(&self) {}
    fn settlement_committed(&self) {}
    fn settlement_expired(&self) {}
}

/// Metrics sink for deployments without a metrics pipeline.
pub struct NoopMetrics;

impl InventoryMetrics for NoopMetrics {}
