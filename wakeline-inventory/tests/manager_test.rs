use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use wakeline_core::memory::{
    CountingMetrics, InMemoryCapacityStore, InMemoryDepartureLock, InMemoryReservationStore,
    InMemorySnapshotCache,
};
use wakeline_core::{
    CapacityStore, DepartureCapacity, InventoryError, Reservation, ReservationStore,
    SnapshotCache, StoreResult,
};
use wakeline_inventory::{
    CommitStatus, ReservationRules, ReserveOutcome, SeatReservationManager,
};

struct Harness {
    manager: Arc<SeatReservationManager>,
    capacity: Arc<InMemoryCapacityStore>,
    reservations: Arc<InMemoryReservationStore>,
    snapshots: Arc<InMemorySnapshotCache>,
    metrics: Arc<CountingMetrics>,
    departure_id: Uuid,
}

fn harness(capacity_seats: i32, booked_seats: i32) -> Harness {
    harness_with_snapshot_ttl(capacity_seats, booked_seats, 20)
}

fn harness_with_snapshot_ttl(
    capacity_seats: i32,
    booked_seats: i32,
    snapshot_ttl_seconds: u64,
) -> Harness {
    let departure_id = Uuid::new_v4();
    let capacity = Arc::new(InMemoryCapacityStore::new());
    capacity.insert(DepartureCapacity {
        departure_id,
        capacity: capacity_seats,
        booked_seats,
    });

    let reservations = Arc::new(InMemoryReservationStore::new());
    let snapshots = Arc::new(InMemorySnapshotCache::new(snapshot_ttl_seconds));
    let metrics = Arc::new(CountingMetrics::new());

    let manager = Arc::new(SeatReservationManager::new(
        capacity.clone(),
        reservations.clone(),
        Arc::new(InMemoryDepartureLock::new()),
        snapshots.clone(),
        metrics.clone(),
        ReservationRules {
            max_seats_per_request: 50,
            ..ReservationRules::default()
        },
    ));

    Harness {
        manager,
        capacity,
        reservations,
        snapshots,
        metrics,
        departure_id,
    }
}

#[tokio::test]
async fn test_happy_path_fills_a_departure() {
    let h = harness(50, 0);

    let a = h.manager.reserve(h.departure_id, "holder-a", 5).await.unwrap();
    assert!(matches!(a, ReserveOutcome::Reserved(_)));
    assert_eq!(h.manager.available_seats(h.departure_id).await.unwrap(), 45);

    let b = h.manager.reserve(h.departure_id, "holder-b", 40).await.unwrap();
    assert!(matches!(b, ReserveOutcome::Reserved(_)));
    assert_eq!(h.manager.available_seats(h.departure_id).await.unwrap(), 5);

    let err = h
        .manager
        .reserve(h.departure_id, "holder-c", 10)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        InventoryError::InsufficientCapacity {
            requested: 10,
            available: 5
        }
    ));
}

#[tokio::test]
async fn test_repeated_reserve_is_idempotent() {
    let h = harness(50, 0);

    let first = h.manager.reserve(h.departure_id, "holder-a", 5).await.unwrap();
    let second = h.manager.reserve(h.departure_id, "holder-a", 5).await.unwrap();

    let ReserveOutcome::Reserved(first) = first else {
        panic!("first call should create the hold")
    };
    let ReserveOutcome::AlreadyHeld(second) = second else {
        panic!("second call should find the existing hold")
    };
    assert_eq!(first, second);

    // The duplicate call did not double-count seats against capacity.
    let active = h
        .reservations
        .list_for_departure(h.departure_id)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].seats, 5);
    assert_eq!(h.manager.available_seats(h.departure_id).await.unwrap(), 45);
}

#[tokio::test]
async fn test_commit_settles_and_frees_the_hold() {
    let h = harness(50, 0);

    h.manager.reserve(h.departure_id, "holder-a", 5).await.unwrap();
    let outcome = h.manager.commit(h.departure_id, "holder-a").await.unwrap();

    assert_eq!(outcome.status, CommitStatus::Settled { seats: 5 });
    assert_eq!(outcome.departure.booked_seats, 5);

    // Hold is gone; a fresh reserve for the same holder creates a new one.
    assert!(h
        .reservations
        .get(h.departure_id, "holder-a")
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.manager.available_seats(h.departure_id).await.unwrap(), 45);

    let again = h.manager.reserve(h.departure_id, "holder-a", 5).await.unwrap();
    assert!(matches!(again, ReserveOutcome::Reserved(_)));
}

#[tokio::test]
async fn test_duplicate_commit_does_not_double_increment() {
    let h = harness(50, 0);

    h.manager.reserve(h.departure_id, "holder-a", 5).await.unwrap();

    let first = h.manager.commit(h.departure_id, "holder-a").await.unwrap();
    assert_eq!(first.status, CommitStatus::Settled { seats: 5 });

    let second = h.manager.commit(h.departure_id, "holder-a").await.unwrap();
    assert_eq!(second.status, CommitStatus::ReservationExpired);
    assert_eq!(second.departure.booked_seats, 5);

    assert_eq!(h.metrics.committed.load(Ordering::Relaxed), 1);
    assert_eq!(h.metrics.expired_commits.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_expiry_frees_capacity_for_the_next_holder() {
    let h = harness(50, 0);

    h.manager.reserve(h.departure_id, "holder-b", 40).await.unwrap();

    // Before the TTL lapses, the seats are still held.
    let err = h
        .manager
        .reserve(h.departure_id, "holder-d", 40)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        InventoryError::InsufficientCapacity { available: 10, .. }
    ));

    // TTL lapse is indistinguishable from an explicit release.
    h.reservations.force_expire(h.departure_id, "holder-b");

    let outcome = h.manager.reserve(h.departure_id, "holder-d", 40).await.unwrap();
    assert!(matches!(outcome, ReserveOutcome::Reserved(_)));
}

#[tokio::test]
async fn test_release_and_abort_free_seats_identically() {
    let h = harness(50, 0);

    h.manager.reserve(h.departure_id, "holder-a", 30).await.unwrap();
    assert!(h.manager.release(h.departure_id, "holder-a").await.unwrap());
    assert_eq!(h.manager.available_seats(h.departure_id).await.unwrap(), 50);

    h.manager.reserve(h.departure_id, "holder-b", 30).await.unwrap();
    h.manager.abort(h.departure_id, "holder-b").await.unwrap();
    assert_eq!(h.manager.available_seats(h.departure_id).await.unwrap(), 50);

    // No durable side effect from either path.
    let row = h
        .capacity
        .get_departure(h.departure_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.booked_seats, 0);
}

#[tokio::test]
async fn test_snapshot_invalidation_keeps_reads_honest() {
    let h = harness(50, 0);

    h.manager.reserve(h.departure_id, "holder-a", 5).await.unwrap();
    h.manager.reserve(h.departure_id, "holder-b", 3).await.unwrap();
    assert_eq!(h.manager.available_seats(h.departure_id).await.unwrap(), 42);

    // Release drops the snapshot outright; the next read recomputes.
    h.manager.release(h.departure_id, "holder-b").await.unwrap();
    assert_eq!(h.snapshots.get(h.departure_id).await, None);
    assert_eq!(h.manager.available_seats(h.departure_id).await.unwrap(), 45);

    // Commit invalidates too: booked moves from the hold column to the
    // durable counter without changing the total.
    h.manager.commit(h.departure_id, "holder-a").await.unwrap();
    assert_eq!(h.snapshots.get(h.departure_id).await, None);
    assert_eq!(h.manager.available_seats(h.departure_id).await.unwrap(), 45);

    assert!(h.metrics.snapshot_misses.load(Ordering::Relaxed) >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_boundary_race_sells_the_last_seat_once() {
    let h = harness(50, 49);

    let m1 = h.manager.clone();
    let m2 = h.manager.clone();
    let departure_id = h.departure_id;

    let first = tokio::spawn(async move { m1.reserve(departure_id, "holder-x", 1).await });
    let second = tokio::spawn(async move { m2.reserve(departure_id, "holder-y", 1).await });

    let results = [first.await.unwrap(), second.await.unwrap()];

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one reserve may win the last seat");

    let loser = results.into_iter().find(|r| r.is_err()).unwrap().unwrap_err();
    assert!(matches!(
        loser,
        InventoryError::InsufficientCapacity {
            requested: 1,
            available: 0
        }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_burst_never_exceeds_capacity() {
    let h = harness(10, 0);

    let mut handles = Vec::new();
    for i in 0..20 {
        let manager = h.manager.clone();
        let departure_id = h.departure_id;
        let seats = (i % 3) + 1;
        handles.push(tokio::spawn(async move {
            manager
                .reserve(departure_id, &format!("holder-{}", i), seats)
                .await
        }));
    }

    let mut granted = 0;
    for handle in handles {
        if let Ok(ReserveOutcome::Reserved(reservation)) = handle.await.unwrap() {
            granted += reservation.seats;
        }
    }

    let active: i32 = h
        .reservations
        .list_for_departure(h.departure_id)
        .await
        .unwrap()
        .iter()
        .map(|r| r.seats)
        .sum();
    let row = h
        .capacity
        .get_departure(h.departure_id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(active, granted);
    assert!(
        row.booked_seats + active <= row.capacity,
        "booked {} + held {} exceeds capacity {}",
        row.booked_seats,
        active,
        row.capacity
    );
}

/// Capacity store whose reads can be switched off, standing in for an
/// unreachable durable store.
struct FlakyCapacityStore {
    inner: InMemoryCapacityStore,
    down: AtomicBool,
}

impl FlakyCapacityStore {
    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl CapacityStore for FlakyCapacityStore {
    async fn get_departure(
        &self,
        departure_id: Uuid,
    ) -> StoreResult<Option<DepartureCapacity>> {
        if self.down.load(Ordering::SeqCst) {
            return Err("connection refused".into());
        }
        self.inner.get_departure(departure_id).await
    }

    async fn add_booked_seats(
        &self,
        departure_id: Uuid,
        seats: i32,
    ) -> StoreResult<Option<DepartureCapacity>> {
        if self.down.load(Ordering::SeqCst) {
            return Err("connection refused".into());
        }
        self.inner.add_booked_seats(departure_id, seats).await
    }
}

#[tokio::test]
async fn test_read_path_serves_stale_when_durable_store_is_down() {
    let departure_id = Uuid::new_v4();
    let flaky = Arc::new(FlakyCapacityStore {
        inner: InMemoryCapacityStore::new(),
        down: AtomicBool::new(false),
    });
    flaky.inner.insert(DepartureCapacity {
        departure_id,
        capacity: 50,
        booked_seats: 10,
    });

    // Zero snapshot TTL: every fresh read misses, but the stale copy
    // sticks around until invalidated.
    let snapshots = Arc::new(InMemorySnapshotCache::new(0));
    let manager = SeatReservationManager::new(
        flaky.clone(),
        Arc::new(InMemoryReservationStore::new()),
        Arc::new(InMemoryDepartureLock::new()),
        snapshots.clone(),
        Arc::new(CountingMetrics::new()),
        ReservationRules::default(),
    );

    assert_eq!(manager.available_seats(departure_id).await.unwrap(), 40);

    flaky.set_down(true);
    // Bounded staleness beats hard failure on the pure read path.
    assert_eq!(manager.available_seats(departure_id).await.unwrap(), 40);

    // With no stale value either, the failure propagates.
    snapshots.invalidate(departure_id).await;
    let err = manager.available_seats(departure_id).await.unwrap_err();
    assert!(matches!(err, InventoryError::DependencyUnavailable(_)));

    // Write paths always fail closed while the store is down.
    let err = manager
        .reserve(departure_id, "holder-a", 1)
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::DependencyUnavailable(_)));
}

/// Capacity store whose calls never resolve, standing in for a stalled
/// database connection.
struct StalledCapacityStore;

#[async_trait]
impl CapacityStore for StalledCapacityStore {
    async fn get_departure(
        &self,
        _departure_id: Uuid,
    ) -> StoreResult<Option<DepartureCapacity>> {
        std::future::pending().await
    }

    async fn add_booked_seats(
        &self,
        _departure_id: Uuid,
        _seats: i32,
    ) -> StoreResult<Option<DepartureCapacity>> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_stalled_store_times_out_instead_of_hanging() {
    let manager = SeatReservationManager::new(
        Arc::new(StalledCapacityStore),
        Arc::new(InMemoryReservationStore::new()),
        Arc::new(InMemoryDepartureLock::new()),
        Arc::new(InMemorySnapshotCache::new(20)),
        Arc::new(CountingMetrics::new()),
        ReservationRules {
            dependency_timeout_ms: 50,
            ..ReservationRules::default()
        },
    );
    let departure_id = Uuid::new_v4();

    let err = manager.reserve(departure_id, "holder-a", 1).await.unwrap_err();
    assert!(matches!(err, InventoryError::DependencyUnavailable(_)));

    let err = manager.available_seats(departure_id).await.unwrap_err();
    assert!(matches!(err, InventoryError::DependencyUnavailable(_)));

    let err = manager.commit(departure_id, "holder-a").await.unwrap_err();
    assert!(matches!(err, InventoryError::DependencyUnavailable(_)));
}

/// Reservation store whose departure scan fails while everything else
/// works, standing in for a partial cache outage.
struct FailingScanReservationStore {
    inner: InMemoryReservationStore,
}

#[async_trait]
impl ReservationStore for FailingScanReservationStore {
    async fn get(
        &self,
        departure_id: Uuid,
        holder_id: &str,
    ) -> StoreResult<Option<Reservation>> {
        self.inner.get(departure_id, holder_id).await
    }

    async fn put(&self, reservation: &Reservation) -> StoreResult<()> {
        self.inner.put(reservation).await
    }

    async fn delete(&self, departure_id: Uuid, holder_id: &str) -> StoreResult<bool> {
        self.inner.delete(departure_id, holder_id).await
    }

    async fn list_for_departure(&self, _departure_id: Uuid) -> StoreResult<Vec<Reservation>> {
        Err("scan failed".into())
    }

    async fn list_all(&self) -> StoreResult<Vec<Reservation>> {
        self.inner.list_all().await
    }
}

#[tokio::test]
async fn test_degraded_scan_figure_is_served_but_not_cached() {
    let departure_id = Uuid::new_v4();
    let capacity = Arc::new(InMemoryCapacityStore::new());
    capacity.insert(DepartureCapacity {
        departure_id,
        capacity: 50,
        booked_seats: 10,
    });
    let snapshots = Arc::new(InMemorySnapshotCache::new(20));
    let manager = SeatReservationManager::new(
        capacity,
        Arc::new(FailingScanReservationStore {
            inner: InMemoryReservationStore::new(),
        }),
        Arc::new(InMemoryDepartureLock::new()),
        snapshots.clone(),
        Arc::new(CountingMetrics::new()),
        ReservationRules::default(),
    );

    // Scan failure degrades to the durable-only figure, which ignores
    // active holds and can overstate availability.
    assert_eq!(manager.available_seats(departure_id).await.unwrap(), 40);

    // The overstated figure must not be served to other readers.
    assert_eq!(snapshots.get(departure_id).await, None);
    assert_eq!(snapshots.get_stale(departure_id).await, None);
}

#[tokio::test]
async fn test_available_seats_unknown_departure() {
    let h = harness(50, 0);
    let err = h.manager.available_seats(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, InventoryError::NotFound(_)));
}

#[tokio::test]
async fn test_expired_hold_does_not_count_toward_availability() {
    let h = harness(50, 0);

    h.manager.reserve(h.departure_id, "holder-a", 5).await.unwrap();
    h.reservations.force_expire(h.departure_id, "holder-a");

    // The snapshot written at reserve time still says 45; once it is
    // dropped, recomputation ignores the lapsed entry.
    h.snapshots.invalidate(h.departure_id).await;
    assert_eq!(h.manager.available_seats(h.departure_id).await.unwrap(), 50);

    // A lapsed hold is no longer re-entrant; reserve creates a new one.
    let outcome = h.manager.reserve(h.departure_id, "holder-a", 2).await.unwrap();
    assert!(matches!(outcome, ReserveOutcome::Reserved(_)));
}
