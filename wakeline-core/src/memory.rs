//! In-memory implementations of the repository traits.
//!
//! Used by tests across the workspace; production wiring lives in
//! `wakeline-store`. Both implementations satisfy the same contracts, so
//! the manager is exercised identically against either.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::departure::DepartureCapacity;
use crate::repository::{
    CapacityStore, DepartureLock, InventoryMetrics, ReservationStore, SettlementJournal,
    SnapshotCache, StoreResult,
};
use crate::reservation::Reservation;

#[derive(Default)]
pub struct InMemoryCapacityStore {
    departures: Mutex<HashMap<Uuid, DepartureCapacity>>,
}

impl InMemoryCapacityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, departure: DepartureCapacity) {
        self.departures
            .lock()
            .unwrap()
            .insert(departure.departure_id, departure);
    }
}

#[async_trait]
impl CapacityStore for InMemoryCapacityStore {
    async fn get_departure(
        &self,
        departure_id: Uuid,
    ) -> StoreResult<Option<DepartureCapacity>> {
        Ok(self.departures.lock().unwrap().get(&departure_id).cloned())
    }

    async fn add_booked_seats(
        &self,
        departure_id: Uuid,
        seats: i32,
    ) -> StoreResult<Option<DepartureCapacity>> {
        let mut departures = self.departures.lock().unwrap();
        match departures.get_mut(&departure_id) {
            Some(row) if row.booked_seats + seats <= row.capacity => {
                row.booked_seats += seats;
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Default)]
pub struct InMemoryReservationStore {
    entries: Mutex<HashMap<(Uuid, String), Reservation>>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: forces a hold's expiry into the past, simulating TTL
    /// lapse without waiting for wall-clock time. The entry stays
    /// physically present until deleted or swept, matching a cache whose
    /// TTL eviction has not yet purged it.
    pub fn force_expire(&self, departure_id: Uuid, holder_id: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(reservation) = entries.get_mut(&(departure_id, holder_id.to_string())) {
            reservation.expires_at = Utc::now() - Duration::seconds(1);
        }
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn get(
        &self,
        departure_id: Uuid,
        holder_id: &str,
    ) -> StoreResult<Option<Reservation>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .get(&(departure_id, holder_id.to_string()))
            .filter(|r| !r.is_expired(Utc::now()))
            .cloned())
    }

    async fn put(&self, reservation: &Reservation) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            (reservation.departure_id, reservation.holder_id.clone()),
            reservation.clone(),
        );
        Ok(())
    }

    async fn delete(&self, departure_id: Uuid, holder_id: &str) -> StoreResult<bool> {
        let mut entries = self.entries.lock().unwrap();
        Ok(entries
            .remove(&(departure_id, holder_id.to_string()))
            .is_some())
    }

    async fn list_for_departure(&self, departure_id: Uuid) -> StoreResult<Vec<Reservation>> {
        let now = Utc::now();
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .values()
            .filter(|r| r.departure_id == departure_id && !r.is_expired(now))
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> StoreResult<Vec<Reservation>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.values().cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryDepartureLock {
    locks: Mutex<HashMap<Uuid, (String, DateTime<Utc>)>>,
}

impl InMemoryDepartureLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DepartureLock for InMemoryDepartureLock {
    async fn try_acquire(
        &self,
        departure_id: Uuid,
        ttl_seconds: u64,
    ) -> StoreResult<Option<String>> {
        let now = Utc::now();
        let mut locks = self.locks.lock().unwrap();
        if let Some((_, expires_at)) = locks.get(&departure_id) {
            if *expires_at > now {
                return Ok(None);
            }
        }
        let token = Uuid::new_v4().to_string();
        locks.insert(
            departure_id,
            (token.clone(), now + Duration::seconds(ttl_seconds as i64)),
        );
        Ok(Some(token))
    }

    async fn release(&self, departure_id: Uuid, token: &str) -> StoreResult<()> {
        let mut locks = self.locks.lock().unwrap();
        if let Some((owner, _)) = locks.get(&departure_id) {
            if owner == token {
                locks.remove(&departure_id);
            }
        }
        Ok(())
    }
}

pub struct InMemorySnapshotCache {
    ttl_seconds: u64,
    entries: Mutex<HashMap<Uuid, (i32, DateTime<Utc>)>>,
}

impl InMemorySnapshotCache {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl_seconds,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn is_fresh(&self, written_at: DateTime<Utc>) -> bool {
        written_at + Duration::seconds(self.ttl_seconds as i64) > Utc::now()
    }
}

#[async_trait]
impl SnapshotCache for InMemorySnapshotCache {
    async fn get(&self, departure_id: Uuid) -> Option<i32> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(&departure_id)
            .filter(|(_, written_at)| self.is_fresh(*written_at))
            .map(|(value, _)| *value)
    }

    async fn put(&self, departure_id: Uuid, available: i32) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(departure_id, (available, Utc::now()));
    }

    async fn narrow(&self, departure_id: Uuid, seats: i32) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&departure_id) {
            Some((value, written_at)) if self.is_fresh(*written_at) => {
                *value = (*value - seats).max(0);
                true
            }
            _ => false,
        }
    }

    async fn invalidate(&self, departure_id: Uuid) {
        self.entries.lock().unwrap().remove(&departure_id);
    }

    async fn get_stale(&self, departure_id: Uuid) -> Option<i32> {
        let entries = self.entries.lock().unwrap();
        entries.get(&departure_id).map(|(value, _)| *value)
    }
}

#[derive(Default)]
pub struct InMemorySettlementJournal {
    processed: Mutex<HashSet<String>>,
}

impl InMemorySettlementJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettlementJournal for InMemorySettlementJournal {
    async fn is_processed(&self, event_id: &str) -> StoreResult<bool> {
        Ok(self.processed.lock().unwrap().contains(event_id))
    }

    async fn mark_processed(&self, event_id: &str) -> StoreResult<()> {
        self.processed.lock().unwrap().insert(event_id.to_string());
        Ok(())
    }
}

/// Atomics-backed metrics sink, readable from tests.
#[derive(Default)]
pub struct CountingMetrics {
    pub created: AtomicU64,
    pub released: AtomicU64,
    pub swept: AtomicU64,
    pub snapshot_hits: AtomicU64,
    pub snapshot_misses: AtomicU64,
    pub committed: AtomicU64,
    pub expired_commits: AtomicU64,
}

impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InventoryMetrics for CountingMetrics {
    fn reservation_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    fn reservation_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    fn reservations_swept(&self, count: u64) {
        self.swept.fetch_add(count, Ordering::Relaxed);
    }

    fn snapshot_hit(&self) {
        self.snapshot_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot_miss(&self) {
        self.snapshot_misses.fetch_add(1, Ordering::Relaxed);
    }

    fn settlement_committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    fn settlement_expired(&self) {
        self.expired_commits.fetch_add(1, Ordering::Relaxed);
    }
}
