pub mod departure;
pub mod memory;
pub mod repository;
pub mod reservation;

pub use departure::DepartureCapacity;
pub use repository::{
    CapacityStore, DepartureLock, InventoryMetrics, NoopMetrics, ReservationStore,
    SettlementJournal, SnapshotCache, StoreResult,
};
pub use reservation::Reservation;

use uuid::Uuid;

/// Error taxonomy for the seat inventory core.
///
/// `ReservationExpired` is deliberately absent: a commit against a lapsed
/// hold still succeeds from the settlement handler's point of view and is
/// reported through `CommitStatus`, not as a failure.
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Departure not found: {0}")]
    NotFound(Uuid),

    #[error("Insufficient capacity: requested {requested}, available {available}")]
    InsufficientCapacity { requested: i32, available: i32 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),
}

impl InventoryError {
    pub fn dependency(context: &str, err: impl std::fmt::Display) -> Self {
        Self::DependencyUnavailable(format!("{}: {}", context, err))
    }
}

pub type InventoryResult<T> = Result<T, InventoryError>;
