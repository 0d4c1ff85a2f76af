use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable capacity counters for a single scheduled sailing.
///
/// `booked_seats` only ever grows through committed settlements; cancelled
/// confirmed bookings are handled outside this core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartureCapacity {
    pub departure_id: Uuid,
    pub capacity: i32,
    pub booked_seats: i32,
}

impl DepartureCapacity {
    /// Seats not consumed by settled bookings. Active holds are not
    /// subtracted here; the manager layers those on top.
    pub fn unbooked(&self) -> i32 {
        (self.capacity - self.booked_seats).max(0)
    }
}
