use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A short-lived hold on `seats` seats for one holder on one departure.
///
/// At most one reservation exists per `(departure_id, holder_id)` pair;
/// entries are removed by commit, abort, release, TTL expiry or the
/// background sweep, all of which are idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub departure_id: Uuid,
    pub holder_id: String,
    pub seats: i32,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(
        departure_id: Uuid,
        holder_id: impl Into<String>,
        seats: i32,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            departure_id,
            holder_id: holder_id.into(),
            seats,
            expires_at: Utc::now() + Duration::seconds(ttl_seconds as i64),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
