use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use wakeline_core::{CapacityStore, DepartureCapacity, StoreResult};

pub struct PgCapacityStore {
    pool: PgPool,
}

impl PgCapacityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DepartureRow {
    id: Uuid,
    capacity: i32,
    booked_seats: i32,
}

impl From<DepartureRow> for DepartureCapacity {
    fn from(row: DepartureRow) -> Self {
        Self {
            departure_id: row.id,
            capacity: row.capacity,
            booked_seats: row.booked_seats,
        }
    }
}

#[async_trait]
impl CapacityStore for PgCapacityStore {
    async fn get_departure(
        &self,
        departure_id: Uuid,
    ) -> StoreResult<Option<DepartureCapacity>> {
        let row = sqlx::query_as::<_, DepartureRow>(
            "SELECT id, capacity, booked_seats FROM departures WHERE id = $1",
        )
        .bind(departure_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn add_booked_seats(
        &self,
        departure_id: Uuid,
        seats: i32,
    ) -> StoreResult<Option<DepartureCapacity>> {
        // Single guarded UPDATE: the capacity check and the increment
        // happen in one statement, so concurrent commits can never push
        // booked_seats past capacity.
        let row = sqlx::query_as::<_, DepartureRow>(
            r#"
            UPDATE departures
            SET booked_seats = booked_seats + $2, updated_at = NOW()
            WHERE id = $1 AND booked_seats + $2 <= capacity
            RETURNING id, capacity, booked_seats
            "#,
        )
        .bind(departure_id)
        .bind(seats)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }
}
