use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, RedisResult};
use tracing::warn;
use uuid::Uuid;

use wakeline_core::{DepartureLock, Reservation, ReservationStore, SnapshotCache, StoreResult};

/// Redis-backed reservation store, availability snapshot cache and
/// per-departure advisory lock.
///
/// Key layout, all scoped under a deployment prefix:
///   <prefix>:seatlock:<departure_id>:<holder_id>   reservation entries
///   <prefix>:availability:<departure_id>           fresh snapshot
///   <prefix>:availability:<departure_id>:stale     long-TTL stale copy
///   <prefix>:departure_lock:<departure_id>         advisory lock token
///
/// Reservation keys stay prefix-scannable per departure without touching
/// snapshot or lock keys.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    prefix: String,
    snapshot_ttl_seconds: u64,
    stale_ttl_seconds: u64,
}

impl RedisClient {
    pub fn new(
        connection_string: &str,
        key_prefix: &str,
        snapshot_ttl_seconds: u64,
        stale_ttl_seconds: u64,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            prefix: key_prefix.to_string(),
            snapshot_ttl_seconds,
            stale_ttl_seconds,
        })
    }

    fn reservation_key(&self, departure_id: Uuid, holder_id: &str) -> String {
        format!("{}:seatlock:{}:{}", self.prefix, departure_id, holder_id)
    }

    fn departure_pattern(&self, departure_id: Uuid) -> String {
        format!("{}:seatlock:{}:*", self.prefix, departure_id)
    }

    fn all_reservations_pattern(&self) -> String {
        format!("{}:seatlock:*", self.prefix)
    }

    fn availability_key(&self, departure_id: Uuid) -> String {
        format!("{}:availability:{}", self.prefix, departure_id)
    }

    fn availability_stale_key(&self, departure_id: Uuid) -> String {
        format!("{}:availability:{}:stale", self.prefix, departure_id)
    }

    fn lock_key(&self, departure_id: Uuid) -> String {
        format!("{}:departure_lock:{}", self.prefix, departure_id)
    }

    /// Fetches reservation entries matching `pattern`. The keyspace is
    /// bounded by active checkouts, so KEYS stays cheap here.
    async fn fetch_reservations(&self, pattern: &str) -> RedisResult<Vec<Reservation>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        let mut reservations = Vec::new();
        for (key, value) in keys.iter().zip(values) {
            let Some(raw) = value else { continue };
            match serde_json::from_str::<Reservation>(&raw) {
                Ok(reservation) => reservations.push(reservation),
                Err(e) => warn!("Skipping malformed reservation entry {}: {}", key, e),
            }
        }
        Ok(reservations)
    }

    async fn read_snapshot(&self, key: &str) -> RedisResult<Option<i32>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.get(key).await
    }
}

#[async_trait]
impl ReservationStore for RedisClient {
    async fn get(
        &self,
        departure_id: Uuid,
        holder_id: &str,
    ) -> StoreResult<Option<Reservation>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(self.reservation_key(departure_id, holder_id)).await?;

        let Some(raw) = raw else { return Ok(None) };
        let reservation: Reservation = serde_json::from_str(&raw)?;

        // A lapsed entry the TTL eviction has not purged yet counts as
        // absent; the sweep will remove it.
        if reservation.is_expired(Utc::now()) {
            return Ok(None);
        }
        Ok(Some(reservation))
    }

    async fn put(&self, reservation: &Reservation) -> StoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = self.reservation_key(reservation.departure_id, &reservation.holder_id);
        let ttl_seconds = (reservation.expires_at - Utc::now()).num_seconds().max(1) as u64;
        let payload = serde_json::to_string(reservation)?;
        conn.set_ex::<_, _, ()>(key, payload, ttl_seconds).await?;
        Ok(())
    }

    async fn delete(&self, departure_id: Uuid, holder_id: &str) -> StoreResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let removed: i64 = conn.del(self.reservation_key(departure_id, holder_id)).await?;
        Ok(removed > 0)
    }

    async fn list_for_departure(&self, departure_id: Uuid) -> StoreResult<Vec<Reservation>> {
        let now = Utc::now();
        let reservations = self
            .fetch_reservations(&self.departure_pattern(departure_id))
            .await?;
        Ok(reservations
            .into_iter()
            .filter(|r| !r.is_expired(now))
            .collect())
    }

    async fn list_all(&self) -> StoreResult<Vec<Reservation>> {
        Ok(self
            .fetch_reservations(&self.all_reservations_pattern())
            .await?)
    }
}

#[async_trait]
impl DepartureLock for RedisClient {
    async fn try_acquire(
        &self,
        departure_id: Uuid,
        ttl_seconds: u64,
    ) -> StoreResult<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let token = Uuid::new_v4().to_string();

        // SET NX: only set if key does not exist
        let result: Option<String> = redis::cmd("SET")
            .arg(self.lock_key(departure_id))
            .arg(&token)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;

        Ok(result.map(|_| token))
    }

    async fn release(&self, departure_id: Uuid, token: &str) -> StoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // Token-checked delete so a lock that expired and was re-acquired
        // by another process is never released by the old owner.
        let script = redis::Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
        "#,
        );
        let _: i64 = script
            .key(self.lock_key(departure_id))
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotCache for RedisClient {
    async fn get(&self, departure_id: Uuid) -> Option<i32> {
        match self.read_snapshot(&self.availability_key(departure_id)).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Availability snapshot read failed, treating as miss: {}", e);
                None
            }
        }
    }

    async fn put(&self, departure_id: Uuid, available: i32) {
        let result: RedisResult<()> = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let _: () = redis::pipe()
                .set_ex(
                    self.availability_key(departure_id),
                    available,
                    self.snapshot_ttl_seconds,
                )
                .set_ex(
                    self.availability_stale_key(departure_id),
                    available,
                    self.stale_ttl_seconds,
                )
                .query_async(&mut conn)
                .await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!("Failed to write availability snapshot for {}: {}", departure_id, e);
        }
    }

    async fn narrow(&self, departure_id: Uuid, seats: i32) -> bool {
        let result: RedisResult<Option<i64>> = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            // If the snapshot exists, decrement it in place keeping its
            // TTL, clamped at zero. If not, return nil and let the next
            // read re-seed it from ground truth.
            let script = redis::Script::new(
                r#"
                if redis.call("EXISTS", KEYS[1]) == 1 then
                    local v = redis.call("DECRBY", KEYS[1], ARGV[1])
                    if v < 0 then
                        redis.call("SET", KEYS[1], 0, "KEEPTTL")
                        v = 0
                    end
                    return v
                else
                    return nil
                end
            "#,
            );
            script
                .key(self.availability_key(departure_id))
                .arg(seats)
                .invoke_async(&mut conn)
                .await
        }
        .await;

        match result {
            Ok(narrowed) => narrowed.is_some(),
            Err(e) => {
                warn!("Failed to narrow availability snapshot for {}: {}", departure_id, e);
                false
            }
        }
    }

    async fn invalidate(&self, departure_id: Uuid) {
        let result: RedisResult<()> = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let _: () = redis::pipe()
                .del(self.availability_key(departure_id))
                .del(self.availability_stale_key(departure_id))
                .query_async(&mut conn)
                .await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!("Failed to invalidate availability snapshot for {}: {}", departure_id, e);
        }
    }

    async fn get_stale(&self, departure_id: Uuid) -> Option<i32> {
        match self
            .read_snapshot(&self.availability_stale_key(departure_id))
            .await
        {
            Ok(value) => value,
            Err(e) => {
                warn!("Stale availability read failed for {}: {}", departure_id, e);
                None
            }
        }
    }
}
