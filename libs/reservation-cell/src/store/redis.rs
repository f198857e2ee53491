//! Redis-backed store. Every mutation runs as a Lua script so the uniqueness
//! check and the write happen in one server-side step.
//!
//! Key layout under `{prefix}`:
//! - `:rsvp:{id}` hash: data (json), state, patient_id, doctor_id, slot_ms, expires_ms
//! - `:slot:{doctor}:{slot_ms}` id of the Locked/Booked row holding the slot
//! - `:patient:{patient}` set of reservation ids
//! - `:doctor:{doctor}` zset of reservation ids scored by slot_ms
//! - `:lock_expiry` zset of Locked ids scored by expires_ms
//!
//! Keys are derived inside the scripts, so this layout targets a single
//! Redis instance rather than a cluster.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::{AsyncCommands, ErrorKind, RedisError, Script};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Reservation, ReservationState};
use crate::store::ReservationStore;

const SWEEP_BATCH: u64 = 500;

const PRELUDE: &str = r#"
local function row_key(prefix, id) return prefix .. ':rsvp:' .. id end

local function expired_lock(prefix, id, now)
  local row = redis.call('HMGET', row_key(prefix, id), 'state', 'expires_ms')
  return row[1] == 'locked' and (tonumber(row[2]) or 0) < now
end

local function drop(prefix, id)
  local key = row_key(prefix, id)
  local row = redis.call('HMGET', key, 'patient_id', 'doctor_id', 'slot_ms')
  if row[2] then
    local slot_key = prefix .. ':slot:' .. row[2] .. ':' .. row[3]
    if redis.call('GET', slot_key) == id then redis.call('DEL', slot_key) end
    redis.call('ZREM', prefix .. ':doctor:' .. row[2], id)
  end
  if row[1] then redis.call('SREM', prefix .. ':patient:' .. row[1], id) end
  redis.call('ZREM', prefix .. ':lock_expiry', id)
  redis.call('DEL', key)
end
"#;

// ARGV: prefix, id, patient_id, doctor_id, slot_ms, expires_ms, now_ms, data
const INSERT_LOCK: &str = r#"
local prefix, id, patient, doctor = ARGV[1], ARGV[2], ARGV[3], ARGV[4]
local slot_ms, expires_ms, now = ARGV[5], ARGV[6], tonumber(ARGV[7])

for _, owned in ipairs(redis.call('SMEMBERS', prefix .. ':patient:' .. patient)) do
  if expired_lock(prefix, owned, now) then drop(prefix, owned) end
end

local slot_key = prefix .. ':slot:' .. doctor .. ':' .. slot_ms
local holder = redis.call('GET', slot_key)
if holder then
  local state = redis.call('HGET', row_key(prefix, holder), 'state')
  if state == 'booked' then return 0 end
  if state == 'locked' then
    if not expired_lock(prefix, holder, now) then return 0 end
    drop(prefix, holder)
  end
  redis.call('DEL', slot_key)
end

redis.call('HSET', row_key(prefix, id),
  'data', ARGV[8], 'state', 'locked', 'patient_id', patient,
  'doctor_id', doctor, 'slot_ms', slot_ms, 'expires_ms', expires_ms)
redis.call('SET', slot_key, id)
redis.call('SADD', prefix .. ':patient:' .. patient, id)
redis.call('ZADD', prefix .. ':doctor:' .. doctor, slot_ms, id)
redis.call('ZADD', prefix .. ':lock_expiry', expires_ms, id)
return 1
"#;

// ARGV: prefix, id, expected_state, new_state, expires_ms ('0' for none), data, now_ms
const TRANSITION: &str = r#"
local prefix, id, new_state, expires_ms = ARGV[1], ARGV[2], ARGV[4], ARGV[5]
local key = row_key(prefix, id)
if redis.call('HGET', key, 'state') ~= ARGV[3] then return 0 end
if expired_lock(prefix, id, tonumber(ARGV[7])) then return 0 end

redis.call('HSET', key, 'data', ARGV[6], 'state', new_state, 'expires_ms', expires_ms)
if expires_ms == '0' then
  redis.call('ZREM', prefix .. ':lock_expiry', id)
else
  redis.call('ZADD', prefix .. ':lock_expiry', expires_ms, id)
end

if new_state ~= 'locked' and new_state ~= 'booked' then
  local row = redis.call('HMGET', key, 'doctor_id', 'slot_ms')
  local slot_key = prefix .. ':slot:' .. row[1] .. ':' .. row[2]
  if redis.call('GET', slot_key) == id then redis.call('DEL', slot_key) end
end
return 1
"#;

// ARGV: prefix, id, now_ms
const REMOVE_EXPIRED: &str = r#"
if expired_lock(ARGV[1], ARGV[2], tonumber(ARGV[3])) then
  drop(ARGV[1], ARGV[2])
  return 1
end
return 0
"#;

// ARGV: prefix, now_ms, batch
const SWEEP: &str = r#"
local prefix, now = ARGV[1], tonumber(ARGV[2])
local expiry_key = prefix .. ':lock_expiry'
local ids = redis.call('ZRANGEBYSCORE', expiry_key, '-inf', '(' .. ARGV[2], 'LIMIT', 0, tonumber(ARGV[3]))
local removed = 0
for _, id in ipairs(ids) do
  if expired_lock(prefix, id, now) then
    drop(prefix, id)
    removed = removed + 1
  elseif redis.call('HGET', row_key(prefix, id), 'state') ~= 'locked' then
    redis.call('ZREM', expiry_key, id)
  end
end
return {removed, #ids}
"#;

// ARGV: prefix, doctor_id, from_ms, to_ms, now_ms
const ACTIVE_SLOTS: &str = r#"
local prefix, now = ARGV[1], tonumber(ARGV[5])
local ids = redis.call('ZRANGEBYSCORE', prefix .. ':doctor:' .. ARGV[2], ARGV[3], '(' .. ARGV[4])
local held = {}
for _, id in ipairs(ids) do
  local row = redis.call('HMGET', row_key(prefix, id), 'state', 'slot_ms')
  if row[1] == 'booked' or (row[1] == 'locked' and not expired_lock(prefix, id, now)) then
    table.insert(held, row[2])
  end
end
return held
"#;

// ARGV: prefix, patient_id
const PATIENT_ROWS: &str = r#"
local rows = {}
for _, id in ipairs(redis.call('SMEMBERS', ARGV[1] .. ':patient:' .. ARGV[2])) do
  local data = redis.call('HGET', row_key(ARGV[1], id), 'data')
  if data then table.insert(rows, data) end
end
return rows
"#;

struct Scripts {
    insert_lock: Script,
    transition: Script,
    remove_expired: Script,
    sweep: Script,
    active_slots: Script,
    patient_rows: Script,
}

impl Scripts {
    fn load() -> Self {
        let with_prelude = |body: &str| Script::new(&format!("{}\n{}", PRELUDE, body));

        Self {
            insert_lock: with_prelude(INSERT_LOCK),
            transition: with_prelude(TRANSITION),
            remove_expired: with_prelude(REMOVE_EXPIRED),
            sweep: with_prelude(SWEEP),
            active_slots: with_prelude(ACTIVE_SLOTS),
            patient_rows: with_prelude(PATIENT_ROWS),
        }
    }
}

pub struct RedisReservationStore {
    pool: Pool,
    prefix: String,
    scripts: Scripts,
}

impl RedisReservationStore {
    pub async fn new(redis_url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::Backend(format!("Failed to create Redis pool: {}", e)))?;

        let store = Self::from_pool(pool, prefix);

        let mut conn = store.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(classify)?;
        info!("Redis reservation store initialized with prefix {}", store.prefix);

        Ok(store)
    }

    pub fn from_pool(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            scripts: Scripts::load(),
        }
    }

    async fn connection(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Redis connection error: {}", e)))
    }

    fn row_key(&self, id: Uuid) -> String {
        format!("{}:rsvp:{}", self.prefix, id)
    }
}

fn classify(error: RedisError) -> StoreError {
    let retryable = error.is_io_error()
        || error.is_timeout()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
        || matches!(error.kind(), ErrorKind::TryAgain | ErrorKind::BusyLoadingError);

    if retryable {
        StoreError::Unavailable(error.to_string())
    } else {
        StoreError::Backend(error.to_string())
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn expires_arg(reservation: &Reservation) -> String {
    reservation
        .lock_expires_at
        .map_or_else(|| "0".to_string(), |at| millis(at).to_string())
}

#[async_trait]
impl ReservationStore for RedisReservationStore {
    async fn insert_lock(&self, reservation: &Reservation, now: DateTime<Utc>) -> Result<(), StoreError> {
        let data = serde_json::to_string(reservation)?;
        let mut conn = self.connection().await?;

        let inserted: i64 = self
            .scripts
            .insert_lock
            .arg(&self.prefix)
            .arg(reservation.id.to_string())
            .arg(reservation.patient_id.to_string())
            .arg(reservation.doctor_id.to_string())
            .arg(millis(reservation.slot_start))
            .arg(expires_arg(reservation))
            .arg(millis(now))
            .arg(data)
            .invoke_async(&mut conn)
            .await
            .map_err(classify)?;

        if inserted == 1 {
            debug!("Stored lock {} for slot {}", reservation.id, reservation.slot_start);
            Ok(())
        } else {
            Err(StoreError::Conflict)
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Reservation>, StoreError> {
        let mut conn = self.connection().await?;
        let data: Option<String> = conn.hget(self.row_key(id), "data").await.map_err(classify)?;

        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: ReservationState,
        updated: &Reservation,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>, StoreError> {
        let data = serde_json::to_string(updated)?;
        let mut conn = self.connection().await?;

        let swapped: i64 = self
            .scripts
            .transition
            .arg(&self.prefix)
            .arg(id.to_string())
            .arg(expected.as_str())
            .arg(updated.state.as_str())
            .arg(expires_arg(updated))
            .arg(data)
            .arg(millis(now))
            .invoke_async(&mut conn)
            .await
            .map_err(classify)?;

        Ok((swapped == 1).then(|| updated.clone()))
    }

    async fn remove_expired_lock(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;

        let removed: i64 = self
            .scripts
            .remove_expired
            .arg(&self.prefix)
            .arg(id.to_string())
            .arg(millis(now))
            .invoke_async(&mut conn)
            .await
            .map_err(classify)?;

        Ok(removed == 1)
    }

    async fn active_slot_starts(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<BTreeSet<DateTime<Utc>>, StoreError> {
        let mut conn = self.connection().await?;

        let held: Vec<i64> = self
            .scripts
            .active_slots
            .arg(&self.prefix)
            .arg(doctor_id.to_string())
            .arg(millis(from))
            .arg(millis(to))
            .arg(millis(now))
            .invoke_async(&mut conn)
            .await
            .map_err(classify)?;

        held.into_iter()
            .map(|ms| {
                Utc.timestamp_millis_opt(ms)
                    .single()
                    .ok_or_else(|| StoreError::Backend(format!("invalid slot timestamp {}", ms)))
            })
            .collect()
    }

    async fn list_for_patient(&self, patient_id: Uuid) -> Result<Vec<Reservation>, StoreError> {
        let mut conn = self.connection().await?;

        let rows: Vec<String> = self
            .scripts
            .patient_rows
            .arg(&self.prefix)
            .arg(patient_id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(classify)?;

        rows.iter()
            .map(|data| serde_json::from_str(data).map_err(StoreError::from))
            .collect()
    }

    async fn purge_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let mut total = 0;

        loop {
            let (removed, scanned): (u64, u64) = self
                .scripts
                .sweep
                .arg(&self.prefix)
                .arg(millis(now))
                .arg(SWEEP_BATCH)
                .invoke_async(&mut conn)
                .await
                .map_err(classify)?;

            total += removed;
            if scanned < SWEEP_BATCH {
                break;
            }
        }

        Ok(total)
    }
}
