//! Redis-backed association store.
//!
//! Layout:
//! - `transcode:assoc:{file_id}`: hash of video id to association JSON
//! - `transcode:owners`: hash of video id to owning file id
//! - `transcode:tracking_files`: set of files with tracking associations
//! - `transcode:lock:{file_id}`: advisory per-file lock

use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use redis::{AsyncCommands, Script};

use super::association::{Association, AssociationStore, LockToken};
use crate::error::StoreError;

const ASSOC_PREFIX: &str = "transcode:assoc:";
const OWNERS_KEY: &str = "transcode:owners";
const TRACKING_FILES_KEY: &str = "transcode:tracking_files";
const LOCK_PREFIX: &str = "transcode:lock:";

// KEYS: assoc, owners, tracking files. ARGV: video, record, file.
const TRACK_SCRIPT: &str = r#"
local owner = redis.call('HGET', KEYS[2], ARGV[1])
if owner and owner ~= ARGV[3] then
  return -1
end
if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 0 then
  return 0
end
redis.call('HSET', KEYS[2], ARGV[1], ARGV[3])
redis.call('SADD', KEYS[3], ARGV[3])
return 1
"#;

// KEYS: assoc, tracking files. ARGV: video, now, file.
const COMPLETE_SCRIPT: &str = r#"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw then
  return 0
end
local record = cjson.decode(raw)
if record['marker'] ~= 'tracking' then
  return 0
end
record['marker'] = 'complete'
record['updated_at'] = ARGV[2]
redis.call('HSET', KEYS[1], ARGV[1], cjson.encode(record))
for _, value in ipairs(redis.call('HVALS', KEYS[1])) do
  if cjson.decode(value)['marker'] == 'tracking' then
    return 1
  end
end
redis.call('SREM', KEYS[2], ARGV[3])
return 1
"#;

// KEYS: assoc. ARGV: video, flag, now.
const FLAG_SCRIPT: &str = r#"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw then
  return 0
end
local record = cjson.decode(raw)
record['failure_reported'] = (ARGV[2] == '1')
record['updated_at'] = ARGV[3]
redis.call('HSET', KEYS[1], ARGV[1], cjson.encode(record))
return 1
"#;

// KEYS: assoc, owners, tracking files. ARGV: video, file.
const REMOVE_SCRIPT: &str = r#"
if redis.call('HDEL', KEYS[1], ARGV[1]) == 0 then
  return 0
end
if redis.call('HGET', KEYS[2], ARGV[1]) == ARGV[2] then
  redis.call('HDEL', KEYS[2], ARGV[1])
end
for _, value in ipairs(redis.call('HVALS', KEYS[1])) do
  if cjson.decode(value)['marker'] == 'tracking' then
    return 1
  end
end
redis.call('SREM', KEYS[3], ARGV[2])
return 1
"#;

// KEYS: lock. ARGV: token.
const UNLOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

fn assoc_key(file_id: &str) -> String {
    format!("{}{}", ASSOC_PREFIX, file_id)
}

fn lock_key(file_id: &str) -> String {
    format!("{}{}", LOCK_PREFIX, file_id)
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode(raw: &str) -> Result<Association, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::SerializationFailed(e.to_string()))
}

/// Association store backed by Redis hashes and Lua scripts.
#[derive(Clone)]
pub struct RedisAssociationStore {
    connection: redis::aio::ConnectionManager,
    track_script: Script,
    complete_script: Script,
    flag_script: Script,
    remove_script: Script,
    unlock_script: Script,
}

impl RedisAssociationStore {
    /// Connects to the Redis instance at `redis_url`.
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        let connection = super::connect(redis_url).await?;
        Ok(Self::with_connection(connection))
    }

    /// Wraps an existing connection manager.
    pub fn with_connection(connection: redis::aio::ConnectionManager) -> Self {
        Self {
            connection,
            track_script: Script::new(TRACK_SCRIPT),
            complete_script: Script::new(COMPLETE_SCRIPT),
            flag_script: Script::new(FLAG_SCRIPT),
            remove_script: Script::new(REMOVE_SCRIPT),
            unlock_script: Script::new(UNLOCK_SCRIPT),
        }
    }
}

#[async_trait]
impl AssociationStore for RedisAssociationStore {
    async fn track(&self, file_id: &str, video_id: &str) -> Result<bool, StoreError> {
        let record = serde_json::to_string(&Association::new(file_id, video_id))
            .map_err(|e| StoreError::SerializationFailed(e.to_string()))?;

        let mut conn = self.connection.clone();
        let result: i64 = self
            .track_script
            .key(assoc_key(file_id))
            .key(OWNERS_KEY)
            .key(TRACKING_FILES_KEY)
            .arg(video_id)
            .arg(record)
            .arg(file_id)
            .invoke_async(&mut conn)
            .await?;

        if result < 0 {
            tracing::warn!(
                file_id = %file_id,
                video_id = %video_id,
                "Video is already tracked for another file"
            );
        }
        Ok(result > 0)
    }

    async fn get(&self, file_id: &str, video_id: &str) -> Result<Option<Association>, StoreError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.hget(assoc_key(file_id), video_id).await?;
        raw.as_deref().map(decode).transpose()
    }

    async fn list(&self, file_id: &str, include_completed: bool) -> Result<Vec<Association>, StoreError> {
        let mut conn = self.connection.clone();
        let values: Vec<String> = conn.hvals(assoc_key(file_id)).await?;

        let mut associations = values
            .iter()
            .map(|raw| decode(raw))
            .collect::<Result<Vec<_>, _>>()?;
        associations.retain(|a| include_completed || a.is_tracking());
        associations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(associations)
    }

    async fn mark_complete(&self, file_id: &str, video_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let result: i64 = self
            .complete_script
            .key(assoc_key(file_id))
            .key(TRACKING_FILES_KEY)
            .arg(video_id)
            .arg(now())
            .arg(file_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    async fn set_failure_reported(
        &self,
        file_id: &str,
        video_id: &str,
        reported: bool,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = self
            .flag_script
            .key(assoc_key(file_id))
            .arg(video_id)
            .arg(if reported { "1" } else { "0" })
            .arg(now())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove(&self, file_id: &str, video_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let result: i64 = self
            .remove_script
            .key(assoc_key(file_id))
            .key(OWNERS_KEY)
            .key(TRACKING_FILES_KEY)
            .arg(video_id)
            .arg(file_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    async fn owner_of(&self, video_id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let owner: Option<String> = conn.hget(OWNERS_KEY, video_id).await?;
        Ok(owner)
    }

    async fn tracked_files(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();
        let mut files: Vec<String> = conn.smembers(TRACKING_FILES_KEY).await?;
        files.sort();
        Ok(files)
    }

    async fn try_lock(&self, file_id: &str, ttl: Duration) -> Result<Option<LockToken>, StoreError> {
        let token = LockToken::generate();
        let ttl_ms = ttl.as_millis().max(1) as u64;

        let mut conn = self.connection.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(lock_key(file_id))
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(acquired.map(|_| token))
    }

    async fn unlock(&self, file_id: &str, token: &LockToken) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = self
            .unlock_script
            .key(lock_key(file_id))
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}
