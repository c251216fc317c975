//! Redis-backed media library for standalone deployments.
//!
//! Files are JSON records under `media:file:{id}`. Artifacts live in the
//! hash `media:artifacts:{media_id}`, one field per (remote object, base URL)
//! pair, and media durations under `media:duration:{media_id}`.

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, TranscodeError};
use crate::host::{MediaFile, MediaHost};
use crate::materialize::MaterializedArtifact;

const FILE_PREFIX: &str = "media:file:";
const ARTIFACTS_PREFIX: &str = "media:artifacts:";
const DURATION_PREFIX: &str = "media:duration:";

/// Media library records kept in Redis.
#[derive(Clone)]
pub struct RedisMediaHost {
    connection: redis::aio::ConnectionManager,
}

impl RedisMediaHost {
    /// Connects to the Redis instance at `redis_url`.
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        Ok(Self {
            connection: super::connect(redis_url).await?,
        })
    }

    pub fn with_connection(connection: redis::aio::ConnectionManager) -> Self {
        Self { connection }
    }

    /// Registers (or replaces) a media file record.
    pub async fn register_file(&self, file: &MediaFile) -> Result<(), StoreError> {
        let json =
            serde_json::to_string(file).map_err(|e| StoreError::SerializationFailed(e.to_string()))?;
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(format!("{}{}", FILE_PREFIX, file.id), json)
            .await?;
        Ok(())
    }

    /// Lists the artifacts created for a media item, oldest first.
    pub async fn artifacts(&self, media_id: &str) -> Result<Vec<MaterializedArtifact>, StoreError> {
        let mut conn = self.connection.clone();
        let raw: Vec<String> = conn
            .hvals(format!("{}{}", ARTIFACTS_PREFIX, media_id))
            .await?;
        let mut artifacts = raw
            .iter()
            .map(|json| parse_stored(json).map(|stored| stored.artifact))
            .collect::<Result<Vec<_>, _>>()?;
        artifacts.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        Ok(artifacts)
    }

    /// The recorded media duration in seconds.
    pub async fn duration(&self, media_id: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.connection.clone();
        let seconds: Option<u64> = conn.get(format!("{}{}", DURATION_PREFIX, media_id)).await?;
        Ok(seconds)
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StoredArtifact {
    id: String,
    #[serde(flatten)]
    artifact: MaterializedArtifact,
}

fn parse_stored(json: &str) -> Result<StoredArtifact, StoreError> {
    serde_json::from_str(json).map_err(|e| StoreError::SerializationFailed(e.to_string()))
}

#[async_trait]
impl MediaHost for RedisMediaHost {
    async fn media_file(&self, file_id: &str) -> Result<Option<MediaFile>, TranscodeError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn
            .get(format!("{}{}", FILE_PREFIX, file_id))
            .await
            .map_err(StoreError::from)?;

        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::SerializationFailed(e.to_string()).into()),
            None => Ok(None),
        }
    }

    async fn set_duration_if_unset(&self, media_id: &str, seconds: u64) -> Result<bool, TranscodeError> {
        let mut conn = self.connection.clone();
        let written: bool = conn
            .set_nx(format!("{}{}", DURATION_PREFIX, media_id), seconds)
            .await
            .map_err(StoreError::from)?;
        Ok(written)
    }

    async fn update_source_file(
        &self,
        file_id: &str,
        width: Option<u32>,
        height: Option<u32>,
        size: Option<u64>,
    ) -> Result<(), TranscodeError> {
        let Some(mut file) = self.media_file(file_id).await? else {
            return Err(TranscodeError::Host(format!("media file '{}' not found", file_id)));
        };
        file.width = width.or(file.width);
        file.height = height.or(file.height);
        file.size = size.or(file.size);
        self.register_file(&file).await?;
        Ok(())
    }

    async fn create_artifact(&self, artifact: &MaterializedArtifact) -> Result<String, TranscodeError> {
        let stored = StoredArtifact {
            id: Uuid::new_v4().to_string(),
            artifact: artifact.clone(),
        };
        let json = serde_json::to_string(&stored)
            .map_err(|e| StoreError::SerializationFailed(e.to_string()))?;

        let key = format!("{}{}", ARTIFACTS_PREFIX, artifact.media_id);
        let field = artifact.pair_key();

        let mut conn = self.connection.clone();
        let written: bool = conn
            .hset_nx(&key, &field, json)
            .await
            .map_err(StoreError::from)?;
        if written {
            return Ok(stored.id);
        }

        let existing: String = conn.hget(&key, &field).await.map_err(StoreError::from)?;
        let existing = parse_stored(&existing)?;
        debug!(artifact_id = %existing.id, pair = %field, "Artifact already stored");
        Ok(existing.id)
    }
}

