//! Association records linking local files to remote videos.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Completion state of one (file, video) association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMarker {
    /// Still open; reconcile it.
    Tracking,
    /// Materialized. Kept so the video is never materialized twice.
    Complete,
}

impl std::fmt::Display for CompletionMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tracking => write!(f, "tracking"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// A remote video tracked for a local file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub file_id: String,
    pub video_id: String,
    pub marker: CompletionMarker,

    /// Set once a remote failure has been reported, cleared by a retry.
    #[serde(default)]
    pub failure_reported: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Association {
    /// Creates a new tracking association.
    pub fn new(file_id: impl Into<String>, video_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            file_id: file_id.into(),
            video_id: video_id.into(),
            marker: CompletionMarker::Tracking,
            failure_reported: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.marker == CompletionMarker::Tracking
    }
}

/// Proof of holding a per-file lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    /// Creates a random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Durable (file, video) association storage.
///
/// Each (file, video) pair appears at most once. A video id belongs to a
/// single file.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssociationStore: Send + Sync {
    /// Starts tracking a video for a file. Returns false if the pair exists.
    async fn track(&self, file_id: &str, video_id: &str) -> Result<bool, StoreError>;

    /// Fetches one association.
    async fn get(&self, file_id: &str, video_id: &str) -> Result<Option<Association>, StoreError>;

    /// Lists a file's associations, optionally including completed ones.
    async fn list(&self, file_id: &str, include_completed: bool) -> Result<Vec<Association>, StoreError>;

    /// Atomically moves a tracking association to complete.
    ///
    /// Returns true only for the call that performed the transition.
    async fn mark_complete(&self, file_id: &str, video_id: &str) -> Result<bool, StoreError>;

    /// Sets or clears the failure-reported flag.
    async fn set_failure_reported(
        &self,
        file_id: &str,
        video_id: &str,
        reported: bool,
    ) -> Result<(), StoreError>;

    /// Deletes an association. Returns false if it did not exist.
    async fn remove(&self, file_id: &str, video_id: &str) -> Result<bool, StoreError>;

    /// The file a video is tracked for, if any.
    async fn owner_of(&self, video_id: &str) -> Result<Option<String>, StoreError>;

    /// Files with at least one tracking association.
    async fn tracked_files(&self) -> Result<Vec<String>, StoreError>;

    /// Tries to take the per-file lock for `ttl`.
    async fn try_lock(&self, file_id: &str, ttl: Duration) -> Result<Option<LockToken>, StoreError>;

    /// Releases the lock if `token` still holds it.
    async fn unlock(&self, file_id: &str, token: &LockToken) -> Result<(), StoreError>;
}
