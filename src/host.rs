//! The host media library the reconciler reads from and writes into.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TranscodeError;
use crate::materialize::MaterializedArtifact;
use crate::storage::StoredId;

/// A stored media file as the host knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    pub id: String,

    /// The media item this file belongs to. Artifacts attach here.
    pub media_id: String,

    pub display_name: String,
    pub stored_id: StoredId,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub height: Option<u32>,

    #[serde(default)]
    pub size: Option<u64>,
}

impl MediaFile {
    /// Display name without its extension, used in artifact names.
    pub fn base_name(&self) -> &str {
        match self.display_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.trim(),
            _ => self.display_name.trim(),
        }
    }
}

/// Operations the reconciler needs from the host media library.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaHost: Send + Sync {
    /// Looks up a media file by id.
    async fn media_file(&self, file_id: &str) -> Result<Option<MediaFile>, TranscodeError>;

    /// Sets the media duration in seconds unless one is already recorded.
    /// Returns true when the value was written.
    async fn set_duration_if_unset(&self, media_id: &str, seconds: u64) -> Result<bool, TranscodeError>;

    /// Updates the source file's dimensions and size.
    async fn update_source_file(
        &self,
        file_id: &str,
        width: Option<u32>,
        height: Option<u32>,
        size: Option<u64>,
    ) -> Result<(), TranscodeError>;

    /// Persists an artifact and returns its id.
    ///
    /// Artifacts are keyed by [`MaterializedArtifact::pair_key`]. When the
    /// pair is already stored the existing id is returned and nothing is
    /// written.
    async fn create_artifact(&self, artifact: &MaterializedArtifact) -> Result<String, TranscodeError>;
}
