//! Remote transcoding service records.

use serde::{Deserialize, Serialize};

/// Status of a remote video or encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted but not picked up yet.
    Queued,
    /// Being fetched or encoded.
    Processing,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Fail,
}

impl JobStatus {
    /// Returns true for `success` and `fail`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Fail)
    }

    /// The value accepted by the remote list filters, if any.
    ///
    /// The service only filters on `success`, `fail` and `processing`.
    pub fn as_filter(self) -> Option<&'static str> {
        match self {
            Self::Processing => Some("processing"),
            Self::Success => Some("success"),
            Self::Fail => Some("fail"),
            Self::Queued => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Processing => write!(f, "processing"),
            Self::Success => write!(f, "success"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// A source video submitted to the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub status: JobStatus,

    /// Duration in milliseconds.
    #[serde(default)]
    pub duration: Option<u64>,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub height: Option<u32>,

    #[serde(default)]
    pub file_size: Option<u64>,

    /// Extension including the leading dot, e.g. ".mp4".
    #[serde(default, rename = "extname")]
    pub extension: Option<String>,

    #[serde(default)]
    pub source_url: Option<String>,

    #[serde(default)]
    pub original_filename: Option<String>,

    #[serde(default)]
    pub audio_bitrate: Option<u64>,

    #[serde(default)]
    pub video_bitrate: Option<u64>,

    #[serde(default)]
    pub error_message: Option<String>,

    #[serde(default)]
    pub created_at: Option<String>,

    #[serde(default)]
    pub updated_at: Option<String>,
}

/// One output variant (profile application) of a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    pub id: String,
    pub video_id: String,
    pub profile_id: String,

    #[serde(default)]
    pub profile_name: Option<String>,

    pub status: JobStatus,

    /// Percent complete, only meaningful while processing.
    #[serde(default)]
    pub encoding_progress: Option<f32>,

    /// Absent while the encoding is still waiting in the remote queue.
    #[serde(default, rename = "started_encoding_at")]
    pub started_at: Option<String>,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub height: Option<u32>,

    #[serde(default)]
    pub file_size: Option<u64>,

    #[serde(default, rename = "extname")]
    pub extension: Option<String>,

    /// Duration in milliseconds.
    #[serde(default)]
    pub duration: Option<u64>,

    #[serde(default)]
    pub audio_bitrate: Option<u64>,

    #[serde(default)]
    pub video_bitrate: Option<u64>,

    #[serde(default)]
    pub error_class: Option<String>,

    #[serde(default)]
    pub error_message: Option<String>,
}

impl Encoding {
    /// Human-readable failure reason for a failed encoding.
    pub fn failure_reason(&self) -> String {
        match &self.error_class {
            Some(class) => format!(
                "{}: {}",
                class,
                self.error_message.as_deref().unwrap_or("")
            ),
            None => "An unexplained error occurred.".to_string(),
        }
    }
}

/// A remote encoding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default, rename = "extname")]
    pub extension: Option<String>,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub height: Option<u32>,

    #[serde(default)]
    pub preset_name: Option<String>,
}

/// The account-level cloud record, used as a credential check and to
/// locate the origin storage bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudInfo {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub s3_videos_bucket: Option<String>,

    #[serde(default)]
    pub s3_private_access: Option<bool>,
}

/// Filter for listing encodings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodingFilter {
    pub status: Option<JobStatus>,
    pub profile_id: Option<String>,
    pub profile_name: Option<String>,
    pub video_id: Option<String>,
}

impl EncodingFilter {
    /// All encodings belonging to one video.
    pub fn for_video(video_id: impl Into<String>) -> Self {
        Self {
            video_id: Some(video_id.into()),
            ..Self::default()
        }
    }

    /// Converts the filter to query parameters, dropping empty fields.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(status) = self.status.and_then(JobStatus::as_filter) {
            params.push(("status".to_string(), status.to_string()));
        }
        let optional = [
            ("profile_id", &self.profile_id),
            ("profile_name", &self.profile_name),
            ("video_id", &self.video_id),
        ];
        for (key, value) in optional {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                params.push((key.to_string(), value.to_string()));
            }
        }
        params
    }
}

/// Whether a read may be served from the client's response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Serve a memoized response when one exists.
    #[default]
    Cached,
    /// Always hit the service, then refresh the memoized entry.
    Refresh,
}
