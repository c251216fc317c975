//! Results of reconcile and callback handling.

use serde::Serialize;

use crate::error::TranscodeError;
use crate::remote::{Encoding, JobStatus, Video};
use crate::store::Association;

/// One failed remote object, as reported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureDetail {
    /// Video or encoding id.
    pub remote_id: String,
    pub reason: String,
    /// Remote encoder log, when an origin bucket is known.
    pub log_url: Option<String>,
}

/// What a reconcile of one tracked video did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The video is not associated with the file.
    NotTracked,
    /// The video was already materialized; nothing was done.
    AlreadyComplete,
    /// The video or some encodings are still running.
    Pending {
        video_status: JobStatus,
        waiting: Vec<String>,
    },
    /// The video or some encodings failed. The association stays tracking.
    Failed {
        failures: Vec<FailureDetail>,
        /// False when the failure had already been reported.
        newly_reported: bool,
    },
    /// The host no longer has the source file.
    MissingFile,
    /// Every output was materialized and the association completed.
    Materialized { artifacts: usize },
}

impl ReconcileOutcome {
    /// Metric label for the outcome.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotTracked => "not_tracked",
            Self::AlreadyComplete => "already_complete",
            Self::Pending { .. } => "pending",
            Self::Failed { .. } => "failed",
            Self::MissingFile => "missing_file",
            Self::Materialized { .. } => "materialized",
        }
    }
}

/// Per-video results of reconciling a file.
///
/// Reconciling every tracked video of a file may partially succeed; each
/// video keeps its own result.
#[derive(Debug)]
pub struct ReconcileResult {
    pub file_id: String,
    pub videos: Vec<(String, Result<ReconcileOutcome, TranscodeError>)>,
}

impl ReconcileResult {
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            videos: Vec::new(),
        }
    }

    pub fn push(&mut self, video_id: impl Into<String>, result: Result<ReconcileOutcome, TranscodeError>) {
        self.videos.push((video_id.into(), result));
    }

    /// Number of videos materialized by this reconcile.
    pub fn materialized(&self) -> usize {
        self.videos
            .iter()
            .filter(|(_, r)| matches!(r, Ok(ReconcileOutcome::Materialized { .. })))
            .count()
    }

    /// Videos whose reconcile returned an error.
    pub fn errors(&self) -> impl Iterator<Item = (&str, &TranscodeError)> {
        self.videos
            .iter()
            .filter_map(|(id, r)| r.as_ref().err().map(|e| (id.as_str(), e)))
    }

    /// True when any video failed with a retryable error.
    pub fn has_retryable_errors(&self) -> bool {
        self.errors().any(|(_, e)| e.is_retryable())
    }

    /// The single outcome, for reconciles of one video.
    pub fn into_single(mut self) -> Option<Result<ReconcileOutcome, TranscodeError>> {
        if self.videos.len() == 1 {
            self.videos.pop().map(|(_, r)| r)
        } else {
            None
        }
    }
}

/// What happened to an inbound callback.
#[derive(Debug)]
pub enum CallbackOutcome {
    Reconciled(ReconcileResult),
    /// Unknown or mismatched references; logged, not an error.
    Ignored { reason: String },
}

/// Admin view of one associated video.
#[derive(Debug, Clone, Serialize)]
pub struct VideoStatus {
    pub association: Association,
    /// Only fetched while the association is tracking.
    pub video: Option<Video>,
    pub encodings: Vec<EncodingStatus>,
}

/// An encoding annotated with its profile name.
#[derive(Debug, Clone, Serialize)]
pub struct EncodingStatus {
    pub profile_name: String,
    #[serde(flatten)]
    pub encoding: Encoding,
}
