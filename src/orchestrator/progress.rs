//! Progress summaries for display.

use serde::Serialize;

use crate::remote::{Encoding, JobStatus, Video};

const UNEXPLAINED_FAILURE: &str = "An unexplained error occurred.";

/// Display status of a file's in-flight transcodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProgressStatus {
    Success,
    Queued,
    Encoding { progress: f32 },
    Failed { reason: String },
}

/// Summarizes tracked videos and their encodings.
///
/// The remote service reports both waiting and running encodings as
/// `processing`; only `started_at` tells them apart.
pub fn summarize(jobs: &[(Video, Vec<Encoding>)]) -> ProgressStatus {
    for (video, encodings) in jobs {
        if video.status == JobStatus::Fail {
            return ProgressStatus::Failed {
                reason: video
                    .error_message
                    .clone()
                    .unwrap_or_else(|| UNEXPLAINED_FAILURE.to_string()),
            };
        }
        if let Some(failed) = encodings.iter().find(|e| e.status == JobStatus::Fail) {
            return ProgressStatus::Failed {
                reason: failed.failure_reason(),
            };
        }
    }

    let all_done = jobs.iter().all(|(video, encodings)| {
        video.status == JobStatus::Success && encodings.iter().all(|e| e.status == JobStatus::Success)
    });
    if all_done {
        return ProgressStatus::Success;
    }

    let started: Vec<&Encoding> = jobs
        .iter()
        .flat_map(|(_, encodings)| encodings)
        .filter(|e| e.status == JobStatus::Processing && e.started_at.is_some())
        .collect();
    if started.is_empty() {
        return ProgressStatus::Queued;
    }

    let total: f32 = started
        .iter()
        .map(|e| e.encoding_progress.unwrap_or(0.0).clamp(0.0, 100.0))
        .sum();
    ProgressStatus::Encoding {
        progress: total / started.len() as f32,
    }
}
