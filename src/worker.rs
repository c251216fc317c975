//! Background reconcile loop.
//!
//! Each pass walks every file with tracking associations and reconciles it.
//! Transport errors are retried with exponential backoff up to the
//! configured attempt count; anything else waits for the next pass.
//! Memoized remote responses live for one pass at most.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::model::RetryConfig;
use crate::error::TranscodeError;
use crate::notify::Metrics;
use crate::orchestrator::{JobOrchestrator, ReconcileResult};

/// Retry schedule for reconciles that hit transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    /// Delay before attempt `attempt + 1`, doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// What to do after `attempt` failed attempts.
    pub fn next_action(&self, attempt: u32, error: &str) -> RetryAction {
        if attempt < self.max_attempts {
            RetryAction::Retrying {
                attempt,
                max_attempts: self.max_attempts,
                delay: self.backoff(attempt),
            }
        } else {
            RetryAction::GaveUp {
                reason: format!("Exhausted {} attempts. Last error: {}", self.max_attempts, error),
            }
        }
    }
}

/// Result of a failed reconcile attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryAction {
    /// Another attempt follows after `delay`.
    Retrying {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
    /// No attempts left; the next pass tries again.
    GaveUp { reason: String },
}

/// Counts from one pass over the tracked files.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub files: usize,
    pub materialized: usize,
    pub errors: usize,
}

/// Periodically reconciles every tracked file.
pub struct ReconcileWorker {
    orchestrator: Arc<JobOrchestrator>,
    poll_interval: Duration,
    retry: RetryPolicy,
    metrics: Option<Arc<Metrics>>,
}

impl ReconcileWorker {
    pub fn new(orchestrator: Arc<JobOrchestrator>, poll_interval: Duration, retry: RetryPolicy) -> Self {
        Self {
            orchestrator,
            poll_interval,
            retry,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs passes until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.poll_interval.as_secs(), "Starting reconcile worker");

        loop {
            let summary = self.run_pass().await;
            if summary.files > 0 {
                info!(
                    files = summary.files,
                    materialized = summary.materialized,
                    errors = summary.errors,
                    "Reconcile pass finished"
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reconcile worker stopped");
    }

    /// Reconciles every file that has tracking associations once.
    pub async fn run_pass(&self) -> PassSummary {
        self.orchestrator.invalidate_caches().await;
        let summary = self.reconcile_tracked().await;
        self.orchestrator.invalidate_caches().await;
        summary
    }

    async fn reconcile_tracked(&self) -> PassSummary {
        let files = match self.orchestrator.store().tracked_files().await {
            Ok(files) => files,
            Err(e) => {
                error!(error = %e, "Failed to list tracked files");
                return PassSummary::default();
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.set_tracked_files(files.len());
        }

        let mut summary = PassSummary {
            files: files.len(),
            ..PassSummary::default()
        };

        for file_id in files {
            match self.reconcile_with_retry(&file_id).await {
                Ok(result) => {
                    summary.materialized += result.materialized();
                    for (video_id, e) in result.errors() {
                        summary.errors += 1;
                        error!(file_id = %file_id, video_id = %video_id, error = %e, "Reconcile left an error");
                    }
                }
                Err(e) => {
                    summary.errors += 1;
                    error!(file_id = %file_id, error = %e, "Reconcile failed");
                }
            }
        }

        summary
    }

    /// Reconciles one file, retrying while transport errors persist.
    pub async fn reconcile_with_retry(&self, file_id: &str) -> Result<ReconcileResult, TranscodeError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self.orchestrator.reconcile(file_id, None).await;

            let last_error = match &outcome {
                Ok(result) => result
                    .errors()
                    .find(|(_, e)| e.is_retryable())
                    .map(|(_, e)| e.to_string()),
                Err(e) if e.is_retryable() => Some(e.to_string()),
                Err(_) => None,
            };
            let Some(last_error) = last_error else {
                return outcome;
            };

            match self.retry.next_action(attempt, &last_error) {
                RetryAction::Retrying {
                    attempt,
                    max_attempts,
                    delay,
                } => {
                    warn!(
                        file_id = %file_id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %last_error,
                        "Transient reconcile failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryAction::GaveUp { reason } => {
                    warn!(file_id = %file_id, reason = %reason, "Giving up until the next pass");
                    return outcome;
                }
            }
        }
    }
}
