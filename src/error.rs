//! Error types for the transcode reconciler.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level application errors.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading and parsing errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {message}")]
    ParseFailed { path: PathBuf, message: String },

    #[error("Config validation failed with {error_count} error(s)")]
    ValidationFailed { error_count: usize },
}

/// Errors raised by the transcoding core.
#[derive(Error, Debug)]
pub enum TranscodeError {
    /// Bad caller input. Never retried.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Missing or invalid operator settings.
    #[error("Transcoding is misconfigured: {0}")]
    Configuration(String),

    /// The remote service reported a logical failure.
    #[error("Remote service error '{code}': {message}")]
    Remote { code: String, message: String },

    /// Network failure or timeout talking to the remote service.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The referenced remote object does not belong to the given file.
    #[error("Remote object '{remote_id}' is not associated with file '{file_id}'")]
    AssociationMismatch { file_id: String, remote_id: String },

    /// One or more (artifact, base URL) pairs failed to materialize.
    #[error("Failed to materialize {} artifact(s): {}", .failures.len(), FailureList(.failures))]
    Materialization { failures: Vec<MaterializationFailure> },

    #[error("Association store error: {0}")]
    Store(#[from] StoreError),

    #[error("Media host error: {0}")]
    Host(String),
}

impl TranscodeError {
    /// Creates a remote error from a code and message.
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns true if the operation may be retried with backoff.
    ///
    /// Only idempotent reads should be retried by callers; writes such as
    /// submissions are never retried to avoid duplicate remote jobs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for TranscodeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::remote("invalid_response", e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// A single failed (artifact, base URL) materialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializationFailure {
    /// Remote id of the video or encoding.
    pub remote_id: String,
    /// Label of the base URL (e.g. "S3 - HTTP").
    pub base_url: String,
    /// Why it failed.
    pub reason: String,
}

struct FailureList<'a>(&'a [MaterializationFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(
                f,
                "{} @ {} ({})",
                failure.remote_id, failure.base_url, failure.reason
            )?;
        }
        Ok(())
    }
}

/// Redis association store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to connect to Redis at '{url}': {message}")]
    ConnectionFailed { url: String, message: String },

    #[error("Redis command failed: {0}")]
    CommandFailed(String),

    #[error("Failed to (de)serialize record: {0}")]
    SerializationFailed(String),

    #[error("Timed out after {waited_ms}ms waiting for the lock on file '{file_id}'")]
    LockTimeout { file_id: String, waited_ms: u64 },
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        Self::CommandFailed(e.to_string())
    }
}

/// Notification sending errors.
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Discord webhook failed: {0}")]
    DiscordFailed(String),

    #[error("Prometheus metrics export failed: {0}")]
    PrometheusFailed(String),

    #[error("HTTP request failed: {0}")]
    HttpFailed(#[from] reqwest::Error),

    #[error("Callback server failed: {0}")]
    ServerFailed(String),
}
