//! Configuration data structures.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::materialize::{ThumbnailStyle, DEFAULT_ENCODING_NAME_TEMPLATE, DEFAULT_VIDEO_NAME_TEMPLATE};

/// Root configuration structure containing all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global application settings.
    pub global: GlobalConfig,

    /// Remote transcoding service account.
    pub remote: RemoteConfig,

    /// Submission settings.
    #[serde(default)]
    pub transcoding: TranscodingConfig,

    /// Delivery base URLs and artifact naming.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Local media storage.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Inbound callback endpoint.
    #[serde(default)]
    pub webhook: WebhookConfig,
}

/// Global application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Redis connection settings.
    pub redis: RedisConfig,

    /// Retry settings for background reconciles.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-file lock settings.
    #[serde(default)]
    pub lock: LockConfig,

    /// Prometheus metrics settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Notification settings.
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis server hostname.
    #[serde(default = "default_redis_host")]
    pub host: String,

    /// Redis server port.
    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// Redis database number.
    #[serde(default)]
    pub db: u8,

    /// Optional Redis password.
    #[serde(default)]
    pub password: Option<String>,
}

/// Retry configuration for reconciles that hit transport errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (1 = no retry, 2 = one retry).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff in milliseconds, doubled per attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

/// Per-file advisory lock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lock expiry, bounding how long a crashed holder blocks others.
    #[serde(default = "default_lock_ttl")]
    pub ttl_seconds: u64,

    /// How long to wait for a busy lock before giving up.
    #[serde(default = "default_lock_wait")]
    pub wait_seconds: u64,

    /// Delay between lock attempts.
    #[serde(default = "default_lock_poll")]
    pub poll_interval_ms: u64,
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Whether to expose `/metrics`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Port for the metrics endpoint when the callback server is disabled.
    #[serde(default = "default_prometheus_port")]
    pub port: u16,
}

/// Notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationConfig {
    /// Discord webhook settings.
    #[serde(default)]
    pub discord: Option<DiscordConfig>,
}

/// Discord webhook configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Discord webhook URL.
    pub webhook_url: String,

    /// Which events trigger notifications.
    #[serde(default)]
    pub events: DiscordEvents,

    /// Optional user ID to mention on failures.
    #[serde(default)]
    pub mention_on_failure: Option<String>,
}

/// Discord notification event toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordEvents {
    /// Notify when a video has been submitted.
    #[serde(default)]
    pub on_submitted: bool,

    /// Notify when all outputs of a video have been materialized.
    #[serde(default = "default_true")]
    pub on_materialized: bool,

    /// Notify when a remote video or encoding fails.
    #[serde(default = "default_true")]
    pub on_transcode_failure: bool,
}

/// Remote transcoding service account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// API base URL including the version prefix.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default)]
    pub cloud_id: String,

    #[serde(default)]
    pub access_key: String,

    #[serde(default)]
    pub secret_key: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Extra attempts for idempotent GETs on network errors.
    #[serde(default = "default_get_retries")]
    pub get_retries: u32,
}

/// Submission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodingConfig {
    /// Whether new videos may be submitted at all.
    #[serde(default)]
    pub enabled: bool,

    /// Comma-separated default profile names.
    #[serde(default = "default_encoding_profiles")]
    pub encoding_profiles: String,

    /// Seconds between background reconcile passes.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

/// Delivery base URLs and artifact naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// CDN domain for progressive HTTP downloads. Empty disables it.
    #[serde(default)]
    pub cloudfront_download_domain: String,

    /// CDN domain for streaming. Empty disables it.
    #[serde(default)]
    pub cloudfront_streaming_domain: String,

    #[serde(default)]
    pub thumbnail_style: ThumbnailStyle,

    /// Placeholders: `{label}`, `{name}`, `{ext}`.
    #[serde(default = "default_video_name_template")]
    pub video_name_template: String,

    /// Placeholders: `{label}`, `{profile}`, `{name}`, `{ext}`.
    #[serde(default = "default_encoding_name_template")]
    pub encoding_name_template: String,
}

/// Local media storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding locally stored media files.
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,

    /// Public URL the local directory is served under.
    #[serde(default = "default_local_base_url")]
    pub local_base_url: String,
}

/// Inbound callback endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Port for the callback (and metrics) HTTP server.
    #[serde(default = "default_webhook_port")]
    pub port: u16,

    /// Externally reachable base URL, used to build callback URLs.
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_lock_ttl() -> u64 {
    120
}

fn default_lock_wait() -> u64 {
    30
}

fn default_lock_poll() -> u64 {
    100
}

fn default_prometheus_port() -> u16 {
    9090
}

fn default_true() -> bool {
    true
}

fn default_api_url() -> String {
    "https://api.pandastream.com/v2".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_get_retries() -> u32 {
    1
}

fn default_encoding_profiles() -> String {
    "h264".to_string()
}

fn default_poll_interval() -> u64 {
    60
}

fn default_video_name_template() -> String {
    DEFAULT_VIDEO_NAME_TEMPLATE.to_string()
}

fn default_encoding_name_template() -> String {
    DEFAULT_ENCODING_NAME_TEMPLATE.to_string()
}

fn default_local_dir() -> PathBuf {
    PathBuf::from("/data/media")
}

fn default_local_base_url() -> String {
    "http://localhost/media".to_string()
}

fn default_webhook_port() -> u16 {
    8080
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_lock_ttl(),
            wait_seconds: default_lock_wait(),
            poll_interval_ms: default_lock_poll(),
        }
    }
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_prometheus_port(),
        }
    }
}

impl Default for DiscordEvents {
    fn default() -> Self {
        Self {
            on_submitted: false,
            on_materialized: true,
            on_transcode_failure: true,
        }
    }
}

impl Default for TranscodingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            encoding_profiles: default_encoding_profiles(),
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            cloudfront_download_domain: String::new(),
            cloudfront_streaming_domain: String::new(),
            thumbnail_style: ThumbnailStyle::default(),
            video_name_template: default_video_name_template(),
            encoding_name_template: default_encoding_name_template(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_dir: default_local_dir(),
            local_base_url: default_local_base_url(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_webhook_port(),
            public_url: None,
        }
    }
}

impl RemoteConfig {
    /// True when the three credential parts differ from `other`.
    pub fn credentials_differ(&self, other: &RemoteConfig) -> bool {
        self.cloud_id != other.cloud_id
            || self.access_key != other.access_key
            || self.secret_key != other.secret_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let yaml = r#"
global:
  redis:
    host: redis
remote:
  cloud_id: c
  access_key: a
  secret_key: s
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.remote.api_url, "https://api.pandastream.com/v2");
        assert_eq!(config.remote.get_retries, 1);
        assert_eq!(config.transcoding.encoding_profiles, "h264");
        assert!(!config.transcoding.enabled);
        assert_eq!(config.global.redis.port, 6379);
        assert_eq!(config.delivery.thumbnail_style, ThumbnailStyle::Frame);
        assert_eq!(config.global.lock.wait_seconds, 30);
    }

    #[test]
    fn thumbnail_style_parses_lowercase() {
        let delivery: DeliveryConfig = serde_yaml::from_str("thumbnail_style: extension").unwrap();
        assert_eq!(delivery.thumbnail_style, ThumbnailStyle::Extension);
    }
}
