//! HTTP JSON client for the remote transcoding API.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::cache::ResponseCache;
use super::signing::{escape, Credentials};
use super::types::{CachePolicy, CloudInfo, Encoding, EncodingFilter, JobStatus, Profile, Video};
use crate::error::TranscodeError;

pub type RemoteResult<T> = Result<T, TranscodeError>;

/// Operations offered by the remote transcoding service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscodeApi: Send + Sync {
    /// Submits a source URL for transcoding with the given profiles.
    async fn submit(
        &self,
        source_url: &str,
        profile_ids: &[String],
        callback_url: Option<String>,
    ) -> RemoteResult<Video>;

    async fn get_video(&self, id: &str, policy: CachePolicy) -> RemoteResult<Video>;

    async fn get_encoding(&self, id: &str, policy: CachePolicy) -> RemoteResult<Encoding>;

    async fn get_profile(&self, id: &str, policy: CachePolicy) -> RemoteResult<Profile>;

    async fn list_videos(
        &self,
        status: Option<JobStatus>,
        policy: CachePolicy,
    ) -> RemoteResult<Vec<Video>>;

    async fn list_encodings(
        &self,
        filter: &EncodingFilter,
        policy: CachePolicy,
    ) -> RemoteResult<Vec<Encoding>>;

    async fn list_profiles(&self, policy: CachePolicy) -> RemoteResult<Vec<Profile>>;

    /// Fetches the cloud record. Doubles as a credential check.
    async fn get_cloud(&self, policy: CachePolicy) -> RemoteResult<CloudInfo>;

    async fn delete_video(&self, id: &str) -> RemoteResult<bool>;

    async fn delete_encoding(&self, id: &str) -> RemoteResult<bool>;

    async fn delete_profile(&self, id: &str) -> RemoteResult<bool>;

    /// Adds one more profile to an existing video, creating a new encoding.
    async fn add_encoding_profile(&self, video_id: &str, profile_id: &str)
        -> RemoteResult<Encoding>;

    /// Drops all memoized responses.
    fn clear_cache(&self);
}

/// Configuration for the remote client.
#[derive(Debug, Clone)]
pub struct RemoteClientConfig {
    /// API root including the version prefix, e.g. `https://api.pandastream.com/v2`.
    pub api_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Extra attempts for idempotent GETs on network failure.
    pub get_retries: u32,
}

impl Default for RemoteClientConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.pandastream.com/v2".to_string(),
            timeout: Duration::from_secs(30),
            get_retries: 1,
        }
    }
}

/// Client for one cloud account on the remote transcoding service.
pub struct RemoteClient {
    http: reqwest::Client,
    api_url: String,
    host: String,
    credentials: Credentials,
    cache: ResponseCache,
    get_retries: u32,
}

impl RemoteClient {
    /// Creates a client. Fails fast if any credential part is blank.
    pub fn new(
        cloud_id: &str,
        access_key: &str,
        secret_key: &str,
        config: RemoteClientConfig,
    ) -> RemoteResult<Self> {
        let credentials = Credentials::new(cloud_id, access_key, secret_key).ok_or_else(|| {
            TranscodeError::Configuration(
                "cloud id, access key and secret key must all be set".to_string(),
            )
        })?;

        let parsed = url::Url::parse(&config.api_url).map_err(|e| {
            TranscodeError::Configuration(format!("invalid api_url '{}': {}", config.api_url, e))
        })?;
        let host = parsed
            .host_str()
            .ok_or_else(|| {
                TranscodeError::Configuration(format!("api_url '{}' has no host", config.api_url))
            })?
            .to_lowercase();

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TranscodeError::Transport(e.to_string()))?;

        debug!(
            host = %host,
            credentials = %credentials.fingerprint(),
            "Created remote transcoding client"
        );

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            host,
            credentials,
            cache: ResponseCache::new(),
            get_retries: config.get_retries,
        })
    }

    /// Fingerprint of the credentials this client signs with.
    pub fn credential_fingerprint(&self) -> String {
        self.credentials.fingerprint()
    }

    /// Number of memoized responses.
    pub fn cached_responses(&self) -> usize {
        self.cache.len()
    }

    async fn get_json(
        &self,
        path: &str,
        params: BTreeMap<String, String>,
        policy: CachePolicy,
    ) -> RemoteResult<Value> {
        let key = ResponseCache::key(path, &params);
        if policy == CachePolicy::Cached {
            if let Some(value) = self.cache.get(&key) {
                trace!(path, "Serving memoized response");
                return Ok(value);
            }
        }

        let value = self.send_with_retry(path, &params).await?;
        self.cache.insert(key, value.clone());
        Ok(value)
    }

    /// Sends a GET, retrying only on transport failures.
    async fn send_with_retry(
        &self,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> RemoteResult<Value> {
        let mut attempt = 0;
        loop {
            match self.send(Method::GET, path, params).await {
                Err(e) if e.is_retryable() && attempt < self.get_retries => {
                    let delay = Duration::from_millis(250 * 2u64.pow(attempt));
                    warn!(
                        path,
                        attempt = attempt + 1,
                        ?delay,
                        error = %e,
                        "Remote GET failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> RemoteResult<Value> {
        let signed = self
            .credentials
            .sign(method.as_str(), &self.host, path, params, Utc::now())?;
        let pairs: Vec<(&String, &String)> = signed.iter().collect();
        let url = format!("{}{}", self.api_url, path);

        let request = self.http.request(method.clone(), &url);
        let request = if method == Method::GET || method == Method::DELETE {
            request.query(&pairs)
        } else {
            request.form(&pairs)
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if method == Method::GET || method == Method::DELETE {
            debug!(method = %method, path, query = ?params, status = status.as_u16(), response = %body, "Remote request");
        } else {
            debug!(method = %method, path, body = ?params, status = status.as_u16(), response = %body, "Remote request");
        }

        parse_envelope(status, &body)
    }

    async fn delete_json(&self, path: &str) -> RemoteResult<bool> {
        let value = self.send(Method::DELETE, path, &BTreeMap::new()).await?;
        Ok(value.get("deleted").and_then(Value::as_bool).unwrap_or(false))
    }
}

/// Turns a raw response into JSON, honouring the `error` envelope.
fn parse_envelope(status: StatusCode, body: &str) -> RemoteResult<Value> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    if let Some(Value::Object(map)) = &parsed {
        if let Some(error) = map.get("error") {
            let code = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(TranscodeError::Remote { code, message });
        }
    }

    match parsed {
        Some(value) if status.is_success() => Ok(value),
        _ if !status.is_success() => Err(TranscodeError::remote(
            status.as_u16().to_string(),
            truncate(body, 512),
        )),
        _ => Err(TranscodeError::remote(
            "invalid_response",
            format!("response is not JSON: {}", truncate(body, 512)),
        )),
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> RemoteResult<T> {
    serde_json::from_value(value)
        .map_err(|e| TranscodeError::remote("invalid_response", e.to_string()))
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let mut end = max_len;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

#[async_trait]
impl TranscodeApi for RemoteClient {
    async fn submit(
        &self,
        source_url: &str,
        profile_ids: &[String],
        callback_url: Option<String>,
    ) -> RemoteResult<Video> {
        if profile_ids.is_empty() {
            return Err(TranscodeError::Validation(
                "at least one profile id is required".to_string(),
            ));
        }
        if source_url.trim().is_empty() {
            return Err(TranscodeError::Validation(
                "source must be a URL reference; raw uploads are not supported".to_string(),
            ));
        }

        let mut params = BTreeMap::new();
        params.insert("source_url".to_string(), source_url.to_string());
        params.insert("profiles".to_string(), profile_ids.join(","));
        if let Some(callback) = callback_url.filter(|c| !c.is_empty()) {
            params.insert("state_update_url".to_string(), callback);
        }

        let value = self.send(Method::POST, "/videos.json", &params).await?;
        decode(value)
    }

    async fn get_video(&self, id: &str, policy: CachePolicy) -> RemoteResult<Video> {
        let path = format!("/videos/{}.json", escape(id));
        decode(self.get_json(&path, BTreeMap::new(), policy).await?)
    }

    async fn get_encoding(&self, id: &str, policy: CachePolicy) -> RemoteResult<Encoding> {
        let path = format!("/encodings/{}.json", escape(id));
        decode(self.get_json(&path, BTreeMap::new(), policy).await?)
    }

    async fn get_profile(&self, id: &str, policy: CachePolicy) -> RemoteResult<Profile> {
        let path = format!("/profiles/{}.json", escape(id));
        decode(self.get_json(&path, BTreeMap::new(), policy).await?)
    }

    async fn list_videos(
        &self,
        status: Option<JobStatus>,
        policy: CachePolicy,
    ) -> RemoteResult<Vec<Video>> {
        let mut params = BTreeMap::new();
        if let Some(status) = status.and_then(JobStatus::as_filter) {
            params.insert("status".to_string(), status.to_string());
        }
        decode(self.get_json("/videos.json", params, policy).await?)
    }

    async fn list_encodings(
        &self,
        filter: &EncodingFilter,
        policy: CachePolicy,
    ) -> RemoteResult<Vec<Encoding>> {
        let params = filter.to_params().into_iter().collect();
        decode(self.get_json("/encodings.json", params, policy).await?)
    }

    async fn list_profiles(&self, policy: CachePolicy) -> RemoteResult<Vec<Profile>> {
        decode(self.get_json("/profiles.json", BTreeMap::new(), policy).await?)
    }

    async fn get_cloud(&self, policy: CachePolicy) -> RemoteResult<CloudInfo> {
        let path = format!("/clouds/{}.json", escape(&self.credentials.cloud_id));
        decode(self.get_json(&path, BTreeMap::new(), policy).await?)
    }

    async fn delete_video(&self, id: &str) -> RemoteResult<bool> {
        self.delete_json(&format!("/videos/{}.json", escape(id))).await
    }

    async fn delete_encoding(&self, id: &str) -> RemoteResult<bool> {
        self.delete_json(&format!("/encodings/{}.json", escape(id))).await
    }

    async fn delete_profile(&self, id: &str) -> RemoteResult<bool> {
        self.delete_json(&format!("/profiles/{}.json", escape(id))).await
    }

    async fn add_encoding_profile(
        &self,
        video_id: &str,
        profile_id: &str,
    ) -> RemoteResult<Encoding> {
        let mut params = BTreeMap::new();
        params.insert("video_id".to_string(), video_id.to_string());
        params.insert("profile_id".to_string(), profile_id.to_string());
        let value = self.send(Method::POST, "/encodings.json", &params).await?;
        decode(value)
    }

    fn clear_cache(&self) {
        self.cache.clear();
    }
}
