//! Transcode job orchestration.
//!
//! The orchestrator submits videos, reconciles tracked videos against the
//! remote service and materializes finished outputs. A video is only
//! materialized once the video itself and every one of its encodings have
//! succeeded; anything less leaves the association tracking for a later
//! pass.
//!
//! Reconcile, cancel and retry hold a per-file lock in the association
//! store, and completion is a compare-and-swap, so concurrent callers for
//! the same file never materialize a video twice.

pub mod outcome;
pub mod progress;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::model::AppConfig;
use crate::error::{StoreError, TranscodeError};
use crate::host::{MediaFile, MediaHost};
use crate::materialize::{
    resolve_base_urls, ArtifactMaterializer, BaseUrl, BaseUrlKind, Descriptor, NameTemplates,
    ThumbnailStyle,
};
use crate::notify::{DiscordNotifier, Metrics};
use crate::profiles::{parse_profile_names, ProfileResolver};
use crate::remote::{CachePolicy, Encoding, EncodingFilter, JobStatus, TranscodeApi, Video};
use crate::storage::{LocalFileDelegate, RemoteUrlDelegate, StorageEngine, StoredId};
use crate::store::{AssociationStore, LockToken};

pub use outcome::{
    CallbackOutcome, EncodingStatus, FailureDetail, ReconcileOutcome, ReconcileResult, VideoStatus,
};
pub use progress::ProgressStatus;

/// Operator settings the orchestrator reads on every operation.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Gates `submit`.
    pub transcoding_enabled: bool,
    /// Profile names used when a submission names none.
    pub default_profiles: Vec<String>,
    /// Base for default callback URLs (`{base}/callback/{file_id}`).
    pub callback_base_url: Option<String>,
    pub download_domain: String,
    pub streaming_domain: String,
    pub thumbnail_style: ThumbnailStyle,
    pub templates: NameTemplates,
    pub storage: StorageEngine,
    pub lock_ttl: Duration,
    pub lock_wait: Duration,
    pub lock_poll: Duration,
}

impl OrchestratorSettings {
    /// Derives settings from the application config.
    pub fn from_config(config: &AppConfig) -> Self {
        let callback_base_url = config
            .webhook
            .public_url
            .clone()
            .filter(|url| config.webhook.enabled && !url.trim().is_empty());

        Self {
            transcoding_enabled: config.transcoding.enabled,
            default_profiles: parse_profile_names(&config.transcoding.encoding_profiles),
            callback_base_url,
            download_domain: config.delivery.cloudfront_download_domain.clone(),
            streaming_domain: config.delivery.cloudfront_streaming_domain.clone(),
            thumbnail_style: config.delivery.thumbnail_style,
            templates: NameTemplates {
                video: config.delivery.video_name_template.clone(),
                encoding: config.delivery.encoding_name_template.clone(),
            },
            storage: StorageEngine::new(
                LocalFileDelegate::new(&config.storage.local_dir, &config.storage.local_base_url),
                RemoteUrlDelegate,
            ),
            lock_ttl: Duration::from_secs(config.global.lock.ttl_seconds),
            lock_wait: Duration::from_secs(config.global.lock.wait_seconds),
            lock_poll: Duration::from_millis(config.global.lock.poll_interval_ms),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            transcoding_enabled: true,
            default_profiles: vec!["h264".to_string()],
            callback_base_url: None,
            download_domain: String::new(),
            streaming_domain: String::new(),
            thumbnail_style: ThumbnailStyle::default(),
            templates: NameTemplates::default(),
            storage: StorageEngine::new(
                LocalFileDelegate::new("/data/media", "http://localhost/media"),
                RemoteUrlDelegate,
            ),
            lock_ttl: Duration::from_secs(120),
            lock_wait: Duration::from_secs(30),
            lock_poll: Duration::from_millis(100),
        }
    }
}

/// Submits, reconciles, cancels and retries remote transcodes.
pub struct JobOrchestrator {
    api: Arc<dyn TranscodeApi>,
    store: Arc<dyn AssociationStore>,
    host: Arc<dyn MediaHost>,
    resolver: ProfileResolver,
    settings: RwLock<OrchestratorSettings>,
    metrics: Option<Arc<Metrics>>,
    notifier: Option<Arc<DiscordNotifier>>,
}

impl JobOrchestrator {
    pub fn new(
        api: Arc<dyn TranscodeApi>,
        store: Arc<dyn AssociationStore>,
        host: Arc<dyn MediaHost>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            resolver: ProfileResolver::new(Arc::clone(&api)),
            api,
            store,
            host,
            settings: RwLock::new(settings),
            metrics: None,
            notifier: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<DiscordNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// The profile resolver sharing this orchestrator's client.
    pub fn resolver(&self) -> &ProfileResolver {
        &self.resolver
    }

    /// The association store.
    pub fn store(&self) -> &Arc<dyn AssociationStore> {
        &self.store
    }

    /// Replaces the operator settings.
    pub async fn update_settings(&self, settings: OrchestratorSettings) {
        *self.settings.write().await = settings;
    }

    /// Drops memoized remote responses and the profile catalog.
    pub async fn invalidate_caches(&self) {
        self.api.clear_cache();
        self.resolver.invalidate().await;
        debug!("Invalidated remote caches");
    }

    async fn settings(&self) -> OrchestratorSettings {
        self.settings.read().await.clone()
    }

    /// Submits a file for transcoding and starts tracking the new video.
    ///
    /// Without a source URL the file's own download URL is used. Without
    /// profile names the configured defaults apply. Returns the video id.
    pub async fn submit(
        &self,
        file_id: &str,
        source_url: Option<&str>,
        profile_names: Option<&[String]>,
        callback_url: Option<&str>,
    ) -> Result<String, TranscodeError> {
        let settings = self.settings().await;
        if !settings.transcoding_enabled {
            return Err(TranscodeError::Configuration(
                "transcoding is disabled".to_string(),
            ));
        }

        let source_url = match source_url {
            Some(url) => url.to_string(),
            None => self.download_url_for(file_id, &settings).await?,
        };

        let names: Vec<String> = match profile_names {
            Some(names) if !names.is_empty() => names.to_vec(),
            _ => settings.default_profiles.clone(),
        };
        let profile_ids = self.resolver.names_to_ids(&names).await?;
        if profile_ids.is_empty() {
            return Err(TranscodeError::Configuration(format!(
                "none of the profiles [{}] exist remotely",
                names.join(", ")
            )));
        }

        let callback_url = callback_url.map(str::to_string).or_else(|| {
            settings
                .callback_base_url
                .as_deref()
                .map(|base| format!("{}/callback/{}", base.trim_end_matches('/'), file_id))
        });

        let video = self.api.submit(&source_url, &profile_ids, callback_url).await?;

        if !self.store.track(file_id, &video.id).await? {
            warn!(file_id = %file_id, video_id = %video.id, "Video was already tracked");
        }

        info!(
            file_id = %file_id,
            video_id = %video.id,
            profiles = %names.join(","),
            "Submitted video for transcoding"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_submission();
        }
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify_submitted(file_id, &video.id, &names).await {
                warn!(error = %e, "Failed to send submission notification");
            }
        }

        Ok(video.id)
    }

    async fn download_url_for(
        &self,
        file_id: &str,
        settings: &OrchestratorSettings,
    ) -> Result<String, TranscodeError> {
        let file = self
            .host
            .media_file(file_id)
            .await?
            .ok_or_else(|| TranscodeError::Validation(format!("media file '{}' does not exist", file_id)))?;

        let bases = match file.stored_id {
            StoredId::Video { .. } | StoredId::Encoding { .. } => self.base_urls(settings).await?,
            _ => Vec::new(),
        };

        settings
            .storage
            .download_url(&file.stored_id, &bases)
            .ok_or_else(|| {
                TranscodeError::Validation(format!("media file '{}' has no downloadable URL", file_id))
            })
    }

    /// Reconciles one tracked video, or every tracked video of the file.
    pub async fn reconcile(
        &self,
        file_id: &str,
        video_id: Option<&str>,
    ) -> Result<ReconcileResult, TranscodeError> {
        let mut result = ReconcileResult::new(file_id);

        let video_ids = match video_id {
            Some(id) => vec![id.to_string()],
            None => self
                .store
                .list(file_id, false)
                .await?
                .into_iter()
                .map(|a| a.video_id)
                .collect(),
        };

        for video_id in video_ids {
            let outcome = self.reconcile_video(file_id, &video_id).await;
            match &outcome {
                Ok(o) => {
                    debug!(file_id = %file_id, video_id = %video_id, outcome = o.label(), "Reconciled video");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_reconcile(o.label());
                    }
                }
                Err(e) => {
                    warn!(file_id = %file_id, video_id = %video_id, error = %e, "Reconcile failed");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_reconcile("error");
                    }
                }
            }
            result.push(video_id, outcome);
        }

        Ok(result)
    }

    /// Reconciles one video under the file lock.
    pub async fn reconcile_video(
        &self,
        file_id: &str,
        video_id: &str,
    ) -> Result<ReconcileOutcome, TranscodeError> {
        let settings = self.settings().await;
        let token = self.acquire_lock(file_id, &settings).await?;
        let outcome = self.reconcile_locked(file_id, video_id, &settings).await;
        self.release_lock(file_id, &token).await;
        outcome
    }

    async fn reconcile_locked(
        &self,
        file_id: &str,
        video_id: &str,
        settings: &OrchestratorSettings,
    ) -> Result<ReconcileOutcome, TranscodeError> {
        let Some(association) = self.store.get(file_id, video_id).await? else {
            return Ok(ReconcileOutcome::NotTracked);
        };
        if !association.is_tracking() {
            return Ok(ReconcileOutcome::AlreadyComplete);
        }

        let video = self.api.get_video(video_id, CachePolicy::Refresh).await?;
        let encodings = self
            .api
            .list_encodings(&EncodingFilter::for_video(video_id), CachePolicy::Refresh)
            .await?;

        let failures = self.collect_failures(&video, &encodings, settings).await;
        if !failures.is_empty() {
            let newly_reported = !association.failure_reported;
            if newly_reported {
                self.report_failure(file_id, video_id, &failures).await?;
            }
            return Ok(ReconcileOutcome::Failed {
                failures,
                newly_reported,
            });
        }

        let waiting: Vec<String> = encodings
            .iter()
            .filter(|e| e.status != JobStatus::Success)
            .map(|e| e.id.clone())
            .collect();
        if video.status != JobStatus::Success || !waiting.is_empty() {
            return Ok(ReconcileOutcome::Pending {
                video_status: video.status,
                waiting,
            });
        }

        let Some(source) = self.host.media_file(file_id).await? else {
            warn!(file_id = %file_id, video_id = %video_id, "Source file no longer exists, skipping");
            return Ok(ReconcileOutcome::MissingFile);
        };

        let bases = self.base_urls(settings).await?;
        if bases.is_empty() {
            return Err(TranscodeError::Configuration(
                "no delivery base URLs: the cloud has no bucket and no CDN domain is set".to_string(),
            ));
        }

        if let Some(ms) = video.duration.filter(|ms| *ms > 0) {
            let seconds = (ms + 500) / 1000;
            if self.host.set_duration_if_unset(&source.media_id, seconds).await? {
                debug!(media_id = %source.media_id, seconds, "Set media duration");
            }
        }

        let artifacts = self
            .materialize(&source, &video, &encodings, &bases, settings)
            .await?;

        if !self.store.mark_complete(file_id, video_id).await? {
            warn!(file_id = %file_id, video_id = %video_id, "Association was completed concurrently");
            return Ok(ReconcileOutcome::AlreadyComplete);
        }

        self.host
            .update_source_file(file_id, video.width, video.height, video.file_size)
            .await?;

        info!(file_id = %file_id, video_id = %video_id, artifacts, "Materialized transcoded video");
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify_materialized(file_id, video_id, artifacts).await {
                warn!(error = %e, "Failed to send completion notification");
            }
        }

        Ok(ReconcileOutcome::Materialized { artifacts })
    }

    async fn materialize(
        &self,
        source: &MediaFile,
        video: &Video,
        encodings: &[Encoding],
        bases: &[BaseUrl],
        settings: &OrchestratorSettings,
    ) -> Result<usize, TranscodeError> {
        let names = self.resolver.all_id_name_pairs().await?;
        let profile_names: Vec<&str> = encodings
            .iter()
            .map(|e| {
                names
                    .get(&e.profile_id)
                    .map(String::as_str)
                    .or(e.profile_name.as_deref())
                    .unwrap_or(e.profile_id.as_str())
            })
            .collect();

        let mut descriptors = vec![Descriptor::Video(video)];
        descriptors.extend(
            encodings
                .iter()
                .zip(profile_names)
                .map(|(encoding, profile_name)| Descriptor::Encoding {
                    encoding,
                    profile_name,
                }),
        );

        let materializer = ArtifactMaterializer::new(
            Arc::clone(&self.host),
            settings.storage.clone(),
            settings.templates.clone(),
        );

        match materializer.materialize_all(&descriptors, source, bases).await {
            Ok(created) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_artifacts(created.len());
                }
                Ok(created.len())
            }
            Err(e) => {
                if let (Some(metrics), TranscodeError::Materialization { failures }) = (&self.metrics, &e) {
                    metrics.record_materialization_failures(failures.len());
                }
                Err(e)
            }
        }
    }

    async fn collect_failures(
        &self,
        video: &Video,
        encodings: &[Encoding],
        settings: &OrchestratorSettings,
    ) -> Vec<FailureDetail> {
        let mut failed: Vec<(String, String)> = Vec::new();
        if video.status == JobStatus::Fail {
            failed.push((
                video.id.clone(),
                video
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "An unexplained error occurred.".to_string()),
            ));
        }
        for encoding in encodings.iter().filter(|e| e.status == JobStatus::Fail) {
            failed.push((encoding.id.clone(), encoding.failure_reason()));
        }
        if failed.is_empty() {
            return Vec::new();
        }

        // Log links are best effort.
        let origin = match self.base_urls(settings).await {
            Ok(bases) => bases.into_iter().find(|b| b.kind == BaseUrlKind::Origin),
            Err(e) => {
                debug!(error = %e, "Could not resolve origin for error log links");
                None
            }
        };

        failed
            .into_iter()
            .map(|(remote_id, reason)| FailureDetail {
                log_url: origin.as_ref().map(|o| o.error_log_url(&remote_id)),
                remote_id,
                reason,
            })
            .collect()
    }

    async fn report_failure(
        &self,
        file_id: &str,
        video_id: &str,
        failures: &[FailureDetail],
    ) -> Result<(), TranscodeError> {
        for failure in failures {
            warn!(
                file_id = %file_id,
                video_id = %video_id,
                remote_id = %failure.remote_id,
                reason = %failure.reason,
                log_url = failure.log_url.as_deref().unwrap_or(""),
                "Remote transcode failed"
            );
        }

        self.store.set_failure_reported(file_id, video_id, true).await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_reported_failure();
        }
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify_transcode_failure(file_id, video_id, failures).await {
                warn!(error = %e, "Failed to send failure notification");
            }
        }
        Ok(())
    }

    /// Delivery base URLs for the current cloud, origin first.
    pub async fn base_urls(&self, settings: &OrchestratorSettings) -> Result<Vec<BaseUrl>, TranscodeError> {
        let cloud = self.api.get_cloud(CachePolicy::Cached).await?;
        Ok(resolve_base_urls(
            cloud.s3_videos_bucket.as_deref(),
            &settings.download_domain,
            &settings.streaming_domain,
            settings.thumbnail_style,
        ))
    }

    /// Current progress of a file's tracked transcodes. Never mutates state.
    pub async fn progress_of(&self, file_id: &str) -> Result<ProgressStatus, TranscodeError> {
        let associations = self.store.list(file_id, false).await?;

        let mut jobs = Vec::with_capacity(associations.len());
        for association in associations {
            let video = self
                .api
                .get_video(&association.video_id, CachePolicy::Refresh)
                .await?;
            let encodings = self
                .api
                .list_encodings(&EncodingFilter::for_video(&association.video_id), CachePolicy::Refresh)
                .await?;
            jobs.push((video, encodings));
        }

        Ok(progress::summarize(&jobs))
    }

    /// Cancels a tracked video remotely and forgets it.
    ///
    /// The video must be tracked for this file; otherwise nothing is sent
    /// to the remote service.
    pub async fn cancel(&self, file_id: &str, video_id: &str) -> Result<(), TranscodeError> {
        let settings = self.settings().await;
        let token = self.acquire_lock(file_id, &settings).await?;
        let result = self.cancel_locked(file_id, video_id).await;
        self.release_lock(file_id, &token).await;
        result
    }

    async fn cancel_locked(&self, file_id: &str, video_id: &str) -> Result<(), TranscodeError> {
        let tracked = self
            .store
            .get(file_id, video_id)
            .await?
            .is_some_and(|a| a.is_tracking());
        if !tracked {
            warn!(file_id = %file_id, video_id = %video_id, "Rejected cancel for unassociated video");
            return Err(TranscodeError::AssociationMismatch {
                file_id: file_id.to_string(),
                remote_id: video_id.to_string(),
            });
        }

        if !self.api.delete_video(video_id).await? {
            warn!(video_id = %video_id, "Remote video was already gone");
        }
        self.store.remove(file_id, video_id).await?;

        info!(file_id = %file_id, video_id = %video_id, "Cancelled transcode");
        Ok(())
    }

    /// Replaces a failed encoding with a fresh one for the same profile.
    ///
    /// Returns the new encoding.
    pub async fn retry(&self, file_id: &str, encoding_id: &str) -> Result<Encoding, TranscodeError> {
        let settings = self.settings().await;
        let token = self.acquire_lock(file_id, &settings).await?;
        let result = self.retry_locked(file_id, encoding_id).await;
        self.release_lock(file_id, &token).await;
        result
    }

    async fn retry_locked(&self, file_id: &str, encoding_id: &str) -> Result<Encoding, TranscodeError> {
        let mismatch = || TranscodeError::AssociationMismatch {
            file_id: file_id.to_string(),
            remote_id: encoding_id.to_string(),
        };

        let tracked = self.store.list(file_id, false).await?;
        if tracked.is_empty() {
            warn!(file_id = %file_id, encoding_id = %encoding_id, "Rejected retry for file with nothing tracked");
            return Err(mismatch());
        }

        let encoding = self.api.get_encoding(encoding_id, CachePolicy::Refresh).await?;
        if !tracked.iter().any(|a| a.video_id == encoding.video_id) {
            warn!(file_id = %file_id, encoding_id = %encoding_id, "Rejected retry for unassociated encoding");
            return Err(mismatch());
        }

        if !self.api.delete_encoding(encoding_id).await? {
            return Err(TranscodeError::remote(
                "delete_failed",
                format!("encoding '{}' could not be deleted", encoding_id),
            ));
        }

        let replacement = self
            .api
            .add_encoding_profile(&encoding.video_id, &encoding.profile_id)
            .await?;
        self.store
            .set_failure_reported(file_id, &encoding.video_id, false)
            .await?;

        info!(
            file_id = %file_id,
            video_id = %encoding.video_id,
            old_encoding_id = %encoding_id,
            new_encoding_id = %replacement.id,
            "Retrying encoding"
        );
        Ok(replacement)
    }

    /// Handles a remote state-update callback.
    ///
    /// Callbacks naming unknown videos, or a video tracked for another
    /// file, are logged and ignored.
    pub async fn handle_callback(
        &self,
        file_id: Option<&str>,
        video_id: Option<&str>,
    ) -> Result<CallbackOutcome, TranscodeError> {
        let ignore = |reason: String| -> Result<CallbackOutcome, TranscodeError> {
            info!(
                file_id = file_id.unwrap_or(""),
                video_id = video_id.unwrap_or(""),
                reason = %reason,
                "Ignoring callback"
            );
            Ok(CallbackOutcome::Ignored { reason })
        };

        match (file_id, video_id) {
            (_, Some(video_id)) => {
                let Some(owner) = self.store.owner_of(video_id).await? else {
                    return ignore(format!("video '{}' is not tracked", video_id));
                };
                if file_id.is_some_and(|f| f != owner) {
                    return ignore(format!("video '{}' belongs to another file", video_id));
                }
                let result = self.reconcile(&owner, Some(video_id)).await?;
                Ok(CallbackOutcome::Reconciled(result))
            }
            (Some(file_id), None) => {
                if self.store.list(file_id, false).await?.is_empty() {
                    return ignore(format!("file '{}' has nothing tracked", file_id));
                }
                let result = self.reconcile(file_id, None).await?;
                Ok(CallbackOutcome::Reconciled(result))
            }
            (None, None) => ignore("no file or video id".to_string()),
        }
    }

    /// Every associated video of a file with its encodings.
    pub async fn status(&self, file_id: &str) -> Result<Vec<VideoStatus>, TranscodeError> {
        let associations = self.store.list(file_id, true).await?;
        let names = if associations.iter().any(|a| a.is_tracking()) {
            self.resolver.all_id_name_pairs().await?
        } else {
            Default::default()
        };

        let mut statuses = Vec::with_capacity(associations.len());
        for association in associations {
            if !association.is_tracking() {
                statuses.push(VideoStatus {
                    association,
                    video: None,
                    encodings: Vec::new(),
                });
                continue;
            }

            let video = self
                .api
                .get_video(&association.video_id, CachePolicy::Cached)
                .await?;
            let encodings = self
                .api
                .list_encodings(&EncodingFilter::for_video(&association.video_id), CachePolicy::Cached)
                .await?
                .into_iter()
                .map(|encoding| EncodingStatus {
                    profile_name: names
                        .get(&encoding.profile_id)
                        .cloned()
                        .unwrap_or_else(|| encoding.profile_id.clone()),
                    encoding,
                })
                .collect();

            statuses.push(VideoStatus {
                association,
                video: Some(video),
                encodings,
            });
        }
        Ok(statuses)
    }

    async fn acquire_lock(
        &self,
        file_id: &str,
        settings: &OrchestratorSettings,
    ) -> Result<LockToken, TranscodeError> {
        let started = Instant::now();
        loop {
            if let Some(token) = self.store.try_lock(file_id, settings.lock_ttl).await? {
                return Ok(token);
            }
            let waited = started.elapsed();
            if waited >= settings.lock_wait {
                return Err(StoreError::LockTimeout {
                    file_id: file_id.to_string(),
                    waited_ms: waited.as_millis() as u64,
                }
                .into());
            }
            tokio::time::sleep(settings.lock_poll).await;
        }
    }

    async fn release_lock(&self, file_id: &str, token: &LockToken) {
        if let Err(e) = self.store.unlock(file_id, token).await {
            error!(file_id = %file_id, error = %e, "Failed to release file lock");
        }
    }
}
