//! In-memory fakes for the orchestrator's collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use transcode_reconciler::error::{StoreError, TranscodeError};
use transcode_reconciler::host::{MediaFile, MediaHost};
use transcode_reconciler::materialize::MaterializedArtifact;
use transcode_reconciler::orchestrator::{JobOrchestrator, OrchestratorSettings};
use transcode_reconciler::remote::{
    CachePolicy, CloudInfo, Encoding, EncodingFilter, JobStatus, Profile, RemoteResult, TranscodeApi,
    Video,
};
use transcode_reconciler::storage::StoredId;
use transcode_reconciler::store::{Association, AssociationStore, CompletionMarker, LockToken};

pub const FILE_ID: &str = "file-1";
pub const MEDIA_ID: &str = "media-1";
pub const SOURCE_URL: &str = "http://uploads.example.com/holiday.mov";

/// A submission as seen by the fake remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub source_url: String,
    pub profile_ids: Vec<String>,
    pub callback_url: Option<String>,
}

#[derive(Default)]
struct ApiState {
    videos: HashMap<String, Video>,
    encodings: HashMap<String, Encoding>,
    profiles: Vec<Profile>,
    submissions: Vec<Submission>,
    deleted_videos: Vec<String>,
    deleted_encodings: Vec<String>,
    next_id: usize,
}

/// Remote transcoding service kept in memory. Every trait call is counted.
pub struct FakeApi {
    state: Mutex<ApiState>,
    calls: AtomicUsize,
    bucket: Option<String>,
}

impl FakeApi {
    /// Profiles `h264` (mp4), `hls` (ts) and `webm`, with an origin bucket.
    pub fn new() -> Self {
        let profiles = [("p-h264", "h264", ".mp4"), ("p-hls", "hls", ".ts"), ("p-webm", "webm", ".webm")]
            .into_iter()
            .map(|(id, name, ext)| profile(id, name, ext))
            .collect();
        Self {
            state: Mutex::new(ApiState {
                profiles,
                ..ApiState::default()
            }),
            calls: AtomicUsize::new(0),
            bucket: Some("videos-bucket".to_string()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn deleted_videos(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_videos.clone()
    }

    pub fn deleted_encodings(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_encodings.clone()
    }

    /// Encodings of a video, ordered by id.
    pub fn encodings_of(&self, video_id: &str) -> Vec<Encoding> {
        let state = self.state.lock().unwrap();
        let mut encodings: Vec<Encoding> = state
            .encodings
            .values()
            .filter(|e| e.video_id == video_id)
            .cloned()
            .collect();
        encodings.sort_by(|a, b| a.id.cmp(&b.id));
        encodings
    }

    pub fn set_video_status(&self, video_id: &str, status: JobStatus) {
        if let Some(video) = self.state.lock().unwrap().videos.get_mut(video_id) {
            video.status = status;
        }
    }

    pub fn set_encoding_status(&self, encoding_id: &str, status: JobStatus) {
        if let Some(encoding) = self.state.lock().unwrap().encodings.get_mut(encoding_id) {
            encoding.status = status;
            if status == JobStatus::Success {
                encoding.encoding_progress = Some(100.0);
            }
        }
    }

    pub fn fail_encoding(&self, encoding_id: &str, class: &str, message: &str) {
        if let Some(encoding) = self.state.lock().unwrap().encodings.get_mut(encoding_id) {
            encoding.status = JobStatus::Fail;
            encoding.error_class = Some(class.to_string());
            encoding.error_message = Some(message.to_string());
        }
    }

    /// Marks the video and every one of its encodings successful.
    pub fn finish(&self, video_id: &str) {
        self.set_video_status(video_id, JobStatus::Success);
        for encoding in self.encodings_of(video_id) {
            self.set_encoding_status(&encoding.id, JobStatus::Success);
        }
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn not_found(kind: &str, id: &str) -> TranscodeError {
        TranscodeError::remote("RecordNotFound", format!("{} '{}' not found", kind, id))
    }
}

fn profile(id: &str, name: &str, ext: &str) -> Profile {
    serde_json::from_value(json!({
        "id": id,
        "name": name,
        "extname": ext,
        "width": 1280,
        "height": 720,
    }))
    .unwrap()
}

fn new_encoding(id: String, video_id: &str, profile: &Profile) -> Encoding {
    serde_json::from_value(json!({
        "id": id,
        "video_id": video_id,
        "profile_id": profile.id,
        "profile_name": profile.name,
        "status": "processing",
        "encoding_progress": 0.0,
        "extname": profile.extension,
        "width": profile.width,
        "height": profile.height,
        "file_size": 500_000,
        "duration": 61_400,
        "audio_bitrate": 96,
        "video_bitrate": 800,
    }))
    .unwrap()
}

#[async_trait]
impl TranscodeApi for FakeApi {
    async fn submit(
        &self,
        source_url: &str,
        profile_ids: &[String],
        callback_url: Option<String>,
    ) -> RemoteResult<Video> {
        self.count();
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let video_id = format!("v{}", state.next_id);

        let video: Video = serde_json::from_value(json!({
            "id": video_id,
            "status": "queued",
            "duration": 61_400,
            "width": 1920,
            "height": 1080,
            "file_size": 9_000_000,
            "extname": ".mov",
            "source_url": source_url,
            "audio_bitrate": 128,
            "video_bitrate": 4000,
        }))
        .unwrap();

        for profile_id in profile_ids {
            let Some(profile) = state.profiles.iter().find(|p| &p.id == profile_id).cloned() else {
                continue;
            };
            state.next_id += 1;
            let encoding = new_encoding(format!("e{}", state.next_id), &video_id, &profile);
            state.encodings.insert(encoding.id.clone(), encoding);
        }

        state.submissions.push(Submission {
            source_url: source_url.to_string(),
            profile_ids: profile_ids.to_vec(),
            callback_url,
        });
        state.videos.insert(video_id, video.clone());
        Ok(video)
    }

    async fn get_video(&self, id: &str, _policy: CachePolicy) -> RemoteResult<Video> {
        self.count();
        let state = self.state.lock().unwrap();
        state.videos.get(id).cloned().ok_or_else(|| Self::not_found("video", id))
    }

    async fn get_encoding(&self, id: &str, _policy: CachePolicy) -> RemoteResult<Encoding> {
        self.count();
        let state = self.state.lock().unwrap();
        state.encodings.get(id).cloned().ok_or_else(|| Self::not_found("encoding", id))
    }

    async fn get_profile(&self, id: &str, _policy: CachePolicy) -> RemoteResult<Profile> {
        self.count();
        let state = self.state.lock().unwrap();
        state
            .profiles
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| Self::not_found("profile", id))
    }

    async fn list_videos(&self, status: Option<JobStatus>, _policy: CachePolicy) -> RemoteResult<Vec<Video>> {
        self.count();
        let state = self.state.lock().unwrap();
        Ok(state
            .videos
            .values()
            .filter(|v| status.map_or(true, |s| v.status == s))
            .cloned()
            .collect())
    }

    async fn list_encodings(&self, filter: &EncodingFilter, _policy: CachePolicy) -> RemoteResult<Vec<Encoding>> {
        self.count();
        let state = self.state.lock().unwrap();
        let mut encodings: Vec<Encoding> = state
            .encodings
            .values()
            .filter(|e| filter.video_id.as_ref().map_or(true, |v| &e.video_id == v))
            .filter(|e| filter.status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        encodings.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(encodings)
    }

    async fn list_profiles(&self, _policy: CachePolicy) -> RemoteResult<Vec<Profile>> {
        self.count();
        Ok(self.state.lock().unwrap().profiles.clone())
    }

    async fn get_cloud(&self, _policy: CachePolicy) -> RemoteResult<CloudInfo> {
        self.count();
        Ok(serde_json::from_value(json!({
            "id": "cloud-1",
            "name": "test cloud",
            "s3_videos_bucket": self.bucket,
        }))
        .unwrap())
    }

    async fn delete_video(&self, id: &str) -> RemoteResult<bool> {
        self.count();
        let mut state = self.state.lock().unwrap();
        let existed = state.videos.remove(id).is_some();
        state.encodings.retain(|_, e| e.video_id != id);
        state.deleted_videos.push(id.to_string());
        Ok(existed)
    }

    async fn delete_encoding(&self, id: &str) -> RemoteResult<bool> {
        self.count();
        let mut state = self.state.lock().unwrap();
        state.deleted_encodings.push(id.to_string());
        Ok(state.encodings.remove(id).is_some())
    }

    async fn delete_profile(&self, id: &str) -> RemoteResult<bool> {
        self.count();
        let mut state = self.state.lock().unwrap();
        let before = state.profiles.len();
        state.profiles.retain(|p| p.id != id);
        Ok(state.profiles.len() < before)
    }

    async fn add_encoding_profile(&self, video_id: &str, profile_id: &str) -> RemoteResult<Encoding> {
        self.count();
        let mut state = self.state.lock().unwrap();
        if !state.videos.contains_key(video_id) {
            return Err(Self::not_found("video", video_id));
        }
        let profile = state
            .profiles
            .iter()
            .find(|p| p.id == profile_id)
            .cloned()
            .ok_or_else(|| Self::not_found("profile", profile_id))?;
        state.next_id += 1;
        let encoding = new_encoding(format!("e{}", state.next_id), video_id, &profile);
        state.encodings.insert(encoding.id.clone(), encoding.clone());
        Ok(encoding)
    }

    fn clear_cache(&self) {}
}

#[derive(Default)]
struct StoreState {
    associations: HashMap<(String, String), Association>,
    locks: HashMap<String, String>,
}

/// Association store kept in memory, with working per-file locks.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssociationStore for FakeStore {
    async fn track(&self, file_id: &str, video_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.associations.keys().any(|(_, v)| v == video_id) {
            return Ok(false);
        }
        state.associations.insert(
            (file_id.to_string(), video_id.to_string()),
            Association::new(file_id, video_id),
        );
        Ok(true)
    }

    async fn get(&self, file_id: &str, video_id: &str) -> Result<Option<Association>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .associations
            .get(&(file_id.to_string(), video_id.to_string()))
            .cloned())
    }

    async fn list(&self, file_id: &str, include_completed: bool) -> Result<Vec<Association>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut list: Vec<Association> = state
            .associations
            .values()
            .filter(|a| a.file_id == file_id && (include_completed || a.is_tracking()))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.video_id.cmp(&b.video_id));
        Ok(list)
    }

    async fn mark_complete(&self, file_id: &str, video_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        match state
            .associations
            .get_mut(&(file_id.to_string(), video_id.to_string()))
        {
            Some(a) if a.is_tracking() => {
                a.marker = CompletionMarker::Complete;
                a.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_failure_reported(&self, file_id: &str, video_id: &str, reported: bool) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(a) = state
            .associations
            .get_mut(&(file_id.to_string(), video_id.to_string()))
        {
            a.failure_reported = reported;
        }
        Ok(())
    }

    async fn remove(&self, file_id: &str, video_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        Ok(state
            .associations
            .remove(&(file_id.to_string(), video_id.to_string()))
            .is_some())
    }

    async fn owner_of(&self, video_id: &str) -> Result<Option<String>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .associations
            .keys()
            .find(|(_, v)| v == video_id)
            .map(|(f, _)| f.clone()))
    }

    async fn tracked_files(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut files: Vec<String> = state
            .associations
            .values()
            .filter(|a| a.is_tracking())
            .map(|a| a.file_id.clone())
            .collect();
        files.sort();
        files.dedup();
        Ok(files)
    }

    async fn try_lock(&self, file_id: &str, _ttl: Duration) -> Result<Option<LockToken>, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.locks.contains_key(file_id) {
            return Ok(None);
        }
        let token = LockToken::generate();
        state.locks.insert(file_id.to_string(), token.as_str().to_string());
        Ok(Some(token))
    }

    async fn unlock(&self, file_id: &str, token: &LockToken) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.locks.get(file_id).map(String::as_str) == Some(token.as_str()) {
            state.locks.remove(file_id);
        }
        Ok(())
    }
}

#[derive(Default)]
struct HostState {
    files: HashMap<String, MediaFile>,
    artifacts: Vec<(String, MaterializedArtifact)>,
    durations: HashMap<String, u64>,
    failing: Vec<(String, String)>,
    create_calls: usize,
    source_updates: usize,
}

/// Media library kept in memory.
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    /// A host holding one source file, stored as a remote URL.
    pub fn with_source_file() -> Self {
        let host = Self::default();
        host.add_file(MediaFile {
            id: FILE_ID.to_string(),
            media_id: MEDIA_ID.to_string(),
            display_name: "holiday.mov".to_string(),
            stored_id: StoredId::Url {
                id: SOURCE_URL.to_string(),
            },
            width: None,
            height: None,
            size: None,
        });
        host
    }

    pub fn add_file(&self, file: MediaFile) {
        self.state.lock().unwrap().files.insert(file.id.clone(), file);
    }

    pub fn remove_file(&self, file_id: &str) {
        self.state.lock().unwrap().files.remove(file_id);
    }

    pub fn file(&self, file_id: &str) -> Option<MediaFile> {
        self.state.lock().unwrap().files.get(file_id).cloned()
    }

    pub fn artifacts(&self) -> Vec<MaterializedArtifact> {
        let state = self.state.lock().unwrap();
        state.artifacts.iter().map(|(_, a)| a.clone()).collect()
    }

    /// Makes the next artifact for `remote_id` on `base_url_label` fail once.
    pub fn fail_once(&self, remote_id: &str, base_url_label: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .push((remote_id.to_string(), base_url_label.to_string()));
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    pub fn source_updates(&self) -> usize {
        self.state.lock().unwrap().source_updates
    }

    pub fn duration(&self, media_id: &str) -> Option<u64> {
        self.state.lock().unwrap().durations.get(media_id).copied()
    }
}

#[async_trait]
impl MediaHost for FakeHost {
    async fn media_file(&self, file_id: &str) -> Result<Option<MediaFile>, TranscodeError> {
        Ok(self.file(file_id))
    }

    async fn set_duration_if_unset(&self, media_id: &str, seconds: u64) -> Result<bool, TranscodeError> {
        let mut state = self.state.lock().unwrap();
        if state.durations.contains_key(media_id) {
            return Ok(false);
        }
        state.durations.insert(media_id.to_string(), seconds);
        Ok(true)
    }

    async fn update_source_file(
        &self,
        file_id: &str,
        width: Option<u32>,
        height: Option<u32>,
        size: Option<u64>,
    ) -> Result<(), TranscodeError> {
        let mut state = self.state.lock().unwrap();
        state.source_updates += 1;
        let file = state
            .files
            .get_mut(file_id)
            .ok_or_else(|| TranscodeError::Host(format!("file '{}' not found", file_id)))?;
        file.width = width;
        file.height = height;
        file.size = size;
        Ok(())
    }

    async fn create_artifact(&self, artifact: &MaterializedArtifact) -> Result<String, TranscodeError> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;

        let remote_id = match &artifact.stored_id {
            StoredId::Video { id, .. } | StoredId::Encoding { id, .. } => id.clone(),
            StoredId::File { id } | StoredId::Url { id } => id.clone(),
        };
        let failing = state
            .failing
            .iter()
            .position(|(id, label)| *id == remote_id && *label == artifact.base_url_label);
        if let Some(index) = failing {
            state.failing.remove(index);
            return Err(TranscodeError::Host("artifact store unavailable".to_string()));
        }

        let key = artifact.pair_key();
        if let Some((id, _)) = state.artifacts.iter().find(|(_, a)| a.pair_key() == key) {
            return Ok(id.clone());
        }
        let id = format!("artifact-{}", state.artifacts.len() + 1);
        state.artifacts.push((id.clone(), artifact.clone()));
        Ok(id)
    }
}

/// Settings with a CDN download domain (two base URLs) and short lock polls.
pub fn test_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        download_domain: "d111.cloudfront.net".to_string(),
        lock_wait: Duration::from_secs(5),
        lock_poll: Duration::from_millis(5),
        ..OrchestratorSettings::default()
    }
}

/// Wired-up orchestrator with handles on its fakes.
pub struct Harness {
    pub api: Arc<FakeApi>,
    pub store: Arc<FakeStore>,
    pub host: Arc<FakeHost>,
    pub orchestrator: Arc<JobOrchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: OrchestratorSettings) -> Self {
        let api = Arc::new(FakeApi::new());
        let store = Arc::new(FakeStore::new());
        let host = Arc::new(FakeHost::with_source_file());
        let orchestrator = Arc::new(JobOrchestrator::new(
            api.clone(),
            store.clone(),
            host.clone(),
            settings,
        ));
        Self {
            api,
            store,
            host,
            orchestrator,
        }
    }

    /// Submits the source file with the named profiles.
    pub async fn submit(&self, profiles: &[&str]) -> String {
        let names: Vec<String> = profiles.iter().map(|p| p.to_string()).collect();
        self.orchestrator
            .submit(FILE_ID, None, Some(&names), None)
            .await
            .unwrap()
    }
}
