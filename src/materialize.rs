//! Turns completed remote videos and encodings into host media artifacts.
//!
//! One artifact is produced per (remote object, delivery base URL) pair.
//! Failures are collected per pair so a single bad write never hides the
//! rest; the caller decides what an incomplete set means.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MaterializationFailure, TranscodeError};
use crate::host::{MediaFile, MediaHost};
use crate::remote::{Encoding, Video};
use crate::storage::{StorageEngine, StorageUri, StoredId};

/// Default display name for the transcoded original.
pub const DEFAULT_VIDEO_NAME_TEMPLATE: &str = "({label}) {name}{ext}";

/// Default display name for one encoded variant.
pub const DEFAULT_ENCODING_NAME_TEMPLATE: &str = "({label} - {profile}) {name}{ext}";

/// Where a delivery base URL points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseUrlKind {
    /// The origin storage bucket.
    Origin,
    /// CDN progressive download.
    CdnHttp,
    /// CDN streaming.
    CdnStreaming,
}

impl BaseUrlKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Origin => "S3 - HTTP",
            Self::CdnHttp => "CF - HTTP",
            Self::CdnStreaming => "CF - RTMP",
        }
    }
}

/// How thumbnail URLs are derived from a base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailStyle {
    /// `{base}{id}_1.jpg`
    #[default]
    Frame,
    /// `{base}{id}.{ext}_thumb.jpg`
    Extension,
}

/// A delivery base URL. Object URLs are `{url}{id}{ext}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseUrl {
    pub kind: BaseUrlKind,
    pub url: String,
    pub thumbnail_style: ThumbnailStyle,
}

impl BaseUrl {
    pub fn new(kind: BaseUrlKind, url: impl Into<String>, thumbnail_style: ThumbnailStyle) -> Self {
        Self {
            kind,
            url: url.into(),
            thumbnail_style,
        }
    }

    pub fn label(&self) -> &'static str {
        self.kind.label()
    }

    pub fn scheme(&self) -> &'static str {
        match self.kind {
            BaseUrlKind::CdnStreaming => "rtmp",
            _ => "http",
        }
    }

    /// URL of a remote object; `ext` includes the leading dot.
    pub fn object_url(&self, id: &str, ext: &str) -> String {
        format!("{}{}{}", self.url, id, ext)
    }

    /// Thumbnail URL; `ext` has no leading dot.
    pub fn thumbnail_url(&self, id: &str, ext: &str) -> String {
        match self.thumbnail_style {
            ThumbnailStyle::Frame => format!("{}{}_1.jpg", self.url, id),
            ThumbnailStyle::Extension => format!("{}{}.{}_thumb.jpg", self.url, id, ext),
        }
    }

    /// URL of the remote encoder's log for a failed object.
    pub fn error_log_url(&self, id: &str) -> String {
        format!("{}{}.log", self.url, id)
    }
}

/// Builds the delivery base URLs, origin first.
///
/// CDN entries are only included when their domain is configured.
pub fn resolve_base_urls(
    bucket: Option<&str>,
    download_domain: &str,
    streaming_domain: &str,
    thumbnail_style: ThumbnailStyle,
) -> Vec<BaseUrl> {
    let mut urls = Vec::new();

    if let Some(bucket) = bucket.map(str::trim).filter(|b| !b.is_empty()) {
        urls.push(BaseUrl::new(
            BaseUrlKind::Origin,
            format!("http://s3.amazonaws.com/{}/", bucket),
            thumbnail_style,
        ));
    }

    let download = download_domain.trim_matches(|c| c == ' ' || c == '/');
    if !download.is_empty() {
        urls.push(BaseUrl::new(
            BaseUrlKind::CdnHttp,
            format!("http://{}/", download),
            thumbnail_style,
        ));
    }

    let streaming = streaming_domain.trim_matches(|c| c == ' ' || c == '/');
    if !streaming.is_empty() {
        urls.push(BaseUrl::new(
            BaseUrlKind::CdnStreaming,
            format!("rtmp://{}/cfx/st/", streaming),
            thumbnail_style,
        ));
    }

    urls
}

/// Normalizes a remote extension to `.ext`, rewriting `.ts` playlists.
///
/// The remote service labels HLS outputs as transport streams; players
/// need the playlist.
pub fn normalize_extension(raw: Option<&str>) -> String {
    let ext = raw.unwrap_or("").trim().trim_start_matches('.').to_lowercase();
    match ext.as_str() {
        "ts" => ".m3u8".to_string(),
        "" => String::new(),
        _ => format!(".{}", ext),
    }
}

/// Guesses the container format from an extension without its dot.
pub fn container_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "mp4" | "m4v" => Some("mp4"),
        "mov" => Some("mov"),
        "flv" | "f4v" => Some("flv"),
        "webm" => Some("webm"),
        "ogg" | "ogv" => Some("ogg"),
        "mkv" => Some("mkv"),
        "avi" => Some("avi"),
        "3gp" => Some("3gp"),
        "m3u8" => Some("m3u8"),
        "mp3" => Some("mp3"),
        _ => None,
    }
}

fn bitrate(audio: Option<u64>, video: Option<u64>) -> Option<u64> {
    let total = audio.unwrap_or(0) + video.unwrap_or(0);
    (total > 0).then_some(total)
}

fn millis_to_secs(ms: u64) -> u64 {
    (ms + 500) / 1000
}

/// A completed remote object to materialize.
#[derive(Debug, Clone, Copy)]
pub enum Descriptor<'a> {
    Video(&'a Video),
    Encoding {
        encoding: &'a Encoding,
        profile_name: &'a str,
    },
}

impl Descriptor<'_> {
    pub fn id(&self) -> &str {
        match self {
            Self::Video(v) => &v.id,
            Self::Encoding { encoding, .. } => &encoding.id,
        }
    }

    fn raw_extension(&self) -> Option<&str> {
        match self {
            Self::Video(v) => v.extension.as_deref(),
            Self::Encoding { encoding, .. } => encoding.extension.as_deref(),
        }
    }

    fn dimensions(&self) -> (Option<u32>, Option<u32>) {
        match self {
            Self::Video(v) => (v.width, v.height),
            Self::Encoding { encoding, .. } => (encoding.width, encoding.height),
        }
    }

    fn file_size(&self) -> Option<u64> {
        match self {
            Self::Video(v) => v.file_size,
            Self::Encoding { encoding, .. } => encoding.file_size,
        }
    }

    fn bitrate(&self) -> Option<u64> {
        match self {
            Self::Video(v) => bitrate(v.audio_bitrate, v.video_bitrate),
            Self::Encoding { encoding, .. } => bitrate(encoding.audio_bitrate, encoding.video_bitrate),
        }
    }

    fn duration_ms(&self) -> Option<u64> {
        match self {
            Self::Video(v) => v.duration,
            Self::Encoding { encoding, .. } => encoding.duration,
        }
    }

    fn profile_name(&self) -> Option<&str> {
        match self {
            Self::Video(_) => None,
            Self::Encoding { profile_name, .. } => Some(profile_name),
        }
    }

    fn stored_id(&self, ext: &str) -> StoredId {
        match self {
            Self::Video(v) => StoredId::Video {
                id: v.id.clone(),
                ext: ext.to_string(),
            },
            Self::Encoding { encoding, .. } => StoredId::Encoding {
                id: encoding.id.clone(),
                ext: ext.to_string(),
            },
        }
    }
}

/// A new host media file produced from a completed remote object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedArtifact {
    pub media_id: String,
    pub source_file_id: String,
    pub display_name: String,
    pub stored_id: StoredId,

    /// Extension without the leading dot.
    pub extension: String,
    pub container: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub size: Option<u64>,

    /// Audio plus video bitrate; never zero.
    pub bitrate: Option<u64>,

    /// Duration in seconds.
    pub duration: Option<u64>,
    pub thumbnail_url: String,

    /// URL on the base URL this artifact was created for.
    pub url: String,
    pub base_url_label: String,

    /// Every URI the object is reachable at.
    pub uris: Vec<StorageUri>,
    pub profile_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MaterializedArtifact {
    /// Identity of the (remote object, base URL) pair this artifact stands for.
    pub fn pair_key(&self) -> String {
        format!("{}@{}", self.stored_id.to_json(), self.base_url_label)
    }
}

/// Display name templates. Placeholders: `{label}`, `{profile}`, `{name}`, `{ext}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplates {
    pub video: String,
    pub encoding: String,
}

impl Default for NameTemplates {
    fn default() -> Self {
        Self {
            video: DEFAULT_VIDEO_NAME_TEMPLATE.to_string(),
            encoding: DEFAULT_ENCODING_NAME_TEMPLATE.to_string(),
        }
    }
}

impl NameTemplates {
    fn render(&self, descriptor: &Descriptor<'_>, label: &str, name: &str, ext: &str) -> String {
        let template = match descriptor {
            Descriptor::Video(_) => &self.video,
            Descriptor::Encoding { .. } => &self.encoding,
        };
        template
            .replace("{label}", label)
            .replace("{profile}", descriptor.profile_name().unwrap_or(""))
            .replace("{name}", name)
            .replace("{ext}", ext)
    }
}

/// Builds artifacts and hands them to the host.
pub struct ArtifactMaterializer {
    host: Arc<dyn MediaHost>,
    engine: StorageEngine,
    templates: NameTemplates,
}

impl ArtifactMaterializer {
    pub fn new(host: Arc<dyn MediaHost>, engine: StorageEngine, templates: NameTemplates) -> Self {
        Self {
            host,
            engine,
            templates,
        }
    }

    /// Builds the artifact for one (descriptor, base URL) pair.
    ///
    /// Thumbnails always come from the first (origin) base URL.
    pub fn from_remote_descriptor(
        &self,
        descriptor: &Descriptor<'_>,
        source: &MediaFile,
        base: &BaseUrl,
        base_urls: &[BaseUrl],
    ) -> MaterializedArtifact {
        let ext = normalize_extension(descriptor.raw_extension());
        let bare_ext = ext.trim_start_matches('.').to_string();
        let stored_id = descriptor.stored_id(&ext);
        let (width, height) = descriptor.dimensions();
        let thumbnail_base = base_urls.first().unwrap_or(base);

        MaterializedArtifact {
            media_id: source.media_id.clone(),
            source_file_id: source.id.clone(),
            display_name: self
                .templates
                .render(descriptor, base.label(), source.base_name(), &ext),
            uris: self.engine.uris(&stored_id, base_urls),
            stored_id,
            container: container_for_extension(&bare_ext).map(str::to_string),
            width,
            height,
            size: descriptor.file_size(),
            bitrate: descriptor.bitrate(),
            duration: descriptor.duration_ms().map(millis_to_secs),
            thumbnail_url: thumbnail_base.thumbnail_url(descriptor.id(), &bare_ext),
            url: base.object_url(descriptor.id(), &ext),
            base_url_label: base.label().to_string(),
            profile_name: descriptor.profile_name().map(str::to_string),
            extension: bare_ext,
            created_at: Utc::now(),
        }
    }

    /// Materializes every descriptor on every base URL.
    ///
    /// Returns the artifact ids, or an aggregate error naming each pair that
    /// failed. Successful pairs are not rolled back; the host keys artifacts
    /// by pair, so a later run only fills in the missing ones.
    pub async fn materialize_all(
        &self,
        descriptors: &[Descriptor<'_>],
        source: &MediaFile,
        base_urls: &[BaseUrl],
    ) -> Result<Vec<String>, TranscodeError> {
        let mut created = Vec::new();
        let mut failures = Vec::new();

        for base in base_urls {
            for descriptor in descriptors {
                let artifact = self.from_remote_descriptor(descriptor, source, base, base_urls);
                match self.host.create_artifact(&artifact).await {
                    Ok(artifact_id) => {
                        debug!(
                            artifact_id = %artifact_id,
                            remote_id = %descriptor.id(),
                            base_url = %base.label(),
                            "Created artifact"
                        );
                        created.push(artifact_id);
                    }
                    Err(e) => {
                        warn!(
                            remote_id = %descriptor.id(),
                            base_url = %base.label(),
                            error = %e,
                            "Failed to create artifact"
                        );
                        failures.push(MaterializationFailure {
                            remote_id: descriptor.id().to_string(),
                            base_url: base.label().to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(created)
        } else {
            Err(TranscodeError::Materialization { failures })
        }
    }
}
