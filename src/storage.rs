//! Stored-file identifiers and URI resolution.
//!
//! Every media file carries a [`StoredId`] naming which delegate serves it.
//! The [`StorageEngine`] composes a local-file delegate and a remote-URL
//! delegate and dispatches on the variant; transcoded outputs resolve to one
//! URI per delivery base URL.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::materialize::BaseUrl;

/// Unique id of a stored media file, tagged by which delegate owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoredId {
    /// A file saved in the local media directory.
    File { id: String },
    /// A remote URL stored as-is.
    Url { id: String },
    /// The original of a remote transcoding job.
    Video { id: String, ext: String },
    /// One encoded variant of a remote transcoding job.
    Encoding { id: String, ext: String },
}

impl StoredId {
    /// Serializes to the JSON form persisted as a file's unique id.
    pub fn to_json(&self) -> String {
        // Serializing a plain tagged enum of strings cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parses the persisted JSON form.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// One way of reaching a stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUri {
    /// URI scheme, e.g. `http`, `rtmp`, `file`.
    pub scheme: String,
    pub uri: String,
}

impl StorageUri {
    fn new(scheme: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            uri: uri.into(),
        }
    }
}

/// Serves files saved in the local media directory.
#[derive(Debug, Clone)]
pub struct LocalFileDelegate {
    dir: PathBuf,
    base_url: String,
}

impl LocalFileDelegate {
    pub fn new(dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn uris(&self, name: &str) -> Vec<StorageUri> {
        vec![
            StorageUri::new("http", format!("{}/{}", self.base_url, name)),
            StorageUri::new("file", self.dir.join(name).to_string_lossy()),
        ]
    }
}

/// Serves files that are plain remote URLs.
#[derive(Debug, Clone, Default)]
pub struct RemoteUrlDelegate;

impl RemoteUrlDelegate {
    fn uris(&self, url: &str) -> Vec<StorageUri> {
        let scheme = url::Url::parse(url)
            .map(|u| u.scheme().to_string())
            .unwrap_or_else(|_| "http".to_string());
        vec![StorageUri::new(scheme, url)]
    }
}

/// Resolves stored ids to URIs.
#[derive(Debug, Clone)]
pub struct StorageEngine {
    local: LocalFileDelegate,
    remote: RemoteUrlDelegate,
}

impl StorageEngine {
    pub fn new(local: LocalFileDelegate, remote: RemoteUrlDelegate) -> Self {
        Self { local, remote }
    }

    /// Every URI the stored file can be reached at.
    pub fn uris(&self, id: &StoredId, base_urls: &[BaseUrl]) -> Vec<StorageUri> {
        match id {
            StoredId::File { id } => self.local.uris(id),
            StoredId::Url { id } => self.remote.uris(id),
            StoredId::Video { id, ext } | StoredId::Encoding { id, ext } => base_urls
                .iter()
                .map(|base| StorageUri::new(base.scheme(), base.object_url(id, ext)))
                .collect(),
        }
    }

    /// The first plain HTTP(S) URI, used as a download source.
    pub fn download_url(&self, id: &StoredId, base_urls: &[BaseUrl]) -> Option<String> {
        self.uris(id, base_urls)
            .into_iter()
            .find(|u| u.scheme == "http" || u.scheme == "https")
            .map(|u| u.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::{BaseUrlKind, ThumbnailStyle};

    fn engine() -> StorageEngine {
        StorageEngine::new(
            LocalFileDelegate::new("/srv/media", "http://media.example.com/files/"),
            RemoteUrlDelegate,
        )
    }

    fn bases() -> Vec<BaseUrl> {
        vec![
            BaseUrl::new(BaseUrlKind::Origin, "http://s3.amazonaws.com/bucket/", ThumbnailStyle::Frame),
            BaseUrl::new(BaseUrlKind::CdnStreaming, "rtmp://cdn.example.com/cfx/st/", ThumbnailStyle::Frame),
        ]
    }

    #[test]
    fn stored_id_json_is_tagged_by_type() {
        let id = StoredId::Encoding {
            id: "e1".into(),
            ext: ".mp4".into(),
        };
        let json = id.to_json();
        assert!(json.contains(r#""type":"encoding""#));
        assert_eq!(StoredId::from_json(&json).unwrap(), id);
    }

    #[test]
    fn local_files_resolve_through_the_local_delegate() {
        let uris = engine().uris(&StoredId::File { id: "clip.mov".into() }, &bases());
        assert_eq!(uris[0].uri, "http://media.example.com/files/clip.mov");
        assert_eq!(uris[1].scheme, "file");
    }

    #[test]
    fn remote_urls_keep_their_scheme() {
        let uris = engine().uris(&StoredId::Url { id: "https://x.org/a.mp4".into() }, &bases());
        assert_eq!(uris, vec![StorageUri::new("https", "https://x.org/a.mp4")]);
    }

    #[test]
    fn transcoded_outputs_get_one_uri_per_base_url() {
        let id = StoredId::Video {
            id: "v1".into(),
            ext: ".mp4".into(),
        };
        let uris = engine().uris(&id, &bases());
        assert_eq!(uris.len(), 2);
        assert_eq!(uris[0].uri, "http://s3.amazonaws.com/bucket/v1.mp4");
        assert_eq!(uris[1].scheme, "rtmp");
        assert_eq!(
            engine().download_url(&id, &bases()).as_deref(),
            Some("http://s3.amazonaws.com/bucket/v1.mp4")
        );
    }
}
