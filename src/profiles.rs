//! Maps operator-facing profile names to remote profile ids and back.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::remote::{CachePolicy, Profile, RemoteResult, TranscodeApi};

/// Splits a comma-separated profile list, trimming blanks.
pub fn parse_profile_names(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolves profile names against a cached copy of the remote catalog.
///
/// The catalog is fetched once per resolver and kept until
/// [`ProfileResolver::invalidate`] is called.
pub struct ProfileResolver {
    api: Arc<dyn TranscodeApi>,
    catalog: Mutex<Option<Arc<Vec<Profile>>>>,
}

impl ProfileResolver {
    /// Creates a resolver backed by the given client.
    pub fn new(api: Arc<dyn TranscodeApi>) -> Self {
        Self {
            api,
            catalog: Mutex::new(None),
        }
    }

    /// Returns the profile catalog, fetching it on first use.
    pub async fn catalog(&self) -> RemoteResult<Arc<Vec<Profile>>> {
        let mut cached = self.catalog.lock().await;
        if let Some(catalog) = cached.as_ref() {
            return Ok(Arc::clone(catalog));
        }

        let profiles = Arc::new(self.api.list_profiles(CachePolicy::Refresh).await?);
        debug!(count = profiles.len(), "Fetched profile catalog");
        *cached = Some(Arc::clone(&profiles));
        Ok(profiles)
    }

    /// Forgets the cached catalog so the next lookup refetches it.
    pub async fn invalidate(&self) {
        *self.catalog.lock().await = None;
    }

    /// Resolves names to ids in catalog order.
    ///
    /// Names missing from the catalog are dropped with a warning rather than
    /// failing the whole lookup.
    pub async fn names_to_ids(&self, names: &[String]) -> RemoteResult<Vec<String>> {
        let catalog = self.catalog().await?;

        let ids = catalog
            .iter()
            .filter(|p| names.contains(&p.name))
            .map(|p| p.id.clone())
            .collect();

        for name in names {
            if !catalog.iter().any(|p| &p.name == name) {
                match closest_name(name, &catalog) {
                    Some(suggestion) => warn!(
                        profile = %name,
                        suggestion = %suggestion,
                        "Configured profile does not exist remotely, skipping"
                    ),
                    None => warn!(profile = %name, "Configured profile does not exist remotely, skipping"),
                }
            }
        }

        Ok(ids)
    }

    /// Resolves ids to unique names in catalog order.
    pub async fn ids_to_names(&self, ids: &[String]) -> RemoteResult<Vec<String>> {
        let catalog = self.catalog().await?;
        let mut names: Vec<String> = Vec::new();
        for profile in catalog.iter() {
            if ids.contains(&profile.id) && !names.contains(&profile.name) {
                names.push(profile.name.clone());
            }
        }
        Ok(names)
    }

    /// Every known profile as `id -> name`.
    pub async fn all_id_name_pairs(&self) -> RemoteResult<HashMap<String, String>> {
        let catalog = self.catalog().await?;
        Ok(catalog
            .iter()
            .map(|p| (p.id.clone(), p.name.clone()))
            .collect())
    }
}

/// Nearest catalog name by edit distance, if reasonably close.
fn closest_name<'a>(input: &str, catalog: &'a [Profile]) -> Option<&'a str> {
    catalog
        .iter()
        .map(|p| (strsim::levenshtein(input, &p.name), p.name.as_str()))
        .filter(|(distance, name)| *distance <= name.len().max(input.len()) / 2)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::client::MockTranscodeApi;

    fn profile(id: &str, name: &str) -> Profile {
        Profile {
            id: id.to_string(),
            name: name.to_string(),
            title: None,
            extension: Some(".mp4".to_string()),
            width: Some(640),
            height: Some(480),
            preset_name: None,
        }
    }

    fn resolver_with(profiles: Vec<Profile>, fetches: usize) -> ProfileResolver {
        let mut api = MockTranscodeApi::new();
        api.expect_list_profiles()
            .times(fetches)
            .returning(move |_| Ok(profiles.clone()));
        ProfileResolver::new(Arc::new(api))
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn unmatched_names_are_dropped_without_error() {
        let resolver = resolver_with(vec![profile("h264-id", "h264")], 1);
        let ids = resolver
            .names_to_ids(&names(&["h264", "doesnotexist"]))
            .await
            .unwrap();
        assert_eq!(ids, vec!["h264-id".to_string()]);
    }

    #[tokio::test]
    async fn names_round_trip_through_ids() {
        let resolver = resolver_with(
            vec![
                profile("a", "h264"),
                profile("b", "ogg"),
                profile("c", "iphone"),
            ],
            1,
        );
        let requested = names(&["iphone", "h264", "missing"]);
        let ids = resolver.names_to_ids(&requested).await.unwrap();
        let mut back = resolver.ids_to_names(&ids).await.unwrap();
        back.sort();
        assert_eq!(back, names(&["h264", "iphone"]));
    }

    #[tokio::test]
    async fn catalog_is_fetched_once_until_invalidated() {
        let resolver = resolver_with(vec![profile("a", "h264")], 2);
        resolver.names_to_ids(&names(&["h264"])).await.unwrap();
        let pairs = resolver.all_id_name_pairs().await.unwrap();
        assert_eq!(pairs.get("a").map(String::as_str), Some("h264"));

        resolver.invalidate().await;
        resolver.ids_to_names(&names(&["a"])).await.unwrap();
    }

    #[tokio::test]
    async fn remote_failure_is_propagated() {
        let mut api = MockTranscodeApi::new();
        api.expect_list_profiles()
            .returning(|_| Err(crate::error::TranscodeError::Transport("timeout".into())));
        let resolver = ProfileResolver::new(Arc::new(api));
        assert!(resolver.names_to_ids(&names(&["h264"])).await.is_err());
    }

    #[test]
    fn closest_name_suggests_near_misses_only() {
        let catalog = vec![profile("a", "h264"), profile("b", "webm")];
        assert_eq!(closest_name("h246", &catalog), Some("h264"));
        assert_eq!(closest_name("completely-different", &catalog), None);
    }

    #[test]
    fn profile_list_parsing_trims_and_skips_blanks() {
        assert_eq!(parse_profile_names(" h264, ogg ,,iphone "), names(&["h264", "ogg", "iphone"]));
        assert!(parse_profile_names("").is_empty());
    }
}
