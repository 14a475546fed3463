use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use tracing::{debug, instrument, warn};

use crate::api::ApiError;
use crate::users::{CacheSnapshot, UserInfoCache, UserProfile};

/// Remote lookup of a single user profile.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_profile(&self, user_id: &str) -> Result<UserProfile, ApiError>;
}

/// Looks profiles up through a CORS relay in front of the profile service.
pub struct RelayProfileSource {
    http: reqwest::Client,
    relay: String,
    profile_host: String,
}

impl RelayProfileSource {
    pub fn new(relay: impl Into<String>, profile_host: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            relay: relay.into(),
            profile_host: profile_host.into(),
        }
    }

    pub fn lookup_url(&self, user_id: &str) -> String {
        let target = format!(
            "https://{}/users/{}",
            self.profile_host.trim_end_matches('/'),
            user_id
        );
        format!(
            "{}?{}",
            self.relay,
            utf8_percent_encode(&target, NON_ALPHANUMERIC)
        )
    }
}

#[async_trait]
impl ProfileSource for RelayProfileSource {
    async fn fetch_profile(&self, user_id: &str) -> Result<UserProfile, ApiError> {
        let url = self.lookup_url(user_id);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status { status });
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Resolves user ids to profiles, memoized through a shared [`UserInfoCache`].
///
/// Concurrent lookups of the same uncached id are not coalesced; each one
/// reaches the source and the last cache write wins.
pub struct UserInfoFetcher {
    cache: Arc<RwLock<UserInfoCache>>,
    source: Arc<dyn ProfileSource>,
    /// Generation of the newest snapshot on disk.
    written: Arc<tokio::sync::Mutex<u64>>,
}

impl UserInfoFetcher {
    pub fn new(cache: UserInfoCache, source: Arc<dyn ProfileSource>) -> Self {
        Self {
            cache: Arc::new(RwLock::new(cache)),
            source,
            written: Arc::new(tokio::sync::Mutex::new(0)),
        }
    }

    pub fn cached(&self, user_id: &str) -> Option<UserProfile> {
        self.cache
            .read()
            .ok()
            .and_then(|cache| cache.get(user_id).cloned())
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().map(|cache| cache.len()).unwrap_or(0)
    }

    /// Never fails: any lookup error is logged and reported as `None`.
    #[instrument(skip(self))]
    pub async fn resolve(&self, user_id: &str) -> Option<UserProfile> {
        if let Some(profile) = self.cached(user_id) {
            return Some(profile);
        }
        match self.source.fetch_profile(user_id).await {
            Ok(profile) => {
                debug!(display_name = %profile.display_name, "resolved profile");
                let snapshot = match self.cache.write() {
                    Ok(mut cache) => cache.put(user_id, profile.clone()),
                    Err(_) => None,
                };
                if let Some(snapshot) = snapshot {
                    self.persist(snapshot).await;
                }
                Some(profile)
            }
            Err(err) => {
                warn!(%err, "profile lookup failed");
                None
            }
        }
    }

    /// Writes off the runtime threads. A snapshot older than the one already
    /// on disk is skipped.
    async fn persist(&self, snapshot: CacheSnapshot) {
        let mut written = self.written.lock().await;
        if snapshot.generation() <= *written {
            return;
        }
        let generation = snapshot.generation();
        match tokio::task::spawn_blocking(move || snapshot.write()).await {
            Ok(()) => *written = generation,
            Err(err) => warn!(%err, "user cache write task failed"),
        }
    }

    /// Display name for `user_id`, or the id itself when it cannot be resolved.
    pub async fn display_name(&self, user_id: &str) -> String {
        self.resolve(user_id)
            .await
            .map(|p| p.display_name)
            .unwrap_or_else(|| user_id.to_string())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    /// In-memory profile source that counts every lookup.
    #[derive(Default)]
    pub struct FakeProfiles {
        pub profiles: HashMap<String, UserProfile>,
        pub calls: AtomicUsize,
    }

    impl FakeProfiles {
        pub fn with(names: &[(&str, &str)]) -> Self {
            let profiles = names
                .iter()
                .map(|(id, name)| {
                    (
                        id.to_string(),
                        UserProfile {
                            id: id.to_string(),
                            display_name: name.to_string(),
                            image_url: None,
                            pronouns: None,
                        },
                    )
                })
                .collect();
            Self {
                profiles,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProfileSource for FakeProfiles {
        async fn fetch_profile(&self, user_id: &str) -> Result<UserProfile, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.profiles
                .get(user_id)
                .cloned()
                .ok_or(ApiError::Status {
                    status: reqwest::StatusCode::NOT_FOUND,
                })
        }
    }

    pub fn fetcher(names: &[(&str, &str)]) -> (UserInfoFetcher, Arc<FakeProfiles>) {
        let source = Arc::new(FakeProfiles::with(names));
        let fetcher = UserInfoFetcher::new(UserInfoCache::in_memory(), source.clone());
        (fetcher, source)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::fetcher;
    use super::*;

    #[tokio::test]
    async fn second_resolution_hits_cache() {
        let (fetcher, source) = fetcher(&[("U1", "Ada")]);
        assert_eq!(fetcher.resolve("U1").await.map(|p| p.display_name), Some("Ada".into()));
        assert_eq!(fetcher.resolve("U1").await.map(|p| p.display_name), Some("Ada".into()));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn failed_lookup_returns_none_and_is_retried() {
        let (fetcher, source) = fetcher(&[]);
        assert!(fetcher.resolve("U404").await.is_none());
        assert_eq!(fetcher.display_name("U404").await, "U404");
        assert_eq!(source.calls(), 2);
        assert_eq!(fetcher.cache_len(), 0);
    }

    #[tokio::test]
    async fn concurrent_uncached_lookups_are_not_coalesced() {
        let (fetcher, source) = fetcher(&[("U1", "Ada")]);
        let (a, b) = tokio::join!(fetcher.resolve("U1"), fetcher.resolve("U1"));
        assert!(a.is_some() && b.is_some());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn resolved_profiles_reach_durable_storage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("user_cache.json");
        let source = Arc::new(super::testing::FakeProfiles::with(&[
            ("U1", "Ada"),
            ("U2", "Grace"),
        ]));
        let fetcher = UserInfoFetcher::new(UserInfoCache::new(&path), source);
        let (a, b) = tokio::join!(fetcher.resolve("U1"), fetcher.resolve("U2"));
        assert!(a.is_some() && b.is_some());

        let stored = std::fs::read_to_string(&path).expect("cache file");
        assert!(stored.contains("Ada"));
        assert!(stored.contains("Grace"));

        let mut reloaded = UserInfoCache::new(&path);
        reloaded.load_from_durable_storage();
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn relay_url_encodes_target() {
        let source = RelayProfileSource::new("https://relay.example/", "profiles.example.com");
        assert_eq!(
            source.lookup_url("U01ABC"),
            "https://relay.example/?https%3A%2F%2Fprofiles%2Eexample%2Ecom%2Fusers%2FU01ABC"
        );
    }
}
