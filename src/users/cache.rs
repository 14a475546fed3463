use std::{collections::HashMap, path::PathBuf};

use tracing::{debug, warn};

use crate::logging::get_data_dir;
use crate::users::UserProfile;

const CACHE_FILE: &str = "profiles/user_cache.json";

/// Memo of user id to profile, mirrored to a JSON file.
///
/// Entries are never evicted or refreshed. Storage failures are logged and
/// swallowed, in which case the cache keeps working from memory only.
#[derive(Debug, Default)]
pub struct UserInfoCache {
    entries: HashMap<String, UserProfile>,
    storage: Option<PathBuf>,
    generation: u64,
}

/// The serialized map as of one insert, written to disk outside of any lock.
#[derive(Debug)]
#[must_use = "the snapshot does nothing until it is written"]
pub struct CacheSnapshot {
    path: PathBuf,
    contents: Vec<u8>,
    generation: u64,
}

impl CacheSnapshot {
    /// Later snapshots contain every entry of earlier ones.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Blocking write. Failures are logged and swallowed.
    pub fn write(self) {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&self.path, &self.contents)
        };
        if let Err(err) = write() {
            warn!(path = %self.path.display(), %err, "could not persist user cache");
        }
    }
}

impl UserInfoCache {
    /// A cache backed by `storage`. Call [`Self::load_from_durable_storage`]
    /// before the first lookup.
    pub fn new(storage: impl Into<PathBuf>) -> Self {
        Self {
            entries: HashMap::new(),
            storage: Some(storage.into()),
            generation: 0,
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn default_path() -> PathBuf {
        get_data_dir().join(CACHE_FILE)
    }

    pub fn get(&self, id: &str) -> Option<&UserProfile> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts and returns the whole map serialized for storage. Memory-only
    /// caches return `None`.
    pub fn put(&mut self, id: impl Into<String>, profile: UserProfile) -> Option<CacheSnapshot> {
        self.entries.insert(id.into(), profile);
        self.snapshot()
    }

    /// Merges the persisted map into memory. Stored values win on collision.
    pub fn load_from_durable_storage(&mut self) {
        let Some(path) = &self.storage else {
            return;
        };
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
            Err(err) => {
                warn!(path = %path.display(), %err, "could not read user cache");
                return;
            }
        };
        match serde_json::from_str::<HashMap<String, UserProfile>>(&contents) {
            Ok(stored) => {
                debug!(entries = stored.len(), "loaded user cache");
                self.entries.extend(stored);
            }
            Err(err) => warn!(path = %path.display(), %err, "ignoring corrupt user cache"),
        }
    }

    fn snapshot(&mut self) -> Option<CacheSnapshot> {
        let path = self.storage.clone()?;
        let contents = match serde_json::to_vec(&self.entries) {
            Ok(contents) => contents,
            Err(err) => {
                warn!(%err, "could not serialize user cache");
                return None;
            }
        };
        self.generation += 1;
        Some(CacheSnapshot {
            path,
            contents,
            generation: self.generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str, name: &str) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            display_name: name.to_string(),
            image_url: None,
            pronouns: None,
        }
    }

    fn put(cache: &mut UserInfoCache, id: &str, name: &str) {
        if let Some(snapshot) = cache.put(id, profile(id, name)) {
            snapshot.write();
        }
    }

    #[test]
    fn put_persists_and_reload_restores() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/user_cache.json");

        let mut cache = UserInfoCache::new(&path);
        put(&mut cache, "U1", "Ada");
        put(&mut cache, "U2", "Grace");
        assert!(path.exists());

        let mut reloaded = UserInfoCache::new(&path);
        reloaded.load_from_durable_storage();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("U2").map(|p| p.display_name.as_str()), Some("Grace"));
    }

    #[test]
    fn corrupt_storage_yields_empty_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("user_cache.json");
        std::fs::write(&path, "{not json").expect("write");

        let mut cache = UserInfoCache::new(&path);
        cache.load_from_durable_storage();
        assert!(cache.is_empty());
    }

    #[test]
    fn missing_storage_yields_empty_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cache = UserInfoCache::new(dir.path().join("absent.json"));
        cache.load_from_durable_storage();
        assert!(cache.is_empty());
    }

    #[test]
    fn stored_values_overwrite_colliding_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("user_cache.json");
        put(&mut UserInfoCache::new(&path), "U1", "Stored");

        let mut cache = UserInfoCache::new(&path);
        cache.entries.insert("U1".into(), profile("U1", "Fresh"));
        cache.load_from_durable_storage();
        assert_eq!(cache.get("U1").map(|p| p.display_name.as_str()), Some("Stored"));
    }

    #[test]
    fn unwritable_storage_degrades_to_memory() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A directory cannot be written as a file.
        let mut cache = UserInfoCache::new(dir.path());
        put(&mut cache, "U1", "Ada");
        assert_eq!(cache.get("U1").map(|p| p.display_name.as_str()), Some("Ada"));
    }

    #[test]
    fn snapshots_are_ordered_and_memory_only_caches_skip_them() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cache = UserInfoCache::new(dir.path().join("user_cache.json"));
        let first = cache.put("U1", profile("U1", "Ada")).expect("snapshot");
        let second = cache.put("U2", profile("U2", "Grace")).expect("snapshot");
        assert!(second.generation() > first.generation());

        let mut memory = UserInfoCache::in_memory();
        assert!(memory.put("U1", profile("U1", "Ada")).is_none());
        assert_eq!(memory.len(), 1);
    }
}
