//! Per-URL validator cache backing conditional HTTP requests.
//!
//! One entry per URL ever fetched with a 200: the origin's ETag and
//! Last-Modified validators, when the fetch happened, and a digest of the
//! saved body. The cache is advisory; a missing entry only costs bytes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidatorEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    pub last_fetched: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Conditional request headers derived from a cache entry.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConditionalHeaders {
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
}

#[derive(Debug)]
pub struct ValidatorCache {
    path: PathBuf,
    entries: BTreeMap<String, ValidatorEntry>,
}

impl ValidatorCache {
    /// Load the manifest, or start empty when it is missing or unreadable.
    /// A corrupt manifest costs a full re-download, never a failed run.
    pub fn load(path: &Path) -> Self {
        let entries = fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn conditional_headers(&self, url: &str) -> ConditionalHeaders {
        match self.entries.get(url) {
            Some(entry) => ConditionalHeaders {
                if_none_match: entry.etag.clone(),
                if_modified_since: entry.last_modified.clone(),
            },
            None => ConditionalHeaders::default(),
        }
    }

    /// Upsert an entry. Unsupplied fields keep their previous values;
    /// `last_fetched` is always bumped to now.
    pub fn update(
        &mut self,
        url: &str,
        etag: Option<String>,
        last_modified: Option<String>,
        digest: Option<String>,
    ) {
        let entry = self
            .entries
            .entry(url.to_string())
            .or_insert_with(|| ValidatorEntry {
                etag: None,
                last_modified: None,
                last_fetched: Utc::now(),
                digest: None,
            });

        if etag.is_some() {
            entry.etag = etag;
        }
        if last_modified.is_some() {
            entry.last_modified = last_modified;
        }
        if digest.is_some() {
            entry.digest = digest;
        }
        entry.last_fetched = Utc::now();
    }

    /// Drop an entry entirely so the next fetch downloads unconditionally.
    pub fn forget(&mut self, url: &str) {
        self.entries.remove(url);
    }

    /// Remove entries not refreshed within the retention window.
    pub fn expire(&mut self, max_age_days: i64) -> usize {
        let cutoff = Utc::now() - Duration::days(max_age_days);
        let before = self.entries.len();
        self.entries.retain(|_, e| e.last_fetched >= cutoff);
        before - self.entries.len()
    }

    pub fn get(&self, url: &str) -> Option<&ValidatorEntry> {
        self.entries.get(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the manifest atomically: temp file in the same directory, then rename.
    pub fn save(&self) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unknown_url_has_no_headers() {
        let dir = TempDir::new().unwrap();
        let cache = ValidatorCache::load(&dir.path().join("manifest.json"));
        let headers = cache.conditional_headers("https://blog.example.com/");
        assert_eq!(headers, ConditionalHeaders::default());
    }

    #[test]
    fn test_update_then_headers() {
        let dir = TempDir::new().unwrap();
        let mut cache = ValidatorCache::load(&dir.path().join("manifest.json"));
        cache.update(
            "https://blog.example.com/",
            Some("\"v1\"".to_string()),
            Some("Wed, 01 Jan 2025 00:00:00 GMT".to_string()),
            None,
        );

        let headers = cache.conditional_headers("https://blog.example.com/");
        assert_eq!(headers.if_none_match.as_deref(), Some("\"v1\""));
        assert_eq!(
            headers.if_modified_since.as_deref(),
            Some("Wed, 01 Jan 2025 00:00:00 GMT")
        );
    }

    #[test]
    fn test_partial_update_keeps_existing_fields() {
        let dir = TempDir::new().unwrap();
        let mut cache = ValidatorCache::load(&dir.path().join("manifest.json"));
        cache.update("u", Some("\"v1\"".to_string()), None, None);
        cache.update("u", None, None, Some("deadbeef".to_string()));

        let entry = cache.get("u").unwrap();
        assert_eq!(entry.etag.as_deref(), Some("\"v1\""));
        assert_eq!(entry.digest.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn test_last_fetched_monotonic() {
        let dir = TempDir::new().unwrap();
        let mut cache = ValidatorCache::load(&dir.path().join("manifest.json"));
        cache.update("u", None, None, None);
        let first = cache.get("u").unwrap().last_fetched;
        cache.update("u", None, None, None);
        assert!(cache.get("u").unwrap().last_fetched >= first);
    }

    #[test]
    fn test_forget() {
        let dir = TempDir::new().unwrap();
        let mut cache = ValidatorCache::load(&dir.path().join("manifest.json"));
        cache.update("u", Some("\"v1\"".to_string()), None, None);
        cache.forget("u");
        assert!(cache.get("u").is_none());
    }

    #[test]
    fn test_expire_removes_stale_entries() {
        let dir = TempDir::new().unwrap();
        let mut cache = ValidatorCache::load(&dir.path().join("manifest.json"));
        cache.update("old", None, None, None);
        if let Some(e) = cache.entries.get_mut("old") {
            e.last_fetched = Utc::now() - Duration::days(60);
        }
        cache.update("fresh", None, None, None);

        assert_eq!(cache.expire(30), 1);
        assert!(cache.get("old").is_none());
        assert!(cache.get("fresh").is_some());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");

        let mut cache = ValidatorCache::load(&path);
        cache.update("u", Some("\"v1\"".to_string()), None, Some("abc".to_string()));
        cache.save().unwrap();

        let reloaded = ValidatorCache::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("u").unwrap().etag.as_deref(), Some("\"v1\""));
    }

    #[test]
    fn test_corrupt_manifest_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        fs::write(&path, "{ not json").unwrap();
        let cache = ValidatorCache::load(&path);
        assert!(cache.is_empty());
    }
}
