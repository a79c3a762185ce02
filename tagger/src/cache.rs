use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Where an entry sits in its lifecycle. `Tagged` means the API spend is
/// banked but the result has not been embedded into an output artifact yet;
/// such items are retried on the next run without a new service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum EntryState {
    Tagged,
    Embedded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CacheEntry {
    /// Raw completion text, the sole source of truth for title/keywords on
    /// replay.
    pub raw: String,
    pub state: EntryState,
    pub tagged_at: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheData {
    #[serde(default)]
    entries: BTreeMap<String, CacheEntry>,
    /// Keywords already known for an identifier when it was tagged; echoed
    /// into later prompts to bias retention of location/brand terms.
    #[serde(default)]
    prior_keywords: BTreeMap<String, Vec<String>>,
}

/// Durable map from logical identifier to tagging result. The whole map is
/// rewritten on every flush; flushes happen after each item, so a killed
/// batch loses at most the in-flight item's service call.
pub(crate) struct ResultCache {
    path: PathBuf,
    data: CacheData,
}

impl ResultCache {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Self {
                path,
                data: CacheData::default(),
            });
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read result cache {}", path.display()))?;
        let data = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse result cache {}", path.display()))?;
        Ok(Self { path, data })
    }

    pub fn len(&self) -> usize {
        self.data.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.entries.is_empty()
    }

    /// A miss is not an error; it signals the item must be tagged.
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.data.entries.get(key)
    }

    pub fn prior_keywords(&self, key: &str) -> &[String] {
        self.data
            .prior_keywords
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Records a fresh tagging result and flushes immediately, before any
    /// embedding is attempted.
    pub fn put(&mut self, key: &str, raw: impl Into<String>, context_keywords: &[String]) -> Result<()> {
        let entry = CacheEntry {
            raw: raw.into(),
            state: EntryState::Tagged,
            tagged_at: current_timestamp(),
        };
        self.data.entries.insert(key.to_string(), entry);
        self.data
            .prior_keywords
            .insert(key.to_string(), context_keywords.to_vec());
        self.flush()
    }

    pub fn mark_embedded(&mut self, key: &str) -> Result<()> {
        if let Some(entry) = self.data.entries.get_mut(key) {
            entry.state = EntryState::Embedded;
        }
        self.flush()
    }

    /// Wholesale overwrite through a temp file, so an interrupted write
    /// leaves the previous snapshot intact.
    pub fn flush(&self) -> Result<()> {
        let serialized =
            serde_json::to_string(&self.data).context("failed to serialize result cache")?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serialized)
            .with_context(|| format!("failed to write result cache {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace result cache {}", self.path.display()))?;
        Ok(())
    }
}

fn current_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let cache = ResultCache::load(tmp.path().join("results.json")).unwrap();
        assert!(cache.is_empty());
        assert!(cache.get("photo.jpg").is_none());
        assert!(cache.prior_keywords("photo.jpg").is_empty());
    }

    // A put is durable on its own: a reload (as after a crash) sees it
    // without any end-of-run flush.
    #[test]
    fn put_is_durable_per_item() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("results.json");

        let mut cache = ResultCache::load(&path).unwrap();
        cache
            .put("a.jpg", "Sunset Beach, ocean, sand", &[])
            .unwrap();
        cache
            .put("b.jpg", "City Lights, night, skyline", &["paris".to_string()])
            .unwrap();
        drop(cache);

        let reloaded = ResultCache::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        let entry = reloaded.get("a.jpg").unwrap();
        assert_eq!(entry.raw, "Sunset Beach, ocean, sand");
        assert_eq!(entry.state, EntryState::Tagged);
        assert!(reloaded.get("c.jpg").is_none());
        assert_eq!(reloaded.prior_keywords("b.jpg"), ["paris".to_string()]);
    }

    #[test]
    fn mark_embedded_persists_state() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("results.json");

        let mut cache = ResultCache::load(&path).unwrap();
        cache.put("a.jpg", "Sunset Beach, ocean", &[]).unwrap();
        cache.mark_embedded("a.jpg").unwrap();
        drop(cache);

        let reloaded = ResultCache::load(&path).unwrap();
        assert_eq!(reloaded.get("a.jpg").unwrap().state, EntryState::Embedded);
    }

    #[test]
    fn corrupt_cache_fails_loudly() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("results.json");
        fs::write(&path, "{not json").unwrap();
        assert!(ResultCache::load(&path).is_err());
    }
}
