//! Seen-set store: which announcement ids were already delivered.
//!
//! Presence of an id means it was delivered (or at least its text was); absence
//! means it never was. Records are only ever added, except by `clear_all`.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{domain::AnnouncementId, Result};

#[async_trait]
pub trait SeenStore: Send + Sync {
    async fn has(&self, id: &AnnouncementId) -> Result<bool>;

    /// Record `id` as delivered. Marking an id twice is a no-op.
    async fn mark_seen(&self, id: &AnnouncementId) -> Result<()>;

    /// Remove every record, returning how many were removed.
    async fn clear_all(&self) -> Result<usize>;

    async fn len(&self) -> Result<usize>;
}

#[derive(Debug, Default, Deserialize)]
struct SeenFileData {
    ids: BTreeSet<String>,
}

/// Seen-set persisted as one JSON document, rewritten on every change.
pub struct JsonFileSeenStore {
    path: PathBuf,
    ids: Mutex<BTreeSet<String>>,
}

impl JsonFileSeenStore {
    /// Open (or create) the store at `path`. A missing file is an empty set.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let ids = load_seen_file(&path)?.map(|d| d.ids).unwrap_or_default();
        tracing::debug!(path = %path.display(), records = ids.len(), "opened seen-set store");
        Ok(Self {
            path,
            ids: Mutex::new(ids),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SeenStore for JsonFileSeenStore {
    async fn has(&self, id: &AnnouncementId) -> Result<bool> {
        Ok(self.ids.lock().await.contains(id.as_str()))
    }

    async fn mark_seen(&self, id: &AnnouncementId) -> Result<()> {
        let mut ids = self.ids.lock().await;
        if !ids.insert(id.0.clone()) {
            return Ok(());
        }
        if let Err(e) = save_seen_file(&self.path, &ids) {
            // Keep memory and disk in agreement.
            ids.remove(id.as_str());
            return Err(e);
        }
        Ok(())
    }

    async fn clear_all(&self) -> Result<usize> {
        let mut ids = self.ids.lock().await;
        let removed = ids.len();
        save_seen_file(&self.path, &BTreeSet::new())?;
        ids.clear();
        Ok(removed)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.ids.lock().await.len())
    }
}

fn load_seen_file(path: &Path) -> Result<Option<SeenFileData>> {
    if !path.exists() {
        return Ok(None);
    }
    let txt = std::fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(None);
    }
    let data: SeenFileData = serde_json::from_str(&txt)?;
    Ok(Some(data))
}

fn save_seen_file(path: &Path, ids: &BTreeSet<String>) -> Result<()> {
    let txt = serde_json::to_string_pretty(&SeenFileDataRef { ids })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, txt)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[derive(Serialize)]
struct SeenFileDataRef<'a> {
    ids: &'a BTreeSet<String>,
}

/// In-process seen-set, lost on exit.
#[derive(Default)]
pub struct MemorySeenStore {
    ids: Mutex<BTreeSet<String>>,
}

impl MemorySeenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: Mutex::new(ids.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl SeenStore for MemorySeenStore {
    async fn has(&self, id: &AnnouncementId) -> Result<bool> {
        Ok(self.ids.lock().await.contains(id.as_str()))
    }

    async fn mark_seen(&self, id: &AnnouncementId) -> Result<()> {
        self.ids.lock().await.insert(id.0.clone());
        Ok(())
    }

    async fn clear_all(&self) -> Result<usize> {
        let mut ids = self.ids.lock().await;
        let removed = ids.len();
        ids.clear();
        Ok(removed)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.ids.lock().await.len())
    }
}
