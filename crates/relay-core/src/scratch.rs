//! Local scratch storage for attachments between download and upload.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::Result;

static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Directory holding one announcement's downloads; removed on drop.
pub struct ScratchDir {
    path: PathBuf,
    used_names: HashSet<String>,
}

impl ScratchDir {
    /// Create a fresh directory under `root` tagged with `tag` (the announcement id).
    pub fn create(root: &Path, tag: &str) -> Result<Self> {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let n = SCRATCH_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = root.join(format!("{}_{ts}_{n}", sanitize_filename(tag)));
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            path,
            used_names: HashSet::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reserve a path for a file called `name`, sanitized and unique within this dir.
    pub fn file_path(&mut self, name: &str) -> PathBuf {
        let base = sanitize_filename(name);
        let mut candidate = base.clone();
        let mut n = 1usize;
        while !self.used_names.insert(candidate.clone()) {
            n += 1;
            candidate = numbered_filename(&base, n);
        }
        self.path.join(candidate)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove scratch dir");
            }
        }
    }
}

/// Keep letters, digits, `.`, `_`, `-` and spaces; replace everything else.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_alphanumeric() || matches!(ch, '.' | '_' | '-' | ' ') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    let out = out.trim_matches('.').trim().to_string();
    if out.is_empty() {
        "document".to_string()
    } else {
        out
    }
}

fn numbered_filename(base: &str, n: usize) -> String {
    if let Some((stem, ext)) = base.rsplit_once('.') {
        if !stem.is_empty() && !ext.is_empty() {
            return format!("{stem}_{n}.{ext}");
        }
    }
    format!("{base}_{n}")
}
