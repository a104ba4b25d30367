// ABOUTME: Tracks the last observed SyncToken per remote entity id
// ABOUTME: Explicit, persisted state owned by the caller instead of a global map

use crate::{model::EntityVersion, storage::write_atomic, Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Last-known concurrency tokens for one entity kind in one realm.
///
/// Tokens only ever come from `observe`; nothing in this crate increments
/// them locally. Entries are never removed, so an entity deleted upstream
/// keeps its last token until an update against it fails.
#[derive(Debug, Clone)]
pub struct SyncTracker {
    path: PathBuf,
    tmp_dir: PathBuf,
    tokens: BTreeMap<String, u64>,
}

impl SyncTracker {
    /// Opens the tracker backed by `path`, starting empty if the file does
    /// not exist yet.
    pub fn load(path: impl Into<PathBuf>, tmp_dir: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tokens = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(|e| {
                Error::Filesystem(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Corrupt sync state {}: {}", path.display(), e),
                ))
            })?
        } else {
            BTreeMap::new()
        };

        Ok(SyncTracker {
            path,
            tmp_dir: tmp_dir.into(),
            tokens,
        })
    }

    /// Records the observed tokens (last write wins within the batch) and
    /// persists the full mapping. The in-memory state only changes once the
    /// write has succeeded.
    pub fn observe(&mut self, versions: &[EntityVersion]) -> Result<()> {
        let mut next = self.tokens.clone();
        for v in versions {
            let previous = next.insert(v.id.clone(), v.sync_token);
            if previous.is_some_and(|p| p != v.sync_token) {
                tracing::debug!(id = %v.id, from = ?previous, to = v.sync_token, "sync token advanced");
            }
        }
        persist(&self.path, &self.tmp_dir, &next)?;
        self.tokens = next;
        tracing::debug!(observed = versions.len(), tracked = self.tokens.len(), "sync state updated");
        Ok(())
    }

    /// Last observed token, or 0 for an entity that was never observed.
    pub fn token_for(&self, id: &str) -> u64 {
        self.tokens.get(id).copied().unwrap_or(0)
    }

    pub fn is_tracked(&self, id: &str) -> bool {
        self.tokens.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tokens(&self) -> &BTreeMap<String, u64> {
        &self.tokens
    }

    pub fn save(&self) -> Result<()> {
        persist(&self.path, &self.tmp_dir, &self.tokens)
    }
}

fn persist(path: &Path, tmp_dir: &Path, tokens: &BTreeMap<String, u64>) -> Result<()> {
    let json = serde_json::to_vec_pretty(tokens)?;
    write_atomic(path, &json, tmp_dir)
}
