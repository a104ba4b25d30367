// ABOUTME: Durable per-realm storage for the OAuth credential pair
// ABOUTME: Whole-record atomic replace so a credential is never partially written

use crate::{
    model::Credential,
    storage::{validate_realm, write_atomic, Paths},
    Error, Result,
};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
    tmp_dir: PathBuf,
}

impl CredentialStore {
    pub fn new(paths: &Paths) -> Self {
        CredentialStore {
            dir: paths.credentials_dir.clone(),
            tmp_dir: paths.tmp_dir.clone(),
        }
    }

    fn file(&self, realm: &str) -> Result<PathBuf> {
        validate_realm(realm)?;
        Ok(self.dir.join(format!("{}.json", realm)))
    }

    pub fn load(&self, realm: &str) -> Result<Option<Credential>> {
        let path = self.file(realm)?;
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let credential: Credential = serde_json::from_str(&content).map_err(|e| {
            Error::Filesystem(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Corrupt credential file {}: {}", path.display(), e),
            ))
        })?;
        Ok(Some(credential))
    }

    pub fn save(&self, realm: &str, credential: &Credential) -> Result<()> {
        let path = self.file(realm)?;
        let json = serde_json::to_vec_pretty(credential)?;
        write_atomic(&path, &json, &self.tmp_dir)?;
        tracing::debug!(realm, "credential persisted");
        Ok(())
    }

    /// Realms that currently have a stored credential, sorted.
    pub fn realms(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut realms = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_realm(stem).is_ok() {
                    realms.push(stem.to_string());
                }
            }
        }
        realms.sort();
        Ok(realms)
    }
}
