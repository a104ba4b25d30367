// ABOUTME: XDG-compliant storage layer with atomic writes
// ABOUTME: Resolves per-realm sync-state and export paths

use crate::{model::EntityKind, Error, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

pub struct Paths {
    pub data_dir: PathBuf,
    pub credentials_dir: PathBuf,
    pub sync_dir: PathBuf,
    pub exports_dir: PathBuf,
    pub tmp_dir: PathBuf,
}

impl Paths {
    pub fn new(data_dir_override: Option<PathBuf>) -> Result<Self> {
        let data_dir = if let Some(dir) = data_dir_override {
            dir
        } else {
            ProjectDirs::from("", "", "qbo-sync")
                .ok_or_else(|| {
                    Error::Filesystem(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "Could not determine data directory",
                    ))
                })?
                .data_dir()
                .to_path_buf()
        };

        Ok(Paths {
            credentials_dir: data_dir.join("credentials"),
            sync_dir: data_dir.join("sync"),
            exports_dir: data_dir.join("exports"),
            tmp_dir: data_dir.join("tmp"),
            data_dir,
        })
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in &[
            &self.credentials_dir,
            &self.sync_dir,
            &self.exports_dir,
            &self.tmp_dir,
        ] {
            fs::create_dir_all(dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = fs::Permissions::from_mode(0o700);
                fs::set_permissions(dir, perms)?;
            }
        }
        Ok(())
    }

    pub fn sync_state_file(&self, realm: &str, kind: EntityKind) -> Result<PathBuf> {
        validate_realm(realm)?;
        Ok(self
            .sync_dir
            .join(realm)
            .join(format!("{}.json", kind.resource())))
    }

    pub fn export_file(&self, realm: &str, kind: EntityKind) -> Result<PathBuf> {
        validate_realm(realm)?;
        Ok(self
            .exports_dir
            .join(format!("{}_{}s.csv", realm, kind.resource())))
    }
}

/// Realm ids become file names, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_realm(realm: &str) -> Result<()> {
    let valid = !realm.is_empty()
        && realm
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid realm id: {:?}", realm)))
    }
}

pub fn write_atomic(path: &Path, content: &[u8], tmp_dir: &Path) -> Result<()> {
    use rand::Rng;
    use std::io::Write;

    fs::create_dir_all(tmp_dir)?;

    // Create temp file
    let random: u32 = rand::thread_rng().gen();
    let tmp_path = tmp_dir.join(format!("{:x}.part", random));

    // Write to temp and flush to disk before the rename publishes it
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    // Set permissions
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(&tmp_path, perms)?;
    }

    // Atomic rename
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    Ok(())
}


#[cfg(test)]
mod write_tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_file() {
        let temp = TempDir::new().unwrap();
        let paths = Paths::new(Some(temp.path().to_path_buf())).unwrap();
        paths.ensure_dirs().unwrap();

        let target = temp.path().join("test.txt");
        write_atomic(&target, b"hello", &paths.tmp_dir).unwrap();

        assert!(target.exists());
        assert_eq!(fs::read_to_string(&target).unwrap(), "hello");
    }

    #[test]
    fn test_write_atomic_replaces_whole_file() {
        let temp = TempDir::new().unwrap();
        let paths = Paths::new(Some(temp.path().to_path_buf())).unwrap();
        paths.ensure_dirs().unwrap();

        let target = temp.path().join("state.json");
        write_atomic(&target, b"a much longer first version", &paths.tmp_dir).unwrap();
        write_atomic(&target, b"short", &paths.tmp_dir).unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "short");
        assert_eq!(fs::read_dir(&paths.tmp_dir).unwrap().count(), 0);
    }

    #[test]
    #[cfg(unix)]
    fn test_write_atomic_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let paths = Paths::new(Some(temp.path().to_path_buf())).unwrap();
        paths.ensure_dirs().unwrap();

        let target = temp.path().join("test.txt");
        write_atomic(&target, b"hello", &paths.tmp_dir).unwrap();

        let perms = fs::metadata(&target).unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600);
    }
}
