use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::error::{Error, Result};

/// Key-value secret storage, keyed by a service name. The engine only ever
/// talks to this trait; the backend is picked once at startup.
pub trait SecretStore {
    /// Returns the blob stored under `key`, or None if no entry exists.
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Idempotent: deleting an absent key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Known service-key variants for the live credential slot, newest
    /// first; the first entry is the default for first writes. Claude Code
    /// has renamed this across releases.
    fn live_key_candidates(&self) -> &[&'static str];

    /// Deterministic backup key for `(number, email)`, distinct from the
    /// live slot and from every other account's backup key.
    fn backup_key(&self, number: u32, email: &str) -> String;
}

/// Probe the live-slot candidates in order; returns the first key that
/// actually holds a value, or None when no live secret exists.
pub fn detect_live_key(store: &dyn SecretStore) -> Result<Option<String>> {
    for key in store.live_key_candidates() {
        if store.get(key)?.is_some() {
            return Ok(Some((*key).to_string()));
        }
    }
    Ok(None)
}

// ── macOS keychain ────────────────────────────────────────────────────────────

/// Backed by the macOS keychain via `security(1)`.
pub struct KeychainSecretStore;

const KEYCHAIN_LIVE_KEYS: &[&str] = &["Claude Code-credentials", "Claude Code"];

impl KeychainSecretStore {
    fn run(args: &[&str]) -> Result<std::process::Output> {
        Command::new("security")
            .args(args)
            .output()
            .map_err(|e| Error::SecretStore(format!("failed to run `security`: {e}")))
    }
}

impl SecretStore for KeychainSecretStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let output = Self::run(&["find-generic-password", "-s", key, "-w"])?;
        if !output.status.success() {
            return Ok(None);
        }
        let mut val = String::from_utf8(output.stdout)
            .map_err(|_| Error::SecretStore(format!("keychain entry '{key}' is not UTF-8")))?;
        // security(1) appends a newline
        if val.ends_with('\n') {
            val.pop();
        }
        Ok(Some(val))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let user = std::env::var("USER").unwrap_or_default();
        let output = Self::run(&[
            "add-generic-password",
            "-U",
            "-s",
            key,
            "-a",
            &user,
            "-w",
            value,
        ])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::SecretStore(format!(
                "cannot write keychain entry '{key}': {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        // Entry may not exist
        let _ = Self::run(&["delete-generic-password", "-s", key]);
        Ok(())
    }

    fn live_key_candidates(&self) -> &[&'static str] {
        KEYCHAIN_LIVE_KEYS
    }

    fn backup_key(&self, number: u32, email: &str) -> String {
        format!("Claude Code-Backup-{number}-{email}")
    }
}

// ── Permission-restricted files (Linux/WSL) ───────────────────────────────────

/// Backed by 0600 files under a root directory; keys are relative paths.
pub struct FileSecretStore {
    root: PathBuf,
}

const FILE_LIVE_KEYS: &[&str] = &[".claude/.credentials.json", ".credentials.json"];

impl FileSecretStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.file_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&path)?))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.file_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_file_600(&path, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.file_path(key);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn live_key_candidates(&self) -> &[&'static str] {
        FILE_LIVE_KEYS
    }

    fn backup_key(&self, number: u32, email: &str) -> String {
        format!(".ccrotate-backup/credentials/{number}-{email}.json")
    }
}

pub fn write_file_600(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content)?;

    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileSecretStore) {
        let tmp = TempDir::new().unwrap();
        let store = FileSecretStore::new(tmp.path().to_path_buf());
        (tmp, store)
    }

    #[test]
    fn set_get_delete_roundtrip() {
        let (_tmp, store) = store();
        let key = store.backup_key(1, "a@x.com");

        assert_eq!(store.get(&key).unwrap(), None);
        store.set(&key, "blob").unwrap();
        assert_eq!(store.get(&key).unwrap().as_deref(), Some("blob"));

        store.delete(&key).unwrap();
        assert_eq!(store.get(&key).unwrap(), None);
        // Deleting again is fine
        store.delete(&key).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (tmp, store) = store();
        let key = store.backup_key(2, "b@x.com");
        store.set(&key, "blob").unwrap();

        let mode = std::fs::metadata(tmp.path().join(&key))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn live_key_detection_prefers_newest_variant() {
        let (_tmp, store) = store();
        assert_eq!(detect_live_key(&store).unwrap(), None);
        assert_eq!(store.live_key_candidates()[0], ".claude/.credentials.json");

        store.set(".credentials.json", "legacy").unwrap();
        assert_eq!(
            detect_live_key(&store).unwrap().as_deref(),
            Some(".credentials.json")
        );

        store.set(".claude/.credentials.json", "current").unwrap();
        assert_eq!(
            detect_live_key(&store).unwrap().as_deref(),
            Some(".claude/.credentials.json")
        );
    }

    #[test]
    fn backup_keys_are_distinct() {
        let (_tmp, store) = store();
        let a = store.backup_key(1, "a@x.com");
        let b = store.backup_key(2, "a@x.com");
        assert_ne!(a, b);
        assert!(!store.live_key_candidates().contains(&a.as_str()));
    }
}
