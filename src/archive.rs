use serde_json::Value;
use std::{fs, path::PathBuf};

use crate::error::{Error, Result};
use crate::secrets::{write_file_600, SecretStore};

/// Per-account backup records: the credential blob lives in the secret store
/// under a derived backup key, the config snapshot as an owner-only file.
pub struct BackupArchive {
    configs_dir: PathBuf,
}

impl BackupArchive {
    pub fn new(configs_dir: PathBuf) -> Self {
        Self { configs_dir }
    }

    fn config_path(&self, number: u32, email: &str) -> PathBuf {
        self.configs_dir.join(format!("{number}-{email}.json"))
    }

    /// Overwrites any previous record for this account.
    pub fn write_record(
        &self,
        secrets: &dyn SecretStore,
        number: u32,
        email: &str,
        blob: &str,
        config: &Value,
    ) -> Result<()> {
        fs::create_dir_all(&self.configs_dir)?;
        write_file_600(
            &self.config_path(number, email),
            &serde_json::to_string_pretty(config)?,
        )?;
        secrets.set(&secrets.backup_key(number, email), blob)
    }

    /// Both halves must be present; a missing half means the account cannot
    /// be restored and nothing should be touched.
    pub fn read_record(
        &self,
        secrets: &dyn SecretStore,
        number: u32,
        email: &str,
    ) -> Result<(String, Value)> {
        let blob = secrets
            .get(&secrets.backup_key(number, email))?
            .ok_or(Error::MissingBackupData {
                number,
                half: "credential",
            })?;

        let path = self.config_path(number, email);
        if !path.exists() {
            return Err(Error::MissingBackupData {
                number,
                half: "config",
            });
        }
        let config = serde_json::from_str(&fs::read_to_string(&path)?)?;
        Ok((blob, config))
    }

    /// Best-effort: absent artifacts are not an error, so a re-run after a
    /// partial failure is always safe.
    pub fn delete_record(
        &self,
        secrets: &dyn SecretStore,
        number: u32,
        email: &str,
    ) -> Result<()> {
        secrets.delete(&secrets.backup_key(number, email))?;
        let path = self.config_path(number, email);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::FileSecretStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BackupArchive, FileSecretStore) {
        let tmp = TempDir::new().unwrap();
        let archive = BackupArchive::new(tmp.path().join("configs"));
        let secrets = FileSecretStore::new(tmp.path().to_path_buf());
        (tmp, archive, secrets)
    }

    #[test]
    fn record_roundtrip_is_identical() {
        let (_tmp, archive, secrets) = setup();
        let config = json!({"oauthAccount": {"emailAddress": "a@x.com"}, "theme": "dark"});

        archive
            .write_record(&secrets, 1, "a@x.com", "blob-bytes", &config)
            .unwrap();
        let (blob, read_config) = archive.read_record(&secrets, 1, "a@x.com").unwrap();

        assert_eq!(blob, "blob-bytes");
        assert_eq!(read_config, config);
    }

    #[test]
    fn missing_halves_are_reported() {
        let (_tmp, archive, secrets) = setup();

        let err = archive.read_record(&secrets, 1, "a@x.com").unwrap_err();
        assert!(matches!(
            err,
            Error::MissingBackupData {
                half: "credential",
                ..
            }
        ));

        // Credential half present, config half missing
        secrets
            .set(&secrets.backup_key(1, "a@x.com"), "blob")
            .unwrap();
        let err = archive.read_record(&secrets, 1, "a@x.com").unwrap_err();
        assert!(matches!(
            err,
            Error::MissingBackupData { half: "config", .. }
        ));
    }

    #[test]
    fn delete_is_best_effort() {
        let (_tmp, archive, secrets) = setup();
        archive.delete_record(&secrets, 5, "ghost@x.com").unwrap();

        archive
            .write_record(&secrets, 1, "a@x.com", "blob", &json!({}))
            .unwrap();
        archive.delete_record(&secrets, 1, "a@x.com").unwrap();
        assert!(archive.read_record(&secrets, 1, "a@x.com").is_err());
        archive.delete_record(&secrets, 1, "a@x.com").unwrap();
    }
}
