use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::error::{Error, Result};

/// One managed login identity.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Account {
    pub email: String,
    /// Service key the live credential was stored under when this account
    /// was added. Installs differ, so it is recorded rather than assumed.
    #[serde(rename = "secretStoreKey")]
    pub secret_store_key: String,
    #[serde(rename = "addedAt")]
    pub added_at: String,
}

/// The registry document — single source of truth for which accounts exist,
/// their rotation order, and which one is active.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RegistryDoc {
    #[serde(rename = "activeAccountNumber")]
    pub active_account_number: Option<u32>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: String,
    pub sequence: Vec<u32>,
    pub accounts: HashMap<String, Account>,
}

impl RegistryDoc {
    /// Account numbers are never reused eagerly: always max(sequence) + 1.
    pub fn next_account_number(&self) -> u32 {
        self.sequence.iter().max().copied().unwrap_or(0) + 1
    }

    pub fn account(&self, number: u32) -> Option<&Account> {
        self.accounts.get(&number.to_string())
    }

    pub fn find_by_email(&self, email: &str) -> Option<u32> {
        self.accounts
            .iter()
            .find(|(_, a)| a.email == email)
            .and_then(|(k, _)| k.parse().ok())
    }

    pub fn email_exists(&self, email: &str) -> bool {
        self.accounts.values().any(|a| a.email == email)
    }

    /// Resolve a user-supplied identifier to an account number. All digits
    /// means a number; anything else must look like an email address.
    pub fn resolve(&self, identifier: &str) -> Result<u32> {
        if !identifier.is_empty() && identifier.chars().all(|c| c.is_ascii_digit()) {
            let number: u32 = identifier
                .parse()
                .map_err(|_| Error::InvalidIdentifier(identifier.to_string()))?;
            if self.account(number).is_some() {
                return Ok(number);
            }
            return Err(Error::UnknownAccount(identifier.to_string()));
        }

        if !is_valid_email(identifier) {
            return Err(Error::InvalidIdentifier(identifier.to_string()));
        }

        self.find_by_email(identifier)
            .ok_or_else(|| Error::UnknownAccount(identifier.to_string()))
    }

    /// Circular successor of `current` in the rotation order. If `current`
    /// is no longer in the sequence (removed while active), rotation resets
    /// to the first account.
    pub fn next_in_rotation(&self, current: u32) -> Option<u32> {
        if self.sequence.is_empty() {
            return None;
        }
        match self.sequence.iter().position(|&n| n == current) {
            Some(idx) => Some(self.sequence[(idx + 1) % self.sequence.len()]),
            None => Some(self.sequence[0]),
        }
    }
}

/// Minimal RFC-shaped check: `local@domain.tld`, no whitespace.
pub fn is_valid_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

pub fn now_utc() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Owns the registry file and persists every mutation atomically.
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// An absent file is the first-run state, not an error.
    pub fn load(&self) -> Result<RegistryDoc> {
        if !self.path.exists() {
            return Ok(RegistryDoc::default());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, doc: &RegistryDoc) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(doc)?;
        write_atomic(&self.path, &content)
    }

    /// Assigns the next number, appends to the rotation, marks the new
    /// account active, persists. Fails if the email is already managed.
    pub fn add_account(&self, email: &str, secret_store_key: &str) -> Result<u32> {
        let mut doc = self.load()?;
        if doc.email_exists(email) {
            return Err(Error::AlreadyManaged(email.to_string()));
        }

        let number = doc.next_account_number();
        let now = now_utc();
        doc.accounts.insert(
            number.to_string(),
            Account {
                email: email.to_string(),
                secret_store_key: secret_store_key.to_string(),
                added_at: now.clone(),
            },
        );
        doc.sequence.push(number);
        doc.active_account_number = Some(number);
        doc.last_updated = now;
        self.save(&doc)?;
        Ok(number)
    }

    /// Removes the account from both maps. Deliberately leaves
    /// `active_account_number` alone even when it pointed here; rotation
    /// handles the dangling reference (see RegistryDoc::next_in_rotation).
    pub fn remove_account(&self, number: u32) -> Result<()> {
        let mut doc = self.load()?;
        if doc.accounts.remove(&number.to_string()).is_none() {
            return Err(Error::UnknownAccount(number.to_string()));
        }
        doc.sequence.retain(|&n| n != number);
        doc.last_updated = now_utc();
        self.save(&doc)
    }

    pub fn set_active(&self, number: u32) -> Result<()> {
        let mut doc = self.load()?;
        if doc.account(number).is_none() {
            return Err(Error::UnknownAccount(number.to_string()));
        }
        doc.active_account_number = Some(number);
        doc.last_updated = now_utc();
        self.save(&doc)
    }
}

/// Atomically write a JSON file: validate → temp file → rename → chmod 600.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    // Validate before touching the real file
    if let Err(e) = serde_json::from_str::<serde_json::Value>(content) {
        return Err(Error::CorruptWrite {
            path: path.to_path_buf(),
            source: e,
        });
    }

    let temp_path = path.with_extension(format!("tmp.{}", std::process::id()));

    {
        let mut f = fs::File::create(&temp_path)?;
        f.write_all(content.as_bytes())?;
        f.flush()?;
    }

    fs::rename(&temp_path, path)?;

    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, RegistryStore) {
        let tmp = TempDir::new().unwrap();
        let store = RegistryStore::new(tmp.path().join("state.json"));
        (tmp, store)
    }

    #[test]
    fn absent_file_is_first_run_state() {
        let (_tmp, store) = store();
        let doc = store.load().unwrap();
        assert!(doc.accounts.is_empty());
        assert!(doc.sequence.is_empty());
        assert_eq!(doc.active_account_number, None);
    }

    #[test]
    fn numbers_are_monotonic() {
        let (_tmp, store) = store();
        assert_eq!(store.add_account("a@x.com", "k").unwrap(), 1);
        assert_eq!(store.add_account("b@x.com", "k").unwrap(), 2);
        assert_eq!(store.add_account("c@x.com", "k").unwrap(), 3);

        let doc = store.load().unwrap();
        assert_eq!(doc.sequence, vec![1, 2, 3]);
        assert_eq!(doc.active_account_number, Some(3));
    }

    #[test]
    fn removing_max_does_not_double_increment() {
        let (_tmp, store) = store();
        store.add_account("a@x.com", "k").unwrap();
        store.add_account("b@x.com", "k").unwrap();
        store.remove_account(2).unwrap();

        let doc = store.load().unwrap();
        assert_eq!(doc.next_account_number(), 2);
        assert_eq!(store.add_account("c@x.com", "k").unwrap(), 2);
    }

    #[test]
    fn duplicate_email_rejected() {
        let (_tmp, store) = store();
        store.add_account("a@x.com", "k").unwrap();
        let err = store.add_account("a@x.com", "k").unwrap_err();
        assert!(matches!(err, Error::AlreadyManaged(_)));
    }

    #[test]
    fn remove_unknown_account_fails() {
        let (_tmp, store) = store();
        assert!(matches!(
            store.remove_account(7),
            Err(Error::UnknownAccount(_))
        ));
    }

    #[test]
    fn remove_active_leaves_dangling_reference() {
        let (_tmp, store) = store();
        store.add_account("a@x.com", "k").unwrap();
        store.add_account("b@x.com", "k").unwrap();
        store.remove_account(2).unwrap();

        let doc = store.load().unwrap();
        assert_eq!(doc.active_account_number, Some(2));
        assert!(doc.account(2).is_none());
    }

    #[test]
    fn resolve_by_number_email_and_garbage() {
        let (_tmp, store) = store();
        store.add_account("a@b.com", "k").unwrap();
        store.add_account("c@d.com", "k").unwrap();
        let doc = store.load().unwrap();

        assert_eq!(doc.resolve("2").unwrap(), 2);
        assert_eq!(doc.resolve("a@b.com").unwrap(), 1);
        assert!(matches!(
            doc.resolve("not-an-email"),
            Err(Error::InvalidIdentifier(_))
        ));
        assert!(matches!(doc.resolve("9"), Err(Error::UnknownAccount(_))));
        assert!(matches!(
            doc.resolve("ghost@x.com"),
            Err(Error::UnknownAccount(_))
        ));
    }

    #[test]
    fn rotation_wraps() {
        let doc = RegistryDoc {
            sequence: vec![1, 2, 3],
            ..Default::default()
        };
        assert_eq!(doc.next_in_rotation(1), Some(2));
        assert_eq!(doc.next_in_rotation(3), Some(1));
    }

    #[test]
    fn rotation_resets_when_active_was_removed() {
        let doc = RegistryDoc {
            sequence: vec![1, 3],
            ..Default::default()
        };
        // 2 was removed while active: rotation starts over at the front
        assert_eq!(doc.next_in_rotation(2), Some(1));
        assert_eq!(RegistryDoc::default().next_in_rotation(1), None);
    }

    #[test]
    fn corrupt_write_leaves_previous_document_intact() {
        let (tmp, store) = store();
        store.add_account("a@x.com", "k").unwrap();

        let err = write_atomic(&tmp.path().join("state.json"), "{not json").unwrap_err();
        assert!(matches!(err, Error::CorruptWrite { .. }));

        let doc = store.load().unwrap();
        assert_eq!(doc.sequence, vec![1]);
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@b.com"));
        assert!(is_valid_email("first.last@sub.example.org"));
        assert!(!is_valid_email("no-at-sign.com"));
        assert!(!is_valid_email("@b.com"));
        assert!(!is_valid_email("a@nodot"));
        assert!(!is_valid_email("a@.com"));
        assert!(!is_valid_email("a b@c.com"));
    }
}
