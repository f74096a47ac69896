use std::{
    fs,
    path::{Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::archive::BackupArchive;
use crate::config::ConfigStore;
use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::registry::{Account, RegistryStore};
use crate::secrets::{detect_live_key, FileSecretStore, KeychainSecretStore, SecretStore};

/// The single location the host application reads its credential and config
/// from. Handed to the engine at construction, never looked up ambiently,
/// so tests can point it at a scratch directory.
pub struct LiveSlot {
    pub secrets: Box<dyn SecretStore>,
    pub config: ConfigStore,
}

#[derive(Debug)]
pub struct AddedAccount {
    pub number: u32,
    pub email: String,
}

#[derive(Debug)]
pub enum SwitchOutcome {
    Switched {
        from_email: String,
        to_email: String,
        to_number: u32,
    },
    /// The live login was not managed yet; it was added instead of rotating.
    /// Switching and onboarding stay separate committed transactions.
    AddedCurrent { number: u32, email: String },
    AlreadyActive { number: u32, email: String },
}

/// Orchestrates add/remove/switch so the registry, the backup archive and
/// the live application state never diverge.
pub struct Engine {
    pub registry: RegistryStore,
    pub live: LiveSlot,
    archive: BackupArchive,
    backup_root: PathBuf,
}

impl Engine {
    pub fn new(backup_root: PathBuf, live: LiveSlot) -> Self {
        Self {
            registry: RegistryStore::new(backup_root.join("state.json")),
            archive: BackupArchive::new(backup_root.join("configs")),
            live,
            backup_root,
        }
    }

    /// Production wiring: keychain on macOS, 0600 files elsewhere.
    pub fn for_platform(home: &Path, platform: Platform) -> Self {
        let secrets: Box<dyn SecretStore> = match platform {
            Platform::MacOS => Box::new(KeychainSecretStore),
            Platform::Linux | Platform::Wsl => {
                Box::new(FileSecretStore::new(home.to_path_buf()))
            }
        };
        Self::new(
            home.join(".ccrotate-backup"),
            LiveSlot {
                secrets,
                config: ConfigStore::detect(home),
            },
        )
    }

    fn setup_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.backup_root.join("configs"))?;
        fs::create_dir_all(self.backup_root.join("credentials"))?;

        #[cfg(unix)]
        for dir in ["configs", "credentials"] {
            fs::set_permissions(
                self.backup_root.join(dir),
                fs::Permissions::from_mode(0o700),
            )?;
        }
        #[cfg(unix)]
        fs::set_permissions(&self.backup_root, fs::Permissions::from_mode(0o700))?;

        Ok(())
    }

    /// Back up whatever is currently live and register it as a new account.
    /// Mirrors the live state, so the new account starts out active.
    pub fn add_account(&self) -> Result<AddedAccount> {
        self.setup_dirs()?;

        let email = self
            .live
            .config
            .current_email()
            .ok_or(Error::NoActiveLogin)?;

        let doc = self.registry.load()?;
        if doc.email_exists(&email) {
            return Err(Error::AlreadyManaged(email));
        }

        let live_key = match detect_live_key(self.live.secrets.as_ref())? {
            Some(key) => key,
            None => return Err(Error::NoCredentials),
        };
        let blob = self
            .live
            .secrets
            .get(&live_key)?
            .filter(|b| !b.trim().is_empty())
            .ok_or(Error::NoCredentials)?;

        let live_config = self.live.config.read_live()?;

        // Backup before the registry mutation: a failure here changes nothing
        let number = doc.next_account_number();
        self.archive
            .write_record(self.live.secrets.as_ref(), number, &email, &blob, &live_config)?;

        let assigned = self.registry.add_account(&email, &live_key)?;
        debug_assert_eq!(assigned, number);

        Ok(AddedAccount { number: assigned, email })
    }

    /// Look up the account an identifier refers to, for confirmation prompts.
    pub fn resolve(&self, identifier: &str) -> Result<(u32, Account)> {
        let doc = self.registry.load()?;
        let number = doc.resolve(identifier)?;
        let account = doc
            .account(number)
            .cloned()
            .ok_or_else(|| Error::UnknownAccount(identifier.to_string()))?;
        Ok((number, account))
    }

    /// Deletes the backup artifacts, then the registry entry. The caller is
    /// responsible for confirming first.
    pub fn remove_account(&self, number: u32) -> Result<Account> {
        let doc = self.registry.load()?;
        let account = doc
            .account(number)
            .cloned()
            .ok_or_else(|| Error::UnknownAccount(number.to_string()))?;

        self.archive
            .delete_record(self.live.secrets.as_ref(), number, &account.email)?;
        self.registry.remove_account(number)?;

        Ok(account)
    }

    /// Rotate to the next account in the sequence. An unmanaged live login
    /// gets onboarded instead; the caller re-runs switch to actually rotate.
    pub fn switch_next(&self) -> Result<SwitchOutcome> {
        let email = self
            .live
            .config
            .current_email()
            .ok_or(Error::NoActiveLogin)?;

        let doc = self.registry.load()?;
        if !doc.email_exists(&email) {
            let added = self.add_account()?;
            return Ok(SwitchOutcome::AddedCurrent {
                number: added.number,
                email: added.email,
            });
        }

        // A dangling active number (account removed while active) falls back
        // to whichever account matches the live email
        let current = doc
            .active_account_number
            .filter(|&n| doc.account(n).is_some())
            .or_else(|| doc.find_by_email(&email))
            .ok_or_else(|| Error::UnknownAccount(email.clone()))?;

        let next = doc
            .next_in_rotation(current)
            .ok_or_else(|| Error::UnknownAccount(current.to_string()))?;

        self.switch_to(next)
    }

    /// The switch protocol. Steps run in a fixed order: everything up to
    /// loading the target's backup only reads or stages, so a failure there
    /// leaves live state untouched. From the secret migration on, mutations
    /// are progressive and a mid-way failure requires re-running the switch;
    /// the failing step is named in the error.
    pub fn switch_to(&self, target: u32) -> Result<SwitchOutcome> {
        self.setup_dirs()?;

        let doc = self.registry.load()?;
        let target_account = doc
            .account(target)
            .cloned()
            .ok_or_else(|| Error::UnknownAccount(target.to_string()))?;
        if target_account.secret_store_key.is_empty() {
            return Err(Error::MissingServiceLocation(target));
        }

        let secrets = self.live.secrets.as_ref();

        // 1. Capture current state
        let current_email = self
            .live
            .config
            .current_email()
            .ok_or(Error::NoActiveLogin)?;
        let current = doc
            .active_account_number
            .filter(|&n| doc.account(n).is_some())
            .or_else(|| doc.find_by_email(&current_email))
            .ok_or_else(|| Error::UnknownAccount(current_email.clone()))?;

        if current == target {
            return Ok(SwitchOutcome::AlreadyActive {
                number: target,
                email: target_account.email,
            });
        }

        let current_slot_email = doc
            .account(current)
            .map(|a| a.email.clone())
            .unwrap_or_else(|| current_email.clone());
        let current_key =
            detect_live_key(secrets)?.ok_or(Error::UnknownSecretLocation)?;

        // 2. Backup current (must precede anything destructive)
        let live_blob = secrets.get(&current_key)?.ok_or(Error::NoCredentials)?;
        let live_config = self.live.config.read_live()?;
        self.archive
            .write_record(secrets, current, &current_slot_email, &live_blob, &live_config)?;

        // 3. Load target backup; aborts before any live mutation
        let (target_blob, target_config) =
            self.archive
                .read_record(secrets, target, &target_account.email)?;

        // 4. Migrate secret location: a stale entry under the old service
        // name would linger invisibly otherwise
        if current_key != target_account.secret_store_key {
            secrets.delete(&current_key)?;
        }

        // 5. Write target secret
        secrets.set(&target_account.secret_store_key, &target_blob)?;

        // 6. Merge the target's auth section onto the live document
        let target_auth = ConfigStore::extract_auth_section(&target_config)
            .cloned()
            .ok_or(Error::InvalidAuthSection(target))?;
        let merged = ConfigStore::merge_auth_section(&live_config, target_auth);
        self.live.config.write_live(&merged)?;

        // 7. Commit
        self.registry.set_active(target)?;

        Ok(SwitchOutcome::Switched {
            from_email: current_slot_email,
            to_email: target_account.email,
            to_number: target,
        })
    }
}
