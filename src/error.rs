use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no active Claude login found; log in to Claude Code first")]
    NoActiveLogin,

    #[error("account '{0}' is already managed")]
    AlreadyManaged(String),

    #[error("the active login has no stored credentials")]
    NoCredentials,

    #[error("cannot locate the live credential entry in the secret store")]
    UnknownSecretLocation,

    #[error("'{0}' is neither an account number nor a valid email address")]
    InvalidIdentifier(String),

    #[error("no account matching '{0}'")]
    UnknownAccount(String),

    #[error("account {number} has no {half} backup; it cannot be restored")]
    MissingBackupData { number: u32, half: &'static str },

    #[error("config backup for account {0} has no usable oauthAccount section")]
    InvalidAuthSection(u32),

    #[error("refusing to replace {path}: new content is not valid JSON ({source})")]
    CorruptWrite {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("account {0} has no recorded secret-store location; re-add it")]
    MissingServiceLocation(u32),

    #[error("live config at {path} is not valid JSON ({source})")]
    InvalidConfig {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("no live config found at {0}")]
    MissingLiveConfig(PathBuf),

    #[error("secret store: {0}")]
    SecretStore(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
