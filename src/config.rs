use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::{Error, Result};
use crate::registry::write_atomic;

/// The live Claude config document. Claude Code has used two locations over
/// time, so reads probe the newer one first and fall back to the older.
pub struct ConfigStore {
    primary: PathBuf,
    fallback: PathBuf,
}

impl ConfigStore {
    pub fn new(primary: PathBuf, fallback: PathBuf) -> Self {
        Self { primary, fallback }
    }

    pub fn detect(home: &Path) -> Self {
        Self::new(
            home.join(".claude").join(".claude.json"),
            home.join(".claude.json"),
        )
    }

    /// Prefers the primary location when it holds an oauthAccount section.
    pub fn live_path(&self) -> &Path {
        if self.primary.exists() {
            if let Ok(content) = fs::read_to_string(&self.primary) {
                if let Ok(v) = serde_json::from_str::<Value>(&content) {
                    if v.get("oauthAccount").is_some() {
                        return &self.primary;
                    }
                }
            }
        }
        &self.fallback
    }

    pub fn read_live(&self) -> Result<Value> {
        let path = self.live_path();
        if !path.exists() {
            return Err(Error::MissingLiveConfig(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| Error::InvalidConfig {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn write_live(&self, doc: &Value) -> Result<()> {
        let content = serde_json::to_string_pretty(doc)?;
        write_atomic(self.live_path(), &content)
    }

    /// The identity-describing subsection, if present and well-formed.
    pub fn extract_auth_section(doc: &Value) -> Option<&Value> {
        doc.get("oauthAccount").filter(|v| v.is_object())
    }

    /// Copy of `live` with only the oauthAccount section replaced; every
    /// other key (theme, preferences, history) is left untouched.
    pub fn merge_auth_section(live: &Value, auth: Value) -> Value {
        let mut merged = live.clone();
        merged["oauthAccount"] = auth;
        merged
    }

    /// Never fails: any read/parse problem or missing section reads as
    /// "not logged in".
    pub fn current_email(&self) -> Option<String> {
        let doc = self.read_live().ok()?;
        Self::extract_auth_section(&doc)?
            .get("emailAddress")?
            .as_str()
            .map(String::from)
    }
}
