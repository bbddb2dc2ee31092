use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// TVDB tokens are valid for one month after login.
pub const TOKEN_VALIDITY_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now - self.issued_at < Duration::days(TOKEN_VALIDITY_DAYS)
    }
}

/// Single-entry store for the TVDB bearer token. Each save replaces the file.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unreadable or corrupt stores count as empty.
    pub fn load(&self) -> Option<CachedToken> {
        let content = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn load_fresh(&self, now: DateTime<Utc>) -> Option<CachedToken> {
        self.load().filter(|cached| cached.is_fresh(now))
    }

    pub fn save(&self, token: &CachedToken) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        // Write beside the target and rename so readers never see a partial file.
        let mut staged = tempfile::NamedTempFile::new_in(parent)?;
        staged.write_all(serde_json::to_string_pretty(token)?.as_bytes())?;
        staged.persist(&self.path)?;
        Ok(())
    }
}
