//! Token cache for the Entra authority
//!
//! Keeps signed-in accounts and their refresh tokens, either in a JSON file
//! (0600 on Unix) or in memory. Access tokens are never cached.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use chrono::{DateTime, Utc};

use super::authority::Account;
use crate::Result;
use crate::error::Error;

/// One cached account with the refresh token used for silent acquisition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAccount {
    pub account: Account,

    pub refresh_token: String,

    /// When the refresh token was last written
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    accounts: Vec<CachedAccount>,
}

/// Account cache backing an [`EntraAuthority`](super::EntraAuthority)
#[derive(Debug)]
pub struct TokenCache {
    path: Option<PathBuf>,
    memory: Mutex<Vec<CachedAccount>>,
}

impl TokenCache {
    /// Cache persisted to `path`
    pub fn file(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            memory: Mutex::new(Vec::new()),
        }
    }

    /// Cache that lives only as long as the process
    pub fn in_memory() -> Self {
        Self {
            path: None,
            memory: Mutex::new(Vec::new()),
        }
    }

    /// Load all cached accounts
    pub fn load(&self) -> Result<Vec<CachedAccount>> {
        let Some(path) = &self.path else {
            return Ok(self.lock()?.clone());
        };

        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(path)?;
        let file: CacheFile = serde_json::from_str(&content)?;
        Ok(file.accounts)
    }

    fn store(&self, accounts: Vec<CachedAccount>) -> Result<()> {
        let Some(path) = &self.path else {
            *self.lock()? = accounts;
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(&CacheFile { accounts })?;
        std::fs::write(path, content)?;

        // Set restrictive permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    /// Refresh token for an account, if one is cached
    pub fn refresh_token(&self, account: &Account) -> Result<Option<String>> {
        Ok(self
            .load()?
            .into_iter()
            .find(|c| c.account.home_account_id == account.home_account_id)
            .map(|c| c.refresh_token))
    }

    /// Insert or replace the entry for `account`. Existing entries keep their position.
    pub fn upsert(&self, account: Account, refresh_token: String) -> Result<()> {
        let mut accounts = self.load()?;
        let entry = CachedAccount {
            account,
            refresh_token,
            updated_at: Utc::now(),
        };

        match accounts
            .iter_mut()
            .find(|c| c.account.home_account_id == entry.account.home_account_id)
        {
            Some(existing) => *existing = entry,
            None => accounts.push(entry),
        }

        self.store(accounts)
    }

    /// Remove an account. Removing an unknown account is not an error.
    pub fn remove(&self, account: &Account) -> Result<()> {
        let mut accounts = self.load()?;
        accounts.retain(|c| c.account.home_account_id != account.home_account_id);
        self.store(accounts)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<CachedAccount>>> {
        self.memory
            .lock()
            .map_err(|_| Error::Other("token cache lock poisoned".to_string()))
    }
}
