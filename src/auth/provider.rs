//! TokenProvider - negotiates the bearer credential for the interactive user
//!
//! Tries silent acquisition for a cached account first and falls back to the
//! device authorization flow:
//! - Account enumeration (fatal on failure)
//! - Silent token acquisition (failure only triggers the fallback)
//! - Device code initiation and a cancellable, deadline-bound wait

use std::future::Future;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::authority::{Account, AuthResult, DeviceCode, DevicePoll, IdentityAuthority};
use crate::Result;
use crate::error::Error;

/// Added to the polling interval when the authority answers `slow_down`
const SLOW_DOWN_STEP: std::time::Duration = std::time::Duration::from_secs(5);

/// Bearer token plus the account it belongs to. Held in memory only.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: String,
    pub account: Account,
}

impl Credential {
    pub fn display_name(&self) -> &str {
        &self.account.username
    }
}

impl From<AuthResult> for Credential {
    fn from(result: AuthResult) -> Self {
        Self {
            access_token: result.access_token,
            account: result.account,
        }
    }
}

/// How the credential was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Silent,
    DeviceCode,
}

/// Produces bearer credentials from an [`IdentityAuthority`]
pub struct TokenProvider<A: IdentityAuthority> {
    authority: A,
    preferred_account: Option<String>,
}

impl<A: IdentityAuthority> TokenProvider<A> {
    pub fn new(authority: A) -> Self {
        Self {
            authority,
            preferred_account: None,
        }
    }

    /// Prefer the cached account with this username over the first one.
    pub fn with_preferred_account(mut self, username: Option<String>) -> Self {
        self.preferred_account = username;
        self
    }

    pub fn authority(&self) -> &A {
        &self.authority
    }

    /// Pick the account to use from the cache.
    ///
    /// The configured username wins (case-insensitive). Otherwise the first
    /// account in cache order; the authority gives no ordering guarantee.
    fn select_account<'a>(&self, accounts: &'a [Account]) -> Option<&'a Account> {
        if let Some(preferred) = &self.preferred_account {
            if let Some(account) = accounts
                .iter()
                .find(|a| a.username.eq_ignore_ascii_case(preferred))
            {
                return Some(account);
            }
            tracing::warn!("Preferred account {} is not cached, using the first cached account", preferred);
        }
        accounts.first()
    }

    /// Get a credential, silently if possible.
    ///
    /// `on_device_code` is called once with the login instructions before the
    /// provider starts waiting for the user.
    pub async fn authenticate<F>(
        &self,
        cancel: &CancellationToken,
        on_device_code: F,
    ) -> Result<(Credential, AuthMethod)>
    where
        F: FnOnce(&DeviceCode),
    {
        let accounts = until_cancelled(cancel, self.authority.accounts())
            .await?
            .map_err(|e| Error::AccountEnumeration(e.to_string()))?;

        if let Some(account) = self.select_account(&accounts) {
            match until_cancelled(cancel, self.authority.acquire_token_silent(account)).await? {
                Ok(result) => {
                    tracing::info!("Silent authentication succeeded for {}", result.account.username);
                    return Ok((result.into(), AuthMethod::Silent));
                }
                Err(e) => {
                    tracing::debug!("Silent authentication failed: {}, falling back to device code", e);
                }
            }
        }

        tracing::info!("Starting device code flow");
        let code = until_cancelled(cancel, self.authority.initiate_device_code())
            .await?
            .map_err(|e| Error::DeviceCodeInit(e.to_string()))?;

        on_device_code(&code);

        let result = self.wait_for_device_code(&code, cancel).await?;
        Ok((result.into(), AuthMethod::DeviceCode))
    }

    /// Poll until the user finishes signing in, the grant fails, the code
    /// expires, or `cancel` fires.
    pub async fn wait_for_device_code(
        &self,
        code: &DeviceCode,
        cancel: &CancellationToken,
    ) -> Result<AuthResult> {
        let deadline = Instant::now() + code.expires_in;
        let mut interval = code.interval;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::DeviceCodeCompletion("device code expired before sign-in completed".to_string()));
            }

            let wake = (now + interval).min(deadline);
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep_until(wake) => {}
            }
            if wake >= deadline {
                continue;
            }

            let poll = until_cancelled(cancel, self.authority.poll_device_code(code)).await?;

            match poll.map_err(|e| Error::DeviceCodeCompletion(e.to_string()))? {
                DevicePoll::Pending => {
                    tracing::debug!("Authorization pending");
                }
                DevicePoll::SlowDown => {
                    interval += SLOW_DOWN_STEP;
                    tracing::debug!("Authority asked to slow down, polling every {:?}", interval);
                }
                DevicePoll::Complete(result) => return Ok(result),
            }
        }
    }

    /// Remove every cached account. Stops at the first removal failure.
    pub async fn sign_out(&self) -> Result<()> {
        let accounts = self.authority
            .accounts()
            .await
            .map_err(|e| Error::AccountEnumeration(e.to_string()))?;

        for account in &accounts {
            self.authority
                .remove_account(account)
                .await
                .map_err(|e| Error::SignOut(e.to_string()))?;
            tracing::info!("Removed cached account {}", account.username);
        }

        Ok(())
    }

    /// Display name of the selected cached account. `None` when nothing is
    /// cached or the cache cannot be read.
    pub async fn current_user(&self) -> Option<String> {
        match self.authority.accounts().await {
            Ok(accounts) => self.select_account(&accounts).map(|a| a.username.clone()),
            Err(e) => {
                tracing::debug!("Account enumeration failed: {}", e);
                None
            }
        }
    }
}

/// Run `fut` unless `cancel` fires first.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        output = fut => Ok(output),
    }
}

/// Scripted authority for tests.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    pub struct FakeAuthority {
        pub accounts: Mutex<Option<Vec<Account>>>,
        pub silent_ok: bool,
        pub device_init_ok: bool,
        pub polls: Mutex<VecDeque<Result<DevicePoll>>>,
        pub remove_ok: bool,
        pub device_code_calls: Mutex<usize>,
        pub poll_calls: Mutex<usize>,
        pub silent_calls: Mutex<Vec<String>>,
        pub silent_delay: Duration,
        pub expires_in: Duration,
    }

    pub fn account(name: &str) -> Account {
        Account {
            home_account_id: format!("{}-id", name),
            username: name.to_string(),
            tenant_id: None,
        }
    }

    pub fn auth_result(name: &str, token: &str) -> AuthResult {
        AuthResult {
            access_token: token.to_string(),
            account: account(name),
        }
    }

    impl FakeAuthority {
        pub fn new(accounts: Vec<Account>) -> Self {
            Self {
                accounts: Mutex::new(Some(accounts)),
                silent_ok: true,
                device_init_ok: true,
                polls: Mutex::new(VecDeque::new()),
                remove_ok: true,
                device_code_calls: Mutex::new(0),
                poll_calls: Mutex::new(0),
                silent_calls: Mutex::new(Vec::new()),
                silent_delay: Duration::ZERO,
                expires_in: Duration::from_secs(900),
            }
        }

        /// Cache that cannot be read
        pub fn broken() -> Self {
            let fake = Self::new(Vec::new());
            *fake.accounts.lock().unwrap() = None;
            fake
        }

        pub fn with_polls(self, polls: Vec<Result<DevicePoll>>) -> Self {
            *self.polls.lock().unwrap() = polls.into();
            self
        }

        pub fn device_code_calls(&self) -> usize {
            *self.device_code_calls.lock().unwrap()
        }

        pub fn poll_calls(&self) -> usize {
            *self.poll_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl IdentityAuthority for FakeAuthority {
        async fn accounts(&self) -> Result<Vec<Account>> {
            self.accounts
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| Error::Other("cache unreadable".to_string()))
        }

        async fn acquire_token_silent(&self, account: &Account) -> Result<AuthResult> {
            self.silent_calls.lock().unwrap().push(account.username.clone());
            if !self.silent_delay.is_zero() {
                tokio::time::sleep(self.silent_delay).await;
            }
            if self.silent_ok {
                Ok(AuthResult {
                    access_token: "silent-token".to_string(),
                    account: account.clone(),
                })
            } else {
                Err(Error::SilentAuth("interaction required".to_string()))
            }
        }

        async fn initiate_device_code(&self) -> Result<DeviceCode> {
            *self.device_code_calls.lock().unwrap() += 1;
            if !self.device_init_ok {
                return Err(Error::OAuth("invalid_client".to_string()));
            }
            Ok(DeviceCode {
                device_code: "dc".to_string(),
                user_code: "ABCD-EFGH".to_string(),
                verification_uri: "https://login.example.com/device".to_string(),
                message: "Enter ABCD-EFGH at https://login.example.com/device".to_string(),
                expires_in: self.expires_in,
                interval: Duration::from_secs(5),
            })
        }

        async fn poll_device_code(&self, _code: &DeviceCode) -> Result<DevicePoll> {
            *self.poll_calls.lock().unwrap() += 1;
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(DevicePoll::Pending))
        }

        async fn remove_account(&self, account: &Account) -> Result<()> {
            if !self.remove_ok {
                return Err(Error::Other("cache is read-only".to_string()));
            }
            if let Some(accounts) = self.accounts.lock().unwrap().as_mut() {
                accounts.retain(|a| a != account);
            }
            Ok(())
        }
    }
}
