//! Identity authority seam.
//!
//! [`IdentityAuthority`] is everything the [`TokenProvider`](super::TokenProvider)
//! needs from an OAuth authority: a cache of previously signed-in accounts,
//! silent reacquisition for one of them, and the device authorization grant.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::Result;

/// A previously authenticated identity known to the authority's cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Stable key for the account (`{oid}.{tid}` for Entra ID)
    pub home_account_id: String,

    /// Preferred username, shown to the user
    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Access token plus the account it was issued for.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub access_token: String,
    pub account: Account,
}

/// Outstanding device authorization request.
#[derive(Debug, Clone)]
pub struct DeviceCode {
    /// Opaque code the client polls with. Never shown or logged.
    pub device_code: String,

    /// Short code the user types at `verification_uri`
    pub user_code: String,

    pub verification_uri: String,

    /// Human readable instructions from the authority
    pub message: String,

    /// Time until the device code expires
    pub expires_in: Duration,

    /// Minimum polling interval
    pub interval: Duration,
}

impl DeviceCode {
    /// Instructions to show the user, synthesised when the authority sent none.
    pub fn instructions(&self) -> String {
        if self.message.trim().is_empty() {
            format!(
                "To sign in, open {} and enter the code {} to authenticate.",
                self.verification_uri, self.user_code
            )
        } else {
            self.message.clone()
        }
    }
}

/// Result of a single device-code poll.
#[derive(Debug, Clone)]
pub enum DevicePoll {
    /// User has not finished signing in yet
    Pending,
    /// Authority asked the client to poll less often
    SlowDown,
    Complete(AuthResult),
}

/// OAuth authority used by the token provider.
#[async_trait]
pub trait IdentityAuthority: Send + Sync {
    /// Accounts in the local cache, in cache order.
    async fn accounts(&self) -> Result<Vec<Account>>;

    /// Acquire a token for a cached account without user interaction.
    async fn acquire_token_silent(&self, account: &Account) -> Result<AuthResult>;

    /// Start a device authorization grant.
    async fn initiate_device_code(&self) -> Result<DeviceCode>;

    /// Poll the token endpoint once for an outstanding device code.
    async fn poll_device_code(&self, code: &DeviceCode) -> Result<DevicePoll>;

    /// Remove an account and its tokens from the cache.
    async fn remove_account(&self, account: &Account) -> Result<()>;
}
