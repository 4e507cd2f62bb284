//! Authentication module for the identity authority and bearer credentials
//!
//! This module provides:
//! - The [`IdentityAuthority`] seam and its Microsoft Entra ID implementation
//! - The authority's account/refresh-token cache
//! - [`TokenProvider`], which turns the authority into a usable credential

mod authority;
mod entra;
mod provider;
mod token_cache;

pub use authority::{Account, AuthResult, DeviceCode, DevicePoll, IdentityAuthority};
pub use entra::EntraAuthority;
pub use provider::{AuthMethod, Credential, TokenProvider};
pub use token_cache::{CachedAccount, TokenCache};

#[cfg(test)]
pub(crate) use provider::fake;
