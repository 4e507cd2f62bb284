//! agent-cli - console client for the Agent Middleware service
//!
//! This library provides sign-in against the identity authority, the
//! authenticated agent service client, and the interactive session loop.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod ui;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, Result};
