//! Error types for agent-cli

use thiserror::Error;

/// Result type alias for agent-cli operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in agent-cli
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("failed to get accounts: {0}")]
    AccountEnumeration(String),

    /// Silent token acquisition failed. Triggers the device-code fallback and
    /// is never shown to the user.
    #[error("silent authentication failed: {0}")]
    SilentAuth(String),

    #[error("authentication failed: could not start device login: {0}")]
    DeviceCodeInit(String),

    #[error("authentication failed: {0}")]
    DeviceCodeCompletion(String),

    /// Identity authority protocol failure (bad status, malformed token response).
    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("failed to remove account: {0}")]
    SignOut(String),

    #[error("request failed: {message}")]
    Transport { timeout: bool, message: String },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("Unknown command: /{0} (type /help for available commands)")]
    UnknownCommand(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a transport error from a failed reqwest exchange.
    pub fn transport(err: &reqwest::Error) -> Self {
        Error::Transport {
            timeout: err.is_timeout(),
            message: err.to_string(),
        }
    }

    /// Whether this error belongs to the authentication phase, which aborts
    /// startup instead of being reported inside the session.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Error::AccountEnumeration(_)
                | Error::SilentAuth(_)
                | Error::DeviceCodeInit(_)
                | Error::DeviceCodeCompletion(_)
        )
    }
}
