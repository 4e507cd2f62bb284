//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;
use crate::Result;
use crate::error::Error;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Application (client) id registered with the identity authority
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Directory tenant id
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,

    /// Base URL of the agent service
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Identity authority host, without the tenant segment
    #[serde(default = "default_authority_host")]
    pub authority_host: String,

    /// Per-request timeout for agent service calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Preferred cached account (username). First cached account when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    /// Open the device login page in the browser
    #[serde(default = "default_open_browser")]
    pub open_browser: bool,

    /// Token cache location. Defaults to `~/.agent-cli/token_cache.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_cache: Option<PathBuf>,
}

fn default_client_id() -> String {
    "your-default-client-id".to_string()
}

fn default_tenant_id() -> String {
    "your-default-tenant-id".to_string()
}

fn default_server_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_authority_host() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_open_browser() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            tenant_id: default_tenant_id(),
            server_url: default_server_url(),
            authority_host: default_authority_host(),
            request_timeout_secs: default_request_timeout_secs(),
            account: None,
            open_browser: default_open_browser(),
            token_cache: None,
        }
    }
}

impl Config {
    /// Check the values that would otherwise fail deep inside a request.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::Config("clientId must not be empty".to_string()));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(Error::Config("tenantId must not be empty".to_string()));
        }
        Url::parse(&self.server_url)
            .map_err(|e| Error::Config(format!("invalid serverUrl {:?}: {}", self.server_url, e)))?;
        Url::parse(&self.authority_host)
            .map_err(|e| Error::Config(format!("invalid authorityHost {:?}: {}", self.authority_host, e)))?;
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("requestTimeoutSecs must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Token cache path, falling back to the default location
    pub fn token_cache_path(&self) -> PathBuf {
        self.token_cache
            .clone()
            .unwrap_or_else(|| config_dir().join("token_cache.json"))
    }
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agent-cli")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from a file. A missing file yields the defaults.
pub fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!("No config at {:?}, using defaults", path);
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("failed to parse {:?}: {}", path, e)))?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_to(config: &Config, path: &Path) -> Result<()> {
    // Create parent directory
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Interactive configuration wizard
pub fn configure(path: &Path) -> Result<()> {
    use crate::ui;
    use inquire::{Confirm, Text};

    let mut config = load_from(path)?;

    ui::print_header("Setup Wizard", &path.to_string_lossy());
    println!("  Press Enter to keep the current value.\n");

    config.server_url = Text::new("Agent service URL:")
        .with_initial_value(&config.server_url)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;

    config.client_id = Text::new("Application (client) ID:")
        .with_initial_value(&config.client_id)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;

    config.tenant_id = Text::new("Directory (tenant) ID:")
        .with_initial_value(&config.tenant_id)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;

    let account = Text::new("Preferred account (blank for first cached):")
        .with_initial_value(config.account.as_deref().unwrap_or(""))
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;
    config.account = Some(account.trim().to_string()).filter(|a| !a.is_empty());

    config.open_browser = Confirm::new("Open the login page in your browser?")
        .with_default(config.open_browser)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;

    config.validate()?;

    ui::print_thinking("Saving configuration");
    save_to(&config, path)?;
    ui::print_success("Configuration saved");

    Ok(())
}
