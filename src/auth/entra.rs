//! EntraAuthority - Microsoft identity platform implementation of [`IdentityAuthority`]
//!
//! Speaks the OAuth2 device authorization grant (RFC 8628) and the refresh
//! token grant against `{authority_host}/{tenant}/oauth2/v2.0/`.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::authority::{Account, AuthResult, DeviceCode, DevicePoll, IdentityAuthority};
use super::token_cache::TokenCache;
use crate::config::Config;
use crate::Result;
use crate::error::Error;

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Scopes added to the application scope so the authority returns an
/// id_token and a refresh token
const OIDC_SCOPES: &str = "openid profile offline_access";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

const AUTHORITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

/// Device authorization endpoint response
#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    #[serde(default)]
    interval: Option<u64>,
    #[serde(default)]
    message: Option<String>,
}

/// OAuth2 error body (RFC 6749 section 5.2)
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl OAuthErrorResponse {
    fn describe(&self) -> String {
        match &self.error_description {
            Some(d) => format!("{} - {}", self.error, first_line(d)),
            None => self.error.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DeviceCodeRequest<'a> {
    client_id: &'a str,
    scope: &'a str,
}

#[derive(Debug, Serialize)]
struct DevicePollRequest<'a> {
    client_id: &'a str,
    grant_type: &'a str,
    device_code: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    client_id: &'a str,
    grant_type: &'a str,
    refresh_token: &'a str,
    scope: &'a str,
}

/// Claims read from the id_token payload
#[derive(Debug, Default, Deserialize)]
struct IdTokenClaims {
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    oid: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    tid: Option<String>,
}

/// Public-client authority for Microsoft Entra ID
pub struct EntraAuthority {
    client_id: String,
    endpoint_base: String,
    scope: String,
    cache: TokenCache,
    http_client: Client,
}

impl EntraAuthority {
    pub fn new(authority_host: &str, tenant_id: &str, client_id: &str, cache: TokenCache) -> Result<Self> {
        let http_client = Client::builder().timeout(AUTHORITY_TIMEOUT).build()?;

        Ok(Self {
            client_id: client_id.to_string(),
            endpoint_base: format!(
                "{}/{}/oauth2/v2.0",
                authority_host.trim_end_matches('/'),
                tenant_id
            ),
            scope: format!("api://{}/access_as_user {}", client_id, OIDC_SCOPES),
            cache,
            http_client,
        })
    }

    /// Authority configured from the loaded config, with a file-backed cache
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.authority_host,
            &config.tenant_id,
            &config.client_id,
            TokenCache::file(config.token_cache_path()),
        )
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.endpoint_base, name)
    }

    async fn post_form<T: Serialize + ?Sized>(&self, endpoint: &str, form: &T) -> Result<reqwest::Response> {
        let request_id = Uuid::new_v4().to_string();
        tracing::debug!(endpoint, request_id = %request_id, "authority request");

        let response = self.http_client
            .post(self.endpoint(endpoint))
            .header("client-request-id", request_id)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;

        Ok(response)
    }

    /// Turn a token response into an [`AuthResult`] and cache its refresh token.
    ///
    /// `known` is the account the grant was made for, if any. It stands in
    /// when the response carries no id_token.
    fn complete(&self, token: TokenResponse, known: Option<&Account>) -> Result<AuthResult> {
        let account = match (&token.id_token, known) {
            (Some(id_token), _) => account_from_id_token(id_token)?,
            (None, Some(account)) => account.clone(),
            (None, None) => return Err(Error::OAuth("token response has no id_token".to_string())),
        };

        match token.refresh_token {
            Some(refresh) => self.cache.upsert(account.clone(), refresh)?,
            None => tracing::warn!("No refresh token issued; silent sign-in will not be available"),
        }

        Ok(AuthResult {
            access_token: token.access_token,
            account,
        })
    }
}

#[async_trait]
impl IdentityAuthority for EntraAuthority {
    async fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self.cache.load()?.into_iter().map(|c| c.account).collect())
    }

    async fn acquire_token_silent(&self, account: &Account) -> Result<AuthResult> {
        let refresh_token = self.cache
            .refresh_token(account)?
            .ok_or_else(|| Error::SilentAuth(format!("no refresh token cached for {}", account.username)))?;

        let request = RefreshRequest {
            client_id: &self.client_id,
            grant_type: "refresh_token",
            refresh_token: &refresh_token,
            scope: &self.scope,
        };

        let response = self.post_form("token", &request)
            .await
            .map_err(|e| Error::SilentAuth(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<OAuthErrorResponse>(&body)
                .map(|e| e.describe())
                .unwrap_or(body);
            return Err(Error::SilentAuth(reason));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::SilentAuth(format!("malformed token response: {}", e)))?;

        self.complete(token, Some(account))
    }

    async fn initiate_device_code(&self) -> Result<DeviceCode> {
        let request = DeviceCodeRequest {
            client_id: &self.client_id,
            scope: &self.scope,
        };

        let response = self.post_form("devicecode", &request).await?;

        if !response.status().is_success() {
            let body = response.text().await?;
            let reason = serde_json::from_str::<OAuthErrorResponse>(&body)
                .map(|e| e.describe())
                .unwrap_or(body);
            return Err(Error::OAuth(format!("device code request failed: {}", reason)));
        }

        let code: DeviceCodeResponse = response.json().await?;

        Ok(DeviceCode {
            device_code: code.device_code,
            user_code: code.user_code,
            verification_uri: code.verification_uri,
            message: code.message.unwrap_or_default(),
            expires_in: Duration::from_secs(code.expires_in),
            interval: Duration::from_secs(code.interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECS).max(1)),
        })
    }

    async fn poll_device_code(&self, code: &DeviceCode) -> Result<DevicePoll> {
        let request = DevicePollRequest {
            client_id: &self.client_id,
            grant_type: DEVICE_CODE_GRANT,
            device_code: &code.device_code,
        };

        let response = self.post_form("token", &request).await?;

        if response.status().is_success() {
            let token: TokenResponse = response.json().await?;
            return self.complete(token, None).map(DevicePoll::Complete);
        }

        let body = response.text().await?;
        let error: OAuthErrorResponse = serde_json::from_str(&body)
            .map_err(|_| Error::OAuth(format!("unexpected token endpoint response: {}", body)))?;

        match error.error.as_str() {
            "authorization_pending" => Ok(DevicePoll::Pending),
            "slow_down" => Ok(DevicePoll::SlowDown),
            _ => Err(Error::OAuth(error.describe())),
        }
    }

    async fn remove_account(&self, account: &Account) -> Result<()> {
        self.cache.remove(account)
    }
}

/// Build an [`Account`] from the (unverified) id_token payload.
///
/// The token came straight from the authority over TLS, so only the claims
/// are read; the signature is not checked.
fn account_from_id_token(id_token: &str) -> Result<Account> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::OAuth("malformed id_token".to_string()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::OAuth(format!("malformed id_token payload: {}", e)))?;

    let claims: IdTokenClaims = serde_json::from_slice(&bytes)?;

    let object_id = claims.oid
        .or(claims.sub)
        .ok_or_else(|| Error::OAuth("id_token has no subject".to_string()))?;

    let home_account_id = match &claims.tid {
        Some(tid) => format!("{}.{}", object_id, tid),
        None => object_id,
    };

    Ok(Account {
        home_account_id,
        username: claims.preferred_username
            .or(claims.name)
            .unwrap_or_else(|| "unknown".to_string()),
        tenant_id: claims.tid,
    })
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text).trim()
}

#[cfg(test)]
pub(crate) fn fake_id_token(claims: serde_json::Value) -> String {
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}
