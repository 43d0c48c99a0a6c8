//! Google OAuth 2.0 credential management for the Gmail API.
//!
//! The token is cached on disk between runs. A cached token is refreshed
//! with its refresh token when it is about to expire; when there is no
//! usable refresh token the installed-app authorization flow runs in the
//! browser (see [`crate::oauth_flow`]), unless it has been disabled.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{AuthError, ConfigError, SyncError};
use crate::oauth_flow;

/// Scopes needed to read threads and remove labels.
pub const GMAIL_SCOPES: &[&str] = &["https://www.googleapis.com/auth/gmail.modify"];

pub const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Tokens are refreshed this long before they actually expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Source of bearer tokens for the mail service.
pub trait CredentialProvider {
    /// Returns a token that is valid right now, acquiring one if needed.
    fn access_token(&self) -> Result<String, SyncError>;

    /// Drops a token the server rejected so the next call acquires a new one.
    fn invalidate(&self);
}

/// A pre-issued token, e.g. from `GOOGLE_ACCESS_TOKEN`. It cannot be renewed.
#[derive(Debug, Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl CredentialProvider for StaticToken {
    fn access_token(&self) -> Result<String, SyncError> {
        Ok(self.token.clone())
    }

    fn invalidate(&self) {
        warn!("static access token was rejected; it will be reused as-is");
    }
}

#[derive(Debug, Clone)]
pub struct GoogleAuthConfig {
    /// OAuth client secret JSON downloaded from the Google console.
    pub credentials_path: PathBuf,
    /// Where the access and refresh tokens are cached.
    pub token_path: PathBuf,
    /// Overrides the authorization endpoint from the client secret file.
    pub auth_url: Option<String>,
    /// Overrides the token endpoint from the client secret file.
    pub token_url: Option<String>,
    pub scopes: Vec<String>,
    /// Allow the browser authorization flow.
    pub interactive: bool,
}

/// OAuth client identity from the client secret file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
}

#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecretEntry>,
    web: Option<ClientSecretEntry>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretEntry {
    client_id: String,
    client_secret: String,
    auth_uri: Option<String>,
    token_uri: Option<String>,
}

impl ClientSecret {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingClientSecret {
                path: path.to_path_buf(),
            });
        }
        let invalid = |message: String| ConfigError::InvalidClientSecret {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|err| invalid(err.to_string()))?;
        let file: ClientSecretFile =
            serde_json::from_str(&content).map_err(|err| invalid(err.to_string()))?;
        let entry = file
            .installed
            .or(file.web)
            .ok_or_else(|| invalid("expected an \"installed\" or \"web\" client".to_string()))?;

        Ok(Self {
            client_id: entry.client_id,
            client_secret: entry.client_secret,
            auth_uri: entry
                .auth_uri
                .unwrap_or_else(|| DEFAULT_AUTH_URL.to_string()),
            token_uri: entry
                .token_uri
                .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
        })
    }
}

/// Token cache file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl StoredToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > now + Duration::seconds(EXPIRY_MARGIN_SECS),
            None => false,
        }
    }

    /// Builds the cached form of a token endpoint response.
    ///
    /// Refresh responses usually omit the refresh token; the previous one is kept.
    pub(crate) fn from_response(
        response: OAuthTokenResponse,
        previous_refresh_token: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh_token),
            expires_at: response
                .expires_in
                .map(|secs| now + Duration::seconds(secs)),
            scope: response.scope,
            token_type: response.token_type,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct OAuthTokenResponse {
    pub(crate) access_token: String,
    #[serde(default)]
    pub(crate) expires_in: Option<i64>,
    #[serde(default)]
    pub(crate) refresh_token: Option<String>,
    #[serde(default)]
    pub(crate) scope: Option<String>,
    #[serde(default)]
    pub(crate) token_type: Option<String>,
}

/// Token session for one run. Clones share the same cached token.
#[derive(Debug, Clone)]
pub struct GoogleAuth {
    inner: Arc<RwLock<GoogleAuthInner>>,
}

#[derive(Debug)]
struct GoogleAuthInner {
    config: GoogleAuthConfig,
    token: Option<StoredToken>,
}

impl GoogleAuth {
    /// Opens a session, reading the token cache if there is one.
    pub fn new(config: GoogleAuthConfig) -> Self {
        let token = load_token_cache(&config.token_path);
        Self {
            inner: Arc::new(RwLock::new(GoogleAuthInner { config, token })),
        }
    }

    pub fn cached_token(&self) -> Option<StoredToken> {
        self.read().token.clone()
    }

    /// Force a new token: refresh if possible, otherwise authorize interactively.
    pub fn refresh_access_token(&self) -> Result<String, SyncError> {
        let (config, refresh_token) = {
            let inner = self.read();
            (
                inner.config.clone(),
                inner.token.as_ref().and_then(|t| t.refresh_token.clone()),
            )
        };
        let secret = ClientSecret::load(&config.credentials_path)?;
        let token_url = config
            .token_url
            .clone()
            .unwrap_or_else(|| secret.token_uri.clone());

        if let Some(refresh_token) = refresh_token {
            match refresh_via_oauth(&token_url, &secret, &refresh_token) {
                Ok(response) => {
                    return self.store(StoredToken::from_response(
                        response,
                        Some(refresh_token),
                        Utc::now(),
                    ));
                }
                Err(err) if config.interactive => {
                    warn!("{}; falling back to interactive authorization", err);
                }
                Err(err) => return Err(err.into()),
            }
        }

        if !config.interactive {
            return Err(AuthError::NotAuthorized.into());
        }

        let auth_url = config
            .auth_url
            .clone()
            .unwrap_or_else(|| secret.auth_uri.clone());
        let response = oauth_flow::authorize(&secret, &auth_url, &token_url, &config.scopes)?;
        info!("Authorization completed");
        self.store(StoredToken::from_response(response, None, Utc::now()))
    }

    fn store(&self, token: StoredToken) -> Result<String, SyncError> {
        let access_token = token.access_token.clone();
        let token_path = {
            let mut inner = self.write();
            inner.token = Some(token.clone());
            inner.config.token_path.clone()
        };
        save_token_cache(&token_path, &token)?;
        debug!("Cached Google OAuth token at {}", token_path.display());
        Ok(access_token)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, GoogleAuthInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, GoogleAuthInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialProvider for GoogleAuth {
    fn access_token(&self) -> Result<String, SyncError> {
        {
            let inner = self.read();
            if let Some(token) = inner.token.as_ref().filter(|t| t.is_fresh(Utc::now())) {
                return Ok(token.access_token.clone());
            }
        }

        self.refresh_access_token()
    }

    fn invalidate(&self) {
        if let Some(token) = self.write().token.as_mut() {
            token.expires_at = None;
        }
    }
}

/// Exchanges a refresh token for a new access token.
fn refresh_via_oauth(
    token_url: &str,
    secret: &ClientSecret,
    refresh_token: &str,
) -> Result<OAuthTokenResponse, AuthError> {
    debug!("Refreshing Google OAuth token");

    let client = reqwest::blocking::Client::new();
    let response = client
        .post(token_url)
        .form(&[
            ("client_id", secret.client_id.as_str()),
            ("client_secret", secret.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .map_err(|e| AuthError::TokenRefreshFailed(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        error!("OAuth token refresh failed: {} - {}", status, body);
        return Err(AuthError::TokenRefreshFailed(format!(
            "HTTP {}: {}",
            status, body
        )));
    }

    response
        .json::<OAuthTokenResponse>()
        .map_err(|e| AuthError::TokenRefreshFailed(e.to_string()))
}

fn load_token_cache(path: &Path) -> Option<StoredToken> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!("ignoring unreadable token cache {}: {}", path.display(), err);
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(token) => Some(token),
        Err(err) => {
            warn!("ignoring corrupt token cache {}: {}", path.display(), err);
            None
        }
    }
}

fn save_token_cache(path: &Path, token: &StoredToken) -> Result<(), SyncError> {
    let cache_error = |message: String| AuthError::TokenCache {
        path: path.to_path_buf(),
        message,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| cache_error(err.to_string()))?;
    }
    let json = serde_json::to_string_pretty(token).map_err(|err| cache_error(err.to_string()))?;
    std::fs::write(path, json).map_err(|err| cache_error(err.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|err| cache_error(err.to_string()))?;
    }

    Ok(())
}
