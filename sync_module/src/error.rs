use std::path::PathBuf;

/// Misconfiguration that stops a run before anything is fetched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No credentials file found! Please install one at '{}'", path.display())]
    MissingClientSecret { path: PathBuf },
    #[error("invalid credentials file {}: {message}", path.display())]
    InvalidClientSecret { path: PathBuf, message: String },
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("taskwarrior binary not found: {} (set TASKWARRIOR_BIN)", path.display())]
    TaskBinaryNotFound { path: PathBuf },
    #[error("no cache directory available for the token cache; set TASK_GMAIL_SYNC_TOKEN_PATH")]
    NoCacheDir,
}

/// Credential failures. All of them are fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("not authorized: no cached token and interactive authorization is disabled")]
    NotAuthorized,
    #[error("token refresh failed: {0}")]
    TokenRefreshFailed(String),
    #[error("authorization failed: {0}")]
    AuthorizationFailed(String),
    #[error("credentials rejected by the mail service (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("token cache {}: {message}", path.display())]
    TokenCache { path: PathBuf, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("not found: {what}")]
    NotFound { what: String },
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("json error: {0}")]
    Json(String),
    #[error("task command failed (status: {status:?}): {output}")]
    TaskCommand { status: Option<i32>, output: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn not_found(what: impl Into<String>) -> Self {
        SyncError::NotFound { what: what.into() }
    }

    /// Fatal errors abort the run; everything else is isolated to one intent.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Auth(_) | SyncError::Config(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. })
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Json(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(SyncError::from(AuthError::NotAuthorized).is_fatal());
        assert!(SyncError::from(ConfigError::NoCacheDir).is_fatal());
        assert!(!SyncError::not_found("thread t1").is_fatal());
        assert!(SyncError::not_found("thread t1").is_not_found());
        assert!(!SyncError::Transport("reset".to_string()).is_fatal());
    }

    #[test]
    fn missing_client_secret_message_names_the_path() {
        let err = ConfigError::MissingClientSecret {
            path: PathBuf::from("/etc/task-gmail-sync/credentials.json"),
        };
        assert_eq!(
            err.to_string(),
            "No credentials file found! Please install one at '/etc/task-gmail-sync/credentials.json'"
        );
    }
}
