//! Run configuration.
//!
//! Values are layered: built-in defaults, then the optional TOML file, then
//! environment variables (after `.env` is loaded), then command line flags
//! applied by the binary.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use reconcile_module::ReferenceBuilder;

use crate::error::ConfigError;
use crate::google_auth::{GoogleAuthConfig, GMAIL_SCOPES};

pub const PKGNAME: &str = "task-gmail-sync";
pub const DEFAULT_LABEL: &str = "gtd/next-action";
pub const DEFAULT_TAG: &str = "gmail";
pub const DEFAULT_GMAIL_API_BASE_URL: &str = "https://gmail.googleapis.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Gmail label that marks action threads.
    pub label: String,
    /// Taskwarrior tag that marks sync-managed tasks.
    pub tag: String,
    /// Signed-in account index used in deep links (`/mail/u/{n}/`).
    pub mail_account: u32,
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    pub task_bin: PathBuf,
    pub gmail_api_base_url: String,
    pub oauth_auth_url: Option<String>,
    pub oauth_token_url: Option<String>,
    /// Allow the browser authorization flow when no usable token is cached.
    pub interactive_auth: bool,
    /// Pre-issued bearer token; bypasses the OAuth flow entirely.
    pub access_token: Option<String>,
}

/// Shape of `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfigFile {
    pub label: Option<String>,
    pub tag: Option<String>,
    pub mail_account: Option<u32>,
    pub credentials_path: Option<String>,
    pub token_path: Option<String>,
    pub task_bin: Option<String>,
    pub gmail_api_base_url: Option<String>,
    pub oauth_auth_url: Option<String>,
    pub oauth_token_url: Option<String>,
    pub interactive_auth: Option<bool>,
}

impl SyncConfig {
    /// Resolves the configuration from `.env`, the config file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let file = match resolve_config_path()? {
            Some(path) => load_config_file(&path)?,
            None => SyncConfigFile::default(),
        };
        Self::from_sources(file, |key| env::var(key).ok())
    }

    pub fn from_sources(
        file: SyncConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let lookup = |key: &str| {
            env(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let label = lookup("TASK_GMAIL_SYNC_LABEL")
            .or(file.label)
            .unwrap_or_else(|| DEFAULT_LABEL.to_string());
        let tag = lookup("TASK_GMAIL_SYNC_TAG")
            .or(file.tag)
            .unwrap_or_else(|| DEFAULT_TAG.to_string());
        validate_tag(&tag)?;

        let mail_account = match lookup("TASK_GMAIL_SYNC_MAIL_ACCOUNT") {
            Some(raw) => raw.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                key: "mail_account",
                value: raw,
            })?,
            None => file.mail_account.unwrap_or(0),
        };

        let credentials_path = lookup("TASK_GMAIL_SYNC_CREDENTIALS_PATH")
            .or(file.credentials_path)
            .map(|raw| expand_path(&raw))
            .unwrap_or_else(default_credentials_path);
        let token_path = match lookup("TASK_GMAIL_SYNC_TOKEN_PATH").or(file.token_path) {
            Some(raw) => expand_path(&raw),
            None => default_token_path()?,
        };
        let task_bin = lookup("TASKWARRIOR_BIN")
            .or(file.task_bin)
            .map(|raw| expand_path(&raw))
            .unwrap_or_else(|| PathBuf::from("task"));

        let gmail_api_base_url = lookup("GMAIL_API_BASE_URL")
            .or(file.gmail_api_base_url)
            .unwrap_or_else(|| DEFAULT_GMAIL_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let oauth_auth_url = lookup("GOOGLE_OAUTH_AUTH_URL").or(file.oauth_auth_url);
        let oauth_token_url = lookup("GOOGLE_OAUTH_TOKEN_URL").or(file.oauth_token_url);

        let interactive_auth = match lookup("TASK_GMAIL_SYNC_INTERACTIVE_AUTH") {
            Some(raw) => parse_bool(&raw).ok_or(ConfigError::InvalidValue {
                key: "interactive_auth",
                value: raw,
            })?,
            None => file.interactive_auth.unwrap_or(true),
        };

        Ok(Self {
            label,
            tag,
            mail_account,
            credentials_path,
            token_path,
            task_bin,
            gmail_api_base_url,
            oauth_auth_url,
            oauth_token_url,
            interactive_auth,
            access_token: lookup("GOOGLE_ACCESS_TOKEN"),
        })
    }

    pub fn auth_config(&self) -> GoogleAuthConfig {
        GoogleAuthConfig {
            credentials_path: self.credentials_path.clone(),
            token_path: self.token_path.clone(),
            auth_url: self.oauth_auth_url.clone(),
            token_url: self.oauth_token_url.clone(),
            scopes: GMAIL_SCOPES.iter().map(|scope| scope.to_string()).collect(),
            interactive: self.interactive_auth,
        }
    }

    pub fn reference_builder(&self) -> ReferenceBuilder {
        ReferenceBuilder::for_account(self.mail_account)
    }
}

/// Tags are passed to `task` as `+tag`, so they must be a single bare word.
pub fn validate_tag(tag: &str) -> Result<(), ConfigError> {
    if tag.is_empty() || tag.contains(char::is_whitespace) || tag.starts_with('+') {
        return Err(ConfigError::InvalidValue {
            key: "tag",
            value: tag.to_string(),
        });
    }
    Ok(())
}

pub fn default_credentials_path() -> PathBuf {
    Path::new("/etc").join(PKGNAME).join("credentials.json")
}

pub fn default_token_path() -> Result<PathBuf, ConfigError> {
    let cache_dir = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".cache")))
        .ok_or(ConfigError::NoCacheDir)?;
    Ok(cache_dir.join(PKGNAME).join("token.json"))
}

/// `TASK_GMAIL_SYNC_CONFIG` must exist when set; the XDG default is optional.
fn resolve_config_path() -> Result<Option<PathBuf>, ConfigError> {
    if let Ok(path) = env::var("TASK_GMAIL_SYNC_CONFIG") {
        if !path.trim().is_empty() {
            return Ok(Some(expand_path(&path)));
        }
    }

    Ok(dirs::config_dir()
        .map(|dir| dir.join(PKGNAME).join("config.toml"))
        .filter(|path| path.exists()))
}

pub fn load_config_file(path: &Path) -> Result<SyncConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<SyncConfigFile>(&content).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw.trim()).into_owned())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_gtd_setup() {
        let config = SyncConfig::from_sources(
            SyncConfigFile {
                token_path: Some("/tmp/token.json".to_string()),
                ..Default::default()
            },
            env_from(&[]),
        )
        .expect("config");

        assert_eq!(config.label, "gtd/next-action");
        assert_eq!(config.tag, "gmail");
        assert_eq!(config.mail_account, 0);
        assert_eq!(
            config.credentials_path,
            PathBuf::from("/etc/task-gmail-sync/credentials.json")
        );
        assert_eq!(config.task_bin, PathBuf::from("task"));
        assert_eq!(config.gmail_api_base_url, DEFAULT_GMAIL_API_BASE_URL);
        assert!(config.interactive_auth);
        assert!(config.access_token.is_none());
    }

    #[test]
    fn environment_overrides_file() {
        let file: SyncConfigFile = toml::from_str(
            r#"
label = "todo"
tag = "mail"
mail_account = 1
token_path = "/var/cache/token.json"
interactive_auth = false
"#,
        )
        .expect("toml");

        let config = SyncConfig::from_sources(
            file,
            env_from(&[
                ("TASK_GMAIL_SYNC_LABEL", "  action  "),
                ("TASK_GMAIL_SYNC_TAG", ""),
                ("GMAIL_API_BASE_URL", "http://127.0.0.1:9000/"),
                ("GOOGLE_ACCESS_TOKEN", "ya29.token"),
            ]),
        )
        .expect("config");

        assert_eq!(config.label, "action");
        assert_eq!(config.tag, "mail");
        assert_eq!(config.mail_account, 1);
        assert_eq!(config.token_path, PathBuf::from("/var/cache/token.json"));
        assert_eq!(config.gmail_api_base_url, "http://127.0.0.1:9000");
        assert!(!config.interactive_auth);
        assert_eq!(config.access_token.as_deref(), Some("ya29.token"));
        assert_eq!(
            config.reference_builder().link_base(),
            "https://mail.google.com/mail/u/1/#inbox/"
        );
    }

    #[test]
    fn rejects_invalid_values() {
        let file = || SyncConfigFile {
            token_path: Some("/tmp/token.json".to_string()),
            ..Default::default()
        };

        let err = SyncConfig::from_sources(file(), env_from(&[("TASK_GMAIL_SYNC_TAG", "+gmail")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "tag", .. }));

        let err = SyncConfig::from_sources(
            file(),
            env_from(&[("TASK_GMAIL_SYNC_MAIL_ACCOUNT", "first")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "mail_account", .. }));

        let err = SyncConfig::from_sources(
            file(),
            env_from(&[("TASK_GMAIL_SYNC_INTERACTIVE_AUTH", "maybe")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "interactive_auth", .. }));
    }

    #[test]
    fn unknown_file_keys_are_a_parse_error() {
        let temp = tempfile::TempDir::new().expect("tempdir");
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "lable = \"typo\"\n").expect("write");

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn auth_config_requests_gmail_modify() {
        let config = SyncConfig::from_sources(
            SyncConfigFile {
                token_path: Some("/tmp/token.json".to_string()),
                ..Default::default()
            },
            env_from(&[]),
        )
        .expect("config");

        let auth = config.auth_config();
        assert_eq!(auth.scopes, vec!["https://www.googleapis.com/auth/gmail.modify"]);
        assert_eq!(auth.token_path, PathBuf::from("/tmp/token.json"));
    }
}
