// Server configuration.
//
// Everything is read from environment variables (optionally via a `.env` file
// loaded in main). Parsing goes through a lookup function so tests never touch
// the process environment.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::core::retry::RetryPolicy;

pub const DEFAULT_SERVICE_ACCOUNT_PATH: &str = "service-account-key.json";
pub const DEFAULT_TOKEN_PATH: &str = "token.json";
pub const DEFAULT_CREDENTIALS_PATH: &str = "credentials.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Where credentials may come from. Paths marked "explicit" were set by the
/// operator; the others are defaults that only count when the file exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialSettings {
    /// Base64-encoded service account JSON (`CREDENTIALS_CONFIG`).
    pub credentials_config: Option<String>,
    /// `SERVICE_ACCOUNT_PATH`, if set.
    pub service_account_path: Option<PathBuf>,
    /// `TOKEN_PATH`, if set.
    pub token_path: Option<PathBuf>,
    /// `CREDENTIALS_PATH` (OAuth client secrets), if set.
    pub credentials_path: Option<PathBuf>,
    /// `GOOGLE_APPLICATION_CREDENTIALS`.
    pub application_credentials: Option<PathBuf>,
    /// `GCE_METADATA_HOST`; enables the metadata server as a last resort.
    pub metadata_host: Option<String>,
    /// Used to locate the gcloud well-known ADC file.
    pub home_dir: Option<PathBuf>,
    /// Directory the default file names resolve against. Unset means the
    /// working directory.
    pub base_dir: Option<PathBuf>,
}

impl CredentialSettings {
    fn default_file(&self, name: &str) -> PathBuf {
        match &self.base_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    pub fn service_account_path_or_default(&self) -> PathBuf {
        self.service_account_path
            .clone()
            .unwrap_or_else(|| self.default_file(DEFAULT_SERVICE_ACCOUNT_PATH))
    }

    pub fn token_path_or_default(&self) -> PathBuf {
        self.token_path
            .clone()
            .unwrap_or_else(|| self.default_file(DEFAULT_TOKEN_PATH))
    }

    pub fn credentials_path_or_default(&self) -> PathBuf {
        self.credentials_path
            .clone()
            .unwrap_or_else(|| self.default_file(DEFAULT_CREDENTIALS_PATH))
    }

    /// `~/.config/gcloud/application_default_credentials.json`
    pub fn gcloud_adc_path(&self) -> Option<PathBuf> {
        self.home_dir.as_ref().map(|home| {
            home.join(".config")
                .join("gcloud")
                .join("application_default_credentials.json")
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    /// Working folder in Google Drive. New spreadsheets land here and
    /// listing is restricted to it.
    pub drive_folder_id: Option<String>,
    /// When set, MCP routes require a matching `X-API-Key` header.
    pub api_key: Option<String>,
    /// Per-call deadline for upstream HTTP requests.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub credentials: CredentialSettings,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values behave like unset ones.
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let path = |key: &str| get(key).map(PathBuf::from);

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse_or(
                get("RETRY_MAX_ATTEMPTS"),
                "RETRY_MAX_ATTEMPTS",
                defaults.max_attempts,
            )?,
            base_delay: Duration::from_millis(parse_or(
                get("RETRY_BASE_DELAY_MS"),
                "RETRY_BASE_DELAY_MS",
                defaults.base_delay.as_millis() as u64,
            )?),
            max_delay: Duration::from_millis(parse_or(
                get("RETRY_MAX_DELAY_MS"),
                "RETRY_MAX_DELAY_MS",
                defaults.max_delay.as_millis() as u64,
            )?),
            jitter: true,
        };

        let timeout_secs: u64 = parse_or(get("REQUEST_TIMEOUT_SECS"), "REQUEST_TIMEOUT_SECS", 10)?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "REQUEST_TIMEOUT_SECS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(get("PORT"), "PORT", 8000)?,
            debug: get("DEBUG")
                .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(false),
            drive_folder_id: get("DRIVE_FOLDER_ID"),
            api_key: get("MCP_API_KEY"),
            request_timeout: Duration::from_secs(timeout_secs),
            retry,
            credentials: CredentialSettings {
                credentials_config: get("CREDENTIALS_CONFIG"),
                service_account_path: path("SERVICE_ACCOUNT_PATH"),
                token_path: path("TOKEN_PATH"),
                credentials_path: path("CREDENTIALS_PATH"),
                application_credentials: path("GOOGLE_APPLICATION_CREDENTIALS"),
                metadata_host: get("GCE_METADATA_HOST"),
                home_dir: path("HOME"),
                base_dir: None,
            },
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(raw: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
        },
    }
}
