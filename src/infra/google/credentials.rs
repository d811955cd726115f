// =============================================================================
// GOOGLE CREDENTIALS
// =============================================================================
//
// Resolves exactly one credential source at startup and hands out short-lived
// access tokens to the API client.
//
// **Sources:**
// - `CREDENTIALS_CONFIG`: base64-encoded service account JSON
// - `SERVICE_ACCOUNT_PATH` (or `service-account-key.json`): service account key file
// - `TOKEN_PATH` (or `token.json`): authorized-user token with a refresh token,
//   client secrets optionally taken from `CREDENTIALS_PATH`
// - Application Default Credentials when none of the above is configured:
//   `GOOGLE_APPLICATION_CREDENTIALS`, then the gcloud well-known file, then the
//   GCE metadata server when `GCE_METADATA_HOST` is set
//
// Configuring more than one explicit source is an error rather than a silent
// precedence rule.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::core::config::CredentialSettings;

pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive",
];

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens this close to expiry are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

// =============================================================================
// ERRORS AND TOKENS
// =============================================================================

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("More than one credential source is configured ({0}); configure exactly one")]
    ConflictingCredentials(String),

    #[error(
        "No Google credentials found. Set CREDENTIALS_CONFIG, SERVICE_ACCOUNT_PATH, TOKEN_PATH \
         or GOOGLE_APPLICATION_CREDENTIALS"
    )]
    NoCredentials,

    #[error("Could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid credentials in {origin}: {reason}")]
    Invalid { origin: String, reason: String },

    #[error("Token request failed: {message}")]
    Refresh { message: String, transient: bool },
}

impl CredentialError {
    /// Whether a later attempt could succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(self, CredentialError::Refresh { transient: true, .. })
    }

    fn invalid(origin: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        CredentialError::Invalid {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct AccessToken {
    pub secret: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_SKEW_SECS) > now
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Response from Google's token endpoints.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_token(self) -> AccessToken {
        AccessToken {
            secret: self.access_token,
            expires_at: Utc::now() + Duration::seconds(self.expires_in.unwrap_or(3600)),
        }
    }
}

async fn read_token_response(
    response: Result<reqwest::Response, reqwest::Error>,
    endpoint: &str,
) -> Result<AccessToken, CredentialError> {
    let response = response.map_err(|e| CredentialError::Refresh {
        message: format!("{} unreachable: {}", endpoint, e),
        transient: true,
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CredentialError::Refresh {
            message: format!("{} returned {}: {}", endpoint, status, body.trim()),
            transient: status.is_server_error() || status.as_u16() == 429,
        });
    }

    let parsed: TokenResponse = response.json().await.map_err(|e| CredentialError::Refresh {
        message: format!("malformed response from {}: {}", endpoint, e),
        transient: true,
    })?;
    Ok(parsed.into_token())
}

// =============================================================================
// TOKEN SOURCES
// =============================================================================

/// Something that can mint a fresh access token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<AccessToken, CredentialError>;

    /// Short label for logs. Never includes secrets.
    fn describe(&self) -> &'static str;

    /// A token that is already known at construction, if any.
    fn initial_token(&self) -> Option<AccessToken> {
        None
    }
}

/// Service account credentials from the JSON key file.
#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

/// JWT claims for the OAuth2 JWT bearer grant.
#[derive(Debug, Serialize)]
struct JwtClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

/// Signs a JWT with the service account key and exchanges it for a token.
pub struct ServiceAccountSource {
    client_email: String,
    token_uri: String,
    signing_key: EncodingKey,
    http: Client,
}

impl ServiceAccountSource {
    /// Parses and validates the key up front so a broken key fails at startup.
    pub fn from_json(json: &str, origin: &str, http: Client) -> Result<Self, CredentialError> {
        let key: ServiceAccountKey =
            serde_json::from_str(json).map_err(|e| CredentialError::invalid(origin, e))?;
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| CredentialError::invalid(origin, format!("private_key: {}", e)))?;

        Ok(Self {
            client_email: key.client_email,
            token_uri: key
                .token_uri
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            signing_key,
            http,
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountSource {
    async fn fetch(&self) -> Result<AccessToken, CredentialError> {
        let now = Utc::now().timestamp();
        let claims = JwtClaims {
            iss: self.client_email.clone(),
            scope: SCOPES.join(" "),
            aud: self.token_uri.clone(),
            iat: now,
            exp: now + 3600,
        };

        let jwt = encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key).map_err(
            |e| CredentialError::Refresh {
                message: format!("could not sign assertion: {}", e),
                transient: false,
            },
        )?;

        let response = self
            .http
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", jwt.as_str()),
            ])
            .send()
            .await;
        read_token_response(response, &self.token_uri).await
    }

    fn describe(&self) -> &'static str {
        "service_account"
    }
}

/// An authorized-user file. Covers both the `token.json` written by Google's
/// Python client and the `authorized_user` ADC format.
#[derive(Debug, Default, Deserialize)]
struct AuthorizedUserFile {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    expiry: Option<String>,
}

/// OAuth client secrets, as downloaded from the Cloud console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

/// Exchanges a stored refresh token for access tokens.
pub struct AuthorizedUserSource {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    token_uri: String,
    seed: Option<AccessToken>,
    http: Client,
}

impl AuthorizedUserSource {
    pub fn from_json(
        json: &str,
        origin: &str,
        client_secrets: Option<ClientSecrets>,
        http: Client,
    ) -> Result<Self, CredentialError> {
        let file: AuthorizedUserFile =
            serde_json::from_str(json).map_err(|e| CredentialError::invalid(origin, e))?;

        let refresh_token = file.refresh_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            CredentialError::invalid(
                origin,
                "no refresh_token; complete the OAuth consent flow elsewhere and provide the resulting token file",
            )
        })?;

        let (client_id, client_secret, secrets_uri) = match (file.client_id, file.client_secret) {
            (Some(id), Some(secret)) => (id, secret, None),
            _ => {
                let secrets = client_secrets.ok_or_else(|| {
                    CredentialError::invalid(
                        origin,
                        "client_id/client_secret missing and no client secrets file available",
                    )
                })?;
                (secrets.client_id, secrets.client_secret, secrets.token_uri)
            }
        };

        let seed = match (file.token, file.expiry.as_deref().and_then(parse_expiry)) {
            (Some(secret), Some(expires_at)) => Some(AccessToken { secret, expires_at }),
            _ => None,
        };

        Ok(Self {
            client_id,
            client_secret,
            refresh_token,
            token_uri: file
                .token_uri
                .or(secrets_uri)
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            seed,
            http,
        })
    }
}

#[async_trait]
impl TokenSource for AuthorizedUserSource {
    async fn fetch(&self) -> Result<AccessToken, CredentialError> {
        let response = self
            .http
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.refresh_token.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await;
        read_token_response(response, &self.token_uri).await
    }

    fn describe(&self) -> &'static str {
        "authorized_user"
    }

    fn initial_token(&self) -> Option<AccessToken> {
        self.seed.clone()
    }
}

/// Accepts RFC 3339 as well as the naive UTC timestamps older clients write.
fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Asks the GCE metadata server for the attached service account's token.
pub struct MetadataServerSource {
    endpoint: String,
    http: Client,
}

impl MetadataServerSource {
    pub fn new(host: &str, http: Client) -> Self {
        Self {
            endpoint: format!(
                "http://{}/computeMetadata/v1/instance/service-accounts/default/token",
                host.trim_end_matches('/')
            ),
            http,
        }
    }
}

#[async_trait]
impl TokenSource for MetadataServerSource {
    async fn fetch(&self) -> Result<AccessToken, CredentialError> {
        let scopes = SCOPES.join(",");
        let response = self
            .http
            .get(&self.endpoint)
            .header("Metadata-Flavor", "Google")
            .query(&[("scopes", scopes.as_str())])
            .send()
            .await;
        read_token_response(response, &self.endpoint).await
    }

    fn describe(&self) -> &'static str {
        "metadata_server"
    }
}

// =============================================================================
// CREDENTIAL CONTEXT
// =============================================================================

/// Owns the token source and its cache. Refreshes are single-flight: callers
/// that find the cache stale queue on `refresh_lock`, and all but the first
/// find a fresh token when they get the lock.
pub struct CredentialContext {
    source: Box<dyn TokenSource>,
    cached: RwLock<Option<AccessToken>>,
    refresh_lock: Mutex<()>,
}

impl CredentialContext {
    pub fn new(source: Box<dyn TokenSource>) -> Self {
        let seed = source.initial_token();
        Self {
            source,
            cached: RwLock::new(seed),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn describe(&self) -> &'static str {
        self.source.describe()
    }

    async fn fresh_cached(&self) -> Option<String> {
        let cached = self.cached.read().await;
        cached
            .as_ref()
            .filter(|token| token.is_fresh(Utc::now()))
            .map(|token| token.secret.clone())
    }

    /// Returns a valid bearer token, refreshing it if needed.
    pub async fn access_token(&self) -> Result<String, CredentialError> {
        if let Some(secret) = self.fresh_cached().await {
            return Ok(secret);
        }

        let _guard = self.refresh_lock.lock().await;
        if let Some(secret) = self.fresh_cached().await {
            return Ok(secret);
        }

        let token = self.source.fetch().await?;
        tracing::debug!(
            source = self.source.describe(),
            expires_at = %token.expires_at,
            "Refreshed Google access token"
        );
        let secret = token.secret.clone();
        *self.cached.write().await = Some(token);
        Ok(secret)
    }

    /// Drops the cached token, e.g. after the API rejected it.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }
}

// =============================================================================
// RESOLUTION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    InlineServiceAccount,
    ServiceAccountFile,
    OAuthToken,
    ApplicationDefault,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::InlineServiceAccount => "CREDENTIALS_CONFIG",
            AuthMode::ServiceAccountFile => "SERVICE_ACCOUNT_PATH",
            AuthMode::OAuthToken => "TOKEN_PATH",
            AuthMode::ApplicationDefault => "application default credentials",
        }
    }
}

/// Explicit modes that are configured, in priority order. A mode counts when
/// its variable is set or its default file exists. OAuth client secrets alone
/// are not a mode; they only supplement a token file.
pub fn configured_modes(settings: &CredentialSettings) -> Vec<AuthMode> {
    let mut modes = Vec::new();
    if settings.credentials_config.is_some() {
        modes.push(AuthMode::InlineServiceAccount);
    }
    if settings.service_account_path.is_some()
        || settings.service_account_path_or_default().exists()
    {
        modes.push(AuthMode::ServiceAccountFile);
    }
    if settings.token_path.is_some() || settings.token_path_or_default().exists() {
        modes.push(AuthMode::OAuthToken);
    }
    modes
}

/// Picks and loads the single credential source. Runs before the server binds
/// so misconfiguration fails fast.
pub async fn resolve(
    settings: &CredentialSettings,
    http: Client,
) -> Result<CredentialContext, CredentialError> {
    let modes = configured_modes(settings);
    let (mode, source) = match modes.as_slice() {
        [] => (
            AuthMode::ApplicationDefault,
            application_default(settings, http).await?,
        ),
        [mode] => (*mode, load_explicit(*mode, settings, http).await?),
        many => {
            let names: Vec<&str> = many.iter().map(AuthMode::as_str).collect();
            return Err(CredentialError::ConflictingCredentials(names.join(", ")));
        }
    };

    tracing::info!(
        mode = mode.as_str(),
        source = source.describe(),
        "Using Google credentials"
    );
    Ok(CredentialContext::new(source))
}

async fn load_explicit(
    mode: AuthMode,
    settings: &CredentialSettings,
    http: Client,
) -> Result<Box<dyn TokenSource>, CredentialError> {
    match mode {
        AuthMode::InlineServiceAccount => {
            let encoded = settings.credentials_config.as_deref().unwrap_or_default();
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| CredentialError::invalid("CREDENTIALS_CONFIG", e))?;
            let json = String::from_utf8(decoded)
                .map_err(|e| CredentialError::invalid("CREDENTIALS_CONFIG", e))?;
            Ok(Box::new(ServiceAccountSource::from_json(
                &json,
                "CREDENTIALS_CONFIG",
                http,
            )?))
        }
        AuthMode::ServiceAccountFile => {
            let path = settings.service_account_path_or_default();
            let json = read_file(&path).await?;
            Ok(Box::new(ServiceAccountSource::from_json(
                &json,
                &path.display().to_string(),
                http,
            )?))
        }
        AuthMode::OAuthToken => {
            let token_path = settings.token_path_or_default();
            if !token_path.exists() {
                return Err(CredentialError::invalid(
                    token_path.display().to_string(),
                    "token file not found; the interactive OAuth consent flow is not supported, \
                     run it elsewhere and provide the resulting token file",
                ));
            }
            let secrets = load_client_secrets(&settings.credentials_path_or_default()).await?;
            let json = read_file(&token_path).await?;
            Ok(Box::new(AuthorizedUserSource::from_json(
                &json,
                &token_path.display().to_string(),
                secrets,
                http,
            )?))
        }
        AuthMode::ApplicationDefault => application_default(settings, http).await,
    }
}

async fn application_default(
    settings: &CredentialSettings,
    http: Client,
) -> Result<Box<dyn TokenSource>, CredentialError> {
    if let Some(path) = &settings.application_credentials {
        return load_adc_file(path, http).await;
    }
    if let Some(path) = settings.gcloud_adc_path().filter(|p| p.exists()) {
        return load_adc_file(&path, http).await;
    }
    if let Some(host) = &settings.metadata_host {
        return Ok(Box::new(MetadataServerSource::new(host, http)));
    }
    Err(CredentialError::NoCredentials)
}

#[derive(Deserialize)]
struct CredentialFileType {
    #[serde(rename = "type")]
    kind: Option<String>,
}

async fn load_adc_file(path: &Path, http: Client) -> Result<Box<dyn TokenSource>, CredentialError> {
    let origin = path.display().to_string();
    let json = read_file(path).await?;
    let file_type: CredentialFileType =
        serde_json::from_str(&json).map_err(|e| CredentialError::invalid(origin.as_str(), e))?;

    match file_type.kind.as_deref() {
        Some("service_account") => Ok(Box::new(ServiceAccountSource::from_json(
            &json, &origin, http,
        )?)),
        Some("authorized_user") => Ok(Box::new(AuthorizedUserSource::from_json(
            &json, &origin, None, http,
        )?)),
        other => Err(CredentialError::invalid(
            origin,
            format!("unsupported credential type {:?}", other.unwrap_or("<missing>")),
        )),
    }
}

async fn load_client_secrets(path: &Path) -> Result<Option<ClientSecrets>, CredentialError> {
    if !path.exists() {
        return Ok(None);
    }
    let json = read_file(path).await?;
    let file: ClientSecretsFile = serde_json::from_str(&json)
        .map_err(|e| CredentialError::invalid(path.display().to_string(), e))?;
    Ok(file.installed.or(file.web))
}

async fn read_file(path: &Path) -> Result<String, CredentialError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CredentialError::Io {
            path: path.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Settings whose default paths all point into the temp dir.
    fn isolated(dir: &TempDir) -> CredentialSettings {
        CredentialSettings {
            home_dir: Some(dir.path().to_path_buf()),
            base_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        }
    }

    fn write(dir: &TempDir, name: &str, contents: &serde_json::Value) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents.to_string()).unwrap();
        path
    }

    fn user_token(expiry: DateTime<Utc>) -> serde_json::Value {
        json!({
            "token": "cached-access-token",
            "refresh_token": "refresh-me",
            "client_id": "id.apps.googleusercontent.com",
            "client_secret": "shh",
            "token_uri": "https://oauth2.googleapis.com/token",
            "expiry": expiry.to_rfc3339(),
        })
    }

    #[tokio::test]
    async fn nothing_configured_is_no_credentials() {
        let dir = TempDir::new().unwrap();
        let err = resolve(&isolated(&dir), Client::new()).await.err().unwrap();
        assert!(matches!(err, CredentialError::NoCredentials));
    }

    #[tokio::test]
    async fn two_explicit_modes_conflict() {
        let dir = TempDir::new().unwrap();
        let settings = CredentialSettings {
            credentials_config: Some("e30=".into()),
            token_path: Some(dir.path().join("token.json")),
            ..isolated(&dir)
        };

        let err = resolve(&settings, Client::new()).await.err().unwrap();

        match err {
            CredentialError::ConflictingCredentials(names) => {
                assert!(names.contains("CREDENTIALS_CONFIG"));
                assert!(names.contains("TOKEN_PATH"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_token_file_loads_and_serves_cached_token() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "token.json", &user_token(Utc::now() + Duration::hours(1)));
        let settings = CredentialSettings {
            token_path: Some(path),
            ..isolated(&dir)
        };

        let context = resolve(&settings, Client::new()).await.unwrap();

        assert_eq!(context.describe(), "authorized_user");
        assert_eq!(context.access_token().await.unwrap(), "cached-access-token");
    }

    #[tokio::test]
    async fn token_file_can_borrow_client_secrets() {
        let dir = TempDir::new().unwrap();
        let token = write(
            &dir,
            "token.json",
            &json!({ "refresh_token": "refresh-me" }),
        );
        let secrets = write(
            &dir,
            "credentials.json",
            &json!({ "installed": { "client_id": "id", "client_secret": "secret" } }),
        );
        let settings = CredentialSettings {
            token_path: Some(token),
            credentials_path: Some(secrets),
            ..isolated(&dir)
        };

        let context = resolve(&settings, Client::new()).await.unwrap();
        assert_eq!(context.describe(), "authorized_user");
    }

    #[tokio::test]
    async fn missing_token_file_does_not_start_interactive_flow() {
        let dir = TempDir::new().unwrap();
        let secrets = write(
            &dir,
            "credentials.json",
            &json!({ "installed": { "client_id": "id", "client_secret": "secret" } }),
        );
        let settings = CredentialSettings {
            token_path: Some(dir.path().join("token.json")),
            credentials_path: Some(secrets),
            ..isolated(&dir)
        };

        let err = resolve(&settings, Client::new()).await.err().unwrap();
        assert!(err.to_string().contains("interactive"));
    }

    #[test]
    fn client_secrets_alone_are_not_an_oauth_mode() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "credentials.json",
            &json!({ "installed": { "client_id": "id", "client_secret": "secret" } }),
        );
        let settings = CredentialSettings {
            credentials_config: Some("e30=".into()),
            ..isolated(&dir)
        };

        assert_eq!(
            configured_modes(&settings),
            vec![AuthMode::InlineServiceAccount]
        );

        let explicit = CredentialSettings {
            credentials_path: Some(dir.path().join("credentials.json")),
            ..settings
        };
        assert_eq!(
            configured_modes(&explicit),
            vec![AuthMode::InlineServiceAccount]
        );
    }

    #[test]
    fn default_token_file_in_base_dir_counts() {
        let dir = TempDir::new().unwrap();
        assert!(configured_modes(&isolated(&dir)).is_empty());

        write(&dir, "token.json", &user_token(Utc::now() + Duration::hours(1)));
        assert_eq!(configured_modes(&isolated(&dir)), vec![AuthMode::OAuthToken]);
    }

    #[tokio::test]
    async fn configured_mode_that_fails_to_load_is_an_error() {
        let dir = TempDir::new().unwrap();
        let key = write(
            &dir,
            "sa.json",
            &json!({
                "type": "service_account",
                "client_email": "bot@project.iam.gserviceaccount.com",
                "private_key": "not a pem",
            }),
        );
        let settings = CredentialSettings {
            service_account_path: Some(key),
            ..isolated(&dir)
        };

        let err = resolve(&settings, Client::new()).await.err().unwrap();
        assert!(matches!(err, CredentialError::Invalid { .. }));
    }

    #[tokio::test]
    async fn inline_config_must_be_base64() {
        let dir = TempDir::new().unwrap();
        let settings = CredentialSettings {
            credentials_config: Some("%%% not base64 %%%".into()),
            ..isolated(&dir)
        };

        let err = resolve(&settings, Client::new()).await.err().unwrap();
        assert!(matches!(err, CredentialError::Invalid { ref origin, .. } if origin == "CREDENTIALS_CONFIG"));
    }

    #[tokio::test]
    async fn adc_prefers_application_credentials_file() {
        let dir = TempDir::new().unwrap();
        let mut adc = user_token(Utc::now() + Duration::hours(1));
        adc["type"] = json!("authorized_user");
        let path = write(&dir, "adc.json", &adc);
        let settings = CredentialSettings {
            application_credentials: Some(path),
            metadata_host: Some("169.254.169.254".into()),
            ..isolated(&dir)
        };

        let context = resolve(&settings, Client::new()).await.unwrap();
        assert_eq!(context.describe(), "authorized_user");
    }

    #[tokio::test]
    async fn adc_falls_back_to_metadata_server() {
        let dir = TempDir::new().unwrap();
        let settings = CredentialSettings {
            metadata_host: Some("metadata.google.internal".into()),
            ..isolated(&dir)
        };

        let context = resolve(&settings, Client::new()).await.unwrap();
        assert_eq!(context.describe(), "metadata_server");
    }

    #[tokio::test]
    async fn adc_rejects_unknown_credential_type() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "adc.json", &json!({ "type": "external_account" }));
        let settings = CredentialSettings {
            application_credentials: Some(path),
            ..isolated(&dir)
        };

        let err = resolve(&settings, Client::new()).await.err().unwrap();
        assert!(err.to_string().contains("external_account"));
    }

    #[test]
    fn parses_python_style_expiry() {
        assert!(parse_expiry("2030-01-01T00:00:00.123456Z").is_some());
        assert!(parse_expiry("2030-01-01T00:00:00.123456").is_some());
        assert!(parse_expiry("tomorrow").is_none());
    }

    struct CountingSource {
        fetches: Arc<AtomicU32>,
        lifetime: Duration,
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn fetch(&self) -> Result<AccessToken, CredentialError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(AccessToken {
                secret: format!("token-{n}"),
                expires_at: Utc::now() + self.lifetime,
            })
        }

        fn describe(&self) -> &'static str {
            "counting"
        }
    }

    fn counting(lifetime: Duration) -> (Arc<CredentialContext>, Arc<AtomicU32>) {
        let fetches = Arc::new(AtomicU32::new(0));
        let source = CountingSource {
            fetches: fetches.clone(),
            lifetime,
        };
        (Arc::new(CredentialContext::new(Box::new(source))), fetches)
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let (context, fetches) = counting(Duration::hours(1));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let context = context.clone();
                tokio::spawn(async move { context.access_token().await.unwrap() })
            })
            .collect();
        let tokens: Vec<String> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| t == "token-1"));
    }

    #[tokio::test]
    async fn invalidate_forces_a_new_token() {
        let (context, fetches) = counting(Duration::hours(1));

        assert_eq!(context.access_token().await.unwrap(), "token-1");
        context.invalidate().await;
        assert_eq!(context.access_token().await.unwrap(), "token-2");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn tokens_inside_the_expiry_skew_are_refreshed() {
        let (context, fetches) = counting(Duration::seconds(30));

        context.access_token().await.unwrap();
        context.access_token().await.unwrap();

        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn debug_output_redacts_the_secret() {
        let token = AccessToken {
            secret: "ya29.secret".into(),
            expires_at: Utc::now(),
        };
        assert!(!format!("{token:?}").contains("ya29"));
    }
}
