//! Google OAuth credentials
//!
//! Tokens are persisted as JSON by [`TokenStore`] and refreshed through [`OAuthClient`].
//! The interactive installed-app flow listens on a loopback port for the redirect and
//! runs under a timeout.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AuthError;

/// Read-only Drive scope, enough for revisions and exports
pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

/// Tokens expiring within this window are refreshed ahead of time
const EXPIRY_SKEW_SECS: i64 = 60;

const SUCCESS_PAGE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n\
<html><body><p>Authorization complete. You may close this tab.</p></body></html>";

const NOT_FOUND_PAGE: &str = "HTTP/1.1 404 Not Found\r\nConnection: close\r\n\r\n";

/// Supplies bearer tokens to the Drive client
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, AuthError>;
}

/// Fixed token, e.g. from `GOOGLE_ACCESS_TOKEN`
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn access_token(&self) -> Result<String, AuthError> {
        if self.0.is_empty() {
            return Err(AuthError::NotAuthenticated);
        }
        Ok(self.0.clone())
    }
}

/// Persisted OAuth token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Token {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= Utc::now() + ChronoDuration::seconds(EXPIRY_SKEW_SECS),
            None => false,
        }
    }
}

/// Token endpoint response body
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_token(self, previous_refresh: Option<String>) -> Token {
        Token {
            access_token: self.access_token,
            // Refresh responses usually omit the refresh token; keep the old one.
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: self
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
            scopes: self
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

/// JSON token file on disk
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored token, `None` when no token file exists
    pub fn load(&self) -> Result<Option<Token>, AuthError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)?;
        let token = serde_json::from_str(&content)
            .map_err(|e| AuthError::Storage(format!("{:?}: {}", self.path, e)))?;
        Ok(Some(token))
    }

    pub fn save(&self, token: &Token) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(token)
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        std::fs::write(&self.path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        debug!("Saved credentials to {:?}", self.path);
        Ok(())
    }
}

/// OAuth client registration downloaded from the Google Cloud console
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Parse a `client_secret_*.json` file (either `installed` or `web` application type)
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let content = std::fs::read_to_string(path).map_err(|e| AuthError::ClientSecrets {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&content).map_err(|message| AuthError::ClientSecrets {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let file: ClientSecretsFile = serde_json::from_str(content).map_err(|e| e.to_string())?;
        file.installed
            .or(file.web)
            .ok_or_else(|| "expected an 'installed' or 'web' client entry".to_string())
    }
}

/// Talks to Google's OAuth endpoints
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: Client,
    secrets: ClientSecrets,
    scopes: Vec<String>,
}

impl OAuthClient {
    pub fn new(secrets: ClientSecrets) -> Self {
        Self {
            http: Client::new(),
            secrets,
            scopes: vec![DRIVE_READONLY_SCOPE.to_string()],
        }
    }

    /// Exchange a refresh token for a fresh access token
    pub async fn refresh(&self, token: &Token) -> Result<Token, AuthError> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or(AuthError::NotAuthenticated)?;

        info!("Refreshing expired access token");
        let params = [
            ("client_id", self.secrets.client_id.as_str()),
            ("client_secret", self.secrets.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self.request_token(&params).await?;
        Ok(response.into_token(token.refresh_token.clone()))
    }

    /// Run the installed-app flow: print the consent URL and wait for the loopback redirect
    pub async fn authorize(&self) -> Result<Token, AuthError> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{}", port);
        let state = Uuid::new_v4().to_string();

        let scope = self.scopes.join(" ");
        let consent_url = Url::parse_with_params(
            &self.secrets.auth_uri,
            &[
                ("client_id", self.secrets.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| AuthError::Flow(format!("invalid auth_uri: {}", e)))?;

        println!("Please authorize docsentry to read your documents:");
        println!();
        println!("  {}", consent_url);
        println!();
        info!("Waiting for OAuth redirect on {}", redirect_uri);

        let params = wait_for_redirect(&listener).await?;

        if let Some(error) = params.get("error") {
            return Err(AuthError::Flow(format!("authorization denied: {}", error)));
        }
        if params.get("state") != Some(&state) {
            return Err(AuthError::Flow("state mismatch in OAuth redirect".to_string()));
        }
        let code = params
            .get("code")
            .ok_or_else(|| AuthError::Flow("redirect did not include a code".to_string()))?;

        let exchange = [
            ("code", code.as_str()),
            ("client_id", self.secrets.client_id.as_str()),
            ("client_secret", self.secrets.client_secret.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let response = self.request_token(&exchange).await?;
        Ok(response.into_token(None))
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let response = self
            .http
            .post(&self.secrets.token_uri)
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpoint(format!("{}: {}", status, body)));
        }

        Ok(response.json().await?)
    }
}

/// Accept loopback connections until one carries the OAuth callback parameters
async fn wait_for_redirect(listener: &TcpListener) -> Result<HashMap<String, String>, AuthError> {
    loop {
        let (mut stream, _) = listener.accept().await?;
        let mut buffer = vec![0u8; 8192];
        let read = stream.read(&mut buffer).await?;
        if read == 0 {
            continue;
        }

        let request = String::from_utf8_lossy(&buffer[..read]);
        let Some(params) = parse_callback(&request) else {
            stream.write_all(NOT_FOUND_PAGE.as_bytes()).await?;
            continue;
        };

        stream.write_all(SUCCESS_PAGE.as_bytes()).await?;
        stream.flush().await?;
        return Ok(params);
    }
}

/// Extract query parameters from the request line of a redirect carrying `code` or `error`
fn parse_callback(request: &str) -> Option<HashMap<String, String>> {
    let target = request.lines().next()?.split_whitespace().nth(1)?;
    let url = Url::parse(&format!("http://127.0.0.1{}", target)).ok()?;
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

    if params.contains_key("code") || params.contains_key("error") {
        Some(params)
    } else {
        None
    }
}

/// Run the interactive flow, failing with [`AuthError::Timeout`] if it does not finish in time
pub async fn authorize_with_timeout(
    client: &OAuthClient,
    timeout: Duration,
) -> Result<Token, AuthError> {
    match tokio::time::timeout(timeout, client.authorize()).await {
        Ok(result) => result,
        Err(_) => Err(AuthError::Timeout(timeout)),
    }
}

/// Token file credentials with transparent refresh
pub struct StoredCredentials {
    store: TokenStore,
    oauth: Option<OAuthClient>,
    cached: Mutex<Option<Token>>,
}

impl StoredCredentials {
    pub fn new(store: TokenStore, oauth: Option<OAuthClient>) -> Self {
        Self {
            store,
            oauth,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl CredentialProvider for StoredCredentials {
    async fn access_token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        if cached.is_none() {
            *cached = self.store.load()?;
        }

        let token = cached.as_ref().ok_or(AuthError::NotAuthenticated)?;
        if !token.is_expired() {
            return Ok(token.access_token.clone());
        }

        let oauth = self.oauth.as_ref().ok_or(AuthError::NotAuthenticated)?;
        let refreshed = oauth.refresh(token).await?;
        self.store.save(&refreshed)?;

        let access_token = refreshed.access_token.clone();
        *cached = Some(refreshed);
        Ok(access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn token(expires_in_secs: Option<i64>) -> Token {
        Token {
            access_token: "ya29.test".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            expires_at: expires_in_secs.map(|s| Utc::now() + ChronoDuration::seconds(s)),
            scopes: vec![DRIVE_READONLY_SCOPE.to_string()],
        }
    }

    #[test]
    fn test_token_expiry() {
        assert!(!token(None).is_expired());
        assert!(!token(Some(3600)).is_expired());
        assert!(token(Some(30)).is_expired());
        assert!(token(Some(-10)).is_expired());
    }

    #[test]
    fn test_token_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = TokenStore::new(temp_dir.path().join("nested").join("token.json"));

        assert!(store.load().unwrap().is_none());

        let original = token(Some(3600));
        store.save(&original).unwrap();
        assert_eq!(store.load().unwrap(), Some(original));
    }

    #[test]
    fn test_corrupt_token_file_is_a_storage_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("token.json");
        std::fs::write(&path, "{not json").unwrap();

        let result = TokenStore::new(&path).load();
        assert!(matches!(result, Err(AuthError::Storage(_))));
    }

    #[test]
    fn test_client_secrets_parsing() {
        let installed = r#"{"installed": {"client_id": "id", "client_secret": "secret"}}"#;
        let secrets = ClientSecrets::parse(installed).unwrap();
        assert_eq!(secrets.client_id, "id");
        assert_eq!(secrets.token_uri, "https://oauth2.googleapis.com/token");

        let web = r#"{"web": {"client_id": "w", "client_secret": "s", "token_uri": "http://t"}}"#;
        assert_eq!(ClientSecrets::parse(web).unwrap().token_uri, "http://t");

        assert!(ClientSecrets::parse(r#"{"other": {}}"#).is_err());
    }

    #[test]
    fn test_parse_callback() {
        let request = "GET /?state=abc&code=4%2F0Ad&scope=drive HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n";
        let params = parse_callback(request).unwrap();
        assert_eq!(params.get("code").unwrap(), "4/0Ad");
        assert_eq!(params.get("state").unwrap(), "abc");

        assert!(parse_callback("GET /favicon.ico HTTP/1.1\r\n\r\n").is_none());
        assert!(parse_callback("").is_none());
    }

    #[tokio::test]
    async fn test_stored_credentials_use_valid_token_without_refresh() {
        let temp_dir = TempDir::new().unwrap();
        let store = TokenStore::new(temp_dir.path().join("token.json"));
        store.save(&token(Some(3600))).unwrap();

        let provider = StoredCredentials::new(store, None);
        assert_eq!(provider.access_token().await.unwrap(), "ya29.test");
    }

    #[tokio::test]
    async fn test_stored_credentials_without_token_file() {
        let temp_dir = TempDir::new().unwrap();
        let provider = StoredCredentials::new(TokenStore::new(temp_dir.path().join("none.json")), None);

        assert!(matches!(
            provider.access_token().await,
            Err(AuthError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_authorization_times_out() {
        let secrets = ClientSecrets::parse(
            r#"{"installed": {"client_id": "id", "client_secret": "secret"}}"#,
        )
        .unwrap();
        let client = OAuthClient::new(secrets);

        let result = authorize_with_timeout(&client, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(AuthError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_static_token() {
        assert_eq!(StaticToken("abc".into()).access_token().await.unwrap(), "abc");
        assert!(StaticToken(String::new()).access_token().await.is_err());
    }
}
