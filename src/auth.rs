use std::path::Path;

use anyhow::{bail, Context, Result};
use md5::{Digest, Md5};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::api::types::GuestToken;
use crate::api::{browser_headers, decode, send_with_retry, ApiError};
use crate::state::HttpPolicy;

/// Device string the registry's mobile app reports at login.
const LOGIN_PLATFORM: &str = "Platform: android - OS Version: 13 - Device: M2101K6G";

pub const HOSTS_TOKEN_KEY: &str = "HOSTS_TOKEN";

/// Exchanges the directory's fixed guest request for a short-lived bearer token.
pub struct GuestAuth {
    client: reqwest::Client,
    url: String,
}

impl GuestAuth {
    pub fn new(client: reqwest::Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }

    /// Single attempt; any failure is reported as [`ApiError::Auth`].
    pub async fn obtain_token(&self) -> Result<String, ApiError> {
        let resp = self
            .client
            .get(&self.url)
            .headers(browser_headers())
            .send()
            .await
            .map_err(|e| ApiError::Auth(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ApiError::Auth(format!("status {}", resp.status())));
        }
        let body: GuestToken = decode(resp)
            .await
            .map_err(|e| ApiError::Auth(e.to_string()))?;
        let token = body.access_token.trim().to_string();
        if token.is_empty() {
            return Err(ApiError::Auth("empty access_token".to_string()));
        }
        Ok(token)
    }
}

/// The bearer token shared by every in-flight request.
pub struct TokenStore {
    auth: GuestAuth,
    token: RwLock<String>,
    refresh_lock: Mutex<()>,
}

impl TokenStore {
    /// Obtain the first token. Failure here aborts the crawl.
    pub async fn connect(auth: GuestAuth) -> Result<Self, ApiError> {
        let token = auth.obtain_token().await?;
        info!("Guest token obtained");
        Ok(Self {
            auth,
            token: RwLock::new(token),
            refresh_lock: Mutex::new(()),
        })
    }

    pub async fn current(&self) -> String {
        self.token.read().await.clone()
    }

    /// Replace `stale` with a fresh token. Callers that saw the same stale
    /// token while a refresh was running get the already-refreshed one.
    pub async fn refresh(&self, stale: &str) -> Result<String, ApiError> {
        let _guard = self.refresh_lock.lock().await;
        {
            let current = self.token.read().await;
            if current.as_str() != stale {
                debug!("token already refreshed by another request");
                return Ok(current.clone());
            }
        }
        let fresh = self.auth.obtain_token().await?;
        *self.token.write().await = fresh.clone();
        info!("Guest token refreshed");
        Ok(fresh)
    }
}

/// Email and password for the host registry login.
#[derive(Debug, Clone)]
pub struct HostCredentials {
    pub email: String,
    pub password: String,
}

impl HostCredentials {
    /// Both `HOSTS_EMAIL` and `HOSTS_PASSWORD` must be set.
    pub fn from_env() -> Result<Self> {
        let email = dotenv::var("HOSTS_EMAIL").ok().filter(|v| !v.trim().is_empty());
        let password = dotenv::var("HOSTS_PASSWORD")
            .ok()
            .filter(|v| !v.is_empty());
        match (email, password) {
            (Some(email), Some(password)) => Ok(Self { email, password }),
            _ => bail!("HOSTS_EMAIL or HOSTS_PASSWORD not set. Update the values in the .env file"),
        }
    }
}

/// The registry expects the hex MD5 of the password, never the password itself.
pub fn password_hash(password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

/// Log in to the host registry and return its long-lived token.
pub async fn host_login(
    client: &reqwest::Client,
    policy: &HttpPolicy,
    api_base: &str,
    credentials: &HostCredentials,
) -> Result<String, ApiError> {
    let url = format!("{}/login", api_base.trim_end_matches('/'));
    let payload = serde_json::json!({
        "email": credentials.email,
        "password": password_hash(&credentials.password),
        "platform": LOGIN_PLATFORM,
    });

    let resp = send_with_retry(policy, || client.post(&url).json(&payload))
        .await
        .map_err(|e| ApiError::Auth(e.to_string()))?;
    let body: LoginResponse = decode(resp)
        .await
        .map_err(|e| ApiError::Auth(e.to_string()))?;

    match body.token.map(|t| t.trim().to_string()) {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(ApiError::Auth("login response carried no token".to_string())),
    }
}

/// Write `token` into the env file so later runs skip the login. Other
/// entries are kept; a previous token line is replaced.
pub fn persist_host_token(env_file: &Path, token: &str) -> Result<()> {
    let existing = match std::fs::read_to_string(env_file) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", env_file.display()))
        }
    };

    let prefix = format!("{}=", HOSTS_TOKEN_KEY);
    let token_line = format!("{}{}", prefix, token);
    let mut lines: Vec<&str> = existing
        .lines()
        .filter(|line| !line.trim_start().starts_with(&prefix))
        .collect();
    lines.push(token_line.as_str());

    let mut content = lines.join("\n");
    content.push('\n');
    std::fs::write(env_file, content)
        .with_context(|| format!("Failed to write {}", env_file.display()))?;
    debug!(path = %env_file.display(), "host token persisted");
    Ok(())
}
