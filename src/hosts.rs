use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::api::{decode, send_with_retry, ApiError};
use crate::auth::{host_login, persist_host_token, HostCredentials, HOSTS_TOKEN_KEY};
use crate::collector::{id_of, KnownIdSet};
use crate::sink::RecordSink;
use crate::state::HostsConfig;

#[derive(Debug, Deserialize)]
struct HostsResponse {
    hosts: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HostReport {
    pub fetched: usize,
    pub emitted: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

/// Flat, single-request crawl of the host registry.
pub struct HostRegistry {
    client: reqwest::Client,
    config: HostsConfig,
    cached_token: Option<String>,
    credentials: Option<HostCredentials>,
}

impl HostRegistry {
    pub fn new(
        client: reqwest::Client,
        config: HostsConfig,
        cached_token: Option<String>,
        credentials: Option<HostCredentials>,
    ) -> Self {
        Self {
            client,
            config,
            cached_token,
            credentials,
        }
    }

    /// Without a cached token the login credentials are mandatory, and their
    /// absence is reported here, before any request is made.
    pub fn from_env(client: reqwest::Client, config: HostsConfig) -> Result<Self> {
        let cached_token = dotenv::var(HOSTS_TOKEN_KEY)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let credentials = match cached_token {
            Some(_) => HostCredentials::from_env().ok(),
            None => Some(HostCredentials::from_env()?),
        };
        Ok(Self::new(client, config, cached_token, credentials))
    }

    async fn login(&self) -> Result<String> {
        let Some(credentials) = &self.credentials else {
            bail!("HOSTS_EMAIL or HOSTS_PASSWORD not set. Update the values in the .env file");
        };
        let token = host_login(
            &self.client,
            &self.config.http,
            &self.config.api_base,
            credentials,
        )
        .await
        .context("Host registry login failed")?;
        info!("Logged in to host registry");
        if let Err(e) = persist_host_token(&self.config.env_file, &token) {
            warn!(error = %e, "Could not persist host token, next run will log in again");
        }
        Ok(token)
    }

    async fn fetch_hosts(&self, token: &str) -> Result<Vec<serde_json::Value>, ApiError> {
        let url = format!(
            "{}/hostsearch/{}/{}/1",
            self.config.api_base.trim_end_matches('/'),
            self.config.limit,
            token
        );
        let resp = send_with_retry(&self.config.http, || self.client.get(&url)).await?;
        let body: HostsResponse = decode(resp).await?;
        Ok(body.hosts)
    }

    /// Fetch every host and emit those not in `known`. A rejected cached token
    /// is replaced by a fresh login once.
    pub async fn crawl<S>(&self, known: &mut KnownIdSet, sink: &mut S) -> Result<HostReport>
    where
        S: RecordSink<serde_json::Value>,
    {
        let hosts = match &self.cached_token {
            Some(cached) => match self.fetch_hosts(cached).await {
                Err(ApiError::Unauthorized) => {
                    warn!("Cached host token rejected, logging in again");
                    let token = self.login().await?;
                    self.fetch_hosts(&token).await?
                }
                other => other?,
            },
            None => {
                let token = self.login().await?;
                self.fetch_hosts(&token).await?
            }
        };

        let mut report = HostReport {
            fetched: hosts.len(),
            ..HostReport::default()
        };
        for host in &hosts {
            let Some(id) = id_of(host, "id") else {
                report.skipped += 1;
                continue;
            };
            if known.insert(&id) {
                sink.emit(host)?;
                report.emitted += 1;
            } else {
                report.duplicates += 1;
            }
        }

        info!(
            fetched = report.fetched,
            emitted = report.emitted,
            duplicates = report.duplicates,
            skipped = report.skipped,
            "Host crawl complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::fast_policy;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer, env_file: std::path::PathBuf) -> HostsConfig {
        HostsConfig {
            api_base: server.uri(),
            limit: 1000,
            env_file,
            http: fast_policy(),
            ..HostsConfig::default()
        }
    }

    fn credentials() -> Option<HostCredentials> {
        Some(HostCredentials {
            email: "ops@example.com".to_string(),
            password: "secret".to_string(),
        })
    }

    #[tokio::test]
    async fn test_cached_token_skips_login_and_filters_known() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hostsearch/1000/cached/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hosts": [{"id": 1, "name": "a"}, {"id": 2, "name": "b"}, {"name": "no id"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "x"})))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let registry = HostRegistry::new(
            reqwest::Client::new(),
            config_for(&server, dir.path().join(".env")),
            Some("cached".to_string()),
            None,
        );
        let mut known = KnownIdSet::new();
        known.insert("1");
        let mut emitted: Vec<serde_json::Value> = Vec::new();
        let report = registry.crawl(&mut known, &mut emitted).await.unwrap();

        assert_eq!(report.fetched, 3);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(emitted, vec![json!({"id": 2, "name": "b"})]);
    }

    #[tokio::test]
    async fn test_login_persists_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "fresh"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hostsearch/1000/fresh/1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"hosts": [{"id": "h-1"}]})),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join(".env");
        let registry = HostRegistry::new(
            reqwest::Client::new(),
            config_for(&server, env_file.clone()),
            None,
            credentials(),
        );
        let mut known = KnownIdSet::new();
        let mut emitted: Vec<serde_json::Value> = Vec::new();
        let report = registry.crawl(&mut known, &mut emitted).await.unwrap();

        assert_eq!(report.emitted, 1);
        assert_eq!(
            std::fs::read_to_string(&env_file).unwrap(),
            "HOSTS_TOKEN=fresh\n"
        );
    }

    #[tokio::test]
    async fn test_rejected_cached_token_triggers_login() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hostsearch/1000/stale/1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "renewed"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hostsearch/1000/renewed/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hosts": []})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let registry = HostRegistry::new(
            reqwest::Client::new(),
            config_for(&server, dir.path().join(".env")),
            Some("stale".to_string()),
            credentials(),
        );
        let mut known = KnownIdSet::new();
        let mut emitted: Vec<serde_json::Value> = Vec::new();
        let report = registry.crawl(&mut known, &mut emitted).await.unwrap();
        assert_eq!(report.fetched, 0);
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_request() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let registry = HostRegistry::new(
            reqwest::Client::new(),
            config_for(&server, dir.path().join(".env")),
            None,
            None,
        );
        let mut known = KnownIdSet::new();
        let mut emitted: Vec<serde_json::Value> = Vec::new();
        assert!(registry.crawl(&mut known, &mut emitted).await.is_err());
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
