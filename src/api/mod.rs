pub mod types;

use std::fmt;
use std::sync::Arc;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::auth::TokenStore;
use crate::grid::GeoCell;
use crate::state::HttpPolicy;

use types::{SearchEnvelope, SearchResultPage};

/// Venue categories sent with every bounding-box query. The public map sends
/// the full list; omitting it narrows results to the default subset.
const CATEGORY_FILTER: &str = "B_AND_B,CAMPSITE_CARAVAN_PARK,HOLIDAY_HOMES,HOSTEL,HOTEL,\
BEST_WESTERN,HILTON,HOLIDAY_INN,IBIS,MARRIOTT,NOVOTEL,HOTEL_OTHER,PREMIER_INN,RADISSON_BLU,\
TRAVELODGE,ACCOMMODATION_OTHER,ACCOMMODATION,AUDI,BMW,CITROEN,FIAT,FORD,HONDA,HYUNDAI,KIA,\
MERCEDES,MG_MOTORS,MITSUBISHI,NISSAN,DEALERSHIP_OTHER,DEALERSHIP_BRAND_OTHER,PEUGEOT,RENAULT,\
SHOWROOM,SKODA,TESLA,TOYOTA,VAUXHALL,VOLKSWAGEN,VOLVO,DEALERSHIP,HOME,GP_OTHER,HOSPITAL,\
NUFFIELD_HEALTH,HOSPITAL_OTHER,HEALTH_SERVICES_OTHER,HEALTH_SERVICES,ENTERTAINMENT,\
GALLERY_MUSEUM,HERITAGE_PROPERTY,ENGLISH_HERITAGE,NATIONAL_TRUST,HERITAGE_PROPERTY_OTHER,\
LANDMARK,LEISURE_CENTRE_GYM,BANNATYNE,DAVID_LLOYD,LEISURE_CENTRE_GYM_OTHER,MARINA,\
LEISURE_OTHER,PLACE_OF_WORSHIP,RACECOURSE,RECREATIONAL_PARK,SPORTS_FACILITY,THEATRE,\
THEME_PARK,WILDLIFE_PARK,LEISURE,HIGH_STREET,ON_STREET_OTHER,RESIDENTIAL,ON_STREET,OTHER,\
PARK_AND_RIDE,COMMUNITY_CENTRE,COUNCIL_OFFICES_OTHER,LIBRARY,PUBLIC_SERVICES_OTHER,\
PUBLIC_SERVICES,BURGER_KING,COSTA,DOMINOS,HARVESTER,KFC,MARSTONS,MCDONALDS,MILLER_AND_CARTER,\
RESTAURANT_PUB_CAFE_OTHER,STARBUCKS,TOBY_CARVERY,RESTAURANT_PUB_CAFE,B_AND_Q,IKEA,INTU,\
RETAIL_CAR_PARK_OTHER,RETAIL_CAR_PARK,COLLEGE_OTHER,NURSERY,EDUCATION_OTHER,SCHOOL,UNIVERSITY,\
EDUCATION,AIRPORT,BUS_STATION,TRAVEL_INTERCHANGE_CAR_PARK,FERRY_TERMINAL,\
TRAVEL_INTERCHANGE_OTHER,TRAIN_STATION,TRAVEL_INTERCHANGE";

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";
const MAP_ORIGIN: &str = "https://map.zap-map.com";

/// Status codes worth repeating the same request for.
const RETRY_STATUSES: &[u16] = &[500, 502, 503, 504, 522, 524, 429];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// 401/403 from a data endpoint.
    Unauthorized,
    /// Retryable status that survived every retry.
    Transient { status: u16 },
    /// Any other non-success status.
    Status { status: u16, body: String },
    /// Connection, timeout or body read failure that survived every retry.
    Network(String),
    /// Response body was not the expected JSON.
    Decode(String),
    /// The token endpoint itself failed.
    Auth(String),
}

impl ApiError {
    /// Errors that must stop the whole crawl rather than one unit of work.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::Unauthorized | ApiError::Auth(_))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Unauthorized => write!(f, "authentication rejected (401/403)"),
            ApiError::Transient { status } => {
                write!(f, "status {} persisted after retries", status)
            }
            ApiError::Status { status, body } => write!(f, "status {}: {}", status, body),
            ApiError::Network(msg) => write!(f, "network error: {}", msg),
            ApiError::Decode(msg) => write!(f, "invalid response: {}", msg),
            ApiError::Auth(msg) => write!(f, "token request failed: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

/// Headers the public web map sends; the API rejects bare clients.
pub(crate) fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.5"),
    );
    headers.insert(header::ORIGIN, HeaderValue::from_static(MAP_ORIGIN));
    headers.insert(
        header::REFERER,
        HeaderValue::from_static("https://map.zap-map.com/"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers
}

pub(crate) fn build_http_client(policy: &HttpPolicy) -> anyhow::Result<reqwest::Client> {
    use anyhow::Context;
    reqwest::Client::builder()
        .timeout(policy.request_timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Send the request built by `build`, repeating it on retryable statuses and
/// network errors up to `policy.retry_times` extra attempts.
///
/// Auth failures are returned immediately as [`ApiError::Unauthorized`];
/// refreshing credentials is the caller's decision.
pub(crate) async fn send_with_retry<F>(
    policy: &HttpPolicy,
    build: F,
) -> Result<Response, ApiError>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0u32;
    loop {
        let last_attempt = attempt >= policy.retry_times;
        let failure = match build().send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return Ok(resp);
                }
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    return Err(ApiError::Unauthorized);
                }
                if !RETRY_STATUSES.contains(&status.as_u16()) {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(ApiError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
                ApiError::Transient {
                    status: status.as_u16(),
                }
            }
            Err(e) => ApiError::Network(e.to_string()),
        };

        if last_attempt {
            return Err(failure);
        }
        attempt += 1;
        debug!(attempt, error = %failure, "retrying request");
        tokio::time::sleep(policy.retry_backoff * attempt).await;
    }
}

/// Read a response body as JSON of type `T`.
pub(crate) async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let text = resp
        .text()
        .await
        .map_err(|e| ApiError::Network(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Client for the charge-point directory's search and detail endpoints.
pub struct DirectoryClient {
    client: reqwest::Client,
    base_url: String,
    policy: HttpPolicy,
    tokens: Arc<TokenStore>,
}

impl DirectoryClient {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        policy: HttpPolicy,
        tokens: Arc<TokenStore>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
            tokens,
        }
    }

    /// Bounding-box query for one cell at its current page.
    pub async fn search(&self, cell: &GeoCell) -> Result<SearchResultPage, ApiError> {
        let url = format!("{}/locations/v1/search/bounding-box", self.base_url);
        let query = [
            ("latitude", cell.latitude_param()),
            ("longitude", cell.longitude_param()),
            ("category", CATEGORY_FILTER.to_string()),
            ("page", cell.page.to_string()),
        ];
        let envelope: SearchEnvelope = self.get_json(&url, &query).await?;
        Ok(envelope.into())
    }

    /// Raw detail payload for one location.
    pub async fn location(&self, uuid: &str) -> Result<serde_json::Value, ApiError> {
        let url = format!("{}/locations/v1/location/{}", self.base_url, uuid);
        self.get_json(&url, &[]).await
    }

    /// GET with the current token; on an auth failure refresh once and
    /// repeat. A second rejection is returned as-is.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let token = self.tokens.current().await;
        match self.get_once(url, query, &token).await {
            Err(ApiError::Unauthorized) => {
                warn!(url, "token rejected, re-authenticating");
                let fresh = self.tokens.refresh(&token).await?;
                self.get_once(url, query, &fresh).await
            }
            other => other,
        }
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        token: &str,
    ) -> Result<T, ApiError> {
        let resp = send_with_retry(&self.policy, || {
            self.client
                .get(url)
                .headers(browser_headers())
                .bearer_auth(token)
                .query(query)
        })
        .await?;
        decode(resp).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) fn fast_policy() -> HttpPolicy {
        HttpPolicy {
            retry_times: 2,
            retry_backoff: Duration::from_millis(1),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/flaky", server.uri());
        let resp = send_with_retry(&fast_policy(), || client.get(&url))
            .await
            .unwrap();
        assert_eq!(resp.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_gives_up_after_bounded_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/down", server.uri());
        let err = send_with_retry(&fast_policy(), || client.get(&url))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Transient { status: 429 });
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/private"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/private", server.uri());
        let err = send_with_retry(&fast_policy(), || client.get(&url))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Unauthorized);
    }

    #[tokio::test]
    async fn test_client_error_keeps_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such location"))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/missing", server.uri());
        let err = send_with_retry(&fast_policy(), || client.get(&url))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ApiError::Status {
                status: 404,
                body: "no such location".to_string()
            }
        );
    }
}
