//! casirest HTTP client.
//!
//! Provides async methods for the handful of casirest operations the agent
//! surface needs. Handles the fixed client headers, concurrency limiting and
//! mapping of upstream failures to [`UpstreamError`].

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, ORIGIN};
use reqwest::{RequestBuilder, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::auth::authorization_header_value;

use super::error::UpstreamError;
use super::types::{BookingProposal, Credential, PointOfInterest};

/// Default base URL for casirest.
pub(crate) const DEFAULT_BASE_URL: &str = "https://de1.cantamen.de/casirest/v3";

/// Browser user agent the upstream expects from its web frontend.
pub(crate) const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:124.0) Gecko/20100101 Firefox/124.0";

/// Origin of the carsharing web frontend the API key is registered for.
pub(crate) const DEFAULT_ORIGIN: &str = "https://ewi3-gruene-flotte.cantamen.de";

/// Default maximum concurrent requests.
const DEFAULT_MAX_CONCURRENT: usize = 8;

/// Expansions requested when creating a preliminary booking.
const PRELIM_BOOKING_EXPAND: &[&str] = &[
    "bookeeId",
    "customerId",
    "price.bookeeId",
    "bookingId",
    "addProp.addPropType",
    "addPropType",
];

/// Expansions requested when listing bookings.
const BOOKINGS_EXPAND: &[&str] = &[
    "bookeeId",
    "customerId",
    "price.bookeeId",
    "changeInfoId",
    "changePossibilityId",
    "geoPosition",
    "flexInfo.placeId",
    "flexInfo.slot.placeId",
    "addProp.addPropType",
    "fuelCard.fuelCardIssuer",
    "entrance",
];

/// Configuration for the casirest client.
#[derive(Debug, Clone)]
pub struct CantamenConfig {
    /// Value of the `X-API-Key` header
    pub api_key: String,
    /// Base URL for the API, including the `/casirest/v3` prefix
    pub base_url: String,
    /// `User-Agent` sent with every request
    pub user_agent: String,
    /// `Origin` sent with every request
    pub origin: String,
    /// Maximum concurrent requests
    pub max_concurrent: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl CantamenConfig {
    /// Create a new config with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout_secs: 30,
        }
    }

    /// Set a custom base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the `Origin` header value.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Set maximum concurrent requests.
    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Service account used to open casirest sessions.
#[derive(Debug, Clone)]
pub struct ServiceAccount {
    /// Provider id (`provId`)
    pub provider_id: String,
    pub login: String,
    pub secret: String,
}

/// Body of `POST /tokens`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    store_login: bool,
    prov_id: &'a str,
    login: &'a str,
    credential: &'a str,
}

/// Location and time window of an availability search.
///
/// Coordinates and range are kept as the caller sent them; they are
/// forwarded verbatim and also form the availability cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityQuery {
    pub lat: String,
    pub lng: String,
    pub range: String,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl AvailabilityQuery {
    /// Query pairs shared by points-of-interest and booking-proposal lookups.
    fn location_params(&self) -> Vec<(&'static str, &str)> {
        let mut params = vec![
            ("lat", self.lat.as_str()),
            ("lng", self.lng.as_str()),
            ("range", self.range.as_str()),
        ];
        if let Some(start) = &self.start {
            params.push(("start", start.as_str()));
        }
        if let Some(end) = &self.end {
            params.push(("end", end.as_str()));
        }
        params
    }
}

/// casirest API client.
///
/// Cheap to clone; clones share the connection pool and the concurrency
/// limit.
#[derive(Debug, Clone)]
pub struct CantamenClient {
    http: reqwest::Client,
    base_url: Url,
    semaphore: Arc<Semaphore>,
}

impl CantamenClient {
    /// Create a new casirest client with the given configuration.
    pub fn new(config: CantamenConfig) -> Result<Self, UpstreamError> {
        let mut headers = HeaderMap::new();

        let api_key =
            HeaderValue::from_str(&config.api_key).map_err(|_| UpstreamError::Api {
                status: 0,
                message: "Invalid API key format".to_string(),
            })?;
        headers.insert(HeaderName::from_static("x-api-key"), api_key);

        let origin = HeaderValue::from_str(&config.origin).map_err(|_| UpstreamError::Api {
            status: 0,
            message: "Invalid origin format".to_string(),
        })?;
        headers.insert(ORIGIN, origin);

        let base_url = Url::parse(&config.base_url).map_err(|e| UpstreamError::Api {
            status: 0,
            message: format!("Invalid base URL {}: {e}", config.base_url),
        })?;

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
        })
    }

    /// Build an endpoint URL from percent-encoded path segments.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, UpstreamError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| UpstreamError::Api {
                status: 0,
                message: format!("Base URL {} cannot carry a path", self.base_url),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Open a new session for the service account.
    ///
    /// This is the only call made without an `Authorization` header.
    pub async fn issue_token(&self, account: &ServiceAccount) -> Result<Credential, UpstreamError> {
        let url = self.endpoint(&["tokens"])?;
        let body = TokenRequest {
            store_login: false,
            prov_id: &account.provider_id,
            login: &account.login,
            credential: &account.secret,
        };

        debug!(url = %url, login = %account.login, "requesting session token");

        let request = self
            .http
            .post(url)
            .query(&[("expand", "customerId")])
            .json(&body);

        self.execute(request).await
    }

    /// Points of interest around a location, sorted by distance.
    ///
    /// Restricted to fixed places and expanded down to the bookee type so
    /// the ranker sees size classes.
    pub async fn points_of_interest(
        &self,
        credential: &Credential,
        query: &AvailabilityQuery,
    ) -> Result<Vec<PointOfInterest>, UpstreamError> {
        let url = self.endpoint(&["pointsofinterest"])?;

        let mut params = vec![
            ("expand", "place.bookee.bookeeType"),
            ("placeIsFixed", "true"),
            ("sort", "distance"),
        ];
        params.extend(query.location_params());

        let request = self.authorized(self.http.get(url), credential).query(&params);
        self.execute(request).await
    }

    /// Bookees free for the whole requested window around a location.
    pub async fn booking_proposals(
        &self,
        credential: &Credential,
        query: &AvailabilityQuery,
    ) -> Result<Vec<BookingProposal>, UpstreamError> {
        let url = self.endpoint(&["bookingproposals"])?;

        let mut params = vec![("expand", "bookeeId")];
        params.extend(query.location_params());

        let request = self.authorized(self.http.get(url), credential).query(&params);
        self.execute(request).await
    }

    /// Reserve a bookee for a time range (creates a preliminary booking).
    pub async fn create_prelim_booking(
        &self,
        credential: &Credential,
        bookee_id: &str,
        start: &str,
        end: &str,
    ) -> Result<Value, UpstreamError> {
        let url = self.endpoint(&["prelimbookings"])?;
        let expand: Vec<_> = PRELIM_BOOKING_EXPAND.iter().map(|e| ("expand", *e)).collect();
        let body = json!({
            "bookeeId": bookee_id,
            "timeRange": { "start": start, "end": end },
        });

        let request = self
            .authorized(self.http.post(url), credential)
            .query(&expand)
            .json(&body);
        self.execute(request).await
    }

    /// Confirm a preliminary booking.
    ///
    /// Confirms both reservations and cancellations; casirest models a
    /// pending cancellation as a preliminary booking too.
    pub async fn confirm_prelim_booking(
        &self,
        credential: &Credential,
        prelim_booking_id: &str,
    ) -> Result<Value, UpstreamError> {
        let url = self.endpoint(&["prelimbookings", prelim_booking_id, "confirm"])?;
        let request = self
            .authorized(self.http.post(url), credential)
            .json(&json!({}));
        self.execute(request).await
    }

    /// Request cancellation of a booking. The result must be confirmed.
    pub async fn cancel_booking(
        &self,
        credential: &Credential,
        booking_id: &str,
    ) -> Result<Value, UpstreamError> {
        let url = self.endpoint(&["bookings", booking_id, "cancel"])?;
        let request = self
            .authorized(self.http.post(url), credential)
            .json(&json!({}));
        self.execute(request).await
    }

    /// Changeable bookings starting from `now`, in chronological order.
    pub async fn current_bookings(
        &self,
        credential: &Credential,
        now: DateTime<Utc>,
    ) -> Result<Value, UpstreamError> {
        let url = self.endpoint(&["bookings"])?;
        let start = now.to_rfc3339_opts(SecondsFormat::Millis, true);

        // `changeable` drops cancelled bookings
        let mut params = vec![
            ("changeable", "true"),
            ("start", start.as_str()),
            ("sort", "timeRange.start,timeRange.end,id"),
        ];
        params.extend(BOOKINGS_EXPAND.iter().map(|e| ("expand", *e)));

        let request = self.authorized(self.http.get(url), credential).query(&params);
        self.execute(request).await
    }

    fn authorized(&self, request: RequestBuilder, credential: &Credential) -> RequestBuilder {
        request.header(AUTHORIZATION, authorization_header_value(credential))
    }

    /// Send a request and decode the JSON response.
    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, UpstreamError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| UpstreamError::Api {
                status: 0,
                message: "Semaphore closed".to_string(),
            })?;

        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(UpstreamError::Unauthorized);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = response.text().await?;

        serde_json::from_str(&body).map_err(|e| UpstreamError::Json {
            message: e.to_string(),
            body: Some(body.chars().take(500).collect()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cantamen::UpstreamId;
    use serde_json::Map;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn credential() -> Credential {
        Credential {
            id: UpstreamId::Text("session".into()),
            customer_id: UpstreamId::Number(42),
            extra: Map::new(),
        }
    }

    fn query() -> AvailabilityQuery {
        AvailabilityQuery {
            lat: "47.9983".into(),
            lng: "7.8423".into(),
            range: "1000".into(),
            start: Some("2024-05-01T10:00:00Z".into()),
            end: Some("2024-05-01T12:00:00Z".into()),
        }
    }

    async fn client_for(server: &MockServer) -> CantamenClient {
        let config =
            CantamenConfig::new("test-key").with_base_url(format!("{}/casirest/v3", server.uri()));
        CantamenClient::new(config).unwrap()
    }

    fn expand_values(request: &Request) -> Vec<String> {
        request
            .url
            .query_pairs()
            .filter(|(k, _)| k == "expand")
            .map(|(_, v)| v.into_owned())
            .collect()
    }

    #[test]
    fn config_builder() {
        let config = CantamenConfig::new("test-key")
            .with_base_url("http://localhost:8080/casirest/v3")
            .with_origin("https://example.org")
            .with_max_concurrent(10)
            .with_timeout(60);

        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.base_url, "http://localhost:8080/casirest/v3");
        assert_eq!(config.origin, "https://example.org");
        assert_eq!(config.max_concurrent, 10);
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn config_defaults() {
        let config = CantamenConfig::new("test-key");

        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.origin, DEFAULT_ORIGIN);
        assert_eq!(config.max_concurrent, DEFAULT_MAX_CONCURRENT);
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn client_rejects_bad_base_url() {
        let config = CantamenConfig::new("test-key").with_base_url("not a url");
        assert!(CantamenClient::new(config).is_err());
    }

    #[test]
    fn endpoint_encodes_ids() {
        let client = CantamenClient::new(
            CantamenConfig::new("k").with_base_url("http://localhost/casirest/v3/"),
        )
        .unwrap();

        let url = client.endpoint(&["bookings", "12/../x", "cancel"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost/casirest/v3/bookings/12%2F..%2Fx/cancel"
        );
    }

    #[tokio::test]
    async fn issue_token_sends_service_account_without_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/casirest/v3/tokens"))
            .and(query_param("expand", "customerId"))
            .and(header("x-api-key", "test-key"))
            .and(header("origin", DEFAULT_ORIGIN))
            .and(header("user-agent", DEFAULT_USER_AGENT))
            .and(body_json(json!({
                "storeLogin": false,
                "provId": "131",
                "login": "agent",
                "credential": "secret",
            })))
            .and(|req: &Request| !req.headers.contains_key("authorization"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({ "id": "tok", "customerId": 7 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let account = ServiceAccount {
            provider_id: "131".into(),
            login: "agent".into(),
            secret: "secret".into(),
        };

        let credential = client.issue_token(&account).await.unwrap();
        assert_eq!(credential.id, UpstreamId::Text("tok".into()));
        assert_eq!(credential.customer_id, UpstreamId::Number(7));
    }

    #[tokio::test]
    async fn points_of_interest_sends_filters_and_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/casirest/v3/pointsofinterest"))
            .and(query_param("expand", "place.bookee.bookeeType"))
            .and(query_param("placeIsFixed", "true"))
            .and(query_param("sort", "distance"))
            .and(query_param("lat", "47.9983"))
            .and(query_param("lng", "7.8423"))
            .and(query_param("range", "1000"))
            .and(query_param("start", "2024-05-01T10:00:00Z"))
            .and(query_param("end", "2024-05-01T12:00:00Z"))
            .and(header("authorization", "Basic c2Vzc2lvbjo0Mg=="))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "places": [{ "distance": 10, "bookees": [] }] }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let pois = client.points_of_interest(&credential(), &query()).await.unwrap();
        assert_eq!(pois.len(), 1);
    }

    #[tokio::test]
    async fn missing_window_is_not_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/casirest/v3/bookingproposals"))
            .and(|req: &Request| {
                !req.url.query_pairs().any(|(k, _)| k == "start" || k == "end")
            })
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "bookeeId": 1 }])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let mut query = query();
        query.start = None;
        query.end = None;

        let proposals = client.booking_proposals(&credential(), &query).await.unwrap();
        assert_eq!(proposals[0].bookee_id, UpstreamId::Number(1));
    }

    #[tokio::test]
    async fn prelim_booking_repeats_expand_keys() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/casirest/v3/prelimbookings"))
            .and(body_json(json!({
                "bookeeId": "10",
                "timeRange": { "start": "2024-05-01T10:00:00Z", "end": "2024-05-01T12:00:00Z" },
            })))
            .and(|req: &Request| expand_values(req) == PRELIM_BOOKING_EXPAND)
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 555 })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let reservation = client
            .create_prelim_booking(
                &credential(),
                "10",
                "2024-05-01T10:00:00Z",
                "2024-05-01T12:00:00Z",
            )
            .await
            .unwrap();
        assert_eq!(reservation["id"], 555);
    }

    #[tokio::test]
    async fn current_bookings_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/casirest/v3/bookings"))
            .and(query_param("changeable", "true"))
            .and(query_param("start", "2024-05-01T10:00:00.000Z"))
            .and(query_param("sort", "timeRange.start,timeRange.end,id"))
            .and(|req: &Request| expand_values(req) == BOOKINGS_EXPAND)
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let now = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let bookings = client.current_bookings(&credential(), now).await.unwrap();
        assert_eq!(bookings, json!([]));
    }

    #[tokio::test]
    async fn status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/casirest/v3/bookings/1/cancel"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/casirest/v3/bookings/2/cancel"))
            .respond_with(ResponseTemplate::new(422).set_body_string("already started"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/casirest/v3/prelimbookings/3/confirm"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;

        let err = client.cancel_booking(&credential(), "1").await.unwrap_err();
        assert!(err.is_unauthorized());

        let err = client.cancel_booking(&credential(), "2").await.unwrap_err();
        match err {
            UpstreamError::Api { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "already started");
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = client
            .confirm_prelim_booking(&credential(), "3")
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Json { .. }));
    }
}
