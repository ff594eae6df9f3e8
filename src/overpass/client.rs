//! Spatial query client for the Overpass API.
//!
//! One query per cell unions every filter fragment across nodes, ways
//! and relations within the cell radius. The client owns the rate
//! limiter and endpoint rotator for the whole run; there is no global
//! state. Transport failures degrade to an empty cell result so a later
//! run can revisit the cell - only a query the endpoint rejects as
//! malformed is fatal, because that is a bug on our side.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::models::{NormalizedPlace, PlaceState, RawElement};
use crate::subdivide::Cell;
use crate::telemetry::{QueryRecord, TelemetrySink};

use super::limiter::RateLimiter;
use super::rotator::{EndpointRotator, DEFAULT_ENDPOINTS};

/// Source identifier stamped on every normalized place.
pub const SOURCE: &str = "overpass";

/// Fatal query failure. Everything else the client degrades internally.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The endpoint rejected the query text (400/422). Retrying cannot
    /// help; the generated query itself is wrong.
    #[error("endpoint {endpoint} rejected query as malformed (HTTP {status})")]
    QuerySyntax { endpoint: String, status: u16 },
}

/// Soft, non-fatal failure for one cell. The cell result is empty and
/// the endpoint has been rotated; a future run revisits the cell.
#[derive(Debug, Clone, Error)]
pub enum SoftFailure {
    #[error("rate limited (retry-after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("server or network failure: {detail}")]
    ServerOrNetwork { detail: String },
    #[error("malformed response body: {detail}")]
    MalformedResponse { detail: String },
}

/// Result of querying one cell.
#[derive(Debug, Default)]
pub struct CellQueryOutcome {
    pub places: Vec<NormalizedPlace>,
    /// Element count before normalization dropped anything
    pub raw_count: usize,
    /// True iff the element count hit `max_results` - the response may
    /// be truncated and the cell should be subdivided.
    pub capped: bool,
    pub failure: Option<SoftFailure>,
}

impl CellQueryOutcome {
    fn soft(failure: SoftFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Default::default()
        }
    }
}

/// Seam between the orchestrator and the network, so runs can be
/// driven against a scripted querier in tests.
#[async_trait]
pub trait CellQuerier {
    async fn query_cell(
        &mut self,
        cell: &Cell,
        category: &str,
        fragments: &[String],
    ) -> Result<CellQueryOutcome, QueryError>;
}

/// Client configuration, constructed once per run.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoints: Vec<String>,
    /// Per-query element cap; also the saturation threshold
    pub max_results: usize,
    /// Overpass server-side timeout, seconds
    pub query_timeout_secs: u32,
    /// HTTP request timeout, seconds
    pub request_timeout_secs: u64,
    /// Fixed pre-call delay, the second throttle layer under the bucket
    pub base_delay_ms: u64,
    /// Jitter applied to the base delay, percent of the base
    pub jitter_pct: u8,
    pub rate_capacity: f64,
    pub rate_refill_per_sec: f64,
    /// Preferred language for display names (`name:<lang>` tags)
    pub lang: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            max_results: 200,
            query_timeout_secs: 25,
            request_timeout_secs: 60,
            base_delay_ms: 1000,
            jitter_pct: 20,
            rate_capacity: 2.0,
            rate_refill_per_sec: 0.5,
            lang: None,
        }
    }
}

/// Executes spatial queries with throttling, rotation and defensive
/// parsing.
pub struct SpatialQueryClient {
    http: reqwest::Client,
    limiter: RateLimiter,
    rotator: EndpointRotator,
    telemetry: Arc<dyn TelemetrySink>,
    cfg: ClientConfig,
}

impl SpatialQueryClient {
    pub fn new(cfg: ClientConfig, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .user_agent("Prospect/0.1 (poi discovery; https://github.com/example)")
                .timeout(Duration::from_secs(cfg.request_timeout_secs))
                .build()
                .expect("Failed to create HTTP client"),
            limiter: RateLimiter::new(cfg.rate_capacity, cfg.rate_refill_per_sec),
            rotator: EndpointRotator::new(cfg.endpoints.clone()),
            telemetry,
            cfg,
        }
    }

    /// Build one Overpass QL query unioning every fragment across the
    /// three geometry kinds within the cell radius.
    fn build_query(&self, cell: &Cell, fragments: &[String]) -> String {
        let mut query = format!("[out:json][timeout:{}];\n(\n", self.cfg.query_timeout_secs);
        for fragment in fragments {
            for kind in ["node", "way", "relation"] {
                query.push_str(&format!(
                    "  {}{}(around:{:.0},{:.6},{:.6});\n",
                    kind, fragment, cell.radius_m, cell.lat, cell.lng
                ));
            }
        }
        query.push_str(&format!(");\nout center {};\n", self.cfg.max_results));
        query
    }

    /// Fixed base delay with jitter, applied before every call on top
    /// of the token bucket.
    async fn pre_call_delay(&self) {
        let base = self.cfg.base_delay_ms as f64;
        let jitter = base * self.cfg.jitter_pct as f64 / 100.0;
        let delay_ms = rand::rng().random_range(base - jitter..=base + jitter);
        tokio::time::sleep(Duration::from_millis(delay_ms.max(0.0) as u64)).await;
    }

    async fn emit(&self, record: QueryRecord) {
        self.telemetry.record(record).await;
    }
}

#[async_trait]
impl CellQuerier for SpatialQueryClient {
    async fn query_cell(
        &mut self,
        cell: &Cell,
        category: &str,
        fragments: &[String],
    ) -> Result<CellQueryOutcome, QueryError> {
        self.limiter.acquire().await;
        self.pre_call_delay().await;

        let query = self.build_query(cell, fragments);
        let endpoint = self.rotator.current().to_string();

        let mut record = QueryRecord {
            endpoint: endpoint.clone(),
            lat: cell.lat,
            lng: cell.lng,
            radius_m: cell.radius_m,
            query_bytes: query.len(),
            ..Default::default()
        };

        let started = Instant::now();
        let response = self.http.post(&endpoint).body(query.clone()).send().await;
        record.duration_ms = started.elapsed().as_millis() as u64;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    endpoint = %endpoint,
                    lat = cell.lat,
                    lng = cell.lng,
                    radius_m = cell.radius_m,
                    query_bytes = query.len(),
                    duration_ms = record.duration_ms,
                    error = %e,
                    "request failed, returning empty cell result"
                );
                record.error = Some(e.to_string());
                self.emit(record).await;
                self.rotator.advance();
                return Ok(CellQueryOutcome::soft(SoftFailure::ServerOrNetwork {
                    detail: e.to_string(),
                }));
            }
        };

        let status = response.status();
        record.status = Some(status.as_u16());

        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            error!(
                endpoint = %endpoint,
                status = status.as_u16(),
                query = %query,
                "endpoint rejected query as malformed"
            );
            record.error = Some("query rejected as malformed".to_string());
            self.emit(record).await;
            return Err(QueryError::QuerySyntax {
                endpoint,
                status: status.as_u16(),
            });
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            warn!(
                endpoint = %endpoint,
                retry_after_secs = retry_after,
                "rate limited by endpoint, rotating"
            );
            record.error = Some("rate limited".to_string());
            record.retry_after_secs = retry_after;
            self.emit(record).await;
            self.rotator.advance();
            return Ok(CellQueryOutcome::soft(SoftFailure::RateLimited {
                retry_after_secs: retry_after,
            }));
        }

        if !status.is_success() {
            warn!(
                endpoint = %endpoint,
                lat = cell.lat,
                lng = cell.lng,
                radius_m = cell.radius_m,
                query_bytes = query.len(),
                status = status.as_u16(),
                duration_ms = record.duration_ms,
                "server error, returning empty cell result"
            );
            record.error = Some(format!("HTTP {}", status.as_u16()));
            self.emit(record).await;
            self.rotator.advance();
            return Ok(CellQueryOutcome::soft(SoftFailure::ServerOrNetwork {
                detail: format!("HTTP {}", status.as_u16()),
            }));
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "failed to read response body");
                record.error = Some(e.to_string());
                self.emit(record).await;
                self.rotator.advance();
                return Ok(CellQueryOutcome::soft(SoftFailure::ServerOrNetwork {
                    detail: e.to_string(),
                }));
            }
        };

        let value: serde_json::Value = match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "unparseable response body, rotating");
                record.error = Some(format!("unparseable body: {}", e));
                self.emit(record).await;
                self.rotator.advance();
                return Ok(CellQueryOutcome::soft(SoftFailure::MalformedResponse {
                    detail: e.to_string(),
                }));
            }
        };

        let elements = parse_elements(&value);
        let raw_count = elements.len();
        let capped = raw_count >= self.cfg.max_results;

        let now = Utc::now();
        let places: Vec<NormalizedPlace> = elements
            .iter()
            .filter_map(|el| normalize_element(el, category, self.cfg.lang.as_deref(), now))
            .collect();

        record.result_count = raw_count;
        record.normalized_count = places.len();
        self.emit(record).await;

        debug!(
            lat = cell.lat,
            lng = cell.lng,
            radius_m = cell.radius_m,
            raw = raw_count,
            normalized = places.len(),
            capped,
            "cell queried"
        );

        Ok(CellQueryOutcome {
            places,
            raw_count,
            capped,
            failure: None,
        })
    }
}

/// Pull the `elements` array out of a response body.
///
/// An absent, null or non-array `elements` field is coerced to an empty
/// list; individual elements that fail to deserialize are skipped.
pub fn parse_elements(body: &serde_json::Value) -> Vec<RawElement> {
    let Some(items) = body.get("elements").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(el) => Some(el),
            Err(e) => {
                debug!(error = %e, "skipping undecodable element");
                None
            }
        })
        .collect()
}

/// Normalize one raw element into a candidate place.
///
/// Elements without resolvable coordinates are dropped silently. The
/// display name falls back name -> brand -> operator -> "Unnamed", with
/// `name:<lang>` preferred when a language hint is set.
pub fn normalize_element(
    element: &RawElement,
    category: &str,
    lang: Option<&str>,
    now: chrono::DateTime<Utc>,
) -> Option<NormalizedPlace> {
    let (lat, lng) = element.coordinates()?;

    let tags = &element.tags;
    let localized = lang.and_then(|l| tags.get(&format!("name:{}", l)));
    let name = localized
        .or_else(|| tags.get("name"))
        .or_else(|| tags.get("brand"))
        .or_else(|| tags.get("operator"))
        .map(|s| s.to_string())
        .unwrap_or_else(|| "Unnamed".to_string());

    Some(NormalizedPlace {
        id: NormalizedPlace::external_id(element.osm_type, element.id),
        name,
        address: assemble_address(tags),
        lat,
        lng,
        category: category.to_string(),
        source: SOURCE.to_string(),
        state: PlaceState::Candidate,
        confidence_score: None,
        first_seen_at: now,
        last_seen_at: now,
    })
}

/// Concatenate only the address components actually present.
fn assemble_address(tags: &std::collections::HashMap<String, String>) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();

    match (tags.get("addr:street"), tags.get("addr:housenumber")) {
        (Some(street), Some(number)) => parts.push(format!("{} {}", street, number)),
        (Some(street), None) => parts.push(street.clone()),
        (None, Some(number)) => parts.push(number.clone()),
        (None, None) => {}
    }
    if let Some(postcode) = tags.get("addr:postcode") {
        parts.push(postcode.clone());
    }
    if let Some(city) = tags.get("addr:city") {
        parts.push(city.clone());
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OsmType;
    use crate::telemetry::NoopTelemetry;
    use serde_json::json;

    fn test_cell() -> Cell {
        Cell {
            lat: 51.9244,
            lng: 4.4777,
            radius_m: 500.0,
            depth: 0,
        }
    }

    fn element(tags: serde_json::Value) -> RawElement {
        serde_json::from_value(json!({
            "type": "node",
            "id": 42,
            "lat": 51.92,
            "lon": 4.47,
            "tags": tags,
        }))
        .unwrap()
    }

    #[test]
    fn test_build_query_unions_all_geometry_kinds() {
        let client = SpatialQueryClient::new(ClientConfig::default(), Arc::new(NoopTelemetry));
        let fragments = vec![
            "[\"amenity\"=\"bakery\"]".to_string(),
            "[\"shop\"=\"bakery\"]".to_string(),
        ];

        let query = client.build_query(&test_cell(), &fragments);

        assert!(query.starts_with("[out:json][timeout:25];"));
        for kind in ["node", "way", "relation"] {
            assert!(query.contains(&format!(
                "{}[\"amenity\"=\"bakery\"](around:500,51.924400,4.477700);",
                kind
            )));
            assert!(query.contains(&format!(
                "{}[\"shop\"=\"bakery\"](around:500,51.924400,4.477700);",
                kind
            )));
        }
        assert!(query.trim_end().ends_with("out center 200;"));
    }

    #[test]
    fn test_missing_elements_field_coerces_to_empty() {
        assert!(parse_elements(&json!({})).is_empty());
        assert!(parse_elements(&json!({"elements": null})).is_empty());
        assert!(parse_elements(&json!({"elements": "null"})).is_empty());
        assert!(parse_elements(&json!({"elements": 7})).is_empty());
    }

    #[test]
    fn test_parse_elements_skips_undecodable_entries() {
        let body = json!({
            "elements": [
                {"type": "node", "id": 1, "lat": 51.9, "lon": 4.4},
                {"type": "teapot", "id": 2},
                {"type": "way", "id": 3, "center": {"lat": 51.8, "lon": 4.3}},
            ]
        });

        let elements = parse_elements(&body);
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].id, 1);
        assert_eq!(elements[1].osm_type, OsmType::Way);
    }

    #[test]
    fn test_normalize_drops_elements_without_coordinates() {
        let el: RawElement = serde_json::from_value(json!({
            "type": "way",
            "id": 9,
            "tags": {"name": "Somewhere"},
        }))
        .unwrap();

        assert!(normalize_element(&el, "bakery", None, Utc::now()).is_none());
    }

    #[test]
    fn test_name_fallback_chain() {
        let now = Utc::now();

        let named = element(json!({"name": "De Bakker", "brand": "Chain"}));
        assert_eq!(
            normalize_element(&named, "bakery", None, now).unwrap().name,
            "De Bakker"
        );

        let branded = element(json!({"brand": "Chain"}));
        assert_eq!(
            normalize_element(&branded, "bakery", None, now)
                .unwrap()
                .name,
            "Chain"
        );

        let operated = element(json!({"operator": "Gemeente"}));
        assert_eq!(
            normalize_element(&operated, "bakery", None, now)
                .unwrap()
                .name,
            "Gemeente"
        );

        let anonymous = element(json!({}));
        assert_eq!(
            normalize_element(&anonymous, "bakery", None, now)
                .unwrap()
                .name,
            "Unnamed"
        );
    }

    #[test]
    fn test_language_hint_prefers_localized_name() {
        let el = element(json!({"name": "Bakkerij", "name:en": "Bakery"}));
        let place = normalize_element(&el, "bakery", Some("en"), Utc::now()).unwrap();
        assert_eq!(place.name, "Bakery");

        // Hint without a matching tag falls back to the default name
        let place = normalize_element(&el, "bakery", Some("fr"), Utc::now()).unwrap();
        assert_eq!(place.name, "Bakkerij");
    }

    #[test]
    fn test_address_assembles_only_present_components() {
        let now = Utc::now();

        let full = element(json!({
            "addr:street": "Meent",
            "addr:housenumber": "21",
            "addr:postcode": "3011 JE",
            "addr:city": "Rotterdam",
        }));
        assert_eq!(
            normalize_element(&full, "bakery", None, now)
                .unwrap()
                .address
                .unwrap(),
            "Meent 21, 3011 JE, Rotterdam"
        );

        let partial = element(json!({"addr:city": "Rotterdam"}));
        assert_eq!(
            normalize_element(&partial, "bakery", None, now)
                .unwrap()
                .address
                .unwrap(),
            "Rotterdam"
        );

        let none = element(json!({}));
        assert!(normalize_element(&none, "bakery", None, now)
            .unwrap()
            .address
            .is_none());
    }

    #[test]
    fn test_normalized_place_shape() {
        let el = element(json!({"name": "De Bakker"}));
        let now = Utc::now();
        let place = normalize_element(&el, "bakery", None, now).unwrap();

        assert_eq!(place.id, "node/42");
        assert_eq!(place.category, "bakery");
        assert_eq!(place.source, SOURCE);
        assert_eq!(place.state, PlaceState::Candidate);
        assert!(place.confidence_score.is_none());
        assert_eq!(place.first_seen_at, now);
        assert_eq!(place.last_seen_at, now);
    }

    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Records every emitted query record for inspection.
    #[derive(Default)]
    struct CapturingTelemetry(Mutex<Vec<QueryRecord>>);

    #[async_trait]
    impl TelemetrySink for CapturingTelemetry {
        async fn record(&self, record: QueryRecord) {
            self.0.lock().unwrap().push(record);
        }
    }

    fn http_response(status_line: &str, extra_headers: &[(&str, &str)], body: &str) -> String {
        let mut response = format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n",
            status_line,
            body.len()
        );
        for (name, value) in extra_headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }
        response.push_str("\r\n");
        response.push_str(body);
        response
    }

    /// Serve the canned responses one connection at a time, returning
    /// the base URL.
    async fn spawn_endpoint(responses: Vec<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = vec![0u8; 8192];
                let mut read = 0;
                // Read until the request headers are complete
                while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => read += n,
                    }
                }
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{}", addr)
    }

    fn fast_config(endpoints: Vec<String>) -> ClientConfig {
        ClientConfig {
            endpoints,
            max_results: 2,
            base_delay_ms: 0,
            jitter_pct: 0,
            rate_capacity: 100.0,
            rate_refill_per_sec: 100.0,
            ..Default::default()
        }
    }

    fn fragments() -> Vec<String> {
        vec!["[\"amenity\"=\"bakery\"]".to_string()]
    }

    #[tokio::test]
    async fn test_rejected_query_is_fatal() {
        let url = spawn_endpoint(vec![http_response("400 Bad Request", &[], "")]).await;
        let mut client =
            SpatialQueryClient::new(fast_config(vec![url]), Arc::new(NoopTelemetry));

        let err = client
            .query_cell(&test_cell(), "bakery", &fragments())
            .await
            .unwrap_err();
        match err {
            QueryError::QuerySyntax { status, .. } => assert_eq!(status, 400),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_rotates_and_returns_empty() {
        let base = spawn_endpoint(vec![
            http_response("429 Too Many Requests", &[("retry-after", "42")], ""),
            http_response("200 OK", &[], r#"{"elements": []}"#),
        ])
        .await;
        let telemetry = Arc::new(CapturingTelemetry::default());
        let endpoints = vec![format!("{}/a", base), format!("{}/b", base)];
        let mut client = SpatialQueryClient::new(fast_config(endpoints), telemetry.clone());

        let outcome = client
            .query_cell(&test_cell(), "bakery", &fragments())
            .await
            .unwrap();
        assert!(outcome.places.is_empty());
        assert!(!outcome.capped);
        match outcome.failure {
            Some(SoftFailure::RateLimited { retry_after_secs }) => {
                assert_eq!(retry_after_secs, Some(42));
            }
            other => panic!("expected rate-limited failure, got {:?}", other),
        }

        // The next call must land on the rotated endpoint
        let outcome = client
            .query_cell(&test_cell(), "bakery", &fragments())
            .await
            .unwrap();
        assert!(outcome.failure.is_none());

        let records = telemetry.0.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].endpoint.ends_with("/a"));
        assert_eq!(records[0].retry_after_secs, Some(42));
        assert!(records[1].endpoint.ends_with("/b"));
    }

    #[tokio::test]
    async fn test_server_error_degrades_to_empty_cell() {
        let url = spawn_endpoint(vec![http_response("503 Service Unavailable", &[], "")]).await;
        let mut client =
            SpatialQueryClient::new(fast_config(vec![url]), Arc::new(NoopTelemetry));

        let outcome = client
            .query_cell(&test_cell(), "bakery", &fragments())
            .await
            .unwrap();
        assert!(outcome.places.is_empty());
        assert_eq!(outcome.raw_count, 0);
        assert!(!outcome.capped);
        assert!(matches!(
            outcome.failure,
            Some(SoftFailure::ServerOrNetwork { .. })
        ));
    }

    #[tokio::test]
    async fn test_unparseable_body_is_soft_failure() {
        let url = spawn_endpoint(vec![http_response("200 OK", &[], "<html>busy</html>")]).await;
        let mut client =
            SpatialQueryClient::new(fast_config(vec![url]), Arc::new(NoopTelemetry));

        let outcome = client
            .query_cell(&test_cell(), "bakery", &fragments())
            .await
            .unwrap();
        assert!(outcome.places.is_empty());
        assert!(matches!(
            outcome.failure,
            Some(SoftFailure::MalformedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_success_sets_capped_at_max_results() {
        let body = json!({
            "elements": [
                {"type": "node", "id": 1, "lat": 51.9, "lon": 4.4, "tags": {"name": "A"}},
                {"type": "node", "id": 2, "lat": 51.8, "lon": 4.3, "tags": {"name": "B"}},
            ]
        })
        .to_string();
        let url = spawn_endpoint(vec![http_response("200 OK", &[], &body)]).await;
        let mut client =
            SpatialQueryClient::new(fast_config(vec![url]), Arc::new(NoopTelemetry));

        let outcome = client
            .query_cell(&test_cell(), "bakery", &fragments())
            .await
            .unwrap();
        assert!(outcome.failure.is_none());
        assert_eq!(outcome.raw_count, 2);
        assert_eq!(outcome.places.len(), 2);
        // max_results is 2, so the response may be truncated
        assert!(outcome.capped);
    }
}
