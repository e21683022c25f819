use axum::{
    body::Bytes,
    extract::{Path, Query, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::pixel::Pixel;
use crate::aggregation::{AggregateError, Aggregator};
use crate::config::CookieConfig;
use crate::identity;
use crate::ingest::{EventQueue, IngestStats, IngestStatsSnapshot};
use crate::models::{BackfillRequest, Counts, Event};
use crate::storage::CounterStore;

pub struct AppState {
    pub store: Arc<dyn CounterStore>,
    pub aggregator: Aggregator,
    pub queue: EventQueue,
    pub stats: Arc<IngestStats>,
    pub pixel: Pixel,
    pub cookie: CookieConfig,
    pub backfill_secret: Option<String>,
    pub home_url: Option<String>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn aggregate_error(err: AggregateError) -> ApiError {
    if err.is_client_error() {
        return api_error(StatusCode::BAD_REQUEST, err.to_string());
    }
    tracing::error!("Failed to read counters: {}", err);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read counters")
}

/// Serve the tracking pixel, queueing a visit when an object id is given.
///
/// The response is the same image whatever happens to the event.
pub async fn beacon(
    State(state): State<Arc<AppState>>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    if let Ok(content_type) = HeaderValue::from_str(&state.pixel.content_type) {
        response_headers.insert(header::CONTENT_TYPE, content_type);
    }

    if let Some(object_id) = pixel_object_id(raw_query.as_deref()) {
        let resolved = identity::resolve(&headers, &state.cookie);
        if let Some(cookie) = resolved.set_cookie {
            response_headers.insert(header::SET_COOKIE, cookie);
        }
        state
            .queue
            .submit(Event::new(object_id, resolved.visitor_id))
            .await;
    }

    (StatusCode::OK, response_headers, state.pixel.bytes.clone()).into_response()
}

fn object_id_from_path(raw: &str) -> Option<&str> {
    let trimmed = raw.trim_end_matches('/');
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Counts for one object
pub async fn get_object(
    State(state): State<Arc<AppState>>,
    Path(object_id): Path<String>,
) -> Result<Json<Counts>, ApiError> {
    let object_id = object_id_from_path(&object_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Object id not found in path"))?;

    state
        .aggregator
        .object(object_id)
        .await
        .map(Json)
        .map_err(aggregate_error)
}

fn decode_component(value: &str) -> String {
    let value = value.replace('+', " ");
    urlencoding::decode(&value)
        .map(|v| v.into_owned())
        .unwrap_or(value)
}

/// Decoded `(key, value)` pairs in query order. Never fails: undecodable
/// components are kept as sent.
fn query_pairs(raw_query: Option<&str>) -> impl Iterator<Item = (String, String)> + '_ {
    raw_query
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
}

/// The object a pixel request tracks: the first non-empty `id` parameter.
pub fn pixel_object_id(raw_query: Option<&str>) -> Option<String> {
    query_pairs(raw_query)
        .find(|(key, value)| key == "id" && !value.is_empty())
        .map(|(_, value)| value)
}

/// Object ids from a query string: repeated `id` (or `id[]`) parameters,
/// and comma-separated `ids`.
pub fn parse_object_ids(raw_query: Option<&str>) -> Vec<String> {
    let mut ids = Vec::new();
    for (key, value) in query_pairs(raw_query) {
        match key.as_str() {
            "id" | "id[]" => ids.push(value),
            "ids" => ids.extend(
                value
                    .split(',')
                    .filter(|v| !v.is_empty())
                    .map(str::to_string),
            ),
            _ => {}
        }
    }
    ids
}

/// Combined counts for the ids in the query string
pub async fn get_multi(
    State(state): State<Arc<AppState>>,
    RawQuery(raw_query): RawQuery,
) -> Result<Json<Counts>, ApiError> {
    let ids = parse_object_ids(raw_query.as_deref());
    state
        .aggregator
        .objects(&ids)
        .await
        .map(Json)
        .map_err(aggregate_error)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultiRequest {
    pub ids: Vec<String>,
}

/// Combined counts for the ids in a JSON body
pub async fn post_multi(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Counts>, ApiError> {
    let request: MultiRequest = serde_json::from_slice(&body)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid request body: {e}")))?;

    state
        .aggregator
        .objects(&request.ids)
        .await
        .map(Json)
        .map_err(aggregate_error)
}

#[derive(Deserialize)]
pub struct SecretQuery {
    pub secret: Option<String>,
}

fn secret_matches(expected: Option<&str>, given: Option<&str>) -> bool {
    match (expected, given) {
        (Some(expected), Some(given)) => bool::from(expected.as_bytes().ct_eq(given.as_bytes())),
        _ => false,
    }
}

/// Overwrite an object's legacy counters. Requires the shared secret.
///
/// The secret is checked before the body is parsed, so an unauthorized
/// request never reaches the store.
pub async fn backfill(
    State(state): State<Arc<AppState>>,
    Path(object_id): Path<String>,
    Query(query): Query<SecretQuery>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    if !secret_matches(state.backfill_secret.as_deref(), query.secret.as_deref()) {
        tracing::warn!(object_id = %object_id, "rejected backfill with missing or wrong secret");
        return Err(api_error(StatusCode::UNAUTHORIZED, "Invalid or missing secret"));
    }

    let object_id = object_id_from_path(&object_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Object id not found in path"))?;

    let request: BackfillRequest = serde_json::from_slice(&body)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid request body: {e}")))?;
    request
        .validate()
        .map_err(|msg| api_error(StatusCode::BAD_REQUEST, msg))?;

    match state.store.backfill(object_id, request.into()).await {
        Ok(()) => {
            tracing::info!(
                object_id,
                visits = request.visits,
                uniques = request.uniques,
                "backfilled legacy counters"
            );
            Ok(StatusCode::OK)
        }
        Err(e) => {
            tracing::error!(object_id, error = %e, "Failed to backfill counters");
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to backfill counters",
            ))
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub ingest: IngestStatsSnapshot,
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        ingest: state.stats.snapshot(),
    })
}

/// Redirect to the configured home page, or report health
pub async fn home(State(state): State<Arc<AppState>>) -> Response {
    let location = state
        .home_url
        .as_deref()
        .and_then(|url| HeaderValue::from_str(url).ok());

    match location {
        Some(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        None => health_check(State(state)).await.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repeated_ids() {
        let ids = parse_object_ids(Some("id=foo&id=bar&id=foo"));
        assert_eq!(ids, vec!["foo", "bar", "foo"]);
    }

    #[test]
    fn test_parse_comma_ids_and_encoding() {
        let ids = parse_object_ids(Some("ids=a%2Fb,c&id%5B%5D=d+e&other=x"));
        assert_eq!(ids, vec!["a/b", "c", "d e"]);
    }

    #[test]
    fn test_pixel_object_id_takes_first_non_empty() {
        assert_eq!(pixel_object_id(Some("id=a&id=b")), Some("a".to_string()));
        assert_eq!(pixel_object_id(Some("id=&id=b")), Some("b".to_string()));
        assert_eq!(pixel_object_id(Some("id=a%2Fb")), Some("a/b".to_string()));
        assert_eq!(pixel_object_id(Some("ref=x&id")), None);
        assert_eq!(pixel_object_id(None), None);
    }

    #[test]
    fn test_parse_no_query() {
        assert!(parse_object_ids(None).is_empty());
        assert!(parse_object_ids(Some("")).is_empty());
    }

    #[test]
    fn test_secret_matches() {
        assert!(secret_matches(Some("s3cret"), Some("s3cret")));
        assert!(!secret_matches(Some("s3cret"), Some("wrong")));
        assert!(!secret_matches(Some("s3cret"), None));
        assert!(!secret_matches(None, Some("anything")));
        assert!(!secret_matches(None, None));
    }

    #[test]
    fn test_object_id_from_path() {
        assert_eq!(object_id_from_path("foo/"), Some("foo"));
        assert_eq!(object_id_from_path("a/b"), Some("a/b"));
        assert_eq!(object_id_from_path("/"), None);
    }
}
