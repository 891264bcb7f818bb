//! ==============================================================================
//! api.rs - read api for dashboards
//! ==============================================================================
//!
//!     GET /results                    latest N results, cached for a few
//!                                     seconds to absorb TV refresh bursts
//!     GET /lastfurnaceresults?f=A&f=B latest result per furnace, live
//!     GET /*                          optional static website directory
//!
//! both json endpoints answer 500 with the error text when the store fails.
//!
//! ==============================================================================

use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::store::{Store, StoreError};

struct Cached {
    expires: Option<Instant>,
    body: Bytes,
}

impl Cached {
    fn fresh(&self, now: Instant) -> Option<Bytes> {
        match self.expires {
            Some(expires) if now < expires => Some(self.body.clone()),
            _ => None,
        }
    }
}

/// Latest results rendered to json, refreshed at most once per ttl.
pub struct ResultCache {
    store: Store,
    limit: u32,
    ttl: Duration,
    cached: RwLock<Cached>,
}

impl ResultCache {
    pub fn new(store: Store, limit: u32, ttl: Duration) -> Self {
        Self {
            store,
            limit,
            ttl,
            cached: RwLock::new(Cached { expires: None, body: Bytes::new() }),
        }
    }

    pub async fn get(&self) -> Result<Bytes, StoreError> {
        if let Some(body) = self.cached.read().await.fresh(Instant::now()) {
            return Ok(body);
        }

        let mut cached = self.cached.write().await;
        // another request may have refreshed while we waited for the write lock
        if let Some(body) = cached.fresh(Instant::now()) {
            return Ok(body);
        }

        let results = self.store.latest_results(self.limit).await?;
        let body = serde_json::to_vec(&results)
            .map(Bytes::from)
            .map_err(|e| StoreError::Task(e.to_string()))?;

        cached.body = body.clone();
        cached.expires = Some(Instant::now() + self.ttl);
        Ok(body)
    }
}

#[derive(Clone)]
pub struct ApiState {
    store: Store,
    cache: Arc<ResultCache>,
}

impl ApiState {
    pub fn new(store: Store, limit: u32, ttl: Duration) -> Self {
        let cache = Arc::new(ResultCache::new(store.clone(), limit, ttl));
        Self { store, cache }
    }
}

pub fn router(state: ApiState, website_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/results", get(results_handler))
        .route("/lastfurnaceresults", get(last_furnace_results_handler))
        .with_state(state);

    let app = match website_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    };
    app.layer(TraceLayer::new_for_http())
}

/// Serve until `token` is cancelled.
pub async fn serve(port: u16, app: Router, token: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("read api listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    Ok(())
}

async fn results_handler(State(state): State<ApiState>) -> Response {
    match state.cache.get().await {
        Ok(body) => json_response(body),
        Err(e) => store_failure(e),
    }
}

async fn last_furnace_results_handler(
    State(state): State<ApiState>,
    RawQuery(query): RawQuery,
) -> Response {
    let furnaces = furnace_names(query.as_deref().unwrap_or(""));
    let results = match state.store.latest_of_furnaces(furnaces).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("error reading latest furnace results: {}", e);
            return store_failure(e);
        }
    };
    match serde_json::to_vec(&results) {
        Ok(body) => json_response(Bytes::from(body)),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// every `f=` value, in order
fn furnace_names(query: &str) -> Vec<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(k, _)| k == "f")
        .map(|(_, v)| v.into_owned())
        .collect()
}

fn json_response(body: Bytes) -> Response {
    let mut resp = body.into_response();
    let headers = resp.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    resp
}

fn store_failure(e: StoreError) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SampleResult;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use tower::ServiceExt;

    fn result(furnace: &str, secs: i64) -> SampleResult {
        SampleResult {
            sample_name: format!("{}-{}", furnace, secs),
            furnace: furnace.into(),
            time_stamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            source_machine: 1,
            elements: vec![],
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Response<()>, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let (parts, body) = resp.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (parts.status, Response::from_parts(parts, ()), value)
    }

    #[tokio::test]
    async fn test_results_headers_and_body() {
        let store = Store::open(":memory:", Duration::from_secs(5)).unwrap();
        store.ingest(vec![result("F1", 20), result("F2", 10)]).await.unwrap();
        let app = router(ApiState::new(store, 20, Duration::from_secs(5)), None);

        let (status, resp, body) = get_json(app, "/results").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(body.as_array().unwrap().len(), 2);
        assert_eq!(body[0]["furnace"], "F1");
    }

    #[tokio::test]
    async fn test_empty_store_is_empty_array() {
        let store = Store::open(":memory:", Duration::from_secs(5)).unwrap();
        let app = router(ApiState::new(store, 20, Duration::from_secs(5)), None);
        let (_, _, body) = get_json(app, "/results").await;
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_results_are_cached_within_ttl() {
        let store = Store::open(":memory:", Duration::from_secs(5)).unwrap();
        store.ingest(vec![result("F1", 10)]).await.unwrap();
        let cache = ResultCache::new(store.clone(), 20, Duration::from_secs(60));

        let first = cache.get().await.unwrap();
        store.ingest(vec![result("F1", 20)]).await.unwrap();
        let second = cache.get().await.unwrap();
        assert_eq!(first, second);

        let uncached = ResultCache::new(store, 20, Duration::ZERO);
        let rows: serde_json::Value = serde_json::from_slice(&uncached.get().await.unwrap()).unwrap();
        assert_eq!(rows.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_last_furnace_results() {
        let store = Store::open(":memory:", Duration::from_secs(5)).unwrap();
        store
            .ingest(vec![result("F1", 30), result("F2", 20), result("F1", 10)])
            .await
            .unwrap();
        let app = router(ApiState::new(store, 20, Duration::from_secs(5)), None);

        let (status, resp, body) = get_json(app, "/lastfurnaceresults?f=F1&f=F3&f=F2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["sample_name"], "F1-30");
        assert_eq!(rows[1]["furnace"], "F2");
    }

    #[test]
    fn test_furnace_names_decoding() {
        assert_eq!(furnace_names("f=A&x=1&f=Furnace%202"), vec!["A", "Furnace 2"]);
        assert!(furnace_names("").is_empty());
    }
}
