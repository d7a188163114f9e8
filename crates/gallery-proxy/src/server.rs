//! HTTP server for the gallery endpoints
//!
//! Provides /health, /manifest/{dates,collections,images}, /image/{hash} and
//! the /admin/cache maintenance routes.

use crate::config::Settings;
use crate::coordinator::DownloadCoordinator;
use crate::error::{ProxyError, Result};
use crate::image::{ImageBody, ImageProxy, ServedImage};
use crate::manifests::{ImageFilter, ManifestProxy};
use crate::origin::OriginClient;
use crate::scheduler::RefreshScheduler;
use crate::types::{CacheHealth, ClearResponse, HealthResponse};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get},
    Router,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use gallery_cache::{CacheStats, ContentStore, ManifestCache};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000";
const ONE_YEAR_DAYS: i64 = 365;
const X_CACHE: &str = "x-cache";

/// Application context, built once at startup and shared by every handler
pub struct ServerState {
    pub settings: Arc<Settings>,
    pub store: ContentStore,
    pub origin: Arc<OriginClient>,
    pub coordinator: Arc<DownloadCoordinator>,
    pub images: ImageProxy,
    pub manifests: ManifestProxy,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(settings: Settings, scheduler: Arc<dyn RefreshScheduler>) -> Result<Self> {
        let settings = Arc::new(settings);
        let store = ContentStore::new(settings.cache_dir.clone());
        let origin = Arc::new(OriginClient::new()?);
        let coordinator = Arc::new(DownloadCoordinator::new(
            store.clone(),
            Arc::clone(&origin),
            scheduler,
            Arc::clone(&settings),
        ));
        let images = ImageProxy::new(
            Arc::clone(&settings),
            store.clone(),
            Arc::clone(&origin),
            Arc::clone(&coordinator),
        );
        let manifests = ManifestProxy::new(
            Arc::clone(&settings),
            Arc::clone(&origin),
            Arc::new(ManifestCache::new()),
        );

        Ok(Self {
            settings,
            store,
            origin,
            coordinator,
            images,
            manifests,
            started_at: Utc::now(),
        })
    }
}

pub type SharedState = Arc<ServerState>;

#[derive(Debug, Default, Deserialize)]
struct ManifestParams {
    nocache: Option<String>,
    date: Option<String>,
    collection: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ImageParams {
    thumb: Option<String>,
}

/// `?flag`, `?flag=1` and `?flag=true` all switch a flag on
fn flag(value: &Option<String>) -> bool {
    matches!(
        value.as_deref().map(str::to_ascii_lowercase).as_deref(),
        Some("" | "1" | "true" | "yes")
    )
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    let admin = Router::new()
        .route("/cache", delete(clear_all))
        .route("/cache/dates", delete(clear_dates))
        .route("/cache/collections", delete(clear_collections))
        .route("/cache/images", delete(clear_images))
        .route("/cache/stats", get(cache_stats));

    Router::new()
        .route("/health", get(health))
        .route("/manifest/dates", get(get_dates))
        .route("/manifest/collections", get(get_collections))
        .route("/manifest/images", get(get_images))
        .route("/image/{hash}", get(get_image))
        .nest("/admin", admin)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let stats = state.store.stats().await.unwrap_or_else(|e| {
        warn!(error = %e, "Failed to read cache stats");
        CacheStats::default()
    });
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: CacheHealth {
            files: stats.files,
            total_size: stats.total_size,
            manifests: state.manifests.cached_count().await,
        },
        in_flight: state.coordinator.stats().in_flight,
    })
}

async fn get_dates(
    State(state): State<SharedState>,
    Query(params): Query<ManifestParams>,
) -> Result<Json<Value>> {
    Ok(Json(state.manifests.dates(flag(&params.nocache)).await?))
}

async fn get_collections(
    State(state): State<SharedState>,
    Query(params): Query<ManifestParams>,
) -> Result<Json<Value>> {
    Ok(Json(state.manifests.collections(flag(&params.nocache)).await?))
}

async fn get_images(
    State(state): State<SharedState>,
    Query(params): Query<ManifestParams>,
) -> Result<Json<Value>> {
    let nocache = flag(&params.nocache);
    let filter = ImageFilter {
        date: params.date,
        collection: params.collection,
    };
    Ok(Json(state.manifests.images(&filter, nocache).await?))
}

/// Serve an image by content hash; failures answer with a short text body
async fn get_image(
    State(state): State<SharedState>,
    Path(hash): Path<String>,
    Query(params): Query<ImageParams>,
) -> Response {
    match state.images.serve(&hash, flag(&params.thumb)).await {
        Ok(image) => image_response(image),
        Err(e) => {
            if e.status().is_server_error() {
                warn!(error = %e, "Image request failed");
            }
            (e.status(), e.public_message()).into_response()
        }
    }
}

fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn image_response(image: ServedImage) -> Response {
    let cached = image.is_cached();
    let body = match image.body {
        ImageBody::Bytes(data) => Body::from(data),
        ImageBody::Stream(response) => Body::from_stream(response.bytes_stream()),
    };

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&image.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("image/jpeg")),
    );
    if let Some(length) = image.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    if cached {
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(IMMUTABLE_CACHE_CONTROL),
        );
        let expires = http_date(Utc::now() + ChronoDuration::days(ONE_YEAR_DAYS));
        if let Ok(value) = HeaderValue::from_str(&expires) {
            headers.insert(header::EXPIRES, value);
        }
    } else {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    }
    headers.insert(X_CACHE, HeaderValue::from_static(image.cache.as_str()));
    response
}

/// Admin routes require `Authorization: Bearer <token>` when a token is set
fn authorize(settings: &Settings, headers: &HeaderMap) -> Result<()> {
    let Some(expected) = settings.admin_token.as_deref() else {
        return Ok(());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(()),
        _ => Err(ProxyError::Unauthorized),
    }
}

async fn clear_all(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<ClearResponse>> {
    authorize(&state.settings, &headers)?;
    let files = state.store.clear_all().await?;
    let manifests = state.manifests.clear_all().await;
    info!(files, manifests, "Cleared gallery cache");
    Ok(Json(ClearResponse { files, manifests }))
}

async fn clear_dates(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<ClearResponse>> {
    authorize(&state.settings, &headers)?;
    let manifests = state.manifests.clear_dates().await;
    info!(manifests, "Cleared dates manifest");
    Ok(Json(ClearResponse {
        files: 0,
        manifests,
    }))
}

async fn clear_collections(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<ClearResponse>> {
    authorize(&state.settings, &headers)?;
    let manifests = state.manifests.clear_collections().await;
    info!(manifests, "Cleared collections manifest");
    Ok(Json(ClearResponse {
        files: 0,
        manifests,
    }))
}

async fn clear_images(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<ClearResponse>> {
    authorize(&state.settings, &headers)?;
    let manifests = state.manifests.clear_images().await;
    info!(manifests, "Cleared image list manifests");
    Ok(Json(ClearResponse {
        files: 0,
        manifests,
    }))
}

async fn cache_stats(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<CacheStats>> {
    authorize(&state.settings, &headers)?;
    Ok(Json(state.store.stats().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        counting_origin, jpeg_bytes, spawn_origin, test_settings, test_state, test_state_with,
        RecordingScheduler, HASH,
    };
    use axum::http::Request;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn scheduler() -> Arc<RecordingScheduler> {
        Arc::new(RecordingScheduler::default())
    }

    async fn send(router: Router, method: &str, uri: &str, token: Option<&str>) -> Response {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        router
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_flag() {
        assert!(flag(&Some("1".to_string())));
        assert!(flag(&Some("TRUE".to_string())));
        assert!(flag(&Some(String::new())));
        assert!(!flag(&Some("0".to_string())));
        assert!(!flag(&None));
    }

    #[test]
    fn test_http_date() {
        let at = DateTime::parse_from_rfc3339("2025-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(http_date(at), "Thu, 02 Jan 2025 03:04:05 GMT");
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), None, scheduler()).await;
        let response = send(create_router(state), "GET", "/health", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["uptime_secs"].as_u64().is_some());
        assert_eq!(json["cache"]["files"], 0);
        assert_eq!(json["in_flight"], 0);
    }

    #[tokio::test]
    async fn test_invalid_hash_is_bad_request() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), Some("http://127.0.0.1:1"), scheduler()).await;
        let response = send(create_router(state.clone()), "GET", "/image/not-a-hash", None).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_bytes(response).await, b"Invalid key");
        assert_eq!(state.origin.request_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_base_url_is_bad_request() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), None, scheduler()).await;

        let response = send(
            create_router(state.clone()),
            "GET",
            &format!("/image/{}", HASH),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(create_router(state), "GET", "/manifest/dates", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["error"], "Base URL not configured");
    }

    #[tokio::test]
    async fn test_cached_image_headers() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), None, scheduler()).await;
        state
            .store
            .put(&format!("media-{}.jpg", HASH), &jpeg_bytes(640))
            .await
            .unwrap();

        let response = send(
            create_router(state),
            "GET",
            &format!("/image/{}", HASH),
            None,
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(headers[header::CONTENT_LENGTH], "640");
        assert_eq!(headers[header::CACHE_CONTROL], IMMUTABLE_CACHE_CONTROL);
        assert!(headers.contains_key(header::EXPIRES));
        assert_eq!(headers["X-Cache"], "HIT");
        assert_eq!(body_bytes(response).await, jpeg_bytes(640));
    }

    #[tokio::test]
    async fn test_failed_image_is_not_found_text() {
        let base = spawn_origin(Router::new()).await;
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), Some(&base), scheduler()).await;

        let response = send(
            create_router(state),
            "GET",
            &format!("/image/{}?thumb=1", HASH),
            None,
        )
        .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert_eq!(body, "Image not found");
        assert!(!body.contains(&base));
    }

    #[tokio::test]
    async fn test_concurrent_cold_requests_fetch_once() {
        let origin = counting_origin(jpeg_bytes(5000), Duration::from_millis(200)).await;
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), Some(&origin.base_url), scheduler()).await;
        let router = create_router(state);
        let uri = format!("/image/{}", HASH);

        let (a, b) = tokio::join!(
            send(router.clone(), "GET", &uri, None),
            send(router.clone(), "GET", &uri, None),
        );

        assert_eq!(a.status(), StatusCode::OK);
        assert_eq!(b.status(), StatusCode::OK);
        assert_eq!(a.headers()["X-Cache"], "MISS");
        let (a, b) = (body_bytes(a).await, body_bytes(b).await);
        assert_eq!(a, b);
        assert_eq!(a, jpeg_bytes(5000));
        assert_eq!(origin.hits(), 1);
    }

    #[tokio::test]
    async fn test_async_thumbnail_streams_origin() {
        let origin = counting_origin(jpeg_bytes(1200), Duration::ZERO).await;
        let dir = tempdir().unwrap();
        let recorder = scheduler();
        let settings = Settings {
            thumbnail_sync: false,
            ..test_settings(dir.path(), Some(&origin.base_url))
        };
        let state = test_state_with(settings, recorder.clone()).await;

        let response = send(
            create_router(state),
            "GET",
            &format!("/image/{}?thumb=1", HASH),
            None,
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["X-Cache"], "MISS");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(body_bytes(response).await.len(), 1200);
        assert_eq!(recorder.jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_manifest_routes() {
        let base = spawn_origin(
            Router::new()
                .route(
                    "/api/public/dates",
                    get(|| async { Json(json!(["2024-05-01"])) }),
                )
                .route(
                    "/api/public/images",
                    get(|| async {
                        Json(json!([{
                            "public_url": format!("/api/media/public/{}", HASH),
                            "thumbnail_url": format!("/api/media/public/thumbnail/{}", HASH),
                        }]))
                    }),
                ),
        )
        .await;
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), Some(&base), scheduler()).await;
        let router = create_router(state.clone());

        let response = send(router.clone(), "GET", "/manifest/dates", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json, json!(["2024-05-01"]));

        send(router.clone(), "GET", "/manifest/dates", None).await;
        assert_eq!(state.origin.request_count(), 1);
        send(router.clone(), "GET", "/manifest/dates?nocache=1", None).await;
        assert_eq!(state.origin.request_count(), 2);

        let response = send(
            router,
            "GET",
            "/manifest/images?date=2024-05-01&collection=Birds",
            None,
        )
        .await;
        let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["items"][0]["public_url"], format!("/image/{}", HASH));
        assert_eq!(
            json["items"][0]["thumbnail_url"],
            format!("/image/{}?thumb=1", HASH)
        );
    }

    #[tokio::test]
    async fn test_upstream_manifest_error_is_server_error() {
        let base = spawn_origin(Router::new()).await;
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), Some(&base), scheduler()).await;

        let response = send(create_router(state), "GET", "/manifest/collections", None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["error"], "Upstream API error");
    }

    #[tokio::test]
    async fn test_admin_requires_token() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            admin_token: Some("s3cret".to_string()),
            ..test_settings(dir.path(), None)
        };
        let state = test_state_with(settings, scheduler()).await;
        state
            .store
            .put(&format!("media-{}.jpg", HASH), &jpeg_bytes(300))
            .await
            .unwrap();
        let router = create_router(state.clone());

        let response = send(router.clone(), "DELETE", "/admin/cache", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = send(router.clone(), "DELETE", "/admin/cache", Some("wrong")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(router.clone(), "GET", "/admin/cache/stats", Some("s3cret")).await;
        let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json, json!({"files": 1, "total_size": 300}));

        let response = send(router, "DELETE", "/admin/cache", Some("s3cret")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["files"], 1);
        assert_eq!(state.store.stats().await.unwrap().files, 0);
    }

    #[tokio::test]
    async fn test_admin_clear_manifests_without_token() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), None, scheduler()).await;
        let router = create_router(state);

        for uri in ["/admin/cache/dates", "/admin/cache/collections", "/admin/cache/images"] {
            let response = send(router.clone(), "DELETE", uri, None).await;
            assert_eq!(response.status(), StatusCode::OK);
            let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
            assert_eq!(json["manifests"], 0);
        }
    }

    #[test]
    fn test_server_state_new() {
        let dir = tempdir().unwrap();
        let state = ServerState::new(test_settings(dir.path(), None), scheduler()).unwrap();

        let diff = (Utc::now() - state.started_at).num_seconds();
        assert!((0..5).contains(&diff));
    }
}
