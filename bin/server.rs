// Geo Point Editor - Web Server
// REST API over one shared editor session

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post},
    Router,
};
use geopoint_editor::{
    DetailForm, EditorConfig, EditorError, EditorSession, GeoPoint, GeocodeEnricher,
    HeadlessSurface, ImportSummary, NominatimGeocoder, PointId, SortKey,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tower_http::cors::CorsLayer;

type Session = EditorSession<HeadlessSurface>;

/// Shared application state
#[derive(Clone)]
struct AppState {
    session: Arc<Mutex<Session>>,
    config: Arc<EditorConfig>,
}

impl AppState {
    /// Lock the session and fold in any finished name lookups first
    fn session(&self) -> MutexGuard<'_, Session> {
        let mut session = match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        session.poll_enrichments();
        session
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

fn error_response(err: EditorError) -> Response {
    let status = match err {
        EditorError::InvalidCoordinate { .. } | EditorError::MalformedImportRow { .. } => {
            StatusCode::BAD_REQUEST
        }
        EditorError::DuplicatePoint { .. } => StatusCode::CONFLICT,
        EditorError::UnknownPoint(_) | EditorError::UnknownMarker(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Request failed: {}", err);
    }
    (status, Json(ApiResponse::<()>::err(err.to_string()))).into_response()
}

/// Point response (with marker state for the map layer)
#[derive(Serialize)]
struct PointResponse {
    id: PointId,
    name: String,
    lat: f64,
    lon: f64,
    selected: bool,
    marker: Option<u64>,
}

fn point_response(session: &Session, point: GeoPoint) -> PointResponse {
    PointResponse {
        marker: session.markers().marker_for(point.id).map(|m| m.0),
        id: point.id,
        name: point.name,
        lat: point.lat,
        lon: point.lon,
        selected: point.is_selected,
    }
}

#[derive(Deserialize)]
struct FilterQuery {
    #[serde(default)]
    filter: Option<String>,
}

#[derive(Deserialize)]
struct CreatePoint {
    #[serde(default)]
    name: String,
    lat: f64,
    lon: f64,
}

#[derive(Serialize)]
struct SortResponse {
    key: SortKey,
    direction: geopoint_editor::Direction,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/points?filter= - Live filtered view (sets the session's filter)
async fn list_points(
    State(state): State<AppState>,
    Query(query): Query<FilterQuery>,
) -> impl IntoResponse {
    let mut session = state.session();
    if let Some(pattern) = query.filter {
        session.set_filter(&pattern);
    }

    let points: Vec<PointResponse> = session
        .filtered()
        .into_iter()
        .map(|p| point_response(&session, p))
        .collect();

    Json(ApiResponse::ok(points))
}

/// POST /api/points - Create a point (same path as a map double-click)
async fn create_point(
    State(state): State<AppState>,
    Json(body): Json<CreatePoint>,
) -> Response {
    let mut session = state.session();
    match session.create_point(&body.name, body.lat, body.lon) {
        Ok(point) => {
            let response = point_response(&session, point);
            (StatusCode::CREATED, Json(ApiResponse::ok(response))).into_response()
        }
        Err(err) => error_response(err),
    }
}

/// PATCH /api/points/:id - Commit the detail form of a point
async fn edit_point(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(form): Json<DetailForm>,
) -> Response {
    let Some(id) = PointId::parse(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::err(format!("bad point id {:?}", id))),
        )
            .into_response();
    };

    let mut session = state.session();
    match session.edit_point(id, &form) {
        Ok(point) => {
            let response = point_response(&session, point);
            Json(ApiResponse::ok(response)).into_response()
        }
        Err(err) => error_response(err),
    }
}

/// DELETE /api/points/:id - Delete one point and its marker
async fn delete_point(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(id) = PointId::parse(&id) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let mut session = state.session();
    match session.delete_point(id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// DELETE /api/points?filter= - Delete everything in the filtered view
async fn delete_filtered(
    State(state): State<AppState>,
    Query(query): Query<FilterQuery>,
) -> impl IntoResponse {
    let mut session = state.session();
    if let Some(pattern) = query.filter {
        session.set_filter(&pattern);
    }
    let removed = session.remove_all_filtered();
    Json(ApiResponse::ok(removed))
}

/// POST /api/sort/:key - Sort by name/lat/lon, toggling that key's direction
async fn sort_points(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    let Some(key) = SortKey::parse(&key) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::err(format!("unknown sort key {:?}", key))),
        )
            .into_response();
    };

    let direction = state.session().sort(key);
    Json(ApiResponse::ok(SortResponse { key, direction })).into_response()
}

/// GET /api/export - CSV download
async fn export_points(State(state): State<AppState>) -> Response {
    let session = state.session();
    match session.export_csv() {
        Ok(text) => (
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", state.config.export_filename),
                ),
            ],
            text,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

/// POST /api/import - CSV body, rows added through the normal add path
async fn import_points(State(state): State<AppState>, body: Bytes) -> Response {
    let text = String::from_utf8_lossy(&body);
    let mut session = state.session();
    match session.import_csv(&text) {
        Ok(summary) => {
            info!("Import via API: {} added, {} skipped", summary.added, summary.skipped());
            Json(ApiResponse::<ImportSummary>::ok(summary)).into_response()
        }
        Err(err) => error_response(err),
    }
}

fn build_router(state: AppState) -> Router {
    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route(
            "/points",
            get(list_points).post(create_point).delete(delete_filtered),
        )
        .route("/points/:id", patch(edit_point).delete(delete_point))
        .route("/sort/:key", post(sort_points))
        .route("/export", get(export_points))
        .route("/import", post(import_points))
        .with_state(state);

    // Build main router
    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("🌐 Geo Point Editor - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config_path =
        std::env::var("GEOPOINT_CONFIG").unwrap_or_else(|_| "geopoint.json".to_string());
    let config = match EditorConfig::load(std::path::Path::new(&config_path)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("❌ {:#}", err);
            std::process::exit(1);
        }
    };

    let mut session = EditorSession::new(HeadlessSurface::new(), &config);
    if config.geocode.enabled {
        match NominatimGeocoder::new(&config.geocode) {
            Ok(geocoder) => {
                if let Some(enricher) = GeocodeEnricher::on_current_runtime(Arc::new(geocoder)) {
                    session = session.with_enricher(enricher);
                    println!("✓ Reverse geocoding via {}", config.geocode.endpoint);
                }
            }
            Err(err) => warn!("Reverse geocoding disabled: {}", err),
        }
    }

    // Create shared state
    let state = AppState {
        session: Arc::new(Mutex::new(session)),
        config: Arc::new(config.clone()),
    };

    // Lookups finish in the background; fold them in even when nobody calls the API
    let poller = state.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(500));
        loop {
            tick.tick().await;
            drop(poller.session());
        }
    });

    let app = build_router(state);

    // Start server
    let listener = match tokio::net::TcpListener::bind(&config.bind).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("❌ Failed to bind to {}: {}", config.bind, err);
            std::process::exit(1);
        }
    };

    println!("\n🚀 Server running on http://{}", config.bind);
    println!("   API: http://{}/api/points", config.bind);
    println!("\n   Press Ctrl+C to stop\n");

    if let Err(err) = axum::serve(listener, app).await {
        eprintln!("❌ Server error: {}", err);
        std::process::exit(1);
    }
}
