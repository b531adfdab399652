//! ==============================================================================
//! server.rs - json api and dashboard
//! ==============================================================================
//!
//! routes:
//!     GET  /api/sensor-data          current reading + lastUpdate
//!     POST /api/sensor-data          deprecated, accepted and ignored
//!     GET  /api/sensor-history       ?limit=N (default from config)
//!     GET  /api/sensor-stats         min/max/avg over the ring
//!     GET  /api/status               uptime, data points, bus state
//!     GET  /api/ota/info             firmware offer + changelog
//!     POST /api/ota/force-update     request the candidate firmware
//!     *    everything else           static files (dashboard)
//!
//! absence of data is never an http error: handlers answer 200 with nulls.
//! a panicking handler is answered with 500 and the server keeps going; the
//! process-wide panic hook (main.rs) does the logging.
//!
//! ==============================================================================

use crate::bus::BusState;
use crate::ota::OtaService;
use crate::query::{CurrentReading, HistoryPage, QueryFacade, StatsReport};

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header::HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

const SERVER_NAME: &str = "Climate Hub";

// ==============================================================================
// shared state
// ==============================================================================
// cheap to clone: every field is a handle. the store itself lives behind the
// query facade and is only ever read from here.

#[derive(Clone)]
pub struct AppState {
    pub query: QueryFacade,
    pub ota: Arc<OtaService>,
    pub bus: watch::Receiver<BusState>,
    pub started: Instant,
    pub ssl: bool,
    pub default_limit: usize,
}

pub fn router(state: AppState, static_dir: PathBuf) -> Router {
    Router::new()
        .route("/api/sensor-data", get(sensor_data).post(legacy_sensor_data))
        .route("/api/sensor-history", get(sensor_history))
        .route("/api/sensor-stats", get(sensor_stats))
        .route("/api/status", get(status))
        .route("/api/ota/info", get(ota_info))
        .route("/api/ota/force-update", post(ota_force_update))
        .fallback_service(ServeDir::new(static_dir))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(port: u16, state: AppState, static_dir: PathBuf) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, static_dir = %static_dir.display(), "dashboard listening");

    axum::serve(listener, router(state, static_dir))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested, history is discarded"),
        Err(e) => {
            error!(error = %e, "cannot listen for ctrl-c, running until killed");
            std::future::pending::<()>().await;
        }
    }
}

// ==============================================================================
// sensor endpoints
// ==============================================================================

async fn sensor_data(State(app): State<AppState>) -> Json<CurrentReading> {
    Json(app.query.get_current().await)
}

#[derive(Debug, Serialize)]
struct LegacyAck {
    success: bool,
    deprecated: bool,
    message: &'static str,
}

/// kept for old firmware that still posts over http; readings now arrive via
/// the broker, so the body is dropped and nothing is recorded
async fn legacy_sensor_data(body: Bytes) -> impl IntoResponse {
    warn!(bytes = body.len(), "ignoring legacy POST /api/sensor-data");
    (
        [(HeaderName::from_static("deprecation"), "true")],
        Json(LegacyAck {
            success: true,
            deprecated: true,
            message: "readings are ingested from the message bus; this payload was not stored",
        }),
    )
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<String>,
}

async fn sensor_history(
    State(app): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Json<HistoryPage> {
    // missing, zero or unparsable limits fall back to the default page size
    let limit = params
        .limit
        .and_then(|l| l.trim().parse::<usize>().ok())
        .filter(|l| *l > 0)
        .unwrap_or(app.default_limit);
    Json(app.query.get_history(limit).await)
}

async fn sensor_stats(State(app): State<AppState>) -> Json<StatsReport> {
    Json(app.query.get_stats().await)
}

// ==============================================================================
// status
// ==============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    success: bool,
    server: &'static str,
    version: &'static str,
    /// seconds since process start
    uptime: f64,
    timestamp: String,
    data_points: usize,
    ssl: bool,
    bus: BusStatus,
}

#[derive(Debug, Serialize)]
struct BusStatus {
    state: BusState,
    connected: bool,
}

async fn status(State(app): State<AppState>) -> Json<StatusReport> {
    let bus = *app.bus.borrow();
    Json(StatusReport {
        success: true,
        server: SERVER_NAME,
        version: env!("CARGO_PKG_VERSION"),
        uptime: app.started.elapsed().as_secs_f64(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        data_points: app.query.data_points().await,
        ssl: app.ssl,
        bus: BusStatus { state: bus, connected: bus.is_connected() },
    })
}

// ==============================================================================
// ota
// ==============================================================================

async fn ota_info(State(app): State<AppState>) -> Response {
    let reported = app.query.reported_firmware().await;
    Json(app.ota.info(reported.as_deref()).await).into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OtaAck {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_version: Option<String>,
}

async fn ota_force_update(State(app): State<AppState>) -> Response {
    let reported = app.query.reported_firmware().await;
    match app.ota.trigger(reported.as_deref(), Utc::now().timestamp()).await {
        Ok(target) => (
            StatusCode::OK,
            Json(OtaAck {
                success: true,
                message: format!("update to {} requested", target),
                target_version: Some(target),
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::CONFLICT,
            Json(OtaAck { success: false, message: e.to_string(), target_version: None }),
        )
            .into_response(),
    }
}

// ==============================================================================
// faults
// ==============================================================================

fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "success": false, "message": "internal error" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Reading;
    use crate::ota::OtaConfig;
    use crate::store::HistoryStore;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt; // for `oneshot`

    struct Harness {
        app: Router,
        store: Arc<HistoryStore>,
        _bus: watch::Sender<BusState>,
    }

    fn harness(candidate: Option<&str>) -> Harness {
        let store = Arc::new(HistoryStore::default());
        let (bus_tx, bus_rx) = watch::channel(BusState::Subscribed);
        let ota = OtaService::new(
            OtaConfig { candidate_version: candidate.map(str::to_string), changelog: vec![] },
            "1.0",
        );
        let state = AppState {
            query: QueryFacade::new(Arc::clone(&store)),
            ota: Arc::new(ota),
            bus: bus_rx,
            started: Instant::now(),
            ssl: true,
            default_limit: 50,
        };
        Harness {
            app: router(state, std::env::temp_dir().join("climate-hub-no-static")),
            store,
            _bus: bus_tx,
        }
    }

    async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn fill(store: &HistoryStore, n: i64) {
        for i in 0..n {
            store.record(Reading::sample(Some(20.0 + i as f64), Some(40.0), 1_700_000_000 + i)).await;
        }
    }

    #[tokio::test]
    async fn sensor_data_before_any_reading() {
        let h = harness(None);
        let (status, body) = call(&h.app, "GET", "/api/sensor-data").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["data"].is_null());
        assert!(body["lastUpdate"].is_null());
    }

    #[tokio::test]
    async fn sensor_data_returns_current_reading() {
        let h = harness(None);
        fill(&h.store, 2).await;

        let (_, body) = call(&h.app, "GET", "/api/sensor-data").await;
        assert_eq!(body["data"]["temperature"], 21.0);
        assert_eq!(body["data"]["timestamp"], 1_700_000_001);
        assert_eq!(body["lastUpdate"], "2023-11-14T22:13:21.000Z");
    }

    #[tokio::test]
    async fn history_limit_and_default() {
        let h = harness(None);
        fill(&h.store, 60).await;

        let (_, body) = call(&h.app, "GET", "/api/sensor-history?limit=3").await;
        assert_eq!(body["count"], 3);
        assert_eq!(body["data"][0]["timestamp"], 1_700_000_057);
        assert_eq!(body["data"][2]["timestamp"], 1_700_000_059);

        let (_, body) = call(&h.app, "GET", "/api/sensor-history").await;
        assert_eq!(body["count"], 50);

        let (status, body) = call(&h.app, "GET", "/api/sensor-history?limit=abc").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 50);
    }

    #[tokio::test]
    async fn stats_empty_then_populated() {
        let h = harness(None);
        let (_, body) = call(&h.app, "GET", "/api/sensor-stats").await;
        assert!(body["data"]["minTemp"].is_null());
        assert!(body["data"]["avgHumidity"].is_null());
        assert_eq!(body["data"]["totalReadings"], 0);

        h.store.record(Reading::sample(Some(20.0), Some(40.0), 1)).await;
        h.store.record(Reading::sample(Some(22.0), Some(42.0), 2)).await;
        h.store.record(Reading::sample(None, Some(45.0), 3)).await;

        let (_, body) = call(&h.app, "GET", "/api/sensor-stats").await;
        assert_eq!(body["data"]["minTemp"], 20.0);
        assert_eq!(body["data"]["maxTemp"], 22.0);
        assert_eq!(body["data"]["avgTemp"], 21.0);
        assert_eq!(body["data"]["avgHumidity"], 42.3);
        assert_eq!(body["data"]["totalReadings"], 3);
    }

    #[tokio::test]
    async fn legacy_post_is_ignored() {
        let h = harness(None);
        let response = h
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sensor-data")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"temperatura": 30}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["deprecation"], "true");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["deprecated"], true);
        assert_eq!(h.store.len().await, 0);
        assert!(h.store.current().await.is_none());
    }

    #[tokio::test]
    async fn status_reports_points_and_bus() {
        let h = harness(None);
        fill(&h.store, 4).await;

        let (_, body) = call(&h.app, "GET", "/api/status").await;
        assert_eq!(body["success"], true);
        assert_eq!(body["server"], SERVER_NAME);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["dataPoints"], 4);
        assert_eq!(body["ssl"], true);
        assert_eq!(body["bus"]["state"], "subscribed");
        assert_eq!(body["bus"]["connected"], true);
        assert!(body["uptime"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn ota_info_and_force_update() {
        let h = harness(Some("1.1"));

        let (status, body) = call(&h.app, "GET", "/api/ota/info").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["currentVersion"], "1.0");
        assert_eq!(body["firmware"]["available"], true);

        let (status, body) = call(&h.app, "POST", "/api/ota/force-update").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["targetVersion"], "1.1");

        let (_, body) = call(&h.app, "GET", "/api/ota/info").await;
        assert_eq!(body["update"]["state"], "requested");
    }

    #[tokio::test]
    async fn force_update_without_candidate_conflicts() {
        let h = harness(None);
        let (status, body) = call(&h.app, "POST", "/api/ota/force-update").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn root_serves_static_dashboard() {
        let dir = std::env::temp_dir().join(format!("climate-hub-static-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("index.html"), "<!doctype html><title>dash</title>").unwrap();

        let (bus_tx, bus_rx) = watch::channel(BusState::Disconnected);
        let state = AppState {
            query: QueryFacade::new(Arc::new(HistoryStore::default())),
            ota: Arc::new(OtaService::new(OtaConfig::default(), "1.0")),
            bus: bus_rx,
            started: Instant::now(),
            ssl: false,
            default_limit: 50,
        };
        let app = router(state, dir.clone());

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("dash"));

        drop(bus_tx);
        std::fs::remove_dir_all(dir).ok();
    }

    async fn failing_handler() -> &'static str {
        panic!("sensor handler failure")
    }

    #[tokio::test]
    async fn panicking_handler_becomes_500() {
        let app = Router::new()
            .route("/boom", get(failing_handler))
            .layer(CatchPanicLayer::custom(panic_response));

        let (status, body) = call(&app, "GET", "/boom").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "internal error");

        // the router keeps serving afterwards
        let (status, _) = call(&app, "GET", "/boom").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
