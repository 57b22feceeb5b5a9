use crate::camera::CameraRegistry;
use crate::config::CameraConfig;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

use super::server::ApiState;

/// Window the dashboard aggregates over
const DASHBOARD_WINDOW: Duration = Duration::from_secs(24 * 3600);
const DASHBOARD_ALERT_LIMIT: usize = 50;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

pub async fn health_handler(State(state): State<ApiState>) -> Response {
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "cameras": {
            "total": state.registry.camera_count(),
            "connected": state.registry.connected_count(),
        },
    }))
    .into_response()
}

pub async fn dashboard_handler(State(state): State<ApiState>) -> Response {
    let store = state.pipeline.store();
    let statistics = store.get_statistics(DASHBOARD_WINDOW);
    Json(json!({
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "recent_alerts": store.get_recent(DASHBOARD_WINDOW, DASHBOARD_ALERT_LIMIT),
        "statistics": statistics,
        "active_alerts": store.active_count(),
        "thresholds": state.thresholds.get(),
        "cameras": {
            "total": state.registry.camera_count(),
            "connected": state.registry.connected_count(),
            "statuses": state.registry.statuses(),
        },
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct ThresholdRequest {
    pub threshold: String,
    pub value: f64,
}

pub async fn threshold_handler(
    State(state): State<ApiState>,
    Json(request): Json<ThresholdRequest>,
) -> Response {
    match state
        .thresholds
        .update_field(&request.threshold, request.value)
    {
        Ok(()) => {
            info!(threshold = %request.threshold, value = request.value, "Threshold updated via API");
            Json(json!({
                "success": true,
                "thresholds": state.thresholds.get(),
            }))
            .into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    pub alert_id: String,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn acknowledge_handler(
    State(state): State<ApiState>,
    Json(request): Json<AcknowledgeRequest>,
) -> Response {
    let store = state.pipeline.store();
    if store.acknowledge(&request.alert_id, request.notes) {
        Json(json!({ "success": true, "alert_id": request.alert_id })).into_response()
    } else {
        error_response(
            StatusCode::NOT_FOUND,
            format!("Unknown alert '{}'", request.alert_id),
        )
    }
}

pub async fn list_cameras_handler(State(state): State<ApiState>) -> Response {
    let statuses = state.registry.statuses();
    let cameras: Vec<serde_json::Value> = state
        .registry
        .configs()
        .into_iter()
        .map(|config| {
            json!({
                "camera_id": config.camera_id,
                "source_uri": config.sanitized_uri(),
                "enabled": config.enabled,
                "target_fps": config.target_fps,
                "resolution": config.resolution,
                "status": statuses.get(&config.camera_id),
            })
        })
        .collect();
    Json(json!({ "cameras": cameras, "max_cameras": state.max_cameras })).into_response()
}

pub async fn add_camera_handler(
    State(state): State<ApiState>,
    Json(config): Json<CameraConfig>,
) -> Response {
    let camera_id = config.camera_id.clone();
    if let Err(e) = state.registry.add_camera(config) {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    let connected = state
        .registry
        .start_camera(&camera_id)
        .await
        .unwrap_or(false);
    info!(camera_id = %camera_id, connected, "Camera added via API");
    (
        StatusCode::CREATED,
        Json(json!({ "camera_id": camera_id, "connected": connected })),
    )
        .into_response()
}

pub async fn remove_camera_handler(
    State(state): State<ApiState>,
    Path(camera_id): Path<String>,
) -> Response {
    if state.registry.remove_camera(&camera_id).await {
        Json(json!({ "success": true })).into_response()
    } else {
        error_response(
            StatusCode::NOT_FOUND,
            format!("Unknown camera '{}'", camera_id),
        )
    }
}

pub async fn test_camera_handler(
    State(state): State<ApiState>,
    Path(camera_id): Path<String>,
) -> Response {
    let config = state
        .registry
        .configs()
        .into_iter()
        .find(|c| c.camera_id == camera_id);
    let Some(config) = config else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("Unknown camera '{}'", camera_id),
        );
    };

    match CameraRegistry::test_source(&config).await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(e) => {
            warn!(camera_id = %camera_id, error = %e, "Camera connection test failed");
            Json(json!({ "success": false, "error": e.to_string() })).into_response()
        }
    }
}

pub async fn frame_handler(
    State(state): State<ApiState>,
    Path(camera_id): Path<String>,
) -> Response {
    if !state.registry.contains(&camera_id) {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("Unknown camera '{}'", camera_id),
        );
    }
    let Some(frame) = state.registry.latest_frame(&camera_id) else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("No frame available for camera '{}'", camera_id),
        );
    };

    match frame.to_jpeg() {
        Ok(jpeg) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "image/jpeg".to_string()),
                (
                    header::HeaderName::from_static("x-frame-id"),
                    frame.id.to_string(),
                ),
            ],
            bytes::Bytes::from(jpeg),
        )
            .into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Frame encode failed: {}", e),
        ),
    }
}
