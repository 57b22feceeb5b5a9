use crate::alerts::AlertPipeline;
use crate::camera::CameraRegistry;
use crate::config::ApiConfig;
use crate::detection::SharedThresholds;
use crate::error::{ApiError, Result};
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use super::handlers;

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ApiState {
    pub(crate) registry: Arc<CameraRegistry>,
    pub(crate) pipeline: Arc<AlertPipeline>,
    pub(crate) thresholds: SharedThresholds,
    pub(crate) max_cameras: usize,
    pub(crate) started_at: Instant,
}

/// HTTP surface over the running system: health, dashboard data, threshold
/// and acknowledge actions, camera management, current-frame export.
pub struct ApiServer {
    config: ApiConfig,
    state: ApiState,
}

impl ApiServer {
    pub fn new(
        config: ApiConfig,
        registry: Arc<CameraRegistry>,
        pipeline: Arc<AlertPipeline>,
        thresholds: SharedThresholds,
        max_cameras: usize,
    ) -> Self {
        Self {
            config,
            state: ApiState {
                registry,
                pipeline,
                thresholds,
                max_cameras,
                started_at: Instant::now(),
            },
        }
    }

    pub fn router(state: ApiState) -> Router {
        Router::new()
            .route("/api/health", get(handlers::health_handler))
            .route("/api/dashboard", get(handlers::dashboard_handler))
            .route("/api/threshold", post(handlers::threshold_handler))
            .route("/api/acknowledge", post(handlers::acknowledge_handler))
            .route(
                "/api/cameras",
                get(handlers::list_cameras_handler).post(handlers::add_camera_handler),
            )
            .route("/api/cameras/:id", delete(handlers::remove_camera_handler))
            .route("/api/cameras/:id/test", post(handlers::test_camera_handler))
            .route("/api/cameras/:id/frame", get(handlers::frame_handler))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind and start serving. A bind failure is reported synchronously so
    /// startup can abort; the serving task itself runs until `token` fires.
    pub async fn start(self, token: CancellationToken) -> Result<JoinHandle<()>> {
        let addr = format!("{}:{}", self.config.ip, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ApiError::BindFailed {
                address: addr.clone(),
                source: e,
            })?;

        info!("API server listening on {}", addr);
        let app = Self::router(self.state);

        Ok(tokio::spawn(async move {
            let shutdown = async move { token.cancelled().await };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "API server error");
            }
            info!("API server stopped");
        }))
    }
}
