use crate::alerts::notify::{LogNotifier, Notifier};
use crate::alerts::store::AlertStore;
use crate::alerts::AlertPipeline;
use crate::api::ApiServer;
use crate::camera::CameraRegistry;
use crate::config::{ConfigManager, SentinelConfig};
use crate::detection::{ColorHeuristicDetector, Detector, SharedThresholds};
use crate::dispatcher::{DetectionHandler, FrameDispatcher};
use crate::error::Result;
use crate::frame::FrameData;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Bounded join wait per component during shutdown
const COMPONENT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(1);
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Detection stage wired into the dispatcher: one detector per camera,
/// results above threshold forwarded to the alert pipeline.
struct DetectionStage {
    detectors: HashMap<String, ColorHeuristicDetector>,
    thresholds: SharedThresholds,
    pipeline: Arc<AlertPipeline>,
}

impl DetectionHandler for DetectionStage {
    fn handle_batch(&mut self, frames: &[(String, FrameData)]) {
        for (camera_id, frame) in frames {
            let thresholds = self.thresholds.clone();
            let detector = self
                .detectors
                .entry(camera_id.clone())
                .or_insert_with(|| ColorHeuristicDetector::new(thresholds));
            let result = detector.detect(frame);
            if result.severity.is_alertable() {
                self.pipeline.submit(camera_id, &result, Some(frame));
            }
        }
    }
}

/// Supervisor that owns every component of the running system.
///
/// All workers hang off per-component child tokens of one root token so
/// shutdown can proceed in order: dispatcher first (no new detections),
/// then the alert pipeline (drains in-flight alerts), then the cameras,
/// then the API server.
pub struct SentinelOrchestrator {
    config: SentinelConfig,
    registry: Arc<CameraRegistry>,
    store: Arc<AlertStore>,
    pipeline: Arc<AlertPipeline>,
    thresholds: SharedThresholds,

    root_token: CancellationToken,
    dispatcher_token: CancellationToken,
    pipeline_token: CancellationToken,
    api_token: CancellationToken,

    dispatcher_handle: Option<JoinHandle<()>>,
    pipeline_handles: Vec<JoinHandle<()>>,
    api_handle: Option<JoinHandle<()>>,
    maintenance_handles: Vec<JoinHandle<()>>,
}

impl SentinelOrchestrator {
    /// Build the component graph. Fails fast when the alert store cannot
    /// be created; everything else degrades at runtime instead.
    pub async fn new(config: SentinelConfig) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(AlertStore::new(&config.system.data_dir)?);
        let thresholds = SharedThresholds::new(config.thresholds());
        let registry = Arc::new(CameraRegistry::new(config.system.max_concurrent_cameras));
        for camera in &config.cameras {
            registry.add_camera(camera.clone())?;
        }

        let root_token = CancellationToken::new();
        let pipeline_token = root_token.child_token();
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
        let (pipeline, pipeline_handles) = AlertPipeline::start(
            Arc::clone(&store),
            notifier,
            config.system.max_alerts_per_hour,
            config.system.max_alerts_per_day,
            pipeline_token.clone(),
        );

        Ok(Self {
            dispatcher_token: root_token.child_token(),
            api_token: root_token.child_token(),
            root_token,
            pipeline_token,
            config,
            registry,
            store,
            pipeline,
            thresholds,
            dispatcher_handle: None,
            pipeline_handles,
            api_handle: None,
            maintenance_handles: Vec::new(),
        })
    }

    pub fn registry(&self) -> &Arc<CameraRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<AlertStore> {
        &self.store
    }

    pub fn thresholds(&self) -> &SharedThresholds {
        &self.thresholds
    }

    /// Start cameras, dispatcher, API server, and maintenance loops.
    /// `config_manager` enables hot reload of thresholds and rate limits.
    pub async fn start(&mut self, config_manager: Option<ConfigManager>) -> Result<()> {
        let connected = self.registry.start_all().await;
        info!(
            connected,
            total = self.registry.camera_count(),
            "Cameras started"
        );

        let handler = Box::new(DetectionStage {
            detectors: HashMap::new(),
            thresholds: self.thresholds.clone(),
            pipeline: Arc::clone(&self.pipeline),
        });
        let dispatcher = FrameDispatcher::new(Arc::clone(&self.registry));
        self.dispatcher_handle = Some(tokio::spawn(
            dispatcher.run(handler, self.dispatcher_token.clone()),
        ));

        if self.config.api.enabled {
            let server = ApiServer::new(
                self.config.api.clone(),
                Arc::clone(&self.registry),
                Arc::clone(&self.pipeline),
                self.thresholds.clone(),
                self.config.system.max_concurrent_cameras,
            );
            self.api_handle = Some(server.start(self.api_token.clone()).await?);
        }

        self.maintenance_handles.push(tokio::spawn(retention_sweeper(
            Arc::clone(&self.store),
            Duration::from_secs(self.config.system.retention_days as u64 * 86400),
            self.root_token.child_token(),
        )));

        if let Some(manager) = config_manager {
            self.maintenance_handles.push(tokio::spawn(config_reloader(
                manager,
                self.thresholds.clone(),
                Arc::clone(&self.pipeline),
                self.root_token.child_token(),
            )));
        }

        info!("All components started");
        Ok(())
    }

    /// Block until SIGINT or SIGTERM, then shut the system down. Returns
    /// the process exit code.
    pub async fn run(&mut self) -> Result<i32> {
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            info!("Received interrupt");
        }

        self.shutdown().await;
        Ok(0)
    }

    /// Ordered shutdown: dispatcher, alert pipeline (drained), cameras,
    /// API server, then the maintenance loops.
    pub async fn shutdown(&mut self) {
        info!("Shutting down");

        self.dispatcher_token.cancel();
        if let Some(handle) = self.dispatcher_handle.take() {
            join_with_timeout("dispatcher", handle).await;
        }

        self.pipeline_token.cancel();
        for handle in self.pipeline_handles.drain(..) {
            join_with_timeout("alert pipeline", handle).await;
        }

        self.registry.stop_all().await;

        self.api_token.cancel();
        if let Some(handle) = self.api_handle.take() {
            join_with_timeout("api server", handle).await;
        }

        self.root_token.cancel();
        for handle in self.maintenance_handles.drain(..) {
            join_with_timeout("maintenance", handle).await;
        }

        info!("Shutdown complete");
    }
}

async fn join_with_timeout(component: &str, handle: JoinHandle<()>) {
    match tokio::time::timeout(COMPONENT_STOP_TIMEOUT, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(component, error = %e, "Component task panicked"),
        Err(_) => warn!(
            component,
            "Component did not stop within {:?}", COMPONENT_STOP_TIMEOUT
        ),
    }
}

/// Periodic retention sweep, run once at startup and then hourly
async fn retention_sweeper(store: Arc<AlertStore>, retention: Duration, token: CancellationToken) {
    loop {
        store.cleanup(retention);
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(RETENTION_SWEEP_INTERVAL) => {}
        }
    }
}

/// Poll the config file and apply the live-reloadable subset
async fn config_reloader(
    mut manager: ConfigManager,
    thresholds: SharedThresholds,
    pipeline: Arc<AlertPipeline>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(CONFIG_POLL_INTERVAL) => {}
        }

        if let Some(config) = manager.poll() {
            if let Err(e) = thresholds.update(config.thresholds()) {
                warn!(error = %e, "Reloaded thresholds rejected");
            }
            pipeline.set_rate_limits(
                config.system.max_alerts_per_hour,
                config.system.max_alerts_per_day,
            );
        }
    }
}
