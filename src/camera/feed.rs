use crate::camera::source::create_source;
use crate::config::CameraConfig;
use crate::frame::FrameData;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long `start()` waits for the first connection before reporting
const START_GRACE: Duration = Duration::from_secs(2);

/// Bounded join timeout for the capture task on `stop()`
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Width of the rolling window used for measured fps
const FPS_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CameraState {
    Disconnected,
    Connecting,
    Streaming,
}

impl CameraState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CameraState::Connecting,
            2 => CameraState::Streaming,
            _ => CameraState::Disconnected,
        }
    }
}

/// Live camera counters. Written only by the capture task; every reader
/// goes through `snapshot()`.
#[derive(Debug, Default)]
pub struct CameraStatus {
    state: AtomicU8,
    connected: AtomicBool,
    frame_count: AtomicU64,
    error_count: AtomicU64,
    last_frame_time_ms: AtomicU64,
    measured_fps_bits: AtomicU64,
    last_error: RwLock<Option<String>>,
}

impl CameraStatus {
    fn set_state(&self, state: CameraState) {
        self.state.store(state as u8, Ordering::Release);
        self.connected
            .store(state == CameraState::Streaming, Ordering::Release);
    }

    fn record_frame(&self, fps: f64) {
        self.frame_count.fetch_add(1, Ordering::Relaxed);
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.last_frame_time_ms.store(now_ms, Ordering::Relaxed);
        self.measured_fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    fn record_error(&self, message: String) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        *self.last_error.write() = Some(message);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CameraStatusSnapshot {
        CameraStatusSnapshot {
            state: CameraState::from_u8(self.state.load(Ordering::Acquire)),
            connected: self.connected.load(Ordering::Acquire),
            frame_count: self.frame_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            last_frame_time_ms: self.last_frame_time_ms.load(Ordering::Relaxed),
            measured_fps: f64::from_bits(self.measured_fps_bits.load(Ordering::Relaxed)),
            last_error: self.last_error.read().clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraStatusSnapshot {
    pub state: CameraState,
    pub connected: bool,
    pub frame_count: u64,
    pub error_count: u64,
    pub last_frame_time_ms: u64,
    pub measured_fps: f64,
    pub last_error: Option<String>,
}

/// One camera: configuration, capture task, latest-frame slot, counters.
///
/// The frame slot is single-slot last-writer-wins; readers never block the
/// capture path beyond a pointer clone under a short read lock.
pub struct CameraFeed {
    config: CameraConfig,
    status: Arc<CameraStatus>,
    slot: Arc<RwLock<Option<FrameData>>>,
    token: CancellationToken,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    is_running: AtomicBool,
}

impl CameraFeed {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            status: Arc::new(CameraStatus::default()),
            slot: Arc::new(RwLock::new(None)),
            token: CancellationToken::new(),
            handle: tokio::sync::Mutex::new(None),
            is_running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn camera_id(&self) -> &str {
        &self.config.camera_id
    }

    pub fn status(&self) -> &CameraStatus {
        &self.status
    }

    /// Spawn the capture task and report whether the source connected
    /// within a short grace period. Idempotent; a disabled camera is a
    /// no-op returning false.
    pub async fn start(&self) -> bool {
        if !self.config.enabled {
            debug!(camera_id = %self.config.camera_id, "Camera disabled, not starting");
            return false;
        }
        if self.is_running.swap(true, Ordering::AcqRel) {
            return self.status.is_connected();
        }

        info!(
            camera_id = %self.config.camera_id,
            uri = %self.config.sanitized_uri(),
            "Starting camera capture"
        );

        let task = CaptureTask {
            config: self.config.clone(),
            status: Arc::clone(&self.status),
            slot: Arc::clone(&self.slot),
            token: self.token.child_token(),
        };
        let handle = tokio::spawn(task.run());
        *self.handle.lock().await = Some(handle);

        let deadline = Instant::now() + START_GRACE;
        while Instant::now() < deadline {
            if self.status.is_connected() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.status.is_connected()
    }

    /// Cancel the capture task and join it with a bounded timeout. After
    /// this returns no further frame or status writes happen. Terminal.
    pub async fn stop(&self) {
        self.token.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            match tokio::time::timeout(STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => {
                    debug!(camera_id = %self.config.camera_id, "Capture task stopped")
                }
                Ok(Err(e)) => {
                    error!(camera_id = %self.config.camera_id, error = %e, "Capture task panicked")
                }
                Err(_) => {
                    warn!(
                        camera_id = %self.config.camera_id,
                        "Capture task did not stop within {:?}", STOP_TIMEOUT
                    );
                }
            }
        }
        self.status.set_state(CameraState::Disconnected);
        self.is_running.store(false, Ordering::Release);
    }

    /// Most recent captured frame, if any. Non-blocking and infallible;
    /// `None` until the first frame arrives.
    pub fn latest_frame(&self) -> Option<FrameData> {
        self.slot.read().clone()
    }
}

struct CaptureTask {
    config: CameraConfig,
    status: Arc<CameraStatus>,
    slot: Arc<RwLock<Option<FrameData>>>,
    token: CancellationToken,
}

impl CaptureTask {
    async fn run(self) {
        let camera_id = self.config.camera_id.clone();
        let retry_interval = Duration::from_secs(self.config.retry_interval_seconds);
        let connect_timeout = Duration::from_secs(self.config.connect_timeout_seconds);
        let frame_interval = Duration::from_secs_f64(1.0 / self.config.target_fps.max(1) as f64);
        let mut fps_window: VecDeque<Instant> = VecDeque::new();

        'reconnect: while !self.token.is_cancelled() {
            self.status.set_state(CameraState::Connecting);

            let mut source = match create_source(&self.config) {
                Ok(source) => source,
                Err(e) => {
                    warn!(camera_id = %camera_id, error = %e, "Cannot build camera source");
                    self.status.record_error(e.to_string());
                    if self.wait_retry(retry_interval).await {
                        break 'reconnect;
                    }
                    continue;
                }
            };

            let connected = tokio::select! {
                _ = self.token.cancelled() => break 'reconnect,
                result = tokio::time::timeout(connect_timeout, source.connect()) => result,
            };
            match connected {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(camera_id = %camera_id, error = %e, "Camera connect failed");
                    self.status.record_error(e.to_string());
                    if self.wait_retry(retry_interval).await {
                        break 'reconnect;
                    }
                    continue;
                }
                Err(_) => {
                    warn!(camera_id = %camera_id, "Camera connect timed out");
                    self.status
                        .record_error(format!("connect timed out after {:?}", connect_timeout));
                    if self.wait_retry(retry_interval).await {
                        break 'reconnect;
                    }
                    continue;
                }
            }

            self.status.set_state(CameraState::Streaming);
            info!(camera_id = %camera_id, "Camera streaming");

            loop {
                let iteration_start = Instant::now();

                let read = tokio::select! {
                    _ = self.token.cancelled() => {
                        source.disconnect().await;
                        break 'reconnect;
                    }
                    result = source.read_frame() => result,
                };

                match read {
                    Ok(frame) => {
                        let now = Instant::now();
                        fps_window.push_back(now);
                        while fps_window
                            .front()
                            .is_some_and(|t| now.duration_since(*t) > FPS_WINDOW)
                        {
                            fps_window.pop_front();
                        }
                        let fps = fps_window.len() as f64 / FPS_WINDOW.as_secs_f64();
                        self.status.record_frame(fps);
                        *self.slot.write() = Some(frame);
                    }
                    Err(e) => {
                        warn!(camera_id = %camera_id, error = %e, "Frame read failed");
                        self.status.record_error(e.to_string());
                        self.status.set_state(CameraState::Disconnected);
                        source.disconnect().await;
                        fps_window.clear();
                        if self.wait_retry(retry_interval).await {
                            break 'reconnect;
                        }
                        continue 'reconnect;
                    }
                }

                // Pace to target fps
                let elapsed = iteration_start.elapsed();
                if elapsed < frame_interval {
                    tokio::select! {
                        _ = self.token.cancelled() => {
                            source.disconnect().await;
                            break 'reconnect;
                        }
                        _ = tokio::time::sleep(frame_interval - elapsed) => {}
                    }
                }
            }
        }

        self.status.set_state(CameraState::Disconnected);
        debug!(camera_id = %camera_id, "Capture task exiting");
    }

    /// Sleep out the retry interval; true means cancellation arrived
    async fn wait_retry(&self, interval: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => true,
            _ = tokio::time::sleep(interval) => false,
        }
    }
}
