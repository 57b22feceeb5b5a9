use crate::alerts::notify::Notifier;
use crate::alerts::rate_limit::{AlertRateLimiter, RateLimitDecision};
use crate::alerts::store::{epoch_ms, AlertStore};
use crate::alerts::{Alert, AlertStatus};
use crate::detection::DetectionResult;
use crate::frame::FrameData;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PERSIST_QUEUE_CAPACITY: usize = 64;
const NOTIFY_QUEUE_CAPACITY: usize = 64;

/// How long the workers keep draining queued items after cancellation
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

struct PipelineItem {
    alert: Alert,
    frame: Option<FrameData>,
}

/// Two-stage alert pipeline: persistence first, notification second.
///
/// `submit` is synchronous and cheap — it rate-limits, assigns the alert
/// id, and enqueues. The persistence worker writes the frame image and the
/// record; only successfully stored alerts reach the notification worker.
/// Saturation policy everywhere is drop-incoming with a warning.
pub struct AlertPipeline {
    store: Arc<AlertStore>,
    limiter: Mutex<AlertRateLimiter>,
    last_alert_ms: Mutex<HashMap<String, u64>>,
    persist_tx: mpsc::Sender<PipelineItem>,
}

impl AlertPipeline {
    /// Build the pipeline and spawn its two workers. The returned handles
    /// are joined by the supervisor after cancelling `token`.
    pub fn start(
        store: Arc<AlertStore>,
        notifier: Arc<dyn Notifier>,
        max_per_hour: usize,
        max_per_day: usize,
        token: CancellationToken,
    ) -> (Arc<Self>, Vec<JoinHandle<()>>) {
        let (persist_tx, persist_rx) = mpsc::channel(PERSIST_QUEUE_CAPACITY);
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFY_QUEUE_CAPACITY);

        let pipeline = Arc::new(Self {
            store: Arc::clone(&store),
            limiter: Mutex::new(AlertRateLimiter::new(max_per_hour, max_per_day)),
            last_alert_ms: Mutex::new(HashMap::new()),
            persist_tx,
        });

        let handles = vec![
            tokio::spawn(persistence_worker(
                persist_rx,
                notify_tx,
                store,
                token.clone(),
            )),
            tokio::spawn(notification_worker(notify_rx, notifier, token)),
        ];

        (pipeline, handles)
    }

    /// Turn a detection result into a queued alert. Returns the assigned
    /// alert id, or `None` when the result was below threshold, rate
    /// limited, or shed on a full queue.
    pub fn submit(
        &self,
        camera_id: &str,
        result: &DetectionResult,
        frame: Option<&FrameData>,
    ) -> Option<String> {
        if !result.severity.is_alertable() {
            return None;
        }

        match self.limiter.lock().try_acquire() {
            RateLimitDecision::Allowed => {}
            RateLimitDecision::HourlyExceeded => {
                warn!(camera_id = %camera_id, "Hourly alert limit reached, dropping alert");
                return None;
            }
            RateLimitDecision::DailyExceeded => {
                warn!(camera_id = %camera_id, "Daily alert limit reached, dropping alert");
                return None;
            }
        }

        let created_at_ms = self.next_alert_ms(camera_id);
        let alert_id = format!("{}_{}", camera_id, created_at_ms);
        let alert = Alert {
            alert_id: alert_id.clone(),
            camera_id: camera_id.to_string(),
            created_at_ms,
            severity: result.severity,
            confidence: result.max_confidence,
            detections: result.detections.clone(),
            status: AlertStatus::Active,
            notes: None,
            frame_image_path: None,
        };

        let item = PipelineItem {
            alert,
            frame: frame.cloned(),
        };
        match self.persist_tx.try_send(item) {
            Ok(()) => {
                debug!(alert_id = %alert_id, severity = %result.severity, "Alert queued");
                Some(alert_id)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(alert_id = %alert_id, "Alert queue full, dropping incoming alert");
                None
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(alert_id = %alert_id, "Alert pipeline stopped, dropping alert");
                None
            }
        }
    }

    /// Apply reloaded rate limits to the live windows
    pub fn set_rate_limits(&self, max_per_hour: usize, max_per_day: usize) {
        self.limiter.lock().set_limits(max_per_hour, max_per_day);
    }

    pub fn store(&self) -> &Arc<AlertStore> {
        &self.store
    }

    /// Millisecond stamp for a new alert, bumped past the camera's previous
    /// one so ids stay unique and strictly increasing per camera
    fn next_alert_ms(&self, camera_id: &str) -> u64 {
        let now = epoch_ms();
        let mut last = self.last_alert_ms.lock();
        let ms = match last.get(camera_id) {
            Some(prev) => now.max(prev + 1),
            None => now,
        };
        last.insert(camera_id.to_string(), ms);
        ms
    }
}

async fn persistence_worker(
    mut rx: mpsc::Receiver<PipelineItem>,
    notify_tx: mpsc::Sender<Alert>,
    store: Arc<AlertStore>,
    token: CancellationToken,
) {
    info!("Alert persistence worker started");
    loop {
        let item = tokio::select! {
            _ = token.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        persist_item(item, &store, &notify_tx);
    }

    // Drain what was already queued before cancellation
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    while Instant::now() < deadline {
        match rx.try_recv() {
            Ok(item) => persist_item(item, &store, &notify_tx),
            Err(_) => break,
        }
    }
    info!("Alert persistence worker stopped");
}

fn persist_item(mut item: PipelineItem, store: &AlertStore, notify_tx: &mpsc::Sender<Alert>) {
    if let Some(frame) = &item.frame {
        match frame.to_jpeg() {
            Ok(jpeg) => match store.save_frame_image(&item.alert.alert_id, &jpeg) {
                Ok(path) => item.alert.frame_image_path = Some(path),
                Err(e) => {
                    warn!(alert_id = %item.alert.alert_id, error = %e, "Failed to save frame image")
                }
            },
            Err(e) => {
                warn!(alert_id = %item.alert.alert_id, error = %e, "Failed to encode frame image")
            }
        }
    }

    if !store.save(&item.alert) {
        // Lossy by design at this stage: log and move on
        warn!(alert_id = %item.alert.alert_id, "Alert not persisted, skipping notification");
        return;
    }

    if let Err(e) = notify_tx.try_send(item.alert) {
        warn!(error = %e, "Notification queue full, alert stored but not delivered");
    }
}

async fn notification_worker(
    mut rx: mpsc::Receiver<Alert>,
    notifier: Arc<dyn Notifier>,
    token: CancellationToken,
) {
    info!("Alert notification worker started");
    loop {
        let alert = tokio::select! {
            _ = token.cancelled() => break,
            alert = rx.recv() => match alert {
                Some(alert) => alert,
                None => break,
            },
        };
        notifier.notify(&alert).await;
    }

    let deadline = Instant::now() + DRAIN_TIMEOUT;
    while Instant::now() < deadline {
        match rx.try_recv() {
            Ok(alert) => notifier.notify(&alert).await,
            Err(_) => break,
        }
    }
    info!("Alert notification worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::notify::testing::RecordingNotifier;
    use crate::alerts::notify::LogNotifier;
    use crate::detection::{BoundingBox, Detection, Severity, Thresholds};
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn result_with_confidence(confidence: f64) -> DetectionResult {
        let now = SystemTime::now();
        DetectionResult::from_detections(
            1,
            now,
            vec![Detection {
                confidence,
                bbox: BoundingBox::new(0, 0, 10, 10),
                class_name: "fire".to_string(),
                timestamp: now,
            }],
            &Thresholds::default(),
        )
    }

    async fn shutdown(token: CancellationToken, handles: Vec<JoinHandle<()>>) {
        token.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_rate_limit_persists_exactly_max() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AlertStore::new(dir.path()).unwrap());
        let token = CancellationToken::new();
        let (pipeline, handles) = AlertPipeline::start(
            Arc::clone(&store),
            Arc::new(LogNotifier),
            3,
            100,
            token.clone(),
        );

        let result = result_with_confidence(0.97);
        let mut accepted = 0;
        for _ in 0..4 {
            if pipeline.submit("cam1", &result, None).is_some() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 3);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.count(), 3);
        shutdown(token, handles).await;
    }

    #[tokio::test]
    async fn test_below_threshold_results_ignored() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AlertStore::new(dir.path()).unwrap());
        let token = CancellationToken::new();
        let (pipeline, handles) = AlertPipeline::start(
            Arc::clone(&store),
            Arc::new(LogNotifier),
            50,
            200,
            token.clone(),
        );

        let result = result_with_confidence(0.5);
        assert_eq!(result.severity, Severity::None);
        assert!(pipeline.submit("cam1", &result, None).is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.count(), 0);
        shutdown(token, handles).await;
    }

    #[tokio::test]
    async fn test_alert_ids_strictly_increasing_per_camera() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AlertStore::new(dir.path()).unwrap());
        let token = CancellationToken::new();
        let (pipeline, handles) = AlertPipeline::start(
            Arc::clone(&store),
            Arc::new(LogNotifier),
            50,
            200,
            token.clone(),
        );

        let result = result_with_confidence(0.97);
        let first = pipeline.submit("cam1", &result, None).unwrap();
        let second = pipeline.submit("cam1", &result, None).unwrap();
        assert_ne!(first, second);

        let ms = |id: &str| id.rsplit('_').next().unwrap().parse::<u64>().unwrap();
        assert!(ms(&second) > ms(&first));

        shutdown(token, handles).await;
    }

    #[tokio::test]
    async fn test_notifier_receives_stored_alerts() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AlertStore::new(dir.path()).unwrap());
        let notifier = Arc::new(RecordingNotifier::new());
        let token = CancellationToken::new();
        let (pipeline, handles) = AlertPipeline::start(
            Arc::clone(&store),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            50,
            200,
            token.clone(),
        );

        let result = result_with_confidence(0.97);
        let alert_id = pipeline.submit("cam1", &result, None).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let delivered = notifier.delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].alert_id, alert_id);
        assert_eq!(delivered[0].severity, Severity::Critical);
        drop(delivered);

        shutdown(token, handles).await;
    }

    #[tokio::test]
    async fn test_frame_image_written_alongside_alert() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AlertStore::new(dir.path()).unwrap());
        let token = CancellationToken::new();
        let (pipeline, handles) = AlertPipeline::start(
            Arc::clone(&store),
            Arc::new(LogNotifier),
            50,
            200,
            token.clone(),
        );

        let result = result_with_confidence(0.97);
        let frame = FrameData::new(
            1,
            SystemTime::now(),
            vec![0xFF, 0xD8, 0xFF, 0xD9],
            0,
            0,
            crate::frame::FrameFormat::Mjpeg,
        );
        let alert_id = pipeline.submit("cam1", &result, Some(&frame)).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let stored = store.get(&alert_id).unwrap();
        let image = stored.frame_image_path.expect("image path recorded");
        assert!(std::path::Path::new(&image).exists());

        shutdown(token, handles).await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_alerts() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AlertStore::new(dir.path()).unwrap());
        let token = CancellationToken::new();
        let (pipeline, handles) = AlertPipeline::start(
            Arc::clone(&store),
            Arc::new(LogNotifier),
            50,
            200,
            token.clone(),
        );

        let result = result_with_confidence(0.97);
        pipeline.submit("cam1", &result, None).unwrap();
        // Cancel immediately; the drain pass must still persist the alert
        shutdown(token, handles).await;
        assert_eq!(store.count(), 1);
    }
}
