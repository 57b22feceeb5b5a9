use crate::camera::CameraRegistry;
use crate::frame::FrameData;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Dispatch cadence. A slow handler stretches the effective cadence since
/// it runs in-loop; frames skipped in the meantime are simply superseded.
const DISPATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Consumer side of the dispatch loop. Exactly one handler is registered;
/// it receives each batch synchronously on the dispatcher task.
pub trait DetectionHandler: Send {
    fn handle_batch(&mut self, frames: &[(String, FrameData)]);
}

/// Fan-in loop between the camera feeds and the detection stage.
///
/// Every tick it snapshots the newest frame of each camera and forwards
/// only those not dispatched before, so per-camera ordering holds and no
/// frame is handed to detection twice.
pub struct FrameDispatcher {
    registry: Arc<CameraRegistry>,
}

impl FrameDispatcher {
    pub fn new(registry: Arc<CameraRegistry>) -> Self {
        Self { registry }
    }

    pub async fn run(self, mut handler: Box<dyn DetectionHandler>, token: CancellationToken) {
        info!("Frame dispatcher started");
        let mut last_dispatched: HashMap<String, u64> = HashMap::new();
        let mut interval = tokio::time::interval(DISPATCH_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            let latest = self.registry.latest_frames();
            // Forget cameras that were removed
            last_dispatched.retain(|id, _| latest.contains_key(id) || self.registry.contains(id));

            let mut batch: Vec<(String, FrameData)> = Vec::new();
            for (camera_id, frame) in latest {
                let seen = last_dispatched.get(&camera_id).copied().unwrap_or(0);
                if frame.id > seen {
                    last_dispatched.insert(camera_id.clone(), frame.id);
                    batch.push((camera_id, frame));
                }
            }

            if batch.is_empty() {
                continue;
            }

            debug!(frames = batch.len(), "Dispatching frame batch");
            let outcome =
                std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle_batch(&batch)));
            if outcome.is_err() {
                error!("Detection handler panicked, continuing with next batch");
            }
        }

        info!("Frame dispatcher stopped");
    }
}
