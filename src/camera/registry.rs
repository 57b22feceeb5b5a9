use crate::camera::feed::{CameraFeed, CameraStatusSnapshot};
use crate::camera::source::create_source;
use crate::config::CameraConfig;
use crate::error::{Result, SentinelError};
use crate::frame::FrameData;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Owns every registered camera feed.
///
/// Lookups take a short synchronous lock; anything that awaits (start,
/// stop, probes) clones the `Arc` out first so no lock is held across an
/// await point.
pub struct CameraRegistry {
    feeds: RwLock<HashMap<String, Arc<CameraFeed>>>,
    max_cameras: usize,
}

impl CameraRegistry {
    pub fn new(max_cameras: usize) -> Self {
        Self {
            feeds: RwLock::new(HashMap::new()),
            max_cameras,
        }
    }

    /// Register a camera without starting it. Rejects duplicate ids and
    /// enforces the camera capacity limit.
    pub fn add_camera(&self, config: CameraConfig) -> Result<()> {
        config.validate()?;
        let mut feeds = self.feeds.write();
        if feeds.contains_key(&config.camera_id) {
            return Err(SentinelError::system(format!(
                "Camera '{}' is already registered",
                config.camera_id
            )));
        }
        if feeds.len() >= self.max_cameras {
            return Err(SentinelError::system(format!(
                "Camera limit reached ({} max)",
                self.max_cameras
            )));
        }
        info!(camera_id = %config.camera_id, uri = %config.sanitized_uri(), "Camera registered");
        feeds.insert(config.camera_id.clone(), Arc::new(CameraFeed::new(config)));
        Ok(())
    }

    /// Stop and deregister a camera. Returns false for an unknown id.
    pub async fn remove_camera(&self, camera_id: &str) -> bool {
        let feed = self.feeds.write().remove(camera_id);
        match feed {
            Some(feed) => {
                feed.stop().await;
                info!(camera_id = %camera_id, "Camera removed");
                true
            }
            None => false,
        }
    }

    pub async fn start_camera(&self, camera_id: &str) -> Result<bool> {
        let feed = self.get(camera_id)?;
        Ok(feed.start().await)
    }

    pub async fn stop_camera(&self, camera_id: &str) -> Result<()> {
        let feed = self.get(camera_id)?;
        feed.stop().await;
        Ok(())
    }

    /// Start every registered camera; returns how many connected within
    /// the start grace period.
    pub async fn start_all(&self) -> usize {
        let feeds = self.all_feeds();
        let mut connected = 0;
        for feed in feeds {
            if feed.start().await {
                connected += 1;
            } else if feed.config().enabled {
                warn!(
                    camera_id = %feed.camera_id(),
                    "Camera did not connect at startup, capture task keeps retrying"
                );
            }
        }
        connected
    }

    pub async fn stop_all(&self) {
        let feeds = self.all_feeds();
        futures::future::join_all(feeds.iter().map(|feed| feed.stop())).await;
    }

    pub fn latest_frame(&self, camera_id: &str) -> Option<FrameData> {
        self.feeds.read().get(camera_id)?.latest_frame()
    }

    /// Latest frame per camera, skipping cameras that have produced none
    pub fn latest_frames(&self) -> HashMap<String, FrameData> {
        self.feeds
            .read()
            .iter()
            .filter_map(|(id, feed)| feed.latest_frame().map(|f| (id.clone(), f)))
            .collect()
    }

    pub fn statuses(&self) -> HashMap<String, CameraStatusSnapshot> {
        self.feeds
            .read()
            .iter()
            .map(|(id, feed)| (id.clone(), feed.status().snapshot()))
            .collect()
    }

    pub fn configs(&self) -> Vec<CameraConfig> {
        self.feeds
            .read()
            .values()
            .map(|feed| feed.config().clone())
            .collect()
    }

    pub fn camera_count(&self) -> usize {
        self.feeds.read().len()
    }

    pub fn connected_count(&self) -> usize {
        self.feeds
            .read()
            .values()
            .filter(|feed| feed.status().is_connected())
            .count()
    }

    pub fn contains(&self, camera_id: &str) -> bool {
        self.feeds.read().contains_key(camera_id)
    }

    /// Probe a source without registering it: build, connect with the
    /// configured timeout, read one frame, tear down.
    pub async fn test_source(config: &CameraConfig) -> Result<()> {
        let mut source = create_source(config)?;
        let timeout = Duration::from_secs(config.connect_timeout_seconds);
        tokio::time::timeout(timeout, source.connect())
            .await
            .map_err(|_| {
                SentinelError::system(format!(
                    "Connection test to {} timed out",
                    config.sanitized_uri()
                ))
            })??;
        let result = tokio::time::timeout(timeout, source.read_frame()).await;
        source.disconnect().await;
        match result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(SentinelError::system(format!(
                "No frame from {} within {:?}",
                config.sanitized_uri(),
                timeout
            ))),
        }
    }

    fn get(&self, camera_id: &str) -> Result<Arc<CameraFeed>> {
        self.feeds
            .read()
            .get(camera_id)
            .cloned()
            .ok_or_else(|| SentinelError::system(format!("Unknown camera '{}'", camera_id)))
    }

    fn all_feeds(&self) -> Vec<Arc<CameraFeed>> {
        self.feeds.read().values().cloned().collect()
    }
}
