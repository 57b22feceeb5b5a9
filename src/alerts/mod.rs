pub mod notify;
pub mod pipeline;
pub mod rate_limit;
pub mod store;

use crate::detection::{Detection, Severity};
use serde::{Deserialize, Serialize};

pub use notify::{LogNotifier, Notifier};
pub use pipeline::AlertPipeline;
pub use rate_limit::AlertRateLimiter;
pub use store::{AlertStatistics, AlertStore};

/// Lifecycle state of an alert. Transitions are forward-only:
/// Active → Acknowledged (→ Resolved, reserved for operator tooling).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

/// One fire alert as flowed through the pipeline and persisted.
///
/// `alert_id` is `{camera_id}_{created_at_ms}` and strictly increasing per
/// camera; `created_at_ms` never changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub camera_id: String,
    pub created_at_ms: u64,
    pub severity: Severity,
    pub confidence: f64,
    pub detections: Vec<Detection>,
    pub status: AlertStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub frame_image_path: Option<String>,
}

impl Alert {
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms)
    }

    /// Creation time as a UTC timestamp for display
    pub fn created_at_utc(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(self.created_at_ms as i64).unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }
}
