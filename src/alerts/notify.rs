use crate::alerts::Alert;
use crate::detection::Severity;
use async_trait::async_trait;
use tracing::{debug, error, info};

/// Side-effect stage of the alert pipeline. Implementations must not
/// panic; a failed notification is the notifier's problem to log.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert);
}

/// Default notifier: maps severity tiers onto log actions.
///
/// Critical fires an operator-facing error line, Review lands in the
/// review queue at info, Log-tier alerts are storage-only and produce a
/// debug line at most.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) {
        match alert.severity {
            Severity::Critical => {
                error!(
                    alert_id = %alert.alert_id,
                    camera_id = %alert.camera_id,
                    confidence = alert.confidence,
                    at = %alert.created_at_utc().to_rfc3339(),
                    "IMMEDIATE FIRE ALERT"
                );
            }
            Severity::Review => {
                info!(
                    alert_id = %alert.alert_id,
                    camera_id = %alert.camera_id,
                    confidence = alert.confidence,
                    "Alert queued for review"
                );
            }
            Severity::Log | Severity::None => {
                debug!(alert_id = %alert.alert_id, "Alert recorded");
            }
        }
    }
}
