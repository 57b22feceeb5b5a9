use crate::alerts::{Alert, AlertStatus};
use crate::error::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Current persisted record layout. Bump when the on-disk shape changes.
const SCHEMA_VERSION: u32 = 1;

pub(crate) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// On-disk envelope around an alert. Decoding rejects records from a
/// different schema version instead of guessing at field meanings.
#[derive(Debug, Serialize, Deserialize)]
struct AlertRecord {
    schema_version: u32,
    alert: Alert,
}

impl AlertRecord {
    fn encode(alert: &Alert) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(&AlertRecord {
            schema_version: SCHEMA_VERSION,
            alert: alert.clone(),
        })
    }

    fn decode(bytes: &[u8]) -> std::result::Result<Alert, String> {
        let record: AlertRecord =
            serde_json::from_slice(bytes).map_err(|e| format!("malformed record: {}", e))?;
        if record.schema_version != SCHEMA_VERSION {
            return Err(format!(
                "unsupported schema version {} (expected {})",
                record.schema_version, SCHEMA_VERSION
            ));
        }
        Ok(record.alert)
    }
}

/// Per-severity aggregate over a time window
#[derive(Debug, Clone, Serialize)]
pub struct AlertStatistics {
    pub total: usize,
    pub by_severity: HashMap<String, usize>,
    pub mean_confidence: f64,
    pub active_alerts: usize,
}

/// Durable alert log backed by the filesystem.
///
/// Layout: `<data_dir>/alerts/<alert_id>.json` for records,
/// `<data_dir>/frames/<alert_id>.jpg` for captured frame images. An
/// in-memory index is rebuilt by scanning the alerts directory at startup;
/// all queries are answered from the index, all mutations write through.
pub struct AlertStore {
    alerts_dir: PathBuf,
    frames_dir: PathBuf,
    index: RwLock<HashMap<String, Alert>>,
}

impl AlertStore {
    /// Open (or create) a store under `data_dir`. Directory creation
    /// failure is fatal; an unreadable individual record is skipped.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let alerts_dir = data_dir.join("alerts");
        let frames_dir = data_dir.join("frames");
        fs::create_dir_all(&alerts_dir)?;
        fs::create_dir_all(&frames_dir)?;

        let store = Self {
            alerts_dir,
            frames_dir,
            index: RwLock::new(HashMap::new()),
        };
        let loaded = store.scan()?;
        info!(alerts = loaded, dir = %data_dir.display(), "Alert store opened");
        Ok(store)
    }

    fn scan(&self) -> Result<usize> {
        let mut index = self.index.write();
        for entry in fs::read_dir(&self.alerts_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).map_err(|e| e.to_string()).and_then(|bytes| {
                AlertRecord::decode(&bytes)
            }) {
                Ok(alert) => {
                    index.insert(alert.alert_id.clone(), alert);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable alert record");
                }
            }
        }
        Ok(index.len())
    }

    fn record_path(&self, alert_id: &str) -> PathBuf {
        self.alerts_dir.join(format!("{}.json", alert_id))
    }

    /// Persist an alert, replacing any record with the same id. Returns
    /// whether the write succeeded; failures are logged, never raised.
    pub fn save(&self, alert: &Alert) -> bool {
        let bytes = match AlertRecord::encode(alert) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(alert_id = %alert.alert_id, error = %e, "Failed to encode alert");
                return false;
            }
        };
        if let Err(e) = fs::write(self.record_path(&alert.alert_id), bytes) {
            error!(alert_id = %alert.alert_id, error = %e, "Failed to write alert record");
            return false;
        }
        self.index
            .write()
            .insert(alert.alert_id.clone(), alert.clone());
        debug!(alert_id = %alert.alert_id, severity = %alert.severity, "Alert saved");
        true
    }

    /// Store a frame image alongside an alert, returning its path
    pub fn save_frame_image(&self, alert_id: &str, bytes: &[u8]) -> Result<String> {
        let path = self.frames_dir.join(format!("{}.jpg", alert_id));
        fs::write(&path, bytes)?;
        Ok(path.to_string_lossy().into_owned())
    }

    pub fn get(&self, alert_id: &str) -> Option<Alert> {
        self.index.read().get(alert_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.index.read().len()
    }

    pub fn active_count(&self) -> usize {
        self.index.read().values().filter(|a| a.is_active()).count()
    }

    /// Alerts created within `window`, newest first, capped at `limit`
    pub fn get_recent(&self, window: Duration, limit: usize) -> Vec<Alert> {
        let cutoff = epoch_ms().saturating_sub(window.as_millis() as u64);
        let mut alerts: Vec<Alert> = self
            .index
            .read()
            .values()
            .filter(|a| a.created_at_ms >= cutoff)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        alerts.truncate(limit);
        alerts
    }

    pub fn get_statistics(&self, window: Duration) -> AlertStatistics {
        let cutoff = epoch_ms().saturating_sub(window.as_millis() as u64);
        let index = self.index.read();

        let mut by_severity: HashMap<String, usize> = HashMap::new();
        let mut total = 0usize;
        let mut confidence_sum = 0.0f64;
        let mut active_alerts = 0usize;

        for alert in index.values().filter(|a| a.created_at_ms >= cutoff) {
            total += 1;
            confidence_sum += alert.confidence;
            *by_severity
                .entry(alert.severity.as_str().to_string())
                .or_insert(0) += 1;
            if alert.is_active() {
                active_alerts += 1;
            }
        }

        AlertStatistics {
            total,
            by_severity,
            mean_confidence: if total > 0 {
                confidence_sum / total as f64
            } else {
                0.0
            },
            active_alerts,
        }
    }

    /// Mark an alert acknowledged. Unknown ids return false and create
    /// nothing; acknowledging twice is a harmless no-op.
    pub fn acknowledge(&self, alert_id: &str, notes: Option<String>) -> bool {
        let updated = {
            let mut index = self.index.write();
            match index.get_mut(alert_id) {
                Some(alert) => {
                    if alert.status == AlertStatus::Active {
                        alert.status = AlertStatus::Acknowledged;
                    }
                    if notes.is_some() {
                        alert.notes = notes;
                    }
                    Some(alert.clone())
                }
                None => None,
            }
        };
        match updated {
            Some(alert) => {
                self.save(&alert);
                info!(alert_id = %alert_id, "Alert acknowledged");
                true
            }
            None => false,
        }
    }

    /// Remove alerts older than `retention` along with their frame images,
    /// then sweep the frames directory for orphans. Already-missing files
    /// are tolerated. Returns how many alerts were removed.
    pub fn cleanup(&self, retention: Duration) -> usize {
        let cutoff = epoch_ms().saturating_sub(retention.as_millis() as u64);
        let expired: Vec<Alert> = self
            .index
            .read()
            .values()
            .filter(|a| a.created_at_ms < cutoff)
            .cloned()
            .collect();

        let mut removed = 0;
        for alert in &expired {
            remove_if_exists(&self.record_path(&alert.alert_id));
            if let Some(image) = &alert.frame_image_path {
                remove_if_exists(Path::new(image));
            }
            self.index.write().remove(&alert.alert_id);
            removed += 1;
        }

        // Orphaned images: frame files whose alert no longer exists
        if let Ok(entries) = fs::read_dir(&self.frames_dir) {
            let index = self.index.read();
            for entry in entries.flatten() {
                let path = entry.path();
                let known = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|stem| index.contains_key(stem));
                if !known {
                    remove_if_exists(&path);
                }
            }
        }

        if removed > 0 {
            info!(removed, "Alert retention cleanup");
        }
        removed
    }

    /// Count alerts regardless of severity tier within a window, used by
    /// the dashboard
    pub fn count_since(&self, window: Duration) -> usize {
        let cutoff = epoch_ms().saturating_sub(window.as_millis() as u64);
        self.index
            .read()
            .values()
            .filter(|a| a.created_at_ms >= cutoff)
            .count()
    }
}

fn remove_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove file during cleanup");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Severity;
    use tempfile::TempDir;

    fn alert(id: &str, camera: &str, created_at_ms: u64, severity: Severity) -> Alert {
        Alert {
            alert_id: id.to_string(),
            camera_id: camera.to_string(),
            created_at_ms,
            severity,
            confidence: 0.9,
            detections: Vec::new(),
            status: AlertStatus::Active,
            notes: None,
            frame_image_path: None,
        }
    }

    #[test]
    fn test_record_round_trip() {
        let original = alert("cam1_123", "cam1", 123, Severity::Critical);
        let bytes = AlertRecord::encode(&original).unwrap();
        let decoded = AlertRecord::decode(&bytes).unwrap();
        assert_eq!(decoded.alert_id, original.alert_id);
        assert_eq!(decoded.severity, original.severity);
        assert_eq!(decoded.status, original.status);
        assert_eq!(decoded.created_at_ms, 123);
    }

    #[test]
    fn test_decode_rejects_unknown_schema_version() {
        let original = alert("cam1_123", "cam1", 123, Severity::Log);
        let mut value: serde_json::Value =
            serde_json::from_slice(&AlertRecord::encode(&original).unwrap()).unwrap();
        value["schema_version"] = serde_json::json!(99);
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(AlertRecord::decode(&bytes).is_err());
    }

    #[test]
    fn test_save_is_upsert() {
        let dir = TempDir::new().unwrap();
        let store = AlertStore::new(dir.path()).unwrap();

        let mut a = alert("cam1_100", "cam1", 100, Severity::Review);
        assert!(store.save(&a));
        a.confidence = 0.99;
        assert!(store.save(&a));

        assert_eq!(store.count(), 1);
        assert_eq!(store.get("cam1_100").unwrap().confidence, 0.99);
    }

    #[test]
    fn test_index_rebuilt_on_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = AlertStore::new(dir.path()).unwrap();
            store.save(&alert("cam1_100", "cam1", 100, Severity::Critical));
            store.save(&alert("cam2_200", "cam2", 200, Severity::Log));
        }
        let reopened = AlertStore::new(dir.path()).unwrap();
        assert_eq!(reopened.count(), 2);
        assert!(reopened.get("cam2_200").is_some());
    }

    #[test]
    fn test_acknowledge_semantics() {
        let dir = TempDir::new().unwrap();
        let store = AlertStore::new(dir.path()).unwrap();
        store.save(&alert("cam1_100", "cam1", epoch_ms(), Severity::Critical));

        // Unknown id: false, nothing created
        assert!(!store.acknowledge("nope", None));
        assert_eq!(store.count(), 1);

        assert!(store.acknowledge("cam1_100", Some("checked".to_string())));
        let acked = store.get("cam1_100").unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);
        assert_eq!(acked.notes.as_deref(), Some("checked"));
        assert_eq!(store.active_count(), 0);

        // Idempotent
        assert!(store.acknowledge("cam1_100", None));
        assert_eq!(store.get("cam1_100").unwrap().status, AlertStatus::Acknowledged);
    }

    #[test]
    fn test_get_recent_newest_first_with_limit() {
        let dir = TempDir::new().unwrap();
        let store = AlertStore::new(dir.path()).unwrap();
        let now = epoch_ms();
        store.save(&alert("cam1_1", "cam1", now - 3000, Severity::Log));
        store.save(&alert("cam1_2", "cam1", now - 2000, Severity::Review));
        store.save(&alert("cam1_3", "cam1", now - 1000, Severity::Critical));
        // Outside the window
        store.save(&alert("cam1_0", "cam1", now - 7_200_000, Severity::Log));

        let recent = store.get_recent(Duration::from_secs(3600), 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].alert_id, "cam1_3");
        assert_eq!(recent[1].alert_id, "cam1_2");
    }

    #[test]
    fn test_statistics() {
        let dir = TempDir::new().unwrap();
        let store = AlertStore::new(dir.path()).unwrap();
        let now = epoch_ms();

        let mut a = alert("cam1_1", "cam1", now - 1000, Severity::Critical);
        a.confidence = 1.0;
        store.save(&a);
        let mut b = alert("cam1_2", "cam1", now - 500, Severity::Critical);
        b.confidence = 0.5;
        store.save(&b);

        let stats = store.get_statistics(Duration::from_secs(3600));
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_severity.get("critical"), Some(&2));
        assert!((stats.mean_confidence - 0.75).abs() < 1e-9);
        assert_eq!(stats.active_alerts, 2);
    }

    #[test]
    fn test_cleanup_removes_record_and_image() {
        let dir = TempDir::new().unwrap();
        let store = AlertStore::new(dir.path()).unwrap();
        let now = epoch_ms();

        let mut old = alert("cam1_old", "cam1", now - 10 * 86_400_000, Severity::Critical);
        let image = store.save_frame_image("cam1_old", b"jpegbytes").unwrap();
        old.frame_image_path = Some(image.clone());
        store.save(&old);
        store.save(&alert("cam1_new", "cam1", now, Severity::Log));

        let removed = store.cleanup(Duration::from_secs(7 * 86400));
        assert_eq!(removed, 1);
        assert!(store.get("cam1_old").is_none());
        assert!(store.get("cam1_new").is_some());
        assert!(!Path::new(&image).exists());

        // Second sweep finds nothing to do
        assert_eq!(store.cleanup(Duration::from_secs(7 * 86400)), 0);
    }

    #[test]
    fn test_cleanup_removes_orphaned_images() {
        let dir = TempDir::new().unwrap();
        let store = AlertStore::new(dir.path()).unwrap();
        let orphan = store.save_frame_image("cam1_ghost", b"bytes").unwrap();

        store.cleanup(Duration::from_secs(86400));
        assert!(!Path::new(&orphan).exists());
    }
}
