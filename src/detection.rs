use crate::error::{Result, SentinelError};
use crate::frame::{FrameData, FrameFormat};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Detection classes that qualify as fire indicators. Anything a detector
/// reports outside this list is discarded before severity is computed.
pub const FIRE_CLASSES: &[&str] = &["fire", "smoke", "flame"];

/// Alert severity tier, derived solely from confidence vs. thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    Review,
    Log,
    None,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Review => "review",
            Severity::Log => "log",
            Severity::None => "none",
        }
    }

    /// Whether this severity qualifies for alert creation
    pub fn is_alertable(&self) -> bool {
        !matches!(self, Severity::None)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence thresholds for the severity tiers.
///
/// Invariant: `log_only <= review_queue <= immediate_alert`, all in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub immediate_alert: f64,
    pub review_queue: f64,
    pub log_only: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            immediate_alert: 0.95,
            review_queue: 0.85,
            log_only: 0.70,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("immediate_alert", self.immediate_alert),
            ("review_queue", self.review_queue),
            ("log_only", self.log_only),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SentinelError::system(format!(
                    "Threshold {} must be in [0, 1], got {}",
                    name, value
                )));
            }
        }
        if !(self.log_only <= self.review_queue && self.review_queue <= self.immediate_alert) {
            return Err(SentinelError::system(format!(
                "Thresholds must satisfy log_only <= review_queue <= immediate_alert, \
                 got {} / {} / {}",
                self.log_only, self.review_queue, self.immediate_alert
            )));
        }
        Ok(())
    }

    /// Map a confidence value onto a severity tier. Each tier is inclusive
    /// at its lower bound.
    pub fn severity_for(&self, max_confidence: f64) -> Severity {
        if max_confidence >= self.immediate_alert {
            Severity::Critical
        } else if max_confidence >= self.review_queue {
            Severity::Review
        } else if max_confidence >= self.log_only {
            Severity::Log
        } else {
            Severity::None
        }
    }
}

/// Thread-safe handle to the active thresholds, shared between the detection
/// stage, the API layer, and the config reload loop. Updates are validated
/// before they are applied; a failed update leaves the prior values intact.
#[derive(Debug, Clone)]
pub struct SharedThresholds {
    inner: Arc<RwLock<Thresholds>>,
}

impl SharedThresholds {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            inner: Arc::new(RwLock::new(thresholds)),
        }
    }

    pub fn get(&self) -> Thresholds {
        *self.inner.read()
    }

    pub fn update(&self, candidate: Thresholds) -> Result<()> {
        candidate.validate()?;
        *self.inner.write() = candidate;
        debug!(?candidate, "Thresholds updated");
        Ok(())
    }

    /// Update a single threshold by name, validating the resulting set
    pub fn update_field(&self, name: &str, value: f64) -> Result<()> {
        let mut candidate = self.get();
        match name {
            "immediate_alert" => candidate.immediate_alert = value,
            "review_queue" => candidate.review_queue = value,
            "log_only" => candidate.log_only = value,
            other => {
                return Err(SentinelError::system(format!(
                    "Unknown threshold '{}'",
                    other
                )))
            }
        }
        self.update(candidate)
    }
}

impl Default for SharedThresholds {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}

/// Axis-aligned bounding box in pixel coordinates, x1 < x2 and y1 < y2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        debug_assert!(x1 < x2 && y1 < y2, "degenerate bounding box");
        Self { x1, y1, x2, y2 }
    }
}

/// One bounding-box detection produced by a detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub confidence: f64,
    pub bbox: BoundingBox,
    pub class_name: String,
    pub timestamp: SystemTime,
}

/// Per-frame detection aggregate.
///
/// `severity` is always a pure function of `max_confidence` and the
/// thresholds in effect when the result was built; it is never set directly.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub frame_id: u64,
    pub timestamp: SystemTime,
    pub detections: Vec<Detection>,
    pub max_confidence: f64,
    pub severity: Severity,
}

impl DetectionResult {
    /// Build a result from raw detector output, filtering out classes that
    /// are not on the fire allow-list before computing confidence/severity.
    pub fn from_detections(
        frame_id: u64,
        timestamp: SystemTime,
        detections: Vec<Detection>,
        thresholds: &Thresholds,
    ) -> Self {
        let mut kept = Vec::with_capacity(detections.len());
        for detection in detections {
            if FIRE_CLASSES.contains(&detection.class_name.to_lowercase().as_str()) {
                kept.push(detection);
            } else {
                warn!(
                    class = %detection.class_name,
                    confidence = detection.confidence,
                    "Discarding detection with non-fire class"
                );
            }
        }

        let max_confidence = kept
            .iter()
            .map(|d| d.confidence)
            .fold(0.0_f64, f64::max);
        let severity = thresholds.severity_for(max_confidence);

        Self {
            frame_id,
            timestamp,
            detections: kept,
            max_confidence,
            severity,
        }
    }

    /// Result for a frame with no qualifying detections
    pub fn empty(frame_id: u64, timestamp: SystemTime) -> Self {
        Self {
            frame_id,
            timestamp,
            detections: Vec::new(),
            max_confidence: 0.0,
            severity: Severity::None,
        }
    }
}

/// Black-box detection model boundary.
///
/// Implementations must be deterministic for a fixed model state and input
/// frame. The dispatcher calls this synchronously per frame.
pub trait Detector: Send {
    fn detect(&mut self, frame: &FrameData) -> DetectionResult;
}

/// Reference detector for synthetic RGB feeds: scores a frame by the
/// fraction of pixels inside the flame color band. Stands in for the real
/// inference model during development and tests; compressed frames score
/// zero since no codec handling is done here.
pub struct ColorHeuristicDetector {
    thresholds: SharedThresholds,
    frame_counter: u64,
}

impl ColorHeuristicDetector {
    /// Matching-pixel fraction at which confidence saturates at 1.0
    const SATURATION_FRACTION: f64 = 0.05;

    pub fn new(thresholds: SharedThresholds) -> Self {
        Self {
            thresholds,
            frame_counter: 0,
        }
    }

    fn is_flame_colored(r: u8, g: u8, b: u8) -> bool {
        r >= 200 && (40..=180).contains(&g) && b < 80
    }
}

impl Detector for ColorHeuristicDetector {
    fn detect(&mut self, frame: &FrameData) -> DetectionResult {
        self.frame_counter += 1;
        let frame_id = self.frame_counter;

        if frame.format != FrameFormat::Rgb24 || !frame.validate_size() {
            return DetectionResult::empty(frame_id, frame.timestamp);
        }

        let width = frame.width as usize;
        let mut matching = 0usize;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);

        for (i, pixel) in frame.data.chunks_exact(3).enumerate() {
            if Self::is_flame_colored(pixel[0], pixel[1], pixel[2]) {
                matching += 1;
                let x = (i % width) as u32;
                let y = (i / width) as u32;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }

        if matching == 0 {
            return DetectionResult::empty(frame_id, frame.timestamp);
        }

        let total = (frame.width * frame.height) as f64;
        let fraction = matching as f64 / total;
        let confidence = (fraction / Self::SATURATION_FRACTION).min(1.0);

        let detection = Detection {
            confidence,
            bbox: BoundingBox::new(min_x, min_y, max_x + 1, max_y + 1),
            class_name: "fire".to_string(),
            timestamp: frame.timestamp,
        };

        DetectionResult::from_detections(
            frame_id,
            frame.timestamp,
            vec![detection],
            &self.thresholds.get(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> Thresholds {
        Thresholds {
            immediate_alert: 0.95,
            review_queue: 0.85,
            log_only: 0.70,
        }
    }

    #[test]
    fn test_severity_tier_boundaries() {
        let t = thresholds();
        // Inclusive at the lower bound of each tier
        assert_eq!(t.severity_for(0.0), Severity::None);
        assert_eq!(t.severity_for(0.69), Severity::None);
        assert_eq!(t.severity_for(0.70), Severity::Log);
        assert_eq!(t.severity_for(0.84), Severity::Log);
        assert_eq!(t.severity_for(0.85), Severity::Review);
        assert_eq!(t.severity_for(0.94), Severity::Review);
        assert_eq!(t.severity_for(0.95), Severity::Critical);
        assert_eq!(t.severity_for(1.0), Severity::Critical);
    }

    #[test]
    fn test_threshold_validation_rejects_bad_ordering() {
        let bad = Thresholds {
            immediate_alert: 0.80,
            review_queue: 0.85,
            log_only: 0.90,
        };
        assert!(bad.validate().is_err());

        let out_of_range = Thresholds {
            immediate_alert: 1.5,
            review_queue: 0.85,
            log_only: 0.70,
        };
        assert!(out_of_range.validate().is_err());

        assert!(thresholds().validate().is_ok());
    }

    #[test]
    fn test_shared_thresholds_failed_update_keeps_previous() {
        let shared = SharedThresholds::new(thresholds());

        let bad = Thresholds {
            immediate_alert: 0.95,
            review_queue: 0.85,
            log_only: 0.90, // log_only > review_queue
        };
        assert!(shared.update(bad).is_err());
        assert_eq!(shared.get(), thresholds());

        // Single-field update follows the same rule
        assert!(shared.update_field("log_only", 0.99).is_err());
        assert_eq!(shared.get().log_only, 0.70);

        assert!(shared.update_field("log_only", 0.60).is_ok());
        assert_eq!(shared.get().log_only, 0.60);
    }

    #[test]
    fn test_unknown_threshold_name_rejected() {
        let shared = SharedThresholds::default();
        assert!(shared.update_field("bogus", 0.5).is_err());
    }

    #[test]
    fn test_non_fire_classes_are_discarded() {
        let now = SystemTime::now();
        let detections = vec![
            Detection {
                confidence: 0.97,
                bbox: BoundingBox::new(0, 0, 10, 10),
                class_name: "car".to_string(),
                timestamp: now,
            },
            Detection {
                confidence: 0.72,
                bbox: BoundingBox::new(5, 5, 20, 20),
                class_name: "smoke".to_string(),
                timestamp: now,
            },
        ];

        let result = DetectionResult::from_detections(1, now, detections, &thresholds());

        // The 0.97 "car" must not drive severity
        assert_eq!(result.detections.len(), 1);
        assert_eq!(result.detections[0].class_name, "smoke");
        assert!((result.max_confidence - 0.72).abs() < f64::EPSILON);
        assert_eq!(result.severity, Severity::Log);
    }

    #[test]
    fn test_empty_result_has_zero_confidence() {
        let result = DetectionResult::from_detections(
            7,
            SystemTime::now(),
            Vec::new(),
            &thresholds(),
        );
        assert_eq!(result.max_confidence, 0.0);
        assert_eq!(result.severity, Severity::None);
        assert!(!result.severity.is_alertable());
    }

    #[test]
    fn test_color_heuristic_detector_flags_flame_frames() {
        use crate::frame::{FrameData, FrameFormat};

        let (width, height) = (64u32, 64u32);
        let shared = SharedThresholds::new(thresholds());
        let mut detector = ColorHeuristicDetector::new(shared.clone());

        // All-dark frame: nothing detected
        let dark = FrameData::new(
            1,
            SystemTime::now(),
            vec![0u8; (width * height * 3) as usize],
            width,
            height,
            FrameFormat::Rgb24,
        );
        let result = detector.detect(&dark);
        assert_eq!(result.severity, Severity::None);

        // Paint a flame-colored block covering well past saturation
        let mut data = vec![0u8; (width * height * 3) as usize];
        for pixel in data.chunks_exact_mut(3).take(2048) {
            pixel[0] = 255;
            pixel[1] = 120;
            pixel[2] = 10;
        }
        let burning = FrameData::new(
            2,
            SystemTime::now(),
            data,
            width,
            height,
            FrameFormat::Rgb24,
        );
        let result = detector.detect(&burning);
        assert_eq!(result.severity, Severity::Critical);
        assert_eq!(result.detections[0].class_name, "fire");
        assert!(result.max_confidence >= 0.95);
        // frame_id is monotonic per detector instance
        assert_eq!(result.frame_id, 2);
    }
}
