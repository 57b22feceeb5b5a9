pub mod alerts;
pub mod api;
pub mod app;
pub mod camera;
pub mod config;
pub mod detection;
pub mod dispatcher;
pub mod error;
pub mod frame;

pub use alerts::{Alert, AlertPipeline, AlertStore};
pub use app::SentinelOrchestrator;
pub use camera::{CameraFeed, CameraRegistry};
pub use config::{CameraConfig, ConfigManager, SentinelConfig};
pub use detection::{Detector, Severity, SharedThresholds, Thresholds};
pub use dispatcher::FrameDispatcher;
pub use error::{Result, SentinelError};
pub use frame::{FrameData, FrameFormat};
