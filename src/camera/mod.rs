pub mod feed;
pub mod registry;
pub mod source;

pub use feed::{CameraFeed, CameraState, CameraStatus, CameraStatusSnapshot};
pub use registry::CameraRegistry;
pub use source::{create_source, FrameSource, MjpegHttpSource, SyntheticSource};
