use thiserror::Error;

#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to connect to {source_uri}: {details}")]
    Connect { source_uri: String, details: String },

    #[error("Frame read failed: {details}")]
    Read { details: String },

    #[error("Unsupported source scheme '{scheme}' (expected sim:// or http://)")]
    UnsupportedScheme { scheme: String },

    #[error("Invalid source URI '{uri}': {details}")]
    InvalidUri { uri: String, details: String },
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Failed to bind API server to {address}: {source}")]
    BindFailed {
        address: String,
        source: std::io::Error,
    },
}

impl SentinelError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SentinelError>;
