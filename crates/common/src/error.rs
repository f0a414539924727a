use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbargoError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid IP address or network: {0}")]
    InvalidIpEntry(String),

    #[error("invalid course key: {0}")]
    InvalidCourseKey(String),

    #[error("invalid country code: {0}")]
    InvalidCountry(String),

    #[error("unknown access point '{0}'")]
    UnknownAccessPoint(String),

    #[error("no blocked message '{message_key}' for access point '{access_point}'")]
    UnknownMessage {
        access_point: String,
        message_key: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type EmbargoResult<T> = Result<T, EmbargoError>;
