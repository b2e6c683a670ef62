use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backend unreachable: {message}")]
    ConnectionError { message: String },

    #[error("Authorization rejected: {message}")]
    AuthError { message: String },

    #[error("Validation error on '{field}': {message}")]
    ValidationError { field: String, message: String },

    #[error("Not found: {what}")]
    NotFoundError { what: String },

    #[error("Backend schema incomplete: {message}")]
    SchemaError { message: String },

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid configuration value for '{field}' ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

impl StoreError {
    /// Maps a reqwest transport failure into the connection taxonomy.
    /// Status-level failures stay `HttpError` so callers can inspect them.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            StoreError::ConnectionError {
                message: err.to_string(),
            }
        } else {
            StoreError::HttpError(err)
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        StoreError::ConnectionError {
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        StoreError::AuthError {
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        StoreError::SchemaError {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        StoreError::ConfigError {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
