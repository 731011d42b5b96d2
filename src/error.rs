use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures reported by the fetch API for a single wrapped request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// The proxy rejected the call and said so in the `X-Crawlera-Error` header.
    #[error("{message}")]
    Proxy { code: String, message: String },

    /// The response body was not a JSON envelope.
    #[error("{message}")]
    Decode {
        message: String,
        line: usize,
        column: usize,
    },

    /// The envelope carried an error reported by the fetch service.
    #[error("{message}")]
    Upstream {
        code: String,
        message: String,
        request_id: Option<String>,
    },
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Proxy { .. } => "proxy",
            FetchError::Decode { .. } => "decode",
            FetchError::Upstream { .. } => "upstream",
        }
    }

    /// Code used for the per-error stats key and as retry reason.
    pub fn code(&self) -> &str {
        match self {
            FetchError::Proxy { code, .. } => code,
            FetchError::Decode { .. } => "JSONDecodeError",
            FetchError::Upstream { code, .. } => code,
        }
    }
}
