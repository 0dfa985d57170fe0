use serde::Deserialize;

/// Configuration problems detected before any request is sent.
///
/// These surface at startup so a misconfigured server never binds its port.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("KINTONE_BASE_URL is invalid: {value} ({reason})")]
    InvalidBaseUrl { value: String, reason: String },
    #[error(
        "No kintone credentials configured. Set KINTONE_USERNAME and KINTONE_PASSWORD, or KINTONE_API_TOKEN."
    )]
    MissingCredentials,
    #[error("{present} is set but {missing} is not; both are required together")]
    IncompletePair {
        present: &'static str,
        missing: &'static str,
    },
}

/// Errors raised while building the kintone client or calling the REST API.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to read PFX file: {path}. {source}")]
    PfxRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid PFX file: {path}. {source}")]
    InvalidPfx {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Invalid HTTPS proxy URL: {url}. {source}")]
    InvalidProxy {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Invalid header value for {header}")]
    InvalidHeader { header: &'static str },
    #[error("Failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("kintone API request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("kintone API returned {status}: [{code}] {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        id: Option<String>,
    },
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Error body returned by kintone on non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct KintoneErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Error codes shared by the MCP surfaces.
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const KINTONE_API_ERROR: &str = "kintone_api_error";
    pub const KINTONE_UNREACHABLE: &str = "kintone_unreachable";
    pub const CLIENT_CONFIG_ERROR: &str = "client_config_error";
}
