use std::path::PathBuf;

use clap::Args;
use url::Url;

use crate::error::ConfigError;

/// kintone connection flags, shared by every binary that talks to kintone.
#[derive(Args, Clone, Debug, Default)]
pub struct KintoneArgs {
    /// Base URL of the kintone environment, e.g. https://example.cybozu.com
    #[arg(long, env = "KINTONE_BASE_URL")]
    pub base_url: String,
    /// Login name for password authentication
    #[arg(long, env = "KINTONE_USERNAME")]
    pub username: Option<String>,
    /// Password for password authentication
    #[arg(long, env = "KINTONE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// API token(s), comma separated
    #[arg(long, env = "KINTONE_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,
    /// Username for an additional HTTP Basic auth layer
    #[arg(long, env = "KINTONE_BASIC_AUTH_USERNAME")]
    pub basic_auth_username: Option<String>,
    /// Password for an additional HTTP Basic auth layer
    #[arg(long, env = "KINTONE_BASIC_AUTH_PASSWORD", hide_env_values = true)]
    pub basic_auth_password: Option<String>,
    /// HTTPS proxy URL
    #[arg(long, env = "HTTPS_PROXY")]
    pub https_proxy: Option<String>,
    /// Client certificate (PKCS#12) path
    #[arg(long, env = "KINTONE_PFX_FILE_PATH")]
    pub pfx_file_path: Option<PathBuf>,
    /// Client certificate password
    #[arg(long, env = "KINTONE_PFX_FILE_PASSWORD", hide_env_values = true)]
    pub pfx_file_password: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub enum KintoneAuth {
    Password { username: String, password: String },
    ApiToken(String),
}

impl KintoneAuth {
    pub fn method_name(&self) -> &'static str {
        match self {
            KintoneAuth::Password { .. } => "password",
            KintoneAuth::ApiToken(_) => "api_token",
        }
    }
}

impl std::fmt::Debug for KintoneAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KintoneAuth::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            KintoneAuth::ApiToken(_) => f.debug_tuple("ApiToken").field(&"***").finish(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct PfxIdentity {
    pub path: PathBuf,
    pub password: String,
}

impl std::fmt::Debug for PfxIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PfxIdentity")
            .field("path", &self.path)
            .field("password", &"***")
            .finish()
    }
}

/// Validated client configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KintoneClientConfig {
    pub base_url: String,
    pub auth: KintoneAuth,
    pub basic_auth: Option<BasicAuth>,
    pub https_proxy: Option<String>,
    pub pfx: Option<PfxIdentity>,
}

impl TryFrom<KintoneArgs> for KintoneClientConfig {
    type Error = ConfigError;

    fn try_from(args: KintoneArgs) -> Result<Self, Self::Error> {
        let base_url = normalize_base_url(&args.base_url)?;

        let username = non_empty(args.username);
        let password = non_empty(args.password);
        let api_token = non_empty(args.api_token);

        // Password auth wins when both credential kinds are configured.
        let auth = match (username, password, api_token) {
            (Some(username), Some(password), _) => KintoneAuth::Password { username, password },
            (_, _, Some(token)) => KintoneAuth::ApiToken(token),
            (Some(_), None, None) => {
                return Err(ConfigError::IncompletePair {
                    present: "KINTONE_USERNAME",
                    missing: "KINTONE_PASSWORD",
                });
            }
            (None, Some(_), None) => {
                return Err(ConfigError::IncompletePair {
                    present: "KINTONE_PASSWORD",
                    missing: "KINTONE_USERNAME",
                });
            }
            (None, None, None) => return Err(ConfigError::MissingCredentials),
        };

        let basic_auth = match (
            non_empty(args.basic_auth_username),
            non_empty(args.basic_auth_password),
        ) {
            (Some(username), Some(password)) => Some(BasicAuth { username, password }),
            _ => None,
        };

        let pfx = match (args.pfx_file_path, non_empty(args.pfx_file_password)) {
            (Some(path), Some(password)) => Some(PfxIdentity { path, password }),
            (Some(_), None) => {
                return Err(ConfigError::IncompletePair {
                    present: "KINTONE_PFX_FILE_PATH",
                    missing: "KINTONE_PFX_FILE_PASSWORD",
                });
            }
            (None, Some(_)) => {
                return Err(ConfigError::IncompletePair {
                    present: "KINTONE_PFX_FILE_PASSWORD",
                    missing: "KINTONE_PFX_FILE_PATH",
                });
            }
            (None, None) => None,
        };

        Ok(Self {
            base_url,
            auth,
            basic_auth,
            https_proxy: non_empty(args.https_proxy),
            pfx,
        })
    }
}

fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed).map_err(|e| ConfigError::InvalidBaseUrl {
        value: trimmed.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidBaseUrl {
            value: trimmed.to_string(),
            reason: "scheme must be http or https".to_string(),
        });
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
