use std::sync::{Arc, Mutex};
use std::time::Instant;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::apps::{
    AddRecordsRequest, AddRecordsResponse, App, FormFieldsResponse, GetAppsParams,
    GetAppsResponse, GetRecordsParams, GetRecordsResponse,
};
use crate::config::{KintoneAuth, KintoneClientConfig};
use crate::error::{ClientError, KintoneErrorBody};

pub const USER_AGENT_PRODUCT: &str = "kintone-mcp-server";

const API_TOKEN_HEADER: &str = "x-cybozu-api-token";
const PASSWORD_AUTH_HEADER: &str = "x-cybozu-authorization";

/// Authenticated client for the kintone REST API.
#[derive(Debug, Clone)]
pub struct KintoneClient {
    base_url: String,
    http: reqwest::Client,
}

impl KintoneClient {
    pub fn new(config: &KintoneClientConfig) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        match &config.auth {
            KintoneAuth::Password { username, password } => {
                let encoded = BASE64.encode(format!("{username}:{password}"));
                headers.insert(PASSWORD_AUTH_HEADER, header_value(&encoded, "X-Cybozu-Authorization")?);
            }
            KintoneAuth::ApiToken(token) => {
                headers.insert(API_TOKEN_HEADER, header_value(token, "X-Cybozu-API-Token")?);
            }
        }
        if let Some(basic) = &config.basic_auth {
            let encoded = BASE64.encode(format!("{}:{}", basic.username, basic.password));
            headers.insert(
                AUTHORIZATION,
                header_value(&format!("Basic {encoded}"), "Authorization")?,
            );
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(format!(
                "{USER_AGENT_PRODUCT}@{}",
                env!("CARGO_PKG_VERSION")
            ))
            .default_headers(headers);

        if let Some(pfx) = &config.pfx {
            let path = pfx.path.display().to_string();
            let der = std::fs::read(&pfx.path).map_err(|source| ClientError::PfxRead {
                path: path.clone(),
                source,
            })?;
            let identity = reqwest::Identity::from_pkcs12_der(&der, &pfx.password)
                .map_err(|source| ClientError::InvalidPfx { path, source })?;
            builder = builder.identity(identity);
        }

        // The configured proxy is the only one used; ambient proxy env vars are ignored.
        builder = match &config.https_proxy {
            Some(url) => {
                let proxy = reqwest::Proxy::https(url).map_err(|source| ClientError::InvalidProxy {
                    url: url.clone(),
                    source,
                })?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        let http = builder.build().map_err(ClientError::Build)?;
        Ok(Self {
            base_url: config.base_url.clone(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_apps(&self, params: &GetAppsParams) -> Result<GetAppsResponse, ClientError> {
        let request = self
            .request(Method::GET, "/k/v1/apps.json")
            .query(&params.to_query());
        self.send(request, "get_apps").await
    }

    pub async fn get_app(&self, id: &str) -> Result<App, ClientError> {
        let request = self
            .request(Method::GET, "/k/v1/app.json")
            .query(&[("id", id)]);
        self.send(request, "get_app").await
    }

    pub async fn get_form_fields(
        &self,
        app: &str,
        lang: Option<&str>,
    ) -> Result<FormFieldsResponse, ClientError> {
        let mut query = vec![("app", app)];
        if let Some(lang) = lang {
            query.push(("lang", lang));
        }
        let request = self
            .request(Method::GET, "/k/v1/app/form/fields.json")
            .query(&query);
        self.send(request, "get_form_fields").await
    }

    pub async fn get_records(
        &self,
        params: &GetRecordsParams,
    ) -> Result<GetRecordsResponse, ClientError> {
        let request = self
            .request(Method::GET, "/k/v1/records.json")
            .query(&params.to_query());
        self.send(request, "get_records").await
    }

    pub async fn add_records(
        &self,
        body: &AddRecordsRequest,
    ) -> Result<AddRecordsResponse, ClientError> {
        let request = self.request(Method::POST, "/k/v1/records.json").json(body);
        self.send(request, "add_records").await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{path}", self.base_url))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<T, ClientError> {
        let started = Instant::now();
        let response = request.send().await.map_err(|err| {
            tracing::warn!(operation, error = %err, "kintone API unreachable");
            ClientError::Transport(err)
        })?;
        let status = response.status();
        tracing::debug!(
            operation,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "kintone API call completed"
        );

        if !status.is_success() {
            let bytes = response.bytes().await.unwrap_or_default();
            let body: Option<KintoneErrorBody> = serde_json::from_slice(&bytes).ok();
            let (code, message, id) = match body {
                Some(body) => (
                    body.code.unwrap_or_else(|| "UNKNOWN".to_string()),
                    body.message
                        .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string()),
                    body.id,
                ),
                None => (
                    "UNKNOWN".to_string(),
                    String::from_utf8_lossy(&bytes).trim().to_string(),
                    None,
                ),
            };
            return Err(ClientError::Api {
                status: status.as_u16(),
                code,
                message,
                id,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

fn header_value(raw: &str, header: &'static str) -> Result<HeaderValue, ClientError> {
    let mut value =
        HeaderValue::from_str(raw).map_err(|_| ClientError::InvalidHeader { header })?;
    value.set_sensitive(true);
    Ok(value)
}

/// Owns the lazily built kintone client for one configuration.
///
/// `reset` drops the cached client so the next `get` builds a fresh one.
#[derive(Debug)]
pub struct KintoneClientHolder {
    config: KintoneClientConfig,
    client: Mutex<Option<Arc<KintoneClient>>>,
}

impl KintoneClientHolder {
    pub fn new(config: KintoneClientConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    pub fn get(&self) -> Result<Arc<KintoneClient>, ClientError> {
        let mut slot = self.client.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        tracing::info!(
            base_url = %self.config.base_url,
            auth_method = self.config.auth.method_name(),
            basic_auth = self.config.basic_auth.is_some(),
            proxy = ?self.config.https_proxy,
            client_certificate = self.config.pfx.is_some(),
            "Creating kintone client"
        );
        let client = Arc::new(KintoneClient::new(&self.config).inspect_err(|err| {
            tracing::error!(error = %err, "Failed to create kintone client");
        })?);
        *slot = Some(client.clone());
        Ok(client)
    }

    pub fn reset(&self) {
        let mut slot = self.client.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }
}
