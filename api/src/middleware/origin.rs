use axum::extract::{Request, State};
use axum::http::header::ORIGIN;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use url::{Host, Url};

use crate::error::AppError;
use crate::state::AppState;

/// What to do with a request whose `Origin` is not allowed.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OriginMode {
    /// Log a warning and serve the request
    #[default]
    Warn,
    /// Answer 403
    Reject,
}

/// One entry of `CORS_ORIGIN`: `*`, an exact origin, or `scheme://host:*`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OriginPattern {
    Any,
    Exact(String),
    AnyPort(String),
}

impl OriginPattern {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().trim_end_matches('/');
        if raw.is_empty() {
            return None;
        }
        if raw == "*" {
            return Some(Self::Any);
        }
        match raw.strip_suffix(":*") {
            Some(base) => Some(Self::AnyPort(base.to_ascii_lowercase())),
            None => Some(Self::Exact(raw.to_ascii_lowercase())),
        }
    }

    pub fn matches(&self, origin: &str) -> bool {
        let origin = origin.trim_end_matches('/').to_ascii_lowercase();
        match self {
            Self::Any => true,
            Self::Exact(expected) => origin == *expected,
            Self::AnyPort(base) => match origin.strip_prefix(base.as_str()) {
                Some("") => true,
                Some(rest) => rest
                    .strip_prefix(':')
                    .is_some_and(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())),
                None => false,
            },
        }
    }
}

/// Comma-separated list of origin patterns.
pub fn parse_patterns(raw: &str) -> Vec<OriginPattern> {
    raw.split(',').filter_map(OriginPattern::parse).collect()
}

#[derive(Clone, Debug)]
pub struct OriginPolicy {
    pub mode: OriginMode,
    pub allowed: Vec<OriginPattern>,
}

impl OriginPolicy {
    pub fn new(mode: OriginMode, allowed: Vec<OriginPattern>) -> Self {
        Self { mode, allowed }
    }

    pub fn allows(&self, origin: &str) -> bool {
        is_loopback_origin(origin) || self.allowed.iter().any(|p| p.matches(origin))
    }
}

fn is_loopback_origin(origin: &str) -> bool {
    let Ok(url) = Url::parse(origin) else {
        return false;
    };
    match url.host() {
        Some(Host::Domain(domain)) => {
            domain.eq_ignore_ascii_case("localhost")
                || domain.to_ascii_lowercase().ends_with(".localhost")
        }
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Applies the origin policy to every request that carries an `Origin` header.
pub async fn check_origin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    if let Some(origin) = origin.filter(|origin| !state.origin_policy.allows(origin)) {
        let path = request.uri().path().to_string();
        match state.origin_policy.mode {
            OriginMode::Warn => {
                tracing::warn!(%origin, %path, "Request from non-local origin");
            }
            OriginMode::Reject => {
                tracing::warn!(%origin, %path, "Rejected request from disallowed origin");
                return AppError::OriginRejected.into_response();
            }
        }
    }

    next.run(request).await
}
