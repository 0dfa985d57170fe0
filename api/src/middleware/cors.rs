use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use super::origin::OriginPattern;

pub const MCP_SESSION_ID: HeaderName = HeaderName::from_static("mcp-session-id");

/// Build the CORS layer for the configured origin patterns.
///
/// - `*`: any origin, no credentials
/// - otherwise: listed origins (`:*` matches any port), credentials allowed
/// - Methods: GET, POST, DELETE, OPTIONS
/// - Exposes `Mcp-Session-Id` so browser clients can read it
pub fn build_cors_layer(patterns: &[OriginPattern]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-type"),
            HeaderName::from_static("last-event-id"),
            HeaderName::from_static("mcp-protocol-version"),
            MCP_SESSION_ID,
        ])
        .expose_headers([MCP_SESSION_ID])
        .max_age(std::time::Duration::from_secs(3600));

    if patterns.contains(&OriginPattern::Any) {
        return layer.allow_origin(AllowOrigin::any());
    }

    let patterns = patterns.to_vec();
    layer
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| {
                origin
                    .to_str()
                    .is_ok_and(|origin| patterns.iter().any(|p| p.matches(origin)))
            },
        ))
        .allow_credentials(true)
}
