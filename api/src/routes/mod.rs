use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::http::header::ORIGIN;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::origin::check_origin;
use crate::state::AppState;

pub mod health;
pub mod mcp_http;

/// Full HTTP surface: `/mcp`, `/health`, origin policy, CORS, request tracing.
pub fn app(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .merge(health::router())
        .merge(mcp_http::router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            check_origin,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                        tracing::info_span!(
                            "http_request",
                            method = %request.method(),
                            uri = %request.uri(),
                            origin = ?request.headers().get(ORIGIN),
                        )
                    }),
                )
                .layer(cors),
        )
        .with_state(state)
}
