use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kintone_mcp_runtime::{RpcError, error_response};
use serde_json::Value;

use crate::transport::TransportError;

/// HTTP-level failures of the MCP endpoints.
///
/// `POST /mcp` failures carry a JSON-RPC error envelope with a null id;
/// `GET`/`DELETE` failures are plain text.
#[derive(Debug)]
pub enum AppError {
    /// Body is not JSON (400, -32700)
    Parse,
    /// POST without a usable session and not an initialize request (400, -32000)
    NoValidSession,
    /// Dispatch failed before anything was written (500, -32603)
    Internal,
    /// GET/DELETE with a missing or unknown session id (400)
    InvalidSessionHeader,
    /// Engine failed to close on DELETE (500)
    TerminationFailed,
    /// New sessions are refused while shutting down (503)
    ShuttingDown,
    /// Origin rejected by policy (403)
    OriginRejected,
}

impl AppError {
    fn rpc(status: StatusCode, error: RpcError) -> Response {
        (status, Json(error_response(Value::Null, error))).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Parse => Self::rpc(StatusCode::BAD_REQUEST, RpcError::parse_error()),
            AppError::NoValidSession => Self::rpc(
                StatusCode::BAD_REQUEST,
                RpcError::new(-32000, "Bad Request: No valid session ID provided"),
            ),
            AppError::Internal => Self::rpc(
                StatusCode::INTERNAL_SERVER_ERROR,
                RpcError::internal("Internal server error"),
            ),
            AppError::ShuttingDown => Self::rpc(
                StatusCode::SERVICE_UNAVAILABLE,
                RpcError::new(-32000, "Server is shutting down"),
            ),
            AppError::InvalidSessionHeader => {
                (StatusCode::BAD_REQUEST, "Invalid or missing session ID").into_response()
            }
            AppError::TerminationFailed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error processing session termination",
            )
                .into_response(),
            AppError::OriginRejected => {
                (StatusCode::FORBIDDEN, "Forbidden: origin not allowed").into_response()
            }
        }
    }
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::SessionClosed => AppError::NoValidSession,
            TransportError::ShuttingDown => AppError::ShuttingDown,
            other => {
                tracing::error!(error = %other, "MCP request failed");
                AppError::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn post_errors_use_jsonrpc_envelope_with_null_id() {
        let response = AppError::NoValidSession.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["error"]["code"], -32000);
        assert_eq!(body["error"]["message"], "Bad Request: No valid session ID provided");
        assert!(body["id"].is_null());

        let response = AppError::Internal.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"]["code"], -32603);
    }

    #[test]
    fn transport_errors_map_to_http_errors() {
        assert!(matches!(
            AppError::from(TransportError::SessionClosed),
            AppError::NoValidSession
        ));
        assert!(matches!(
            AppError::from(TransportError::DispatchPanicked),
            AppError::Internal
        ));
    }
}
