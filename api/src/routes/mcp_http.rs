use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::ACCEPT;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use kintone_mcp_runtime::{DispatchContext, Reply, is_initialize_request};
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::AppError;
use crate::middleware::cors::MCP_SESSION_ID;
use crate::state::AppState;
use crate::transport::SessionChannel;

const MCP_PATH: &str = "/mcp";
const LAST_EVENT_ID: &str = "last-event-id";

pub fn router() -> Router<AppState> {
    Router::new().route(MCP_PATH, post(mcp_post).get(mcp_get).delete(mcp_delete))
}

async fn mcp_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let envelope: Value = serde_json::from_slice(&body).map_err(|err| {
        tracing::debug!(error = %err, "Rejecting unparseable MCP body");
        AppError::Parse
    })?;
    let accepts_event_stream = accepts_event_stream(&headers);
    let context = |session_id: &str| DispatchContext {
        session_id: Some(session_id.to_string()),
        accepts_event_stream,
    };

    if let Some(session_id) = header_value(&headers, MCP_SESSION_ID.as_str()) {
        let Some(channel) = state.sessions.get(&session_id) else {
            tracing::debug!(%session_id, "POST for unknown MCP session");
            return Err(AppError::NoValidSession);
        };
        tracing::info!(
            %session_id,
            method = rpc_method(&envelope),
            "MCP message received"
        );
        let reply = channel.dispatch(envelope, context(&session_id)).await?;
        return Ok(reply_response(reply, None, state.sse_keep_alive));
    }

    if !is_initialize_request(&envelope) {
        return Err(AppError::NoValidSession);
    }

    let channel = state.sessions.open_channel();
    let session_id = channel.id().to_string();
    tracing::info!(%session_id, "Initializing new MCP session");

    let reply = match channel.dispatch(envelope, context(&session_id)).await {
        Ok(reply) => reply,
        Err(err) => {
            discard(&channel).await;
            return Err(err.into());
        }
    };

    if !handshake_succeeded(&reply) {
        tracing::warn!(%session_id, "MCP handshake rejected, discarding session");
        discard(&channel).await;
        return Ok(reply_response(reply, None, state.sse_keep_alive));
    }

    if let Err(err) = state.sessions.activate(&channel) {
        discard(&channel).await;
        return Err(err.into());
    }
    tracing::info!(
        %session_id,
        active_sessions = state.sessions.len(),
        "MCP session established"
    );
    Ok(reply_response(
        reply,
        Some(&session_id),
        state.sse_keep_alive,
    ))
}

async fn mcp_get(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    let channel = session_from_headers(&state, &headers).ok_or(AppError::InvalidSessionHeader)?;
    let last_event_id = parse_last_event_id(&headers, channel.id());
    let stream = channel
        .open_stream(last_event_id)
        .ok_or(AppError::InvalidSessionHeader)?;

    tracing::info!(
        session_id = channel.id(),
        last_event_id,
        "Opened standalone MCP stream"
    );

    let events = stream.map(|event| {
        Ok::<_, Infallible>(
            Event::default()
                .id(event.id.to_string())
                .event("message")
                .data(event.message.to_string()),
        )
    });
    Ok(Sse::new(events)
        .keep_alive(KeepAlive::new().interval(state.sse_keep_alive))
        .into_response())
}

async fn mcp_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let channel = session_from_headers(&state, &headers).ok_or(AppError::InvalidSessionHeader)?;
    let session_id = channel.id().to_string();
    tracing::info!(%session_id, "Received MCP session termination request");

    match channel.close().await {
        Ok(()) => Ok(StatusCode::OK),
        Err(err) => {
            tracing::error!(%session_id, error = %err, "Error handling session termination");
            Err(AppError::TerminationFailed)
        }
    }
}

fn reply_response(reply: Reply, session_id: Option<&str>, keep_alive: Duration) -> Response {
    let mut response = match reply {
        Reply::Accepted => StatusCode::ACCEPTED.into_response(),
        Reply::Message(message) => (StatusCode::OK, Json(message)).into_response(),
        Reply::Stream(receiver) => {
            let events = ReceiverStream::new(receiver).map(|message| {
                Ok::<_, Infallible>(Event::default().event("message").data(message.to_string()))
            });
            Sse::new(events)
                .keep_alive(KeepAlive::new().interval(keep_alive))
                .into_response()
        }
    };
    if let Some(value) = session_id.and_then(|id| HeaderValue::from_str(id).ok()) {
        response.headers_mut().insert(MCP_SESSION_ID, value);
    }
    response
}

fn handshake_succeeded(reply: &Reply) -> bool {
    matches!(reply, Reply::Message(message) if message.get("result").is_some())
}

async fn discard(channel: &SessionChannel) {
    if let Err(err) = channel.close().await {
        tracing::warn!(session_id = channel.id(), error = %err, "Failed to discard MCP session");
    }
}

fn session_from_headers(state: &AppState, headers: &HeaderMap) -> Option<Arc<SessionChannel>> {
    header_value(headers, MCP_SESSION_ID.as_str()).and_then(|id| state.sessions.get(&id))
}

/// A malformed `Last-Event-Id` is ignored: the stream starts live.
fn parse_last_event_id(headers: &HeaderMap, session_id: &str) -> Option<u64> {
    let raw = header_value(headers, LAST_EVENT_ID)?;
    match raw.trim().parse::<u64>() {
        Ok(id) => Some(id),
        Err(_) => {
            tracing::warn!(session_id, last_event_id = %raw, "Ignoring malformed Last-Event-Id");
            None
        }
    }
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains("text/event-stream"))
}

fn rpc_method(envelope: &Value) -> Option<&str> {
    envelope.get("method").and_then(Value::as_str)
}

fn header_value(headers: &HeaderMap, key: &str) -> Option<String> {
    headers
        .get(key)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}
