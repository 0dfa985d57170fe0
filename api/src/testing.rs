use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Query;
use axum::routing::get;
use axum::{Json, Router};
use kintone_core::config::{KintoneAuth, KintoneClientConfig};
use kintone_mcp_runtime::{
    DispatchContext, EngineError, EngineFactory, NullOutbound, Outbound, ProtocolEngine, Reply,
    error_response, success_response,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::middleware::cors::build_cors_layer;
use crate::middleware::origin::{OriginMode, OriginPolicy, parse_patterns};
use crate::routes;
use crate::state::AppState;
use crate::transport::SessionRegistry;

const TEST_ORIGINS: &str = "http://localhost:*";

/// Scriptable engine: `boom` panics, `fail` errors, `stream` replies with two
/// messages, `partial` ends its stream after one, `emit` publishes its params
/// on the standalone stream.
pub(crate) struct FakeEngine {
    outbound: Arc<dyn Outbound>,
    fail_close: bool,
    closed: AtomicBool,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new(Arc::new(NullOutbound), false)
    }
}

impl FakeEngine {
    fn new(outbound: Arc<dyn Outbound>, fail_close: bool) -> Self {
        Self {
            outbound,
            fail_close,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn failing_close() -> Self {
        Self::new(Arc::new(NullOutbound), true)
    }
}

#[async_trait]
impl ProtocolEngine for FakeEngine {
    async fn handle_message(
        &self,
        envelope: Value,
        _ctx: &DispatchContext,
    ) -> Result<Reply, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        let method = envelope["method"].as_str().unwrap_or_default().to_string();
        let params = envelope.get("params").cloned().unwrap_or(Value::Null);
        let Some(id) = envelope.get("id").cloned() else {
            if method == "emit" {
                self.outbound.publish(params);
            }
            return Ok(Reply::Accepted);
        };

        match method.as_str() {
            "initialize" if params["reject"] == json!(true) => Ok(Reply::Message(error_response(
                id,
                kintone_mcp_runtime::RpcError::invalid_params("handshake rejected"),
            ))),
            "initialize" => Ok(Reply::Message(success_response(
                id,
                json!({ "protocolVersion": "2025-06-18" }),
            ))),
            "boom" => panic!("handler exploded"),
            "fail" => Err(EngineError::Internal("engine failure".to_string())),
            "stream" => {
                let (tx, rx) = mpsc::channel(2);
                tx.send(json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {"progress": 0}}))
                    .await
                    .expect("stream capacity");
                tx.send(success_response(id, json!({ "done": true })))
                    .await
                    .expect("stream capacity");
                Ok(Reply::Stream(rx))
            }
            "partial" => {
                // The producer gives up after the first message.
                let (tx, rx) = mpsc::channel(1);
                tx.send(json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {"progress": 0}}))
                    .await
                    .expect("stream capacity");
                Ok(Reply::Stream(rx))
            }
            _ => Ok(Reply::Message(success_response(id, json!({})))),
        }
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(EngineError::Internal("close failed".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeEngineFactory {
    fail_next_close: AtomicBool,
}

impl FakeEngineFactory {
    /// The next engine created will fail when closed.
    pub(crate) fn fail_next_close(&self) {
        self.fail_next_close.store(true, Ordering::SeqCst);
    }
}

impl EngineFactory for FakeEngineFactory {
    fn create(&self, outbound: Arc<dyn Outbound>) -> Arc<dyn ProtocolEngine> {
        let fail_close = self.fail_next_close.swap(false, Ordering::SeqCst);
        Arc::new(FakeEngine::new(outbound, fail_close))
    }
}

pub(crate) fn fake_kintone_config(base_url: &str) -> KintoneClientConfig {
    KintoneClientConfig {
        base_url: base_url.to_string(),
        auth: KintoneAuth::ApiToken("test-token".to_string()),
        basic_auth: None,
        https_proxy: None,
        pfx: None,
    }
}

/// Minimal kintone with eight apps behind `GET /k/v1/apps.json`.
pub(crate) async fn spawn_fake_kintone() -> String {
    let router = Router::new().route(
        "/k/v1/apps.json",
        get(|Query(query): Query<HashMap<String, String>>| async move {
            let limit = query
                .get("limit")
                .and_then(|raw| raw.parse::<usize>().ok())
                .unwrap_or(100);
            let apps: Vec<Value> = (1..=8)
                .take(limit)
                .map(|id| {
                    json!({
                        "appId": id.to_string(),
                        "code": "",
                        "name": format!("App {id}"),
                        "description": "",
                        "spaceId": null,
                        "threadId": null,
                        "createdAt": "2024-01-01T00:00:00.000Z",
                        "creator": { "code": "admin", "name": "Administrator" },
                        "modifiedAt": "2024-01-01T00:00:00.000Z",
                        "modifier": { "code": "admin", "name": "Administrator" }
                    })
                })
                .collect();
            Json(json!({ "apps": apps }))
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake kintone");
    let addr = listener.local_addr().expect("fake kintone address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("fake kintone server");
    });
    format!("http://{addr}")
}

pub(crate) fn test_state(factory: Arc<dyn EngineFactory>) -> AppState {
    AppState {
        sessions: SessionRegistry::new(factory, 16),
        origin_policy: Arc::new(OriginPolicy::new(
            OriginMode::Warn,
            parse_patterns(TEST_ORIGINS),
        )),
        sse_keep_alive: Duration::from_secs(15),
    }
}

pub(crate) fn test_app(state: &AppState) -> Router {
    routes::app(state.clone(), build_cors_layer(&parse_patterns(TEST_ORIGINS)))
}
