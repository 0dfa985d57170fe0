use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use kintone_core::KintoneClientHolder;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::engine::{
    DispatchContext, EngineError, EngineFactory, Outbound, ProtocolEngine, Reply,
};
use crate::tools::{ToolError, ToolInvocation, ToolRegistry};

pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2025-06-18", "2025-03-26", "2024-11-05"];
pub const MCP_SERVER_NAME: &str = "kintone-mcp-server";

const SERVER_INSTRUCTIONS: &str = "Tools for reading and writing kintone apps and records. \
Call kintone-get-apps to discover app IDs, kintone-get-form-fields to learn field codes, \
then kintone-get-records or kintone-add-records.";

#[derive(Debug)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error() -> Self {
        Self::new(-32700, "Parse error")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(-32600, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(-32601, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(-32602, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(-32603, message)
    }

    pub fn not_initialized() -> Self {
        Self::new(-32002, "Server not initialized")
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

pub fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn error_response(id: Value, error: RpcError) -> Value {
    let mut payload = json!({
        "code": error.code,
        "message": error.message
    });
    if let Some(data) = error.data {
        payload["data"] = data;
    }
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": payload
    })
}

fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params
    })
}

/// MCP logging levels (RFC 5424 order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl LogLevel {
    const ALL: [LogLevel; 8] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Notice,
        LogLevel::Warning,
        LogLevel::Error,
        LogLevel::Critical,
        LogLevel::Alert,
        LogLevel::Emergency,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Notice => "notice",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
            LogLevel::Alert => "alert",
            LogLevel::Emergency => "emergency",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.as_str() == raw)
    }
}

/// Publishes `notifications/message` on the session's standalone stream,
/// filtered by the level the client asked for.
#[derive(Clone)]
struct Notifier {
    outbound: Arc<dyn Outbound>,
    min_level: Arc<AtomicU8>,
}

impl Notifier {
    fn set_level(&self, level: LogLevel) {
        self.min_level.store(level as u8, Ordering::SeqCst);
    }

    fn log(&self, level: LogLevel, data: Value) {
        if (level as u8) < self.min_level.load(Ordering::SeqCst) {
            return;
        }
        self.outbound.publish(notification(
            "notifications/message",
            json!({
                "level": level.as_str(),
                "logger": MCP_SERVER_NAME,
                "data": data
            }),
        ));
    }
}

#[derive(Debug, Default)]
struct ConnState {
    initialized: bool,
    protocol_version: Option<String>,
}

/// kintone MCP engine. One instance serves exactly one session.
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    kintone: Arc<KintoneClientHolder>,
    notifier: Notifier,
    state: Mutex<ConnState>,
    closed: AtomicBool,
}

impl McpServer {
    pub fn new(
        registry: Arc<ToolRegistry>,
        kintone: Arc<KintoneClientHolder>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        Self {
            registry,
            kintone,
            notifier: Notifier {
                outbound,
                min_level: Arc::new(AtomicU8::new(LogLevel::Info as u8)),
            },
            state: Mutex::new(ConnState::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.conn_state().protocol_version.clone()
    }

    fn conn_state(&self) -> std::sync::MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_initialized(&self) -> bool {
        self.conn_state().initialized
    }

    fn handle_notification(&self, method: &str) {
        match method {
            "notifications/initialized" => tracing::debug!("Client finished initialization"),
            "notifications/cancelled" => tracing::debug!("Client cancelled a request"),
            other => tracing::debug!(method = other, "Ignoring notification"),
        }
    }

    async fn handle_request(
        &self,
        id: Value,
        method: &str,
        params: Value,
        ctx: &DispatchContext,
    ) -> Reply {
        let requires_init = matches!(method, "tools/list" | "tools/call" | "logging/setLevel");
        if requires_init && !self.is_initialized() {
            return Reply::Message(error_response(id, RpcError::not_initialized()));
        }

        let result = match method {
            "initialize" => self.handle_initialize(&params),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.registry.list()),
            "logging/setLevel" => self.handle_set_level(&params),
            "tools/call" => return self.handle_tools_call(id, params, ctx).await,
            other => Err(RpcError::method_not_found(other)),
        };

        Reply::Message(match result {
            Ok(result) => success_response(id, result),
            Err(err) => error_response(id, err),
        })
    }

    fn handle_initialize(&self, params: &Value) -> Result<Value, RpcError> {
        let requested = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("initialize requires params.protocolVersion"))?;

        let negotiated = negotiate_protocol(requested);
        {
            let mut state = self.conn_state();
            if state.initialized {
                return Err(RpcError::invalid_request("Server already initialized"));
            }
            state.initialized = true;
            state.protocol_version = Some(negotiated.to_string());
        }

        tracing::info!(
            requested_version = requested,
            protocol_version = negotiated,
            client = ?params.get("clientInfo"),
            "MCP handshake completed"
        );

        Ok(json!({
            "protocolVersion": negotiated,
            "capabilities": {
                "tools": { "listChanged": false },
                "logging": {}
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "title": "kintone MCP server",
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": SERVER_INSTRUCTIONS
        }))
    }

    fn handle_set_level(&self, params: &Value) -> Result<Value, RpcError> {
        let raw = params
            .get("level")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("logging/setLevel requires params.level"))?;
        let level = LogLevel::parse(raw)
            .ok_or_else(|| RpcError::invalid_params(format!("Unknown log level: {raw}")))?;
        self.notifier.set_level(level);
        Ok(json!({}))
    }

    async fn handle_tools_call(&self, id: Value, params: Value, ctx: &DispatchContext) -> Reply {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return Reply::Message(error_response(
                id,
                RpcError::invalid_params("tools/call requires params.name"),
            ));
        };
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
        let invocation = match self.registry.prepare(name, arguments) {
            Ok(invocation) => invocation,
            Err(err) if err.is_protocol_error() => {
                tracing::debug!(tool = name, error = %err.message, "Rejected tool arguments");
                return Reply::Message(error_response(
                    id,
                    RpcError::invalid_params(err.message.clone()).with_data(err.to_value()),
                ));
            }
            Err(err) => {
                tracing::warn!(tool = name, code = %err.code, error = %err.message, "Tool could not be prepared");
                return Reply::Message(success_response(id, err.to_call_result()));
            }
        };

        self.notifier.log(
            LogLevel::Info,
            json!({ "event": "tool_call", "tool": invocation.name() }),
        );

        let progress_token = params
            .pointer("/_meta/progressToken")
            .filter(|token| token.is_string() || token.is_number())
            .cloned();

        match progress_token {
            Some(token) if ctx.accepts_event_stream => {
                let (tx, rx) = mpsc::channel(4);
                let kintone = self.kintone.clone();
                let notifier = self.notifier.clone();
                tokio::spawn(async move {
                    let started = notification(
                        "notifications/progress",
                        json!({
                            "progressToken": token,
                            "progress": 0,
                            "total": 1,
                            "message": format!("Calling {}", invocation.name())
                        }),
                    );
                    if tx.send(started).await.is_err() {
                        return;
                    }
                    let result = run_tool(&kintone, &notifier, invocation).await;
                    let _ = tx.send(success_response(id, result)).await;
                });
                Reply::Stream(rx)
            }
            _ => Reply::Message(success_response(
                id,
                run_tool(&self.kintone, &self.notifier, invocation).await,
            )),
        }
    }
}

async fn run_tool(
    kintone: &KintoneClientHolder,
    notifier: &Notifier,
    invocation: ToolInvocation,
) -> Value {
    let tool = invocation.name();
    let started = Instant::now();
    let outcome = match kintone.get() {
        Ok(client) => invocation.execute(&client).await,
        Err(err) => Err(ToolError::from(err)),
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(output) => {
            tracing::info!(tool, elapsed_ms, "Tool call completed");
            output.to_call_result()
        }
        Err(err) => {
            tracing::warn!(tool, elapsed_ms, code = %err.code, error = %err.message, "Tool call failed");
            notifier.log(LogLevel::Error, json!({ "tool": tool, "error": err.to_value() }));
            err.to_call_result()
        }
    }
}

fn negotiate_protocol(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .into_iter()
        .find(|version| *version == requested)
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0])
}

#[async_trait]
impl ProtocolEngine for McpServer {
    async fn handle_message(
        &self,
        envelope: Value,
        ctx: &DispatchContext,
    ) -> Result<Reply, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }

        if envelope.is_array() {
            return Ok(Reply::Message(error_response(
                Value::Null,
                RpcError::invalid_request("Batch requests are not supported"),
            )));
        }

        let Some(message) = envelope.as_object() else {
            return Ok(Reply::Message(error_response(
                Value::Null,
                RpcError::invalid_request("JSON-RPC message must be an object"),
            )));
        };
        let id = message.get("id").cloned();

        if message.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return Ok(Reply::Message(error_response(
                id.unwrap_or(Value::Null),
                RpcError::invalid_request("jsonrpc must be \"2.0\""),
            )));
        }

        let Some(method) = message.get("method").and_then(Value::as_str) else {
            if message.contains_key("result") || message.contains_key("error") {
                // Responses to server-initiated requests need no reply.
                return Ok(Reply::Accepted);
            }
            return Ok(Reply::Message(error_response(
                id.unwrap_or(Value::Null),
                RpcError::invalid_request("Missing method"),
            )));
        };

        let Some(id) = id else {
            self.handle_notification(method);
            return Ok(Reply::Accepted);
        };

        let params = message.get("params").cloned().unwrap_or(Value::Null);
        Ok(self.handle_request(id, method, params, ctx).await)
    }

    async fn close(&self) -> Result<(), EngineError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(protocol_version = ?self.protocol_version(), "MCP engine closed");
        }
        Ok(())
    }
}

/// Builds one `McpServer` per session, sharing the tool registry and kintone client.
#[derive(Clone)]
pub struct McpServerFactory {
    registry: Arc<ToolRegistry>,
    kintone: Arc<KintoneClientHolder>,
}

impl McpServerFactory {
    pub fn new(kintone: Arc<KintoneClientHolder>) -> Self {
        Self {
            registry: Arc::new(ToolRegistry::kintone()),
            kintone,
        }
    }
}

impl EngineFactory for McpServerFactory {
    fn create(&self, outbound: Arc<dyn Outbound>) -> Arc<dyn ProtocolEngine> {
        Arc::new(McpServer::new(
            self.registry.clone(),
            self.kintone.clone(),
            outbound,
        ))
    }
}
