use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Sink for messages a session engine sends without being asked
/// (log notifications, list-changed events).
pub trait Outbound: Send + Sync {
    fn publish(&self, message: Value);
}

/// Outbound sink that drops everything. Used where no standalone stream exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutbound;

impl Outbound for NullOutbound {
    fn publish(&self, _message: Value) {}
}

impl Outbound for mpsc::UnboundedSender<Value> {
    fn publish(&self, message: Value) {
        let _ = self.send(message);
    }
}

/// Per-request facts the transport knows and the engine needs.
#[derive(Debug, Clone, Default)]
pub struct DispatchContext {
    pub session_id: Option<String>,
    /// The client listed `text/event-stream` in its `Accept` header.
    pub accepts_event_stream: bool,
}

/// What the engine wants written back on the request that carried the message.
#[derive(Debug)]
pub enum Reply {
    /// Notification or client response: nothing to send back.
    Accepted,
    Message(Value),
    /// Messages to write incrementally; the last one is the response.
    Stream(mpsc::Receiver<Value>),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("session is closed")]
    Closed,
    #[error("{0}")]
    Internal(String),
}

/// One protocol engine instance per session.
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    async fn handle_message(
        &self,
        envelope: Value,
        ctx: &DispatchContext,
    ) -> Result<Reply, EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

pub trait EngineFactory: Send + Sync {
    fn create(&self, outbound: Arc<dyn Outbound>) -> Arc<dyn ProtocolEngine>;
}

/// True when `envelope` is a single JSON-RPC `initialize` request.
pub fn is_initialize_request(envelope: &Value) -> bool {
    envelope.get("method").and_then(Value::as_str) == Some("initialize")
        && envelope.get("id").is_some_and(|id| !id.is_null())
}
