//! Session-multiplexing transport: one protocol engine per MCP session,
//! addressed by the `Mcp-Session-Id` header.

pub mod channel;
pub mod event_log;
pub mod registry;

pub use channel::{SessionChannel, SessionState};
pub use event_log::{EventLog, StoredEvent};
pub use registry::{SessionRegistry, ShutdownReport};

use kintone_mcp_runtime::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("session is closed")]
    SessionClosed,
    #[error("server is shutting down")]
    ShuttingDown,
    #[error("session id already in use")]
    DuplicateSessionId,
    #[error("engine error: {0}")]
    Engine(EngineError),
    #[error("dispatch panicked")]
    DispatchPanicked,
    #[error("dispatch task was cancelled")]
    DispatchAborted,
}
