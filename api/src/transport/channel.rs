use std::sync::{Arc, Mutex};

use futures::stream::BoxStream;
use kintone_mcp_runtime::{DispatchContext, ProtocolEngine, Reply};
use serde_json::Value;

use super::TransportError;
use super::event_log::{EventLog, StoredEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Active,
    Closed,
}

pub(crate) type CloseObserver = Box<dyn FnOnce(&str) + Send>;

/// The live link between one session id and its protocol engine.
pub struct SessionChannel {
    id: String,
    engine: Arc<dyn ProtocolEngine>,
    events: Arc<EventLog>,
    state: Mutex<SessionState>,
    on_close: Mutex<Option<CloseObserver>>,
    /// Serializes dispatch so messages of one session are handled in arrival order.
    dispatch_lock: tokio::sync::Mutex<()>,
}

impl SessionChannel {
    pub(crate) fn new(
        id: String,
        engine: Arc<dyn ProtocolEngine>,
        events: Arc<EventLog>,
        on_close: CloseObserver,
    ) -> Self {
        Self {
            id,
            engine,
            events,
            state: Mutex::new(SessionState::Uninitialized),
            on_close: Mutex::new(Some(on_close)),
            dispatch_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn mark_active(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == SessionState::Uninitialized {
            *state = SessionState::Active;
            true
        } else {
            false
        }
    }

    /// Hands `envelope` to the engine on its own task so a panicking handler
    /// surfaces as an error instead of tearing down the connection.
    pub async fn dispatch(
        self: &Arc<Self>,
        envelope: Value,
        ctx: DispatchContext,
    ) -> Result<Reply, TransportError> {
        if self.state() == SessionState::Closed {
            return Err(TransportError::SessionClosed);
        }

        let channel = Arc::clone(self);
        let task = tokio::spawn(async move {
            let _ordered = channel.dispatch_lock.lock().await;
            channel.engine.handle_message(envelope, &ctx).await
        });

        match task.await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(kintone_mcp_runtime::EngineError::Closed)) => Err(TransportError::SessionClosed),
            Ok(Err(err)) => Err(TransportError::Engine(err)),
            Err(err) if err.is_panic() => {
                tracing::error!(session_id = %self.id, "MCP dispatch panicked");
                Err(TransportError::DispatchPanicked)
            }
            Err(_) => Err(TransportError::DispatchAborted),
        }
    }

    /// Standalone stream, resuming after `last_event_id` when given.
    pub fn open_stream(&self, last_event_id: Option<u64>) -> Option<BoxStream<'static, StoredEvent>> {
        if self.state() != SessionState::Active {
            return None;
        }
        self.events.subscribe(last_event_id)
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Closes the engine and every stream, then notifies the owner.
    ///
    /// Idempotent. The observer fires even when the engine fails to close,
    /// so the session never lingers in the registry.
    pub async fn close(&self) -> Result<(), TransportError> {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *state, SessionState::Closed)
        };
        if previous == SessionState::Closed {
            return Ok(());
        }

        let result = self.engine.close().await;
        self.events.close();

        let observer = self
            .on_close
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(observer) = observer {
            observer(&self.id);
        }

        match result {
            Ok(()) => {
                tracing::info!(session_id = %self.id, "MCP session closed");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(session_id = %self.id, error = %err, "MCP engine failed to close cleanly");
                Err(TransportError::Engine(err))
            }
        }
    }
}
