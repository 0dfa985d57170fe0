use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::future::join_all;
use kintone_mcp_runtime::EngineFactory;
use uuid::Uuid;

use super::TransportError;
use super::channel::SessionChannel;
use super::event_log::EventLog;

/// Outcome of closing every session at shutdown.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub closed: usize,
    pub failed: usize,
}

struct RegistryInner {
    sessions: Mutex<HashMap<String, Arc<SessionChannel>>>,
    factory: Arc<dyn EngineFactory>,
    event_buffer: usize,
    shutting_down: AtomicBool,
}

impl RegistryInner {
    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<SessionChannel>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, id: &str) {
        if self.sessions().remove(id).is_some() {
            tracing::debug!(session_id = id, "Session removed from registry");
        }
    }
}

/// Owns every active session, keyed by session id.
///
/// A channel only enters the map after its handshake succeeded and only
/// leaves it through its close observer.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn EngineFactory>, event_buffer: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                factory,
                event_buffer,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Builds a channel with a fresh id and engine. Not yet addressable.
    pub fn open_channel(&self) -> Arc<SessionChannel> {
        let id = Uuid::new_v4().to_string();
        let events = Arc::new(EventLog::new(self.inner.event_buffer));
        let engine = self.inner.factory.create(events.clone());

        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let on_close = Box::new(move |id: &str| {
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        });

        Arc::new(SessionChannel::new(id, engine, events, on_close))
    }

    /// Publishes a channel whose handshake succeeded.
    pub fn activate(&self, channel: &Arc<SessionChannel>) -> Result<(), TransportError> {
        // Checked under the map lock so `close_all` cannot drain in between.
        let mut sessions = self.inner.sessions();
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(TransportError::ShuttingDown);
        }
        match sessions.entry(channel.id().to_string()) {
            Entry::Occupied(_) => Err(TransportError::DuplicateSessionId),
            Entry::Vacant(slot) => {
                if !channel.mark_active() {
                    return Err(TransportError::SessionClosed);
                }
                slot.insert(Arc::clone(channel));
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionChannel>> {
        self.inner.sessions().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes every session concurrently. One failing close never blocks
    /// the others; each runs on its own task so even a panic is contained.
    pub async fn close_all(&self) -> ShutdownReport {
        let channels: Vec<Arc<SessionChannel>> = {
            let mut sessions = self.inner.sessions();
            self.inner.shutting_down.store(true, Ordering::SeqCst);
            sessions.drain().map(|(_, c)| c).collect()
        };

        let tasks = channels.into_iter().map(|channel| {
            let id = channel.id().to_string();
            let task = tokio::spawn(async move { channel.close().await });
            async move { (id, task.await) }
        });

        let mut report = ShutdownReport::default();
        for (session_id, outcome) in join_all(tasks).await {
            match outcome {
                Ok(Ok(())) => report.closed += 1,
                Ok(Err(err)) => {
                    tracing::error!(%session_id, error = %err, "Failed to close session during shutdown");
                    report.failed += 1;
                }
                Err(err) => {
                    tracing::error!(%session_id, error = %err, "Session close task failed during shutdown");
                    report.failed += 1;
                }
            }
        }
        report
    }
}
