use std::collections::VecDeque;
use std::sync::Mutex;

use futures::StreamExt;
use futures::future;
use futures::stream::{self, BoxStream};
use kintone_mcp_runtime::Outbound;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// One server-to-client message on a session's standalone stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: u64,
    pub message: Value,
}

struct Inner {
    next_id: u64,
    buffer: VecDeque<StoredEvent>,
    capacity: usize,
    live: Option<broadcast::Sender<StoredEvent>>,
}

/// Per-session log of standalone-stream events.
///
/// Keeps the most recent `capacity` events so a reconnecting client can
/// resume with `Last-Event-Id`. Ids start at 1 and only grow.
pub struct EventLog {
    inner: Mutex<Inner>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (live, _) = broadcast::channel(capacity);
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                buffer: VecDeque::with_capacity(capacity),
                capacity,
                live: Some(live),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores and broadcasts `message`. Returns `None` once the log is closed.
    pub fn append(&self, message: Value) -> Option<u64> {
        let mut inner = self.lock();
        let live = inner.live.clone()?;
        let event = StoredEvent {
            id: inner.next_id,
            message,
        };
        inner.next_id += 1;
        if inner.buffer.len() == inner.capacity {
            inner.buffer.pop_front();
        }
        inner.buffer.push_back(event.clone());
        // No receivers is fine: the event stays buffered for a later GET.
        let _ = live.send(event.clone());
        Some(event.id)
    }

    /// Events after `last_event_id` followed by everything published later.
    ///
    /// The replay snapshot and the live receiver are taken under one lock, so
    /// nothing published concurrently is duplicated or lost between them.
    pub fn subscribe(&self, last_event_id: Option<u64>) -> Option<BoxStream<'static, StoredEvent>> {
        let inner = self.lock();
        let receiver = inner.live.as_ref()?.subscribe();
        let replay: Vec<StoredEvent> = match last_event_id {
            Some(after) => {
                let oldest = inner.buffer.front().map(|event| event.id);
                if oldest.is_some_and(|oldest| oldest > after.saturating_add(1)) {
                    tracing::warn!(
                        last_event_id = after,
                        oldest_buffered = oldest,
                        "Events after Last-Event-Id were evicted; replaying what is buffered"
                    );
                }
                inner
                    .buffer
                    .iter()
                    .filter(|event| event.id > after)
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        };
        drop(inner);

        // A lagging subscriber is cut off; it resumes from the buffer with Last-Event-Id.
        let live = BroadcastStream::new(receiver)
            .take_while(|item| {
                let keep = match item {
                    Ok(_) => true,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Stream subscriber lagged, ending stream");
                        false
                    }
                };
                future::ready(keep)
            })
            .filter_map(|item| future::ready(item.ok()));
        Some(stream::iter(replay).chain(live).boxed())
    }

    /// Ends every open stream. Later appends are dropped.
    pub fn close(&self) {
        self.lock().live.take();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().live.is_none()
    }

    pub fn last_id(&self) -> u64 {
        self.lock().next_id - 1
    }
}

impl Outbound for EventLog {
    fn publish(&self, message: Value) {
        if self.append(message).is_none() {
            tracing::debug!("Dropping message for closed session stream");
        }
    }
}
