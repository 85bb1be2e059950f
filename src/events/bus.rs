use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::Event;

/// Synchronous consumer of published events.
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;
    fn on_event(&self, event: &Event);
}

/// Bounded, process-wide event bus.
///
/// Safe for concurrent publishers. Lossy only on saturation: appending to a full
/// bus evicts the oldest event and increments [`EventBus::dropped`].
pub struct EventBus {
    capacity: usize,
    history: Mutex<VecDeque<Event>>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            history: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            sinks: RwLock::new(Vec::new()),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    /// Stamp, append and fan out `event`. Returns whether it was retained.
    ///
    /// Never fails the caller; saturation is logged.
    pub fn publish(&self, mut event: Event) -> bool {
        event.timestamp = Utc::now();
        self.published.fetch_add(1, Ordering::Relaxed);

        let retained = {
            let mut history = self.history.lock();
            if self.capacity == 0 {
                false
            } else {
                while history.len() >= self.capacity {
                    history.pop_front();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                history.push_back(event.clone());
                true
            }
        };
        if !retained {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(event_type = %event.kind, "Event bus has no capacity; event dropped");
        }

        debug!(event_type = %event.kind, fields = event.fields.len(), "Event published");

        let sinks: Vec<Arc<dyn EventSink>> = self.sinks.read().clone();
        for sink in sinks {
            sink.on_event(&event);
        }
        retained
    }

    /// Most recent events (oldest first) whose type lies under `prefix`.
    pub fn recent(&self, prefix: Option<&str>, limit: usize) -> Vec<Event> {
        let history = self.history.lock();
        let matching: Vec<&Event> = history
            .iter()
            .filter(|e| prefix.is_none_or(|p| e.matches_prefix(p)))
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).cloned().collect()
    }

    /// Number of retained events of exactly `kind`.
    pub fn count_kind(&self, kind: &str) -> usize {
        self.history.lock().iter().filter(|e| e.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
