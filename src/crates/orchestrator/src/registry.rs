//! Run registry.
//!
//! Maps run ids to their event streams and cancellation handles. Entries are
//! created at run start and removed a grace period after the terminal event,
//! so a late subscriber can still drain the queue.

use crate::events::{EventPublisher, RunEvent};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};
use uuid::Uuid;

/// Everything a spawned run needs from the registry.
pub struct RunHandle {
    pub run_id: String,
    pub publisher: EventPublisher,
    pub cancel: watch::Receiver<bool>,
}

struct RunEntry {
    publisher: EventPublisher,
    /// Taken by the first (only) subscriber.
    receiver: Mutex<Option<mpsc::Receiver<RunEvent>>>,
    cancel_tx: watch::Sender<bool>,
}

/// Registry of active (and recently finished) runs.
pub struct RunRegistry {
    runs: DashMap<String, RunEntry>,
    grace: Duration,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl RunRegistry {
    /// Create a registry with the given post-terminal grace period.
    pub fn new(grace: Duration) -> Self {
        Self {
            runs: DashMap::new(),
            grace,
        }
    }

    /// Register a new run and hand back its id, publisher and cancel signal.
    pub fn create_run(&self) -> RunHandle {
        let run_id = Uuid::new_v4().to_string();
        let (publisher, receiver) = EventPublisher::channel(run_id.clone());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.runs.insert(
            run_id.clone(),
            RunEntry {
                publisher: publisher.clone(),
                receiver: Mutex::new(Some(receiver)),
                cancel_tx,
            },
        );
        info!(run_id = %run_id, "run registered");
        RunHandle {
            run_id,
            publisher,
            cancel: cancel_rx,
        }
    }

    /// Take the single-consumer event receiver for a run.
    ///
    /// Returns `None` for an unknown run or when a subscriber already
    /// claimed the stream.
    pub fn take_events(&self, run_id: &str) -> Option<mpsc::Receiver<RunEvent>> {
        self.runs.get(run_id)?.receiver.lock().take()
    }

    /// Request cooperative cancellation of a run.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.runs.get(run_id) {
            Some(entry) => {
                info!(run_id = %run_id, "cancellation requested");
                entry.cancel_tx.send(true).is_ok()
            }
            None => false,
        }
    }

    /// Whether the run is still registered.
    pub fn contains(&self, run_id: &str) -> bool {
        self.runs.contains_key(run_id)
    }

    /// Schedule removal of a finished run after the grace period.
    ///
    /// Called once the terminal event is published; the entry stays around
    /// long enough for a late subscriber to drain.
    pub fn finish(self: &Arc<Self>, run_id: &str) {
        let registry = Arc::clone(self);
        let run_id = run_id.to_string();
        let grace = self.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            registry.runs.remove(&run_id);
            debug!(run_id = %run_id, "run entry removed after grace period");
        });
    }

    /// Publisher for a registered run, if any.
    pub fn publisher(&self, run_id: &str) -> Option<EventPublisher> {
        self.runs.get(run_id).map(|entry| entry.publisher.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_take_and_stream() {
        let registry = RunRegistry::default();
        let handle = registry.create_run();
        handle.publisher.publish(EventKind::RunStarted, json!({}));

        let mut rx = registry.take_events(&handle.run_id).unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::RunStarted);

        // Single consumer: the stream can only be taken once.
        assert!(registry.take_events(&handle.run_id).is_none());
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let registry = RunRegistry::default();
        assert!(registry.take_events("missing").is_none());
        assert!(!registry.cancel("missing"));
    }

    #[tokio::test]
    async fn test_cancel_flips_watch() {
        let registry = RunRegistry::default();
        let handle = registry.create_run();
        assert!(!*handle.cancel.borrow());
        assert!(registry.cancel(&handle.run_id));
        assert!(*handle.cancel.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_removes_after_grace() {
        let registry = Arc::new(RunRegistry::new(Duration::from_secs(30)));
        let handle = registry.create_run();
        registry.finish(&handle.run_id);

        // Still present inside the grace window.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(registry.contains(&handle.run_id));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!registry.contains(&handle.run_id));
    }
}
