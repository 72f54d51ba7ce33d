//! Per-run lifecycle event stream.
//!
//! Each run owns one ordered, single-consumer queue. Any component may
//! publish an event tagged with the run's publisher; a subscriber drains in
//! publication order until a terminal event. The queue is bounded: when the
//! consumer is too slow the newest event is dropped with a warning rather
//! than blocking the pipeline, and ordering of delivered events is preserved.
//! After the terminal event the stream closes and later publishes are
//! discarded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default queue capacity per run.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// The closed set of lifecycle event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    QuestionsGenerated,
    DagBuilt,
    CriticResult,
    ExecutionDone,
    QuestionComplete,
    RunComplete,
    Error,
}

impl EventKind {
    /// Terminal events close the stream.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::RunComplete | EventKind::Error)
    }
}

/// One frame on the event stream: `{type, ts, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub ts: DateTime<Utc>,
    pub payload: Value,
}

impl RunEvent {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            kind,
            ts: Utc::now(),
            payload,
        }
    }
}

/// Publishing side of a run's event queue.
///
/// Cheap to clone; all clones share the closed flag, so the first terminal
/// event shuts the stream for every publisher.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    run_id: String,
    tx: mpsc::Sender<RunEvent>,
    closed: Arc<AtomicBool>,
}

impl EventPublisher {
    /// Create a queue for one run.
    pub fn channel(run_id: impl Into<String>) -> (Self, mpsc::Receiver<RunEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        (
            Self {
                run_id: run_id.into(),
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Publish one event. Publishes after the terminal event are discarded.
    pub fn publish(&self, kind: EventKind, payload: Value) {
        if self.closed.load(Ordering::Acquire) {
            debug!(run_id = %self.run_id, kind = ?kind, "stream closed, event discarded");
            return;
        }
        if kind.is_terminal() {
            self.closed.store(true, Ordering::Release);
        }
        let event = RunEvent::new(kind, payload);
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    run_id = %self.run_id,
                    kind = ?event.kind,
                    capacity = EVENT_QUEUE_CAPACITY,
                    "event queue full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(
                    run_id = %self.run_id,
                    kind = ?event.kind,
                    "no subscriber, event discarded"
                );
            }
        }
    }

    /// Whether a terminal event has been published.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_events_delivered_in_publication_order() {
        let (publisher, mut rx) = EventPublisher::channel("run-1");
        publisher.publish(EventKind::RunStarted, json!({"n": 1}));
        publisher.publish(EventKind::QuestionsGenerated, json!({"n": 2}));
        publisher.publish(EventKind::RunComplete, json!({"n": 3}));

        let kinds: Vec<EventKind> = [rx.recv().await, rx.recv().await, rx.recv().await]
            .into_iter()
            .map(|e| e.unwrap().kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::RunStarted,
                EventKind::QuestionsGenerated,
                EventKind::RunComplete
            ]
        );
    }

    #[tokio::test]
    async fn test_publishes_after_terminal_are_discarded() {
        let (publisher, mut rx) = EventPublisher::channel("run-1");
        publisher.publish(EventKind::Error, json!({}));
        publisher.publish(EventKind::QuestionComplete, json!({}));

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Error);
        assert!(rx.try_recv().is_err());
        assert!(publisher.is_closed());
    }

    #[tokio::test]
    async fn test_frame_shape() {
        let event = RunEvent::new(EventKind::DagBuilt, json!({"question_id": "q1"}));
        let frame = serde_json::to_value(&event).unwrap();
        assert_eq!(frame["type"], "dag_built");
        assert!(frame["ts"].is_string());
        assert_eq!(frame["payload"]["question_id"], "q1");
    }

    #[tokio::test]
    async fn test_overflow_drops_newest_without_blocking() {
        let (publisher, mut rx) = EventPublisher::channel("run-1");
        for i in 0..(EVENT_QUEUE_CAPACITY + 10) {
            publisher.publish(EventKind::DagBuilt, json!({"i": i}));
        }
        // The queue holds the first CAPACITY events, in order.
        let first = rx.recv().await.unwrap();
        assert_eq!(first.payload["i"], 0);
    }
}
