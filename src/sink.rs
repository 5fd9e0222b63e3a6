//! Off-path recording of completed requests.
//!
//! The proxy hands each finished [`LogEntry`] to an [`EventSink`] without
//! waiting. A single writer task drains a bounded queue, persists rows on the
//! blocking pool and dispatches webhook alerts as independent tasks.
//!
//! The queue is a `tokio::sync::broadcast` channel: when it is full the oldest
//! event is overwritten and the writer counts what it missed, so producers
//! never block on a slow database or webhook.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::logging::{insert_entry, DbPool, LogEntry};
use crate::notification::webhook::WebhookNotifier;
use crate::notification::{should_notify, AlertPayload, Notifier, WebhookEvent};
use crate::policy::config::ProxyConfig;

/// Handle used by request handlers to submit completed entries.
///
/// Cheap to clone. The writer task stops once every handle is dropped and the
/// queue is drained.
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<LogEntry>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    /// Spawn the writer task.
    ///
    /// `capacity` is rounded up to the next power of two by the channel.
    pub fn spawn(
        store: Option<DbPool>,
        notifier: Option<Arc<dyn Notifier>>,
        events: Vec<WebhookEvent>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let writer = Writer {
            store,
            notifier,
            events,
            dropped: dropped.clone(),
        };
        let handle = tokio::spawn(writer.run(rx));
        (Self { tx, dropped }, handle)
    }

    /// Spawn a sink wired to the store and the webhook named in `config`.
    pub fn from_config(config: &ProxyConfig, store: Option<DbPool>) -> (Self, JoinHandle<()>) {
        let notifier = config
            .webhook_url
            .as_ref()
            .map(|url| Arc::new(WebhookNotifier::new(url.clone())) as Arc<dyn Notifier>);
        Self::spawn(
            store,
            notifier,
            config.webhook_events.clone(),
            config.queue_capacity,
        )
    }

    /// Queue an entry. Never blocks and never fails.
    pub fn submit(&self, entry: LogEntry) {
        if self.tx.send(entry).is_err() {
            debug!("event sink writer has stopped, entry discarded");
        }
    }

    /// Number of entries overwritten before the writer could read them.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct Writer {
    store: Option<DbPool>,
    notifier: Option<Arc<dyn Notifier>>,
    events: Vec<WebhookEvent>,
    dropped: Arc<AtomicU64>,
}

impl Writer {
    async fn run(self, mut rx: broadcast::Receiver<LogEntry>) {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Ok(entry) => {
                        self.record(&entry).await;
                        self.notify(&entry, &mut in_flight);
                    }
                    Err(RecvError::Lagged(n)) => {
                        self.dropped.fetch_add(n, Ordering::Relaxed);
                        warn!(skipped = n, "event queue full, oldest entries dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        while in_flight.join_next().await.is_some() {}
        info!(
            dropped = self.dropped.load(Ordering::Relaxed),
            "event sink stopped"
        );
    }

    async fn record(&self, entry: &LogEntry) {
        let Some(pool) = self.store.clone() else {
            return;
        };
        let entry = entry.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<i64> {
            let conn = pool.get()?;
            insert_entry(&conn, &entry)
        })
        .await;

        match result {
            Ok(Ok(id)) => debug!(id, "log entry stored"),
            Ok(Err(e)) => warn!(error = %e, "failed to store log entry"),
            Err(e) => warn!(error = %e, "log writer task failed"),
        }
    }

    fn notify(&self, entry: &LogEntry, in_flight: &mut JoinSet<()>) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        if !should_notify(entry, &self.events) {
            return;
        }
        let payload = AlertPayload::from(entry);
        in_flight.spawn(async move {
            if let Err(e) = notifier.notify(&payload).await {
                warn!(backend = notifier.name(), error = %e, "alert delivery failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{open_memory_pool, query_recent};
    use crate::notification::tests::MockNotifier;
    use crate::policy::evaluator::Action;

    fn entry(endpoint: &str, pii_types: &[&str], action: Action) -> LogEntry {
        LogEntry {
            pii_types: pii_types.iter().map(|s| s.to_string()).collect(),
            action,
            ..LogEntry::new("POST", endpoint)
        }
    }

    fn stored(pool: &DbPool) -> Vec<LogEntry> {
        let conn = pool.get().unwrap();
        query_recent(&conn, 1000, false).unwrap()
    }

    #[tokio::test]
    async fn entries_are_persisted_in_order() {
        let pool = open_memory_pool().unwrap();
        let (sink, handle) = EventSink::spawn(Some(pool.clone()), None, vec![], 16);
        sink.submit(entry("/one", &[], Action::Pass));
        sink.submit(entry("/two", &["email"], Action::Redact));
        drop(sink);
        handle.await.unwrap();

        let rows = stored(&pool);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].endpoint, "/two");
        assert_eq!(rows[1].endpoint, "/one");
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_and_counts() {
        let pool = open_memory_pool().unwrap();
        let (sink, handle) = EventSink::spawn(Some(pool.clone()), None, vec![], 4);
        let counter = sink.dropped.clone();

        // The writer cannot run before the first await on a current-thread runtime.
        for i in 0..9 {
            sink.submit(entry(&format!("/r{}", i), &[], Action::Pass));
        }
        drop(sink);
        handle.await.unwrap();

        assert_eq!(counter.load(Ordering::Relaxed), 5);
        let endpoints: Vec<String> = stored(&pool).into_iter().map(|e| e.endpoint).collect();
        assert_eq!(endpoints, vec!["/r8", "/r7", "/r6", "/r5"]);
    }

    #[tokio::test]
    async fn webhook_filtered_by_subscribed_events() {
        let (mock, payloads) = MockNotifier::new();
        let (sink, handle) = EventSink::spawn(
            None,
            Some(Arc::new(mock)),
            vec![WebhookEvent::Blocked],
            16,
        );
        sink.submit(entry("/clean", &[], Action::Pass));
        sink.submit(entry("/audit", &["email"], Action::Pass));
        sink.submit(entry("/blocked", &["ssn"], Action::Block));
        drop(sink);
        handle.await.unwrap();

        let payloads = payloads.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].endpoint, "/blocked");
        assert_eq!(payloads[0].pii_types, vec!["ssn"]);
    }

    #[tokio::test]
    async fn pii_detected_subscription_fires_once_per_entry() {
        let (mock, payloads) = MockNotifier::new();
        let (sink, handle) = EventSink::spawn(
            None,
            Some(Arc::new(mock)),
            vec![WebhookEvent::PiiDetected, WebhookEvent::Blocked],
            16,
        );
        sink.submit(entry("/blocked", &["ssn"], Action::Block));
        drop(sink);
        handle.await.unwrap();

        assert_eq!(payloads.lock().unwrap().len(), 1);
    }

    struct FailingNotifier;

    #[async_trait::async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _payload: &AlertPayload) -> Result<()> {
            Err(crate::error::WiretapsError::Notification("boom".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn notifier_failure_does_not_stop_persistence() {
        let pool = open_memory_pool().unwrap();
        let (sink, handle) = EventSink::spawn(
            Some(pool.clone()),
            Some(Arc::new(FailingNotifier)),
            vec![WebhookEvent::PiiDetected],
            16,
        );
        sink.submit(entry("/a", &["email"], Action::Pass));
        sink.submit(entry("/b", &["email"], Action::Pass));
        drop(sink);
        handle.await.unwrap();

        assert_eq!(stored(&pool).len(), 2);
    }

    #[tokio::test]
    async fn submit_after_writer_stopped_is_silent() {
        let (sink, handle) = EventSink::spawn(None, None, vec![], 4);
        handle.abort();
        let _ = handle.await;
        sink.submit(entry("/late", &[], Action::Pass));
        assert_eq!(sink.dropped(), 0);
    }
}
