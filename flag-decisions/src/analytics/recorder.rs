use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::analytics::usage::{UsageAnalyticsEngine, UsageRecord};
use crate::metrics::consts::{USAGE_EVENTS_DROPPED_COUNTER, USAGE_EVENTS_PROCESSED_COUNTER};
use crate::metrics::inc;

#[derive(Debug, Clone, PartialEq)]
pub struct UsageEvent {
    pub flag_key: String,
    pub record: UsageRecord,
}

/// Where the evaluator hands off usage records. Submitting must never block
/// or fail the evaluation that produced the record.
pub trait UsageSink {
    fn submit(&self, event: UsageEvent);
}

/// Records synchronously, on the caller's thread.
impl UsageSink for UsageAnalyticsEngine {
    fn submit(&self, event: UsageEvent) {
        self.record_usage(&event.flag_key, event.record);
    }
}

/// Queues records for a background worker. When the queue is full the record
/// is dropped and counted.
#[derive(Clone)]
pub struct ChannelUsageSink {
    sender: mpsc::Sender<UsageEvent>,
}

impl ChannelUsageSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<UsageEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl UsageSink for ChannelUsageSink {
    fn submit(&self, event: UsageEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(flag_key = event.flag_key, "usage queue full, dropping record");
                inc(
                    USAGE_EVENTS_DROPPED_COUNTER,
                    &[("reason".to_string(), "full".to_string())],
                    1,
                );
            }
            Err(TrySendError::Closed(event)) => {
                warn!(flag_key = event.flag_key, "usage worker gone, dropping record");
                inc(
                    USAGE_EVENTS_DROPPED_COUNTER,
                    &[("reason".to_string(), "closed".to_string())],
                    1,
                );
            }
        }
    }
}

/// Drains the usage queue into the analytics engine until every sender is
/// dropped.
pub async fn process_usage_events(
    mut receiver: mpsc::Receiver<UsageEvent>,
    engine: Arc<UsageAnalyticsEngine>,
) {
    while let Some(event) = receiver.recv().await {
        engine.submit(event);
        inc(USAGE_EVENTS_PROCESSED_COUNTER, &[], 1);
    }
    debug!("usage queue closed, analytics worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::EvaluationContext;
    use crate::time::MockTime;

    fn event(flag_key: &str, enabled: bool) -> UsageEvent {
        UsageEvent {
            flag_key: flag_key.to_string(),
            record: UsageRecord {
                timestamp: 1_000,
                context: EvaluationContext::new("tenant"),
                enabled,
                response_time_ms: 1.5,
                errored: false,
            },
        }
    }

    #[test]
    fn test_engine_records_inline() {
        let engine = UsageAnalyticsEngine::new(Arc::new(MockTime::new(0)));
        engine.submit(event("flag", true));

        let metrics = engine.get_metrics("flag").unwrap();
        assert_eq!(metrics.evaluation_count, 1);
        assert_eq!(engine.history("flag")[0].timestamp, 1_000);
    }

    #[tokio::test]
    async fn test_worker_drains_queue_into_engine() {
        let engine = Arc::new(UsageAnalyticsEngine::new(Arc::new(MockTime::new(0))));
        let (sink, receiver) = ChannelUsageSink::new(16);
        let worker = tokio::spawn(process_usage_events(receiver, engine.clone()));

        sink.submit(event("a", true));
        sink.submit(event("a", false));
        sink.submit(event("b", true));
        drop(sink);
        worker.await.unwrap();

        assert_eq!(engine.get_metrics("a").unwrap().evaluation_count, 2);
        assert_eq!(engine.get_metrics("b").unwrap().evaluation_count, 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (sink, mut receiver) = ChannelUsageSink::new(2);
        for _ in 0..5 {
            sink.submit(event("flag", true));
        }

        let mut received = 0;
        while receiver.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 2);
    }

    #[tokio::test]
    async fn test_closed_queue_drops_without_panicking() {
        let (sink, receiver) = ChannelUsageSink::new(2);
        drop(receiver);
        sink.submit(event("flag", true));
    }
}
