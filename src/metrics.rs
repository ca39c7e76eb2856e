//! Prometheus metrics for the notification core.
//!
//! Each `DeliveryMetrics` owns its own `Registry`, so tests and multiple
//! app instances in one process never collide on metric names.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::notification::broadcast::DeliveryStats;
use crate::notification::delivery::PushOutcome;

pub struct DeliveryMetrics {
    registry: Registry,
    notifications_total: IntCounterVec,
    persist_errors_total: IntCounter,
    broadcast_recipients_total: IntCounterVec,
    online_sessions: IntGauge,
}

impl DeliveryMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let notifications_total = IntCounterVec::new(
            Opts::new("booth_notifications_total", "Persisted notifications by push outcome"),
            &["outcome"],
        )?;
        let persist_errors_total = IntCounter::new(
            "booth_persist_errors_total",
            "Deliveries rejected before or during persistence",
        )?;
        let broadcast_recipients_total = IntCounterVec::new(
            Opts::new("booth_broadcast_recipients_total", "Fan-out recipients by result"),
            &["result"],
        )?;
        let online_sessions = IntGauge::new("booth_online_sessions", "Currently bound live sessions")?;

        registry.register(Box::new(notifications_total.clone()))?;
        registry.register(Box::new(persist_errors_total.clone()))?;
        registry.register(Box::new(broadcast_recipients_total.clone()))?;
        registry.register(Box::new(online_sessions.clone()))?;

        Ok(Self {
            registry,
            notifications_total,
            persist_errors_total,
            broadcast_recipients_total,
            online_sessions,
        })
    }

    pub fn record_push(&self, outcome: &PushOutcome) {
        self.notifications_total
            .with_label_values(&[outcome.label()])
            .inc();
    }

    pub fn record_persist_error(&self) {
        self.persist_errors_total.inc();
    }

    pub fn record_broadcast(&self, stats: &DeliveryStats) {
        self.broadcast_recipients_total
            .with_label_values(&["succeeded"])
            .inc_by(stats.succeeded as u64);
        self.broadcast_recipients_total
            .with_label_values(&["failed"])
            .inc_by(stats.failed as u64);
    }

    pub fn set_online_sessions(&self, count: usize) {
        self.online_sessions.set(count as i64);
    }

    /// Prometheus text exposition for `/metrics`.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("metrics encode failed: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::registry::DeliveryError;

    #[test]
    fn test_instances_do_not_collide() {
        let a = DeliveryMetrics::new().unwrap();
        let b = DeliveryMetrics::new().unwrap();
        a.record_push(&PushOutcome::Delivered);
        b.record_push(&PushOutcome::Deferred);
        assert!(a.encode().contains("booth_notifications_total{outcome=\"pushed\"} 1"));
        assert!(!b.encode().contains("outcome=\"pushed\""));
    }

    #[test]
    fn test_records_failures_and_gauge() {
        let m = DeliveryMetrics::new().unwrap();
        m.record_push(&PushOutcome::Failed(DeliveryError::TimedOut));
        m.record_persist_error();
        m.set_online_sessions(3);
        let text = m.encode();
        assert!(text.contains("booth_notifications_total{outcome=\"failed\"} 1"));
        assert!(text.contains("booth_persist_errors_total 1"));
        assert!(text.contains("booth_online_sessions 3"));
    }
}
