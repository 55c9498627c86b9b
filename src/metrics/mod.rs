//! Metrics collection for observability

use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_with_registry, Counter, CounterVec, Histogram, Opts, Registry,
};
use std::sync::Arc;
use once_cell::sync::Lazy;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Turn metrics
    pub turns_total: CounterVec,
    pub turn_duration: Histogram,
    pub partial_flushes: Counter,

    // Control actions
    pub actions_total: CounterVec,

    // Completion metrics
    pub completion_fallbacks: Counter,

    // Token budget metrics
    pub prompt_tokens: Histogram,
    pub prompt_messages_redacted: Counter,

    // Inbound webhook metrics
    pub slack_requests: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let registry = Registry::new();

        let turns_total = register_counter_vec_with_registry!(
            Opts::new("chat_turns_total", "Total chat turns by outcome"),
            &["outcome"],
            registry
        )?;

        let turn_duration = register_histogram_with_registry!(
            "chat_turn_duration_seconds",
            "Chat turn duration in seconds",
            registry
        )?;

        let partial_flushes = register_counter_with_registry!(
            Opts::new("chat_partial_flushes_total", "Total in-progress message updates"),
            registry
        )?;

        let actions_total = register_counter_vec_with_registry!(
            Opts::new("chat_actions_total", "Total control button actions"),
            &["action"],
            registry
        )?;

        let completion_fallbacks = register_counter_with_registry!(
            Opts::new("completion_fallbacks_total", "Total fallback model attempts"),
            registry
        )?;

        let prompt_tokens = register_histogram_with_registry!(
            "prompt_tokens",
            "Estimated prompt tokens per turn after trimming",
            registry
        )?;

        let prompt_messages_redacted = register_counter_with_registry!(
            Opts::new(
                "prompt_messages_redacted_total",
                "Total messages redacted to fit the token budget"
            ),
            registry
        )?;

        let slack_requests = register_counter_vec_with_registry!(
            Opts::new("slack_requests_total", "Total inbound Slack requests"),
            &["kind", "status"],
            registry
        )?;

        Ok(Self {
            registry,
            turns_total,
            turn_duration,
            partial_flushes,
            actions_total,
            completion_fallbacks,
            prompt_tokens,
            prompt_messages_redacted,
            slack_requests,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a finished turn
    pub fn record_turn(&self, outcome: &str, seconds: f64) {
        self.turns_total.with_label_values(&[outcome]).inc();
        self.turn_duration.observe(seconds);
    }

    /// Record a control button press
    pub fn record_action(&self, action: &str) {
        self.actions_total.with_label_values(&[action]).inc();
    }

    /// Record an inbound Slack request
    pub fn record_slack_request(&self, kind: &str, accepted: bool) {
        let status = if accepted { "accepted" } else { "rejected" };
        self.slack_requests.with_label_values(&[kind, status]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}
