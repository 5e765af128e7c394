use crate::event::ProducerId;
use serde::Serialize;

const NS_PER_SEC: f64 = 1_000_000_000.0;
const MIN_ELAPSED_SECS: f64 = 1e-9;

/// Converts a raw counter into events per second; zero elapsed time reports zero.
pub fn rate_per_sec(count: u64, elapsed_ns: u128) -> f64 {
    if elapsed_ns == 0 {
        return 0.0;
    }
    let elapsed_s = (elapsed_ns as f64 / NS_PER_SEC).max(MIN_ELAPSED_SECS);
    count as f64 / elapsed_s
}

/// First/last observation window used to derive rates from counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsTracker {
    first_object_ns: Option<u128>,
    last_object_ns: Option<u128>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observation at `now_ns`.
    pub fn record(&mut self, now_ns: u128) {
        if self.first_object_ns.is_none() {
            self.first_object_ns = Some(now_ns);
        }
        self.last_object_ns = Some(now_ns.max(self.last_object_ns.unwrap_or(0)));
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn first_object_ns(&self) -> Option<u128> {
        self.first_object_ns
    }

    pub fn last_object_ns(&self) -> Option<u128> {
        self.last_object_ns
    }

    /// Span between the first and last recorded observation.
    pub fn elapsed_ns(&self) -> u128 {
        match (self.first_object_ns, self.last_object_ns) {
            (Some(first), Some(last)) => last.saturating_sub(first),
            _ => 0,
        }
    }

    pub fn rate(&self, count: u64) -> f64 {
        rate_per_sec(count, self.elapsed_ns())
    }
}

/// Statistics exported for a single producer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerStats {
    pub producer_id: ProducerId,
    pub n_received: u64,
    pub received_rate: f64,
    pub n_overruns: u64,
    pub overrun_rate: f64,
    pub n_rejected: u64,
    pub n_queued: u64,
    pub n_delivered: u64,
}

/// Statistics exported for a collection session via `get_stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorStats {
    pub n_collected: u64,
    pub collected_rate: f64,
    pub n_rejected: u64,
    pub rejected_rate: f64,
    pub n_missed: u64,
    pub missed_rate: f64,
    pub n_processed: u64,
    pub processed_rate: f64,
    pub n_errors: u64,
    pub error_rate: f64,
    pub n_group_missed: u64,
    pub cache_size: u64,
    pub cache_len: usize,
    pub last_delivered_id: Option<u64>,
    pub runtime_s: f64,
    pub producers: Vec<ProducerStats>,
    /// Snapshot returned by the processor's own stats hook.
    pub processor: serde_json::Value,
}

impl CollectorStats {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn producer(&self, id: &str) -> Option<&ProducerStats> {
        self.producers
            .iter()
            .find(|stats| stats.producer_id.as_str() == id)
    }
}
