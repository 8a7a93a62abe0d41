use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use serde::Serialize;
use uuid::Uuid;

use crate::dto::{MessageId, Usage};

const MAX_SAMPLES: usize = 10000;
const MAX_RECENT_ERRORS: usize = 100;

/// Correlation ID for one relay invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(Arc<str>);

impl Serialize for RequestId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error categories for metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    BadRequest,   // 400/404
    RateLimited,  // 429
    Config,       // missing API key and friends
    Provider,     // provider answered with a non-success status
    Unavailable,  // transport failure
    Timeout,
    Internal,
}

impl ErrorCategory {
    pub fn from_error(error: &crate::Error) -> Self {
        match error {
            crate::Error::BadRequest(_) |
            crate::Error::ValidationFailed(_) |
            crate::Error::NotFound(_) => ErrorCategory::BadRequest,

            crate::Error::RateLimitExceeded => ErrorCategory::RateLimited,

            crate::Error::ConfigError(_) => ErrorCategory::Config,

            crate::Error::Provider { .. } => ErrorCategory::Provider,

            crate::Error::ServiceUnavailable(_) => ErrorCategory::Unavailable,

            crate::Error::Timeout(_) => ErrorCategory::Timeout,

            _ => ErrorCategory::Internal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::BadRequest => "bad_request",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::Config => "config",
            ErrorCategory::Provider => "provider",
            ErrorCategory::Unavailable => "unavailable",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Internal => "internal",
        }
    }
}

/// A relay that has committed its placeholder and not yet resolved
#[derive(Debug, Clone)]
pub struct ActiveRelay {
    pub request_id: RequestId,
    pub placeholder: MessageId,
    pub started_at: Instant,
}

/// Relay metrics shared between the relay and the HTTP layer
#[derive(Debug, Clone)]
pub struct ObservableMetrics {
    inner: Arc<RwLock<MetricsData>>,
    start_time: Instant,
}

#[derive(Debug, Default)]
struct MetricsData {
    total_relays: u64,
    completed_relays: u64,
    failed_relays: u64,
    active_relays: HashMap<RequestId, ActiveRelay>,

    // Placeholders left empty by a failed relay. They stay that way.
    abandoned_placeholders: u64,

    provider_latencies: VecDeque<u64>,
    provider_processing: VecDeque<u64>,
    relay_durations: VecDeque<u64>,

    total_prompt_tokens: u64,
    total_completion_tokens: u64,

    errors_by_category: HashMap<ErrorCategory, u64>,
    error_messages: VecDeque<(Instant, ErrorCategory, String)>,

    rate_limit_hits: u64,
}

fn push_sample<T>(samples: &mut VecDeque<T>, value: T) {
    samples.push_back(value);
    if samples.len() > MAX_SAMPLES {
        samples.pop_front();
    }
}

impl ObservableMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsData::default())),
            start_time: Instant::now(),
        }
    }

    /// Start tracking a relay whose placeholder is already committed
    pub async fn start_relay(&self, request_id: RequestId, placeholder: MessageId) {
        let mut data = self.inner.write().await;
        data.total_relays += 1;
        data.active_relays.insert(request_id.clone(), ActiveRelay {
            request_id,
            placeholder,
            started_at: Instant::now(),
        });
    }

    /// Mark a relay as filled
    pub async fn complete_relay(&self, request_id: &RequestId, usage: &Usage, processing_ms: Option<u64>) {
        let mut data = self.inner.write().await;

        if let Some(relay) = data.active_relays.remove(request_id) {
            let duration_ms = relay.started_at.elapsed().as_millis() as u64;
            push_sample(&mut data.relay_durations, duration_ms);
        }
        data.completed_relays += 1;
        data.total_prompt_tokens += usage.prompt_tokens;
        data.total_completion_tokens += usage.completion_tokens;
        if let Some(ms) = processing_ms {
            push_sample(&mut data.provider_processing, ms);
        }
    }

    /// Record round-trip latency of one provider call
    pub async fn record_provider_latency(&self, latency_ms: u64) {
        let mut data = self.inner.write().await;
        push_sample(&mut data.provider_latencies, latency_ms);
    }

    /// Record an error with category. When the error ends an active relay its
    /// placeholder is counted as abandoned.
    pub async fn record_error(&self, request_id: Option<&RequestId>, error: &crate::Error) {
        let mut data = self.inner.write().await;

        let category = ErrorCategory::from_error(error);
        *data.errors_by_category.entry(category).or_insert(0) += 1;

        data.error_messages.push_back((Instant::now(), category, error.to_string()));
        if data.error_messages.len() > MAX_RECENT_ERRORS {
            data.error_messages.pop_front();
        }

        if category == ErrorCategory::RateLimited {
            data.rate_limit_hits += 1;
        }

        if let Some(id) = request_id {
            if data.active_relays.remove(id).is_some() {
                data.failed_relays += 1;
                data.abandoned_placeholders += 1;
            }
        }
    }

    /// Calculate percentile from samples
    fn calculate_percentile(samples: &[u64], percentile: f64) -> u64 {
        if samples.is_empty() {
            return 0;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let index = ((percentile / 100.0) * (sorted.len() - 1) as f64) as usize;
        sorted[index]
    }

    /// Get detailed metrics snapshot
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let data = self.inner.read().await;

        let latency: Vec<u64> = data.provider_latencies.iter().copied().collect();
        let processing: Vec<u64> = data.provider_processing.iter().copied().collect();
        let durations: Vec<u64> = data.relay_durations.iter().copied().collect();

        MetricsSnapshot {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            uptime_seconds: self.start_time.elapsed().as_secs(),

            total_relays: data.total_relays,
            completed_relays: data.completed_relays,
            failed_relays: data.failed_relays,
            active_relays: data.active_relays.len() as u64,
            abandoned_placeholders: data.abandoned_placeholders,

            provider_latency_p50_ms: Self::calculate_percentile(&latency, 50.0),
            provider_latency_p95_ms: Self::calculate_percentile(&latency, 95.0),
            provider_latency_p99_ms: Self::calculate_percentile(&latency, 99.0),
            provider_processing_p50_ms: Self::calculate_percentile(&processing, 50.0),
            relay_duration_p50_ms: Self::calculate_percentile(&durations, 50.0),
            relay_duration_p95_ms: Self::calculate_percentile(&durations, 95.0),

            total_prompt_tokens: data.total_prompt_tokens,
            total_completion_tokens: data.total_completion_tokens,

            errors_by_category: data.errors_by_category.clone(),
            rate_limit_hits: data.rate_limit_hits,
        }
    }

    /// Get recent errors for debugging
    pub async fn recent_errors(&self) -> Vec<(u64, String, String)> {
        let data = self.inner.read().await;
        let now = Instant::now();

        data.error_messages
            .iter()
            .map(|(time, category, msg)| {
                let age_seconds = now.duration_since(*time).as_secs();
                (age_seconds, category.as_str().to_string(), msg.clone())
            })
            .collect()
    }
}

impl Default for ObservableMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics snapshot for /metrics endpoint
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,

    // Relay counts
    pub total_relays: u64,
    pub completed_relays: u64,
    pub failed_relays: u64,
    pub active_relays: u64,
    pub abandoned_placeholders: u64,

    // Latency percentiles (milliseconds)
    pub provider_latency_p50_ms: u64,
    pub provider_latency_p95_ms: u64,
    pub provider_latency_p99_ms: u64,
    pub provider_processing_p50_ms: u64,
    pub relay_duration_p50_ms: u64,
    pub relay_duration_p95_ms: u64,

    // Token metrics
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,

    pub errors_by_category: HashMap<ErrorCategory, u64>,
    pub rate_limit_hits: u64,
}
