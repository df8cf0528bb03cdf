//! Retry, backoff and per-key circuit breaking around tool invocations and
//! downstream service calls.
//!
//! Keys identify the failing component, e.g. `tool:<name>`, `search:<operation>`
//! or `docs:<operation>`. A key whose error count reaches the threshold within
//! the reset window fails fast with [`McpError::TemporarilyUnavailable`] until
//! the window has passed since its last failure.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::error::McpError;
use crate::health::ComponentHealth;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);
pub const DEFAULT_ERROR_THRESHOLD: u64 = 100;
pub const DEFAULT_RESET_WINDOW: Duration = Duration::from_secs(300);

/// Components reported by [`ResilienceLayer::component_health`], with the key prefix each one owns.
pub const HEALTH_COMPONENTS: [(&str, &str); 4] = [
    ("tools", "tool:"),
    ("search", "search:"),
    ("documentation", "docs:"),
    ("embeddings", "embeddings:"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResilienceConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub error_threshold: u64,
    pub reset_window: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            reset_window: DEFAULT_RESET_WINDOW,
        }
    }
}

impl ResilienceConfig {
    /// Delay before the attempt following `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy)]
struct ErrorEntry {
    count: u64,
    last_error_ms: i64,
}

impl ErrorEntry {
    fn last_error(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_error_ms)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ComponentErrorStats {
    pub error_count: u64,
    pub last_error: DateTime<Utc>,
    pub circuit_open: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorStatistics {
    pub total_errors: u64,
    pub components: BTreeMap<String, ComponentErrorStats>,
}

/// Per-key failure counters. Every mutation happens under the write lock, so
/// concurrent failures on one key are never lost, and expired keys are pruned
/// whenever a failure is recorded or statistics are taken.
#[derive(Debug)]
pub struct ErrorTracker {
    entries: RwLock<HashMap<String, ErrorEntry>>,
    threshold: u64,
    reset_window: ChronoDuration,
}

impl ErrorTracker {
    pub fn new(threshold: u64, reset_window: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            threshold,
            reset_window: ChronoDuration::from_std(reset_window)
                .unwrap_or_else(|_| ChronoDuration::seconds(300)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ErrorEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ErrorEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one failure for `key`, returning the new count.
    pub fn record_failure(&self, key: &str) -> u64 {
        self.record_failure_at(key, Utc::now())
    }

    pub(crate) fn record_failure_at(&self, key: &str, at: DateTime<Utc>) -> u64 {
        let mut entries = self.write();
        self.prune(&mut entries, at);

        let entry = entries.entry(key.to_string()).or_insert(ErrorEntry {
            count: 0,
            last_error_ms: at.timestamp_millis(),
        });
        entry.count += 1;
        entry.last_error_ms = entry.last_error_ms.max(at.timestamp_millis());
        entry.count
    }

    /// Drop every entry whose last failure is older than the reset window
    fn prune(&self, entries: &mut HashMap<String, ErrorEntry>, now: DateTime<Utc>) {
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        let expired = before - entries.len();
        if expired > 0 {
            tracing::debug!(expired, "Expired error tracker entries pruned");
        }
    }

    pub fn clear(&self, key: &str) {
        self.write().remove(key);
    }

    pub fn clear_all(&self) {
        self.write().clear();
    }

    pub fn error_count(&self, key: &str) -> u64 {
        self.read().get(key).map(|e| e.count).unwrap_or(0)
    }

    /// Number of keys currently held, expired or not
    pub fn tracked_keys(&self) -> usize {
        self.read().len()
    }

    pub fn is_circuit_open(&self, key: &str) -> bool {
        self.is_circuit_open_at(key, Utc::now())
    }

    /// Evaluate the circuit at `now`. An entry whose last failure is older than
    /// the reset window is dropped here.
    pub(crate) fn is_circuit_open_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.read().get(key).copied() else {
            return false;
        };
        if !self.is_expired(&entry, now) {
            return entry.count >= self.threshold;
        }

        let mut entries = self.write();
        // A failure may have landed between the read and this write.
        match entries.get(key) {
            Some(current) if self.is_expired(current, now) => {
                entries.remove(key);
                tracing::info!(key = %key, "Error tracker entry expired, circuit reset");
                false
            }
            Some(current) => current.count >= self.threshold,
            None => false,
        }
    }

    fn is_expired(&self, entry: &ErrorEntry, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.last_error()) >= self.reset_window
    }

    pub fn statistics(&self) -> ErrorStatistics {
        self.statistics_at(Utc::now())
    }

    pub(crate) fn statistics_at(&self, now: DateTime<Utc>) -> ErrorStatistics {
        let mut entries = self.write();
        self.prune(&mut entries, now);

        let mut components = BTreeMap::new();
        let mut total_errors = 0;
        for (key, entry) in entries.iter() {
            total_errors += entry.count;
            components.insert(
                key.clone(),
                ComponentErrorStats {
                    error_count: entry.count,
                    last_error: entry.last_error(),
                    circuit_open: entry.count >= self.threshold,
                },
            );
        }
        ErrorStatistics {
            total_errors,
            components,
        }
    }
}

/// Wraps operations with retry, exponential backoff and circuit breaking
pub struct ResilienceLayer {
    config: ResilienceConfig,
    tracker: ErrorTracker,
    shutdown: CancellationToken,
}

impl ResilienceLayer {
    pub fn new(config: ResilienceConfig) -> Self {
        Self::with_shutdown(config, CancellationToken::new())
    }

    /// Cancelling `shutdown` preempts pending retry waits. Attempts already
    /// running are never interrupted.
    pub fn with_shutdown(config: ResilienceConfig, shutdown: CancellationToken) -> Self {
        let tracker = ErrorTracker::new(config.error_threshold, config.reset_window);
        Self {
            config,
            tracker,
            shutdown,
        }
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn tracker(&self) -> &ErrorTracker {
        &self.tracker
    }

    /// Run `operation` under the circuit for `key`, retrying execution-class
    /// and transient failures. On exhaustion the last failure is returned as is.
    pub async fn run<T, F, Fut>(&self, key: &str, mut operation: F) -> Result<T, McpError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, McpError>>,
    {
        if self.tracker.is_circuit_open(key) {
            tracing::warn!(key = %key, "Circuit open, failing fast");
            return Err(McpError::TemporarilyUnavailable(key.to_string()));
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        self.tracker.clear(key);
                        tracing::info!(key = %key, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                let count = self.tracker.record_failure(key);
                tracing::debug!(key = %key, error = %err, count, "Non-retryable failure");
                return Err(err);
            }

            if attempt >= max_attempts {
                let count = self.tracker.record_failure(key);
                tracing::error!(
                    key = %key,
                    attempts = attempt,
                    count,
                    error = %err,
                    "Operation failed after all retry attempts"
                );
                return Err(err);
            }

            let delay = self.config.backoff_delay(attempt);
            tracing::warn!(
                key = %key,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Operation failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => {
                    self.tracker.record_failure(key);
                    tracing::warn!(key = %key, attempt, "Shutdown requested, abandoning retries");
                    return Err(err);
                }
            }
        }
    }

    /// Like [`run`](Self::run), with exactly one fallback attempt when the primary
    /// path fails. Fallback failures are logged and do not count toward the
    /// circuit; the primary error is returned in that case.
    pub async fn run_with_fallback<T, F, Fut, G, GFut>(
        &self,
        key: &str,
        operation: F,
        fallback: G,
    ) -> Result<T, McpError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, McpError>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, McpError>>,
    {
        let primary = match self.run(key, operation).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        tracing::warn!(key = %key, error = %primary, "Primary path failed, trying fallback");
        match fallback().await {
            Ok(value) => Ok(value),
            Err(fallback_err) => {
                tracing::warn!(key = %key, error = %fallback_err, "Fallback failed");
                Err(primary)
            }
        }
    }

    pub fn reset(&self, key: &str) {
        self.tracker.clear(key);
    }

    pub fn reset_all(&self) {
        self.tracker.clear_all();
    }

    pub fn error_statistics(&self) -> ErrorStatistics {
        self.tracker.statistics()
    }

    /// Health of the fixed component set, derived from tracker keys by prefix
    pub fn component_health(&self) -> BTreeMap<String, ComponentHealth> {
        let stats = self.tracker.statistics();
        HEALTH_COMPONENTS
            .iter()
            .map(|(component, prefix)| {
                let failing: Vec<(&String, &ComponentErrorStats)> = stats
                    .components
                    .iter()
                    .filter(|(key, _)| key.starts_with(*prefix))
                    .collect();
                let errors: u64 = failing.iter().map(|(_, s)| s.error_count).sum();
                let open: Vec<&str> = failing
                    .iter()
                    .filter(|(_, s)| s.circuit_open)
                    .map(|(key, _)| key.as_str())
                    .collect();

                let health = if !open.is_empty() {
                    ComponentHealth::unhealthy(format!("Circuit open for {}", open.join(", ")))
                } else if errors > 0 {
                    ComponentHealth::degraded(format!("{} recent error(s)", errors))
                } else {
                    ComponentHealth::healthy()
                };

                let mut details = HashMap::new();
                details.insert("error_count".to_string(), serde_json::json!(errors));
                details.insert("open_circuits".to_string(), serde_json::json!(open));

                (component.to_string(), health.with_details(details))
            })
            .collect()
    }
}

impl Default for ResilienceLayer {
    fn default() -> Self {
        Self::new(ResilienceConfig::default())
    }
}
