//! Circuit breaker keyed by tool name and canonical input hash.
//!
//! Repeated identical failing calls are refused for a cooldown window so a
//! model stuck on a bad call cannot spin the loop against the provider.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

/// Failure history of one (tool, input) signature.
#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    count: u32,
    last_attempt: Instant,
}

/// Why the breaker refused a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerOpen {
    pub attempts: u32,
    pub remaining: Duration,
}

impl BreakerOpen {
    /// Remaining cooldown rounded to whole minutes.
    pub fn remaining_minutes(&self) -> u64 {
        (self.remaining.as_millis() as f64 / 60_000.0).round() as u64
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    max_failures: u32,
    reset_after: Duration,
    records: Mutex<HashMap<String, FailureRecord>>,
    /// One async lock per signature with a call in flight.
    in_flight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl CircuitBreaker {
    pub fn new(max_failures: u32, reset_after: Duration) -> Self {
        Self {
            max_failures,
            reset_after,
            records: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Serialize callers of one signature. The guard is held across
    /// `check`, the call itself and the `record_*` that follows, so
    /// concurrent identical calls observe each other's outcome.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            // Slots nobody holds or waits on are dropped.
            in_flight.retain(|k, slot| k == key || Arc::strong_count(slot) > 1);
            in_flight.entry(key.to_string()).or_default().clone()
        };
        slot.lock_owned().await
    }

    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    /// Refuse if the signature has failed too often within the window.
    /// An expired record is cleared.
    pub fn check(&self, key: &str) -> Result<(), BreakerOpen> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(record) = records.get(key).copied() else {
            return Ok(());
        };

        let elapsed = record.last_attempt.elapsed();
        if elapsed > self.reset_after {
            records.remove(key);
            tracing::debug!(key, "Circuit breaker reset");
            return Ok(());
        }
        if record.count >= self.max_failures {
            return Err(BreakerOpen {
                attempts: record.count,
                remaining: self.reset_after.saturating_sub(elapsed),
            });
        }
        Ok(())
    }

    /// Count one failure. Returns the new count.
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let record = records.entry(key.to_string()).or_insert(FailureRecord {
            count: 0,
            last_attempt: Instant::now(),
        });
        record.count += 1;
        record.last_attempt = Instant::now();
        record.count
    }

    /// Forget all failures of a signature. Returns whether there were any.
    pub fn record_success(&self, key: &str) -> bool {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    pub fn failure_count(&self, key: &str) -> u32 {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, |r| r.count)
    }
}

/// Breaker key for a call: `name:` followed by the hex SHA-256 of the
/// canonical input.
pub fn signature(tool: &str, input: &serde_json::Value) -> String {
    format!("{tool}:{}", input_hash(input))
}

/// Hex SHA-256 of the canonical (sorted-key) JSON form of `input`.
pub fn input_hash(input: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(input).as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// JSON with object keys sorted recursively.
pub fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::Value::String(k.clone()),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}
