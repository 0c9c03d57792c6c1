//! Short-term key/value store that downstream consumers read fresh
//! predictions from.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value as JsonValue;

use foresight_core::{PredictionType, SharedClock};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PublishError {
    #[error("could not encode prediction: {0}")]
    Encode(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Key a prediction of `ptype` for `target` is published under.
pub fn publish_key(ptype: PredictionType, target: &str) -> String {
    format!("predictions:{ptype}:{target}")
}

#[async_trait::async_trait]
pub trait PredictionPublisher: Send + Sync + 'static {
    /// Store `value` under `key`, overwriting, expiring after `ttl`.
    async fn publish(&self, key: &str, value: JsonValue, ttl: Duration) -> Result<(), PublishError>;
}

/// In-memory publisher for tests/dev.
#[derive(Debug)]
pub struct InMemoryPublisher {
    clock: SharedClock,
    entries: Mutex<HashMap<String, (JsonValue, DateTime<Utc>)>>,
    outage: Mutex<Option<String>>,
}

impl InMemoryPublisher {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            outage: Mutex::new(None),
        }
    }

    /// Live value under `key`; expired values read as absent.
    pub fn get(&self, key: &str) -> Option<JsonValue> {
        let now = self.clock.now();
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .filter(|(_, expires_at)| now < *expires_at)
            .map(|(value, _)| value.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn set_outage(&self, reason: Option<&str>) {
        *self.outage.lock().unwrap() = reason.map(str::to_string);
    }
}

#[async_trait::async_trait]
impl PredictionPublisher for InMemoryPublisher {
    async fn publish(&self, key: &str, value: JsonValue, ttl: Duration) -> Result<(), PublishError> {
        if let Some(reason) = self.outage.lock().unwrap().clone() {
            return Err(PublishError::Unavailable(reason));
        }
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value, expires_at));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use foresight_core::ManualClock;
    use serde_json::json;

    #[tokio::test]
    async fn published_values_expire_after_ttl() {
        let clock = Arc::new(ManualClock::at_epoch());
        let publisher = InMemoryPublisher::new(clock.clone());
        let key = publish_key(PredictionType::Load, "api");
        assert_eq!(key, "predictions:load:api");

        publisher
            .publish(&key, json!({"expected": 42}), Duration::from_secs(60))
            .await
            .unwrap();
        clock.advance_ms(59_999);
        assert_eq!(publisher.get(&key), Some(json!({"expected": 42})));
        clock.advance_ms(1);
        assert_eq!(publisher.get(&key), None);
        assert_eq!(publisher.keys(), vec![key]);
    }

    #[tokio::test]
    async fn outage_fails_publishing() {
        let publisher = InMemoryPublisher::new(Arc::new(ManualClock::at_epoch()));
        publisher.set_outage(Some("redis gone"));
        let err = publisher
            .publish("k", json!(1), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, PublishError::Unavailable("redis gone".into()));
    }
}
