use std::time::Duration;

use serde::Deserialize;

use journaltail_types::DEFAULT_NAMESPACE;

/// Tuning for journal queries
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    /// Namespace used when a request leaves it empty
    pub default_namespace: String,

    /// How far back to start reading when a request has no usable `since`
    pub lookback_secs: u64,

    /// Upper bound of a single journal wait, and so of cancellation latency
    pub poll_interval_ms: u64,

    /// Messages buffered between the reader and a slow consumer
    pub channel_capacity: usize,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            lookback_secs: 5 * 60,
            poll_interval_ms: 100,
            channel_capacity: 100,
        }
    }
}

impl TailConfig {
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::from_std(Duration::from_secs(self.lookback_secs))
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Channel capacity, at least one
    pub fn capacity(&self) -> usize {
        self.channel_capacity.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TailConfig::default();
        assert_eq!(config.default_namespace, "openfaas-fn");
        assert_eq!(config.lookback(), chrono::Duration::minutes(5));
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.capacity(), 100);
    }

    #[test]
    fn test_zero_values_are_clamped() {
        let config = TailConfig {
            poll_interval_ms: 0,
            channel_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
        assert_eq!(config.capacity(), 1);
    }
}
