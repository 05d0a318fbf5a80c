use crate::{Error, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Cadence of the safety-net release of long-poll waiters.
    pub poll_interval: Duration,

    /// Tick of the graph rebuild scheduler; at most one rebuild per tick.
    pub graph_interval: Duration,

    /// How long `/refresh` waits for the worker before giving up.
    pub refresh_timeout: Duration,

    /// Largest webhook body forwarded to the worker.
    pub max_hook_bytes: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            graph_interval: Duration::from_secs(10),
            refresh_timeout: Duration::from_secs(60),
            max_hook_bytes: 1_000_000,
        }
    }
}

impl BrokerConfig {
    /// Defaults overridden by `CADET_*` environment variables.
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(secs) = env_u64("CADET_POLL_INTERVAL_SECS")? {
            cfg.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CADET_GRAPH_INTERVAL_SECS")? {
            cfg.graph_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CADET_REFRESH_TIMEOUT_SECS")? {
            cfg.refresh_timeout = Duration::from_secs(secs);
        }
        if let Some(bytes) = env_u64("CADET_MAX_HOOK_BYTES")? {
            cfg.max_hook_bytes = bytes as usize;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidInput("poll_interval must be > 0".to_string()));
        }
        if self.graph_interval.is_zero() {
            return Err(Error::InvalidInput("graph_interval must be > 0".to_string()));
        }
        if self.refresh_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "refresh_timeout must be > 0".to_string(),
            ));
        }
        if self.max_hook_bytes == 0 {
            return Err(Error::InvalidInput("max_hook_bytes must be > 0".to_string()));
        }
        Ok(())
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidInput(format!("invalid {name}: {v}"))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = BrokerConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_secs(30));
        assert_eq!(cfg.graph_interval, Duration::from_secs(10));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let cfg = BrokerConfig {
            graph_interval: Duration::ZERO,
            ..BrokerConfig::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = BrokerConfig {
            max_hook_bytes: 0,
            ..BrokerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
