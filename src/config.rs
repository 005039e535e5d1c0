//! Engine configuration.
//!
//! Defaults match the operational contract: a 300 s soft lease timeout, a
//! 900 s hard timeout, a 60 s sweep period, and `{COMPLETED, FAILED}` as
//! the high-risk statuses Park & Notify intercepts. The database URL
//! resolves from the environment (`GATEWRIGHT_DB_URL`, `.env` honored) so
//! deployments don't hardcode paths.

use std::collections::HashSet;
use std::time::Duration;

use crate::types::UowStatus;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Routing-advance ceiling applied to units of work that don't set
    /// their own (the ambiguity-lock gate).
    pub default_max_interactions: u32,
    /// Heartbeat age after which an ACTIVE lease is soft-zombied.
    pub soft_timeout: Duration,
    /// Heartbeat age after which a stalled lease is forfeited and the
    /// work reclaimed.
    pub hard_timeout: Duration,
    /// Period of the background sweeper loop.
    pub sweep_interval: Duration,
    /// Statuses intercepted by Park & Notify on guard-driven transitions.
    pub high_risk_statuses: HashSet<UowStatus>,
    /// Database URL for the durable driver; `None` means memory-only.
    pub database_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_interactions: 25,
            soft_timeout: Duration::from_secs(300),
            hard_timeout: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(60),
            high_risk_statuses: HashSet::from([UowStatus::Completed, UowStatus::Failed]),
            database_url: resolve_database_url(None),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_high_risk_statuses(
        mut self,
        statuses: impl IntoIterator<Item = UowStatus>,
    ) -> Self {
        self.high_risk_statuses = statuses.into_iter().collect();
        self
    }

    /// Disable Park & Notify entirely (no status is high-risk).
    #[must_use]
    pub fn without_park_and_notify(mut self) -> Self {
        self.high_risk_statuses.clear();
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, soft: Duration, hard: Duration) -> Self {
        self.soft_timeout = soft;
        self.hard_timeout = hard;
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    #[must_use]
    pub fn with_default_max_interactions(mut self, max: u32) -> Self {
        self.default_max_interactions = max;
        self
    }

    #[must_use]
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }
}

fn resolve_database_url(provided: Option<String>) -> Option<String> {
    if provided.is_some() {
        return provided;
    }
    dotenvy::dotenv().ok();
    std::env::var("GATEWRIGHT_DB_URL").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.soft_timeout, Duration::from_secs(300));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert!(config.high_risk_statuses.contains(&UowStatus::Completed));
        assert!(config.high_risk_statuses.contains(&UowStatus::Failed));
        assert_eq!(config.high_risk_statuses.len(), 2);
    }

    #[test]
    fn park_and_notify_can_be_disabled() {
        let config = EngineConfig::default().without_park_and_notify();
        assert!(config.high_risk_statuses.is_empty());
    }
}
