use std::time::Duration;

use anyhow::Context;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to a production Postgres instance")?;
        let max_connections = match std::env::var("REVIEW_PANEL_MAX_CONNECTIONS") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("invalid REVIEW_PANEL_MAX_CONNECTIONS: {raw}"))?,
            Err(_) => DEFAULT_MAX_CONNECTIONS,
        };
        Ok(Self {
            database_url,
            max_connections,
        })
    }
}

/// Knobs for the assignment coordinator.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    /// Base seed for per-call RNGs. Unset draws a fresh seed for every call.
    pub seed: Option<u64>,
    /// Placeholders older than this are released by the lease sweep.
    pub claim_ttl: Option<Duration>,
}

impl CoordinatorConfig {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }
}

pub fn parse_ttl(raw: &str) -> anyhow::Result<Duration> {
    humantime::parse_duration(raw.trim()).with_context(|| format!("invalid duration: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_accepts_humantime_units() {
        assert_eq!(parse_ttl("45m").unwrap(), Duration::from_secs(45 * 60));
        assert_eq!(parse_ttl(" 2h ").unwrap(), Duration::from_secs(7200));
        assert!(parse_ttl("soon").is_err());
    }

    #[test]
    fn seeded_config_has_no_ttl() {
        let config = CoordinatorConfig::seeded(9);
        assert_eq!(config.seed, Some(9));
        assert!(config.claim_ttl.is_none());
    }
}
