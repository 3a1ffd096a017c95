//! Demo configuration
//!
//! Read from `GRID_*` environment variables, with defaults for anything
//! unset:
//!
//! | Variable            | Default        |
//! |---------------------|----------------|
//! | `GRID_TOPIC`        | `market_data`  |
//! | `GRID_FILTER`       | none           |
//! | `GRID_ORDER_BY`     | `/symbol`      |
//! | `GRID_OPTIONS`      | `oof,conflation=3000ms,select=[-/,+/symbol,+/bid,+/ask]` |
//! | `GRID_PUBLISH_RATE` | `2000`         |
//! | `GRID_RUN_SECS`     | `10`           |
//! | `GRID_SEED`         | `42`           |

use std::time::Duration;

use view_engine::options::{OptionsError, SubscriptionOptions};
use view_engine::session::SessionConfig;

use crate::publisher::{PublisherConfig, DEFAULT_TOPIC};

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("invalid GRID_OPTIONS: {0}")]
    InvalidOptions(#[from] OptionsError),
}

/// Everything the demo binary needs.
#[derive(Debug, Clone)]
pub struct GridConfig {
    pub topic: String,
    pub filter: Option<String>,
    pub order_by: Option<String>,
    pub options: SubscriptionOptions,
    pub publish_rate: u32,
    pub run_for: Duration,
    pub seed: u64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            filter: None,
            order_by: Some("/symbol".to_string()),
            options: SubscriptionOptions::new()
                .with_oof()
                .with_conflation(Duration::from_millis(3000))
                .with_select(["symbol", "bid", "ask"]),
            publish_rate: 2000,
            run_for: Duration::from_secs(10),
            seed: 42,
        }
    }
}

impl GridConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load through an arbitrary variable lookup. Blank values count as
    /// unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(topic) = get("GRID_TOPIC") {
            config.topic = topic;
        }
        if let Some(filter) = get("GRID_FILTER") {
            config.filter = Some(filter);
        }
        if let Some(order_by) = get("GRID_ORDER_BY") {
            config.order_by = Some(order_by);
        }
        if let Some(options) = get("GRID_OPTIONS") {
            config.options = options.parse()?;
        }
        if let Some(rate) = get("GRID_PUBLISH_RATE") {
            config.publish_rate = parse_number("GRID_PUBLISH_RATE", &rate)?;
        }
        if let Some(secs) = get("GRID_RUN_SECS") {
            config.run_for = Duration::from_secs(parse_number("GRID_RUN_SECS", &secs)?);
        }
        if let Some(seed) = get("GRID_SEED") {
            config.seed = parse_number("GRID_SEED", &seed)?;
        }
        Ok(config)
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut session = SessionConfig::new(self.topic.clone()).with_options(self.options.clone());
        if let Some(filter) = &self.filter {
            session = session.with_filter(filter.clone());
        }
        if let Some(order_by) = &self.order_by {
            session = session.with_order_by(order_by.clone());
        }
        session
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            topic: self.topic.clone(),
            rate_per_second: self.publish_rate,
            seed: self.seed,
            max_quotes: None,
        }
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: value.to_string(),
    })
}
