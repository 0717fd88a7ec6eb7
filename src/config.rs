//! Configuration management for the matchmaking queue.
//!
//! This module provides configuration handling via environment variables with sensible defaults.
//! All configuration parameters can be customized through environment variables with the
//! QUEUE_MATCHMAKING_ prefix.
//!
//! # Environment Variables
//! - QUEUE_MATCHMAKING_MAX_QUEUE_SIZE: Maximum pending requests (default: 10000)
//! - QUEUE_MATCHMAKING_SWEEP_INTERVAL_MS: Periodic matching sweep interval (default: 250)
//! - QUEUE_MATCHMAKING_TOLERANCE_BASE: Rank tolerance at zero wait (default: 0)
//! - QUEUE_MATCHMAKING_TOLERANCE_STEP: Tolerance added per step (default: 50)
//! - QUEUE_MATCHMAKING_TOLERANCE_STEP_MS: Wait time per tolerance step (default: 1000)
//! - QUEUE_MATCHMAKING_TOLERANCE_CEILING: Upper bound on tolerance (default: unbounded)
//! - QUEUE_MATCHMAKING_RESULT_RETENTION_MS: How long an undelivered match is kept (default: 60000)
//! - QUEUE_MATCHMAKING_EVENT_BUFFER: Queue event channel capacity (default: 256)

use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::error::MatchmakingError;

/// Prefix for all matchmaking environment variables.
const ENV_PREFIX: &str = "QUEUE_MATCHMAKING_";

/// Configuration parameters for the matchmaking engine.
///
/// Missing variables fall back to the `Default` value of that field, so a
/// partial environment is valid.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    /// Maximum number of pending requests held in the pool.
    /// Must be positive. Prevents memory exhaustion under high load.
    pub max_queue_size: usize,

    /// Interval of the periodic sweep that re-evaluates aged requests.
    /// Must be positive. Specified in milliseconds.
    pub sweep_interval_ms: u64,

    /// Rank delta tolerated for requests that have not waited at all.
    pub tolerance_base: u32,

    /// Rank delta added to the tolerance for every completed step.
    pub tolerance_step: u32,

    /// Wait time that completes one tolerance step.
    /// Must be positive. Specified in milliseconds.
    pub tolerance_step_ms: u64,

    /// Optional upper bound on the tolerance. `None` lets it grow without bound,
    /// which guarantees every request is eventually paired.
    pub tolerance_ceiling: Option<u32>,

    /// How long a match result is buffered for a user nobody is subscribed to.
    /// Must be positive. Specified in milliseconds.
    pub result_retention_ms: u64,

    /// Capacity of the queue event broadcast channel.
    pub event_buffer: usize,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            sweep_interval_ms: 250,
            tolerance_base: 0,          // Exact ranks only on arrival
            tolerance_step: 50,
            tolerance_step_ms: 1000,    // +50 rank per second waited
            tolerance_ceiling: None,
            result_retention_ms: 60_000,
            event_buffer: 256,
        }
    }
}

impl MatchmakingConfig {
    /// Attempts to load configuration from environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    ///
    /// # Returns
    /// - Ok(config) if every present variable parses and the result validates
    /// - Err(MatchmakingError::Config) otherwise
    pub fn from_env() -> Result<Self, MatchmakingError> {
        // Load .env file if it exists for local development
        dotenv::dotenv().ok();
        Self::from_vars(env::vars())
    }

    /// Loads configuration from environment variables, falling back to defaults
    /// if environment variables are invalid.
    pub fn from_env_or_default() -> Self {
        match Self::from_env() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{}, using default configuration", e);
                Self::default()
            }
        }
    }

    /// Builds a configuration from arbitrary key/value pairs. Only keys carrying
    /// the QUEUE_MATCHMAKING_ prefix are considered.
    pub fn from_vars<I>(vars: I) -> Result<Self, MatchmakingError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let filtered = vars
            .into_iter()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .map(|(k, v)| (k.trim_start_matches(ENV_PREFIX).to_string(), v));

        let config = envy::from_iter::<_, Self>(filtered).map_err(|e| {
            MatchmakingError::Config(format!("failed to parse environment variables: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates all configuration parameters.
    ///
    /// # Validation Rules
    /// - Queue size, sweep interval, step length and retention must be positive
    /// - The event buffer must be positive (tokio rejects empty broadcast channels)
    /// - A ceiling, if set, must not be below the base tolerance
    pub fn validate(&self) -> Result<(), MatchmakingError> {
        let invalid = |msg: &str| Err(MatchmakingError::Config(msg.to_string()));

        if self.max_queue_size == 0 {
            return invalid("max_queue_size must be positive");
        }
        if self.sweep_interval_ms == 0 {
            return invalid("sweep_interval_ms must be positive");
        }
        if self.tolerance_step_ms == 0 {
            return invalid("tolerance_step_ms must be positive");
        }
        if self.result_retention_ms == 0 {
            return invalid("result_retention_ms must be positive");
        }
        if self.event_buffer == 0 {
            return invalid("event_buffer must be positive");
        }
        if let Some(ceiling) = self.tolerance_ceiling {
            if ceiling < self.tolerance_base {
                return invalid("tolerance_ceiling must not be below tolerance_base");
            }
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn result_retention(&self) -> Duration {
        Duration::from_millis(self.result_retention_ms)
    }
}
