//! Backoff policy shared by step retries, action retries and restarts.
//!
//! Delays grow exponentially from `base_delay` by `multiplier` up to
//! `max_delay`, with up to `jitter_factor` of random extra delay so restarts
//! of many components do not line up. Only `Transient` failures are retried;
//! every other category escalates immediately.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use vaultpilot_traits::{FailureCategory, Result, VaultpilotError};

/// What to do after a failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffDecision {
    /// Try again after this delay
    Retry(Duration),
    /// Stop retrying and escalate
    Escalate,
}

impl BackoffDecision {
    pub fn delay(self) -> Option<Duration> {
        match self {
            BackoffDecision::Retry(delay) => Some(delay),
            BackoffDecision::Escalate => None,
        }
    }
}

/// Configuration for the backoff curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry in milliseconds
    pub base_delay_ms: u64,
    /// Multiplier for exponential backoff (e.g., 2.0 = double each time)
    pub multiplier: f64,
    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,
    /// Maximum jitter as a fraction of the delay (e.g., 0.2 = up to 20% extra)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 300_000,
            jitter_factor: 0.2,
        }
    }
}

impl BackoffConfig {
    /// Jitter must never let a later delay undercut an earlier one, so the
    /// multiplier has to outgrow the largest jitter.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.jitter_factor) {
            return Err(VaultpilotError::Configuration(format!(
                "backoff.jitter_factor must be in [0, 1), got {}",
                self.jitter_factor
            )));
        }
        if !self.multiplier.is_finite() || self.multiplier <= 1.0 + self.jitter_factor {
            return Err(VaultpilotError::Configuration(format!(
                "backoff.multiplier must exceed 1 + jitter_factor ({}), got {}",
                1.0 + self.jitter_factor,
                self.multiplier
            )));
        }
        if self.base_delay_ms == 0 || self.max_delay_ms < self.base_delay_ms {
            return Err(VaultpilotError::Configuration(
                "backoff delays must satisfy 0 < base_delay_ms <= max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pure mapping from (attempt, category) to a retry decision.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    config: BackoffConfig,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Decision for the `attempt`-th consecutive failure (1-based), with random jitter.
    pub fn next_delay(&self, attempt: u32, category: FailureCategory) -> BackoffDecision {
        use rand::RngExt;
        let unit: f64 = rand::rng().random();
        self.next_delay_with_jitter(attempt, category, unit)
    }

    /// Same as [`next_delay`](Self::next_delay) with the jitter draw supplied
    /// (`unit` in `[0, 1)`).
    pub fn next_delay_with_jitter(
        &self,
        attempt: u32,
        category: FailureCategory,
        unit: f64,
    ) -> BackoffDecision {
        if !category.is_retryable() {
            return BackoffDecision::Escalate;
        }
        let cap = self.config.max_delay_ms as f64;
        let jitter = 1.0 + self.config.jitter_factor * unit.clamp(0.0, 1.0);
        let millis = (self.base_delay_ms(attempt) * jitter).min(cap);
        BackoffDecision::Retry(Duration::from_millis(millis.round() as u64))
    }

    /// Un-jittered delay in milliseconds, uncapped.
    fn base_delay_ms(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        self.config.base_delay_ms as f64 * self.config.multiplier.powi(exponent)
    }
}
