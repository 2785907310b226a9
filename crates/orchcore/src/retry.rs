//! Retry eligibility and backoff computation.
//!
//! A [`RetryPolicy`] is an immutable value object. Every constructor, including
//! deserialization, goes through [`RetryPolicyDef`] validation so a policy in
//! hand is always valid.

use crate::PolicyError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    Fixed,
    Exponential,
}

/// Retry policy attached to every action node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RetryPolicyDef", into = "RetryPolicyDef")]
pub struct RetryPolicy {
    strategy: RetryStrategy,
    base_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f64,
    jitter_ms: Option<u64>,
    max_attempts: u32,
    enabled: bool,
}

/// Unvalidated wire form of a [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyDef {
    pub strategy: RetryStrategy,
    pub base_delay_ms: i64,
    pub max_delay_ms: i64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub jitter_ms: Option<u64>,
    pub max_attempts: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_enabled() -> bool {
    true
}

impl TryFrom<RetryPolicyDef> for RetryPolicy {
    type Error = PolicyError;

    fn try_from(def: RetryPolicyDef) -> Result<Self, Self::Error> {
        if def.max_attempts == 0 {
            return Err(PolicyError::InvalidPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if def.base_delay_ms < 0 {
            return Err(PolicyError::InvalidPolicy(format!(
                "base delay must not be negative, got {}ms",
                def.base_delay_ms
            )));
        }
        if def.max_delay_ms < def.base_delay_ms {
            return Err(PolicyError::InvalidPolicy(format!(
                "max delay {}ms is below base delay {}ms",
                def.max_delay_ms, def.base_delay_ms
            )));
        }
        if def.strategy == RetryStrategy::Exponential
            && !(def.multiplier.is_finite() && def.multiplier > 1.0)
        {
            return Err(PolicyError::InvalidPolicy(format!(
                "exponential multiplier must be greater than 1, got {}",
                def.multiplier
            )));
        }

        Ok(Self {
            strategy: def.strategy,
            base_delay_ms: def.base_delay_ms as u64,
            max_delay_ms: def.max_delay_ms as u64,
            multiplier: def.multiplier,
            jitter_ms: def.jitter_ms.filter(|j| *j > 0),
            max_attempts: def.max_attempts,
            enabled: def.enabled,
        })
    }
}

impl From<RetryPolicy> for RetryPolicyDef {
    fn from(policy: RetryPolicy) -> Self {
        Self {
            strategy: policy.strategy,
            base_delay_ms: policy.base_delay_ms as i64,
            max_delay_ms: policy.max_delay_ms as i64,
            multiplier: policy.multiplier,
            jitter_ms: policy.jitter_ms,
            max_attempts: policy.max_attempts,
            enabled: policy.enabled,
        }
    }
}

impl RetryPolicy {
    pub fn new(def: RetryPolicyDef) -> Result<Self, PolicyError> {
        Self::try_from(def)
    }

    pub fn fixed(delay_ms: i64, max_attempts: u32) -> Result<Self, PolicyError> {
        Self::new(RetryPolicyDef {
            strategy: RetryStrategy::Fixed,
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            multiplier: 1.0,
            jitter_ms: None,
            max_attempts,
            enabled: true,
        })
    }

    pub fn exponential(
        base_delay_ms: i64,
        max_delay_ms: i64,
        multiplier: f64,
        max_attempts: u32,
    ) -> Result<Self, PolicyError> {
        Self::new(RetryPolicyDef {
            strategy: RetryStrategy::Exponential,
            base_delay_ms,
            max_delay_ms,
            multiplier,
            jitter_ms: None,
            max_attempts,
            enabled: true,
        })
    }

    /// A policy that never allows a retry.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_jitter(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = Some(jitter_ms).filter(|j| *j > 0);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn strategy(&self) -> RetryStrategy {
        self.strategy
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn jitter_bound(&self) -> Duration {
        Duration::from_millis(self.jitter_ms.unwrap_or(0))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether another attempt may be made after `attempt_count` attempts.
    pub fn is_eligible(&self, attempt_count: u32) -> bool {
        self.enabled && attempt_count < self.max_attempts
    }

    /// Backoff delay before the given attempt, without jitter.
    ///
    /// Attempt numbering starts at 1; attempt 0 is treated as 1.
    pub fn base_delay_for(&self, attempt_count: u32) -> Duration {
        let ms = match self.strategy {
            RetryStrategy::Fixed => self.base_delay_ms.min(self.max_delay_ms),
            RetryStrategy::Exponential => {
                let exponent = attempt_count.max(1) - 1;
                // Exponents past i32::MAX saturate; the product then overflows to the cap.
                let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
                let raw = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
                if raw.is_finite() {
                    raw.min(self.max_delay_ms as f64).max(0.0) as u64
                } else {
                    self.max_delay_ms
                }
            }
        };
        Duration::from_millis(ms)
    }

    /// Backoff delay before the given attempt, including jitter.
    pub fn delay_for(&self, attempt_count: u32) -> Duration {
        let base = self.base_delay_for(attempt_count);
        match self.jitter_ms {
            Some(bound) => {
                let jitter = rand::rng().random_range(0..=bound);
                base + Duration::from_millis(jitter)
            }
            None => base,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_ms: None,
            max_attempts: 3,
            enabled: true,
        }
    }
}
