//! Per-stage retry and backoff policy.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::RetryOverride;

use super::job::Stage;

/// Backoff shape between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Retry policy for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Exponential,
            base: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following a failed `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffKind::Fixed => self.base,
            BackoffKind::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
                self.base.saturating_mul(factor)
            }
        }
    }
}

/// Stage-keyed policy table: static defaults plus config overrides.
#[derive(Debug, Clone)]
pub struct StagePolicies {
    policies: HashMap<Stage, RetryPolicy>,
}

impl StagePolicies {
    /// The default table. Discovery gates everything downstream and gets a
    /// higher ceiling; rendering is resource-expensive and gets a low one.
    pub fn defaults() -> Self {
        let mut policies = HashMap::new();
        policies.insert(
            Stage::Discovery,
            RetryPolicy {
                max_attempts: 5,
                ..Default::default()
            },
        );
        policies.insert(Stage::Fetch, RetryPolicy::default());
        policies.insert(
            Stage::Render,
            RetryPolicy {
                max_attempts: 2,
                ..Default::default()
            },
        );
        policies.insert(Stage::Extract, RetryPolicy::default());
        policies.insert(Stage::ClusterBuild, RetryPolicy::default());
        policies.insert(Stage::CheckRunner, RetryPolicy::default());
        Self { policies }
    }

    /// Apply config overrides keyed by stage name.
    pub fn with_overrides(mut self, overrides: &HashMap<String, RetryOverride>) -> Self {
        for (name, over) in overrides {
            let Some(stage) = Stage::from_str(name) else {
                continue;
            };
            let policy = self.policies.entry(stage).or_default();
            if let Some(max) = over.max_attempts {
                policy.max_attempts = max.max(1);
            }
            if let Some(ref kind) = over.backoff {
                policy.backoff = match kind.as_str() {
                    "fixed" => BackoffKind::Fixed,
                    _ => BackoffKind::Exponential,
                };
            }
            if let Some(base_ms) = over.base_ms {
                policy.base = Duration::from_millis(base_ms);
            }
        }
        self
    }

    pub fn for_stage(&self, stage: Stage) -> RetryPolicy {
        self.policies.get(&stage).copied().unwrap_or_default()
    }
}
