//! Request pacing and identity rotation.
//!
//! Every deliberate wait in a run happens here: the random pause before a
//! post request, the fixed pause between subscriptions, retry backoff, and
//! the pause a browser transport takes for a login to settle.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::{PolitenessConfig, DEFAULT_USER_AGENTS, MAX_DELAY_SECS};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Before a single post or listing request.
    Post,
    /// Before moving on to the next subscription.
    Subscription,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    min_delay: Duration,
    max_delay: Duration,
    subscription_delay: Duration,
    user_agents: Arc<Vec<String>>,
}

impl Scheduler {
    pub fn new(config: &PolitenessConfig, subscription_delay: Duration) -> Self {
        let min_delay = bounded_delay(config.min_delay_secs);
        let max_delay = bounded_delay(config.max_delay_secs).max(min_delay);

        let user_agents = if config.user_agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect()
        } else {
            config.user_agents.clone()
        };

        Self {
            min_delay,
            max_delay,
            subscription_delay,
            user_agents: Arc::new(user_agents),
        }
    }

    /// How long `throttle(scope)` would sleep this time.
    pub fn delay_for(&self, scope: Scope) -> Duration {
        match scope {
            Scope::Post => {
                if self.max_delay <= self.min_delay {
                    return self.min_delay;
                }
                let secs = rand::thread_rng()
                    .gen_range(self.min_delay.as_secs_f64()..=self.max_delay.as_secs_f64());
                Duration::from_secs_f64(secs)
            }
            Scope::Subscription => self.subscription_delay,
        }
    }

    pub async fn throttle(&self, scope: Scope) {
        let delay = self.delay_for(scope);
        if !delay.is_zero() {
            tracing::debug!(?scope, delay_ms = delay.as_millis() as u64, "Throttling");
            tokio::time::sleep(delay).await;
        }
    }

    /// Sleep the policy's backoff before retry number `attempt`.
    pub async fn backoff(&self, policy: &RetryPolicy, attempt: u32) {
        let delay = policy.delay_for_attempt(attempt) + policy.jitter();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Give a just-submitted login `delay` to finish before reading its result.
    pub async fn settle(&self, delay: Duration) {
        if !delay.is_zero() {
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Waiting for login to settle");
            tokio::time::sleep(delay).await;
        }
    }

    /// A user agent for the next request, drawn independently of timing.
    pub fn user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(DEFAULT_USER_AGENTS[0])
    }
}

/// Seconds to a delay, capped at [`MAX_DELAY_SECS`]; negative means none.
fn bounded_delay(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.min(MAX_DELAY_SECS)).unwrap_or(Duration::ZERO)
}
