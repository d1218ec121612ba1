//! AutoRetrigger: per-task retry sub-policy with exponential backoff and a
//! circuit breaker (spec §4.2).

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// Tunable retry policy. Delay uses `backoff`'s deterministic exponential
/// schedule (randomization disabled) so `delay == min(maxDelay, base *
/// multiplier^attempt)` exactly, matching spec §4.2.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_retries: u32,
    pub reassign_on_retry: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_retries: 5,
            reassign_on_retry: true,
        }
    }
}

impl RetryPolicy {
    /// `min(maxDelay, base * multiplier^attempt)`, computed by stepping
    /// `backoff`'s exponential schedule with randomization disabled so the
    /// result is bit-exact rather than approximate.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut schedule = ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };
        let mut delay = self.base_delay.min(self.max_delay);
        for _ in 0..=attempt {
            delay = schedule.next_backoff().unwrap_or(self.max_delay);
        }
        delay
    }
}

/// Action an `AutoRetrigger` evaluation recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Reassign,
    Abandon,
    Escalate,
}

/// Outcome of evaluating a task's retry state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub action: RetryAction,
    pub delay: Duration,
}

#[derive(Debug, Clone)]
struct AttemptState {
    attempts: u32,
    circuit_broken: bool,
    policy: RetryPolicy,
}

/// Tracks per-task attempt history and circuit-breaker state.
pub struct AutoRetrigger {
    tasks: RwLock<HashMap<String, AttemptState>>,
}

impl AutoRetrigger {
    pub fn new() -> Self {
        Self { tasks: RwLock::new(HashMap::new()) }
    }

    fn entry(&self, task_id: &str, policy: RetryPolicy) -> AttemptState {
        let mut tasks = self.tasks.write().expect("retry lock poisoned");
        tasks
            .entry(task_id.to_string())
            .or_insert(AttemptState { attempts: 0, circuit_broken: false, policy })
            .clone()
    }

    /// Evaluate the next action for a task under `policy`.
    pub fn evaluate(&self, task_id: &str, policy: RetryPolicy) -> RetryDecision {
        let state = self.entry(task_id, policy);

        if state.circuit_broken {
            return RetryDecision {
                should_retry: false,
                action: RetryAction::Escalate,
                delay: Duration::ZERO,
            };
        }
        if state.attempts >= state.policy.max_retries {
            return RetryDecision {
                should_retry: false,
                action: RetryAction::Abandon,
                delay: Duration::ZERO,
            };
        }

        let delay = state.policy.delay_for_attempt(state.attempts);
        let action = if state.attempts > 0 && state.policy.reassign_on_retry {
            RetryAction::Reassign
        } else {
            RetryAction::Retry
        };

        {
            let mut tasks = self.tasks.write().expect("retry lock poisoned");
            if let Some(s) = tasks.get_mut(task_id) {
                s.attempts += 1;
            }
        }

        RetryDecision { should_retry: true, action, delay }
    }

    /// An anomaly signal (e.g. from a sentinel) immediately trips the
    /// circuit for this task.
    pub fn trip_circuit_breaker(&self, task_id: &str) {
        let mut tasks = self.tasks.write().expect("retry lock poisoned");
        tasks.entry(task_id.to_string()).or_insert(AttemptState {
            attempts: 0,
            circuit_broken: false,
            policy: RetryPolicy::default(),
        }).circuit_broken = true;
    }

    pub fn reset_circuit_breaker(&self, task_id: &str) {
        let mut tasks = self.tasks.write().expect("retry lock poisoned");
        if let Some(state) = tasks.get_mut(task_id) {
            state.circuit_broken = false;
        }
    }

    /// A successful completion deletes all retry state for the task.
    pub fn record_success(&self, task_id: &str) {
        self.tasks.write().expect("retry lock poisoned").remove(task_id);
    }
}

impl Default for AutoRetrigger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
            max_retries: 10,
            reassign_on_retry: false,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        // 100 * 2^2 = 400, capped to 350
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
    }

    #[test]
    fn abandons_after_max_retries() {
        let retrigger = AutoRetrigger::new();
        let policy = RetryPolicy { max_retries: 2, ..Default::default() };
        let d1 = retrigger.evaluate("t1", policy);
        assert!(d1.should_retry);
        let d2 = retrigger.evaluate("t1", policy);
        assert!(d2.should_retry);
        let d3 = retrigger.evaluate("t1", policy);
        assert!(!d3.should_retry);
        assert_eq!(d3.action, RetryAction::Abandon);
    }

    #[test]
    fn circuit_breaker_forces_escalate() {
        let retrigger = AutoRetrigger::new();
        retrigger.evaluate("t1", RetryPolicy::default());
        retrigger.trip_circuit_breaker("t1");
        let decision = retrigger.evaluate("t1", RetryPolicy::default());
        assert_eq!(decision.action, RetryAction::Escalate);
        retrigger.reset_circuit_breaker("t1");
        let decision = retrigger.evaluate("t1", RetryPolicy::default());
        assert_ne!(decision.action, RetryAction::Escalate);
    }

    #[test]
    fn success_clears_state() {
        let retrigger = AutoRetrigger::new();
        retrigger.evaluate("t1", RetryPolicy::default());
        retrigger.record_success("t1");
        let decision = retrigger.evaluate("t1", RetryPolicy::default());
        assert_eq!(decision.action, RetryAction::Retry);
    }

    #[test]
    fn reassign_only_after_first_attempt() {
        let retrigger = AutoRetrigger::new();
        let policy = RetryPolicy { reassign_on_retry: true, ..Default::default() };
        let d1 = retrigger.evaluate("t1", policy);
        assert_eq!(d1.action, RetryAction::Retry);
        let d2 = retrigger.evaluate("t1", policy);
        assert_eq!(d2.action, RetryAction::Reassign);
    }
}
