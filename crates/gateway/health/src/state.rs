//! Per-target health state machine.
//!
//! Pure: threshold logic lives here so it can be tested without probes.

use chrono::{DateTime, Utc};
use gateway_types::{HealthRecord, HealthState};

/// Mutable probe-driven state for one target.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetHealth {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub last_ok_at: Option<DateTime<Utc>>,
}

impl Default for TargetHealth {
    fn default() -> Self {
        Self {
            state: HealthState::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_probe_at: None,
            last_ok_at: None,
        }
    }
}

impl TargetHealth {
    /// Apply one probe outcome. Returns `(previous, current)` when the state
    /// changed.
    ///
    /// Transitions:
    /// - `Unknown -> Healthy` after one success.
    /// - `Unknown | Healthy -> Unhealthy` after `unhealthy_threshold`
    ///   consecutive failures, never fewer.
    /// - `Unhealthy -> Healthy` after `healthy_threshold` consecutive
    ///   successes.
    pub fn apply_probe(
        &mut self,
        success: bool,
        at: DateTime<Utc>,
        unhealthy_threshold: u32,
        healthy_threshold: u32,
    ) -> Option<(HealthState, HealthState)> {
        let previous = self.state;
        self.last_probe_at = Some(at);

        if success {
            self.consecutive_failures = 0;
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            self.last_ok_at = Some(at);
            match self.state {
                HealthState::Unknown => self.state = HealthState::Healthy,
                HealthState::Unhealthy => {
                    if self.consecutive_successes >= healthy_threshold.max(1) {
                        self.state = HealthState::Healthy;
                    }
                }
                HealthState::Healthy | HealthState::Disabled => {}
            }
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            match self.state {
                HealthState::Unknown | HealthState::Healthy => {
                    if self.consecutive_failures >= unhealthy_threshold.max(1) {
                        self.state = HealthState::Unhealthy;
                    }
                }
                HealthState::Unhealthy | HealthState::Disabled => {}
            }
        }

        (previous != self.state).then_some((previous, self.state))
    }

    /// Mark the target disabled (removed or `is_enabled=false`).
    pub fn disable(&mut self) -> Option<(HealthState, HealthState)> {
        let previous = self.state;
        self.state = HealthState::Disabled;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        (previous != self.state).then_some((previous, self.state))
    }

    pub fn to_record(&self) -> HealthRecord {
        HealthRecord {
            state: self.state,
            last_probe_at: self.last_probe_at,
            last_ok_at: self.last_ok_at,
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(health: &mut TargetHealth, success: bool) -> Option<(HealthState, HealthState)> {
        health.apply_probe(success, Utc::now(), 3, 2)
    }

    #[test]
    fn one_success_promotes_unknown_to_healthy() {
        let mut health = TargetHealth::default();
        let transition = apply(&mut health, true);
        assert_eq!(transition, Some((HealthState::Unknown, HealthState::Healthy)));
    }

    #[test]
    fn unhealthy_requires_full_threshold_never_fewer() {
        let mut health = TargetHealth::default();
        apply(&mut health, true);

        assert_eq!(apply(&mut health, false), None);
        assert_eq!(apply(&mut health, false), None);
        let transition = apply(&mut health, false);
        assert_eq!(
            transition,
            Some((HealthState::Healthy, HealthState::Unhealthy))
        );
    }

    #[test]
    fn intervening_success_resets_the_failure_streak() {
        let mut health = TargetHealth::default();
        apply(&mut health, true);

        apply(&mut health, false);
        apply(&mut health, false);
        apply(&mut health, true);
        apply(&mut health, false);
        apply(&mut health, false);
        assert_eq!(health.state, HealthState::Healthy);

        let transition = apply(&mut health, false);
        assert_eq!(
            transition,
            Some((HealthState::Healthy, HealthState::Unhealthy))
        );
    }

    #[test]
    fn recovery_requires_healthy_threshold() {
        let mut health = TargetHealth::default();
        for _ in 0..3 {
            apply(&mut health, false);
        }
        assert_eq!(health.state, HealthState::Unhealthy);

        assert_eq!(apply(&mut health, true), None);
        let transition = apply(&mut health, true);
        assert_eq!(
            transition,
            Some((HealthState::Unhealthy, HealthState::Healthy))
        );
    }

    #[test]
    fn recovery_with_threshold_one_is_immediate() {
        let mut health = TargetHealth::default();
        for _ in 0..3 {
            health.apply_probe(false, Utc::now(), 3, 1);
        }
        assert_eq!(health.state, HealthState::Unhealthy);

        let transition = health.apply_probe(true, Utc::now(), 3, 1);
        assert_eq!(
            transition,
            Some((HealthState::Unhealthy, HealthState::Healthy))
        );
    }

    #[test]
    fn disable_is_terminal_for_probing() {
        let mut health = TargetHealth::default();
        apply(&mut health, true);
        let transition = health.disable();
        assert_eq!(
            transition,
            Some((HealthState::Healthy, HealthState::Disabled))
        );
        assert_eq!(health.disable(), None);
    }
}
