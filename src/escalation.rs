// src/escalation.rs
//
// Turns accumulated counts into the terminal auto-submit decision.
//
// Two independent triggers share one policy:
//   - ViolationCeiling: confirmed violation episodes
//   - AlertCeiling: general alerts raised by the periodic check
// Whichever ceiling is reached first ends the session. The signal is
// delivered once per session; later crossings are no-ops.

use crate::types::EscalationConfig;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    ViolationCeiling,
    AlertCeiling,
}

impl EscalationTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ViolationCeiling => "violation_ceiling",
            Self::AlertCeiling => "alert_ceiling",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerminationSignal {
    pub trigger: EscalationTrigger,
    pub violation_count: u32,
    pub alert_count: u32,
}

/// Per-session counters. Created at session start, never reset mid-session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub subject_id: String,
    violation_count: u32,
    alert_count: u32,
    termination: Option<TerminationSignal>,
}

impl SessionContext {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            subject_id: subject_id.into(),
            violation_count: 0,
            alert_count: 0,
            termination: None,
        }
    }

    pub fn violation_count(&self) -> u32 {
        self.violation_count
    }

    pub fn alert_count(&self) -> u32 {
        self.alert_count
    }

    pub fn termination(&self) -> Option<&TerminationSignal> {
        self.termination.as_ref()
    }

    pub fn is_terminated(&self) -> bool {
        self.termination.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    violation_ceiling: u32,
    alert_ceiling: u32,
}

impl EscalationPolicy {
    pub fn new(violation_ceiling: u32, alert_ceiling: u32) -> Self {
        Self {
            violation_ceiling,
            alert_ceiling,
        }
    }

    pub fn from_config(config: &EscalationConfig) -> Self {
        Self::new(config.violation_ceiling, config.alert_ceiling)
    }

    /// Count one confirmed violation episode
    pub fn record_confirmed_episode(&self, ctx: &mut SessionContext) -> Option<TerminationSignal> {
        ctx.violation_count += 1;
        info!(
            "Violation #{} recorded for {}",
            ctx.violation_count, ctx.subject_id
        );
        if ctx.violation_count >= self.violation_ceiling {
            return self.terminate(ctx, EscalationTrigger::ViolationCeiling);
        }
        None
    }

    /// Count one general alert from the periodic check
    pub fn record_alert(&self, ctx: &mut SessionContext) -> Option<TerminationSignal> {
        ctx.alert_count += 1;
        if ctx.alert_count >= self.alert_ceiling {
            return self.terminate(ctx, EscalationTrigger::AlertCeiling);
        }
        None
    }

    fn terminate(
        &self,
        ctx: &mut SessionContext,
        trigger: EscalationTrigger,
    ) -> Option<TerminationSignal> {
        if ctx.termination.is_some() {
            return None;
        }
        let signal = TerminationSignal {
            trigger,
            violation_count: ctx.violation_count,
            alert_count: ctx.alert_count,
        };
        warn!(
            "🚨 Auto-submit for {}: {} (violations={}, alerts={})",
            ctx.subject_id,
            trigger.as_str(),
            ctx.violation_count,
            ctx.alert_count
        );
        ctx.termination = Some(signal.clone());
        Some(signal)
    }
}

// ============================================================================
// PERIODIC GENERAL ALERTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneralAlert {
    pub message: String,
    pub severity: AlertSeverity,
    pub raised_at: DateTime<Utc>,
}

/// Rule engine seam for general alerts
pub trait AlertSource: Send {
    fn poll(&mut self) -> Option<GeneralAlert>;
}

const ALERT_MESSAGES: [&str; 4] = [
    "Please look at the screen",
    "Phone detected in frame",
    "Multiple faces detected",
    "Poor lighting detected",
];

/// Fires with a fixed probability on each poll
pub struct RandomAlertSource {
    rng: StdRng,
    probability: f64,
}

impl RandomAlertSource {
    pub fn new(probability: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            probability: probability.clamp(0.0, 1.0),
        }
    }
}

impl AlertSource for RandomAlertSource {
    fn poll(&mut self) -> Option<GeneralAlert> {
        if !self.rng.gen_bool(self.probability) {
            return None;
        }
        let message = ALERT_MESSAGES[self.rng.gen_range(0..ALERT_MESSAGES.len())];
        let severity = if self.rng.gen_bool(0.7) {
            AlertSeverity::Warning
        } else {
            AlertSeverity::Error
        };
        Some(GeneralAlert {
            message: message.to_string(),
            severity,
            raised_at: Utc::now(),
        })
    }
}

/// Polls an alert source once per interval on the sample clock
pub struct PeriodicAlertCheck {
    interval_ms: f64,
    next_due_ms: Option<f64>,
    source: Box<dyn AlertSource>,
}

impl PeriodicAlertCheck {
    pub fn new(interval_ms: f64, source: Box<dyn AlertSource>) -> Self {
        Self {
            interval_ms,
            next_due_ms: None,
            source,
        }
    }

    pub fn from_config(config: &EscalationConfig) -> Self {
        Self::new(
            config.alert_interval_ms,
            Box::new(RandomAlertSource::new(
                config.alert_probability,
                config.alert_seed,
            )),
        )
    }

    /// The first call starts the interval; at most one poll per call
    pub fn tick(&mut self, now_ms: f64) -> Option<GeneralAlert> {
        let due = match self.next_due_ms {
            None => {
                self.next_due_ms = Some(now_ms + self.interval_ms);
                return None;
            }
            Some(due) => due,
        };
        if now_ms < due {
            return None;
        }

        // Skip intervals missed during a stall instead of bursting
        let mut next = due + self.interval_ms;
        while next <= now_ms {
            next += self.interval_ms;
        }
        self.next_due_ms = Some(next);
        self.source.poll()
    }

    pub fn stop(&mut self) {
        self.next_due_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysAlert;

    impl AlertSource for AlwaysAlert {
        fn poll(&mut self) -> Option<GeneralAlert> {
            Some(GeneralAlert {
                message: "Please look at the screen".to_string(),
                severity: AlertSeverity::Warning,
                raised_at: Utc::now(),
            })
        }
    }

    #[test]
    fn test_violation_ceiling_fires_once() {
        let policy = EscalationPolicy::new(10, 5);
        let mut ctx = SessionContext::new("SE123456");

        let mut signals = Vec::new();
        for _ in 0..15 {
            if let Some(signal) = policy.record_confirmed_episode(&mut ctx) {
                signals.push(signal);
            }
        }
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].trigger, EscalationTrigger::ViolationCeiling);
        assert_eq!(signals[0].violation_count, 10);
        assert_eq!(ctx.violation_count(), 15);
    }

    #[test]
    fn test_alert_ceiling_fires_independently() {
        let policy = EscalationPolicy::new(10, 5);
        let mut ctx = SessionContext::new("SE123456");

        for _ in 0..3 {
            assert!(policy.record_confirmed_episode(&mut ctx).is_none());
        }
        for i in 1..=4 {
            let signal = policy.record_alert(&mut ctx);
            assert!(signal.is_none(), "alert {} should not terminate", i);
        }
        let signal = policy.record_alert(&mut ctx).unwrap();
        assert_eq!(signal.trigger, EscalationTrigger::AlertCeiling);
        assert_eq!(signal.violation_count, 3);
    }

    #[test]
    fn test_second_trigger_does_not_double_fire() {
        let policy = EscalationPolicy::new(2, 2);
        let mut ctx = SessionContext::new("SE123456");

        policy.record_alert(&mut ctx);
        assert!(policy.record_alert(&mut ctx).is_some());
        policy.record_confirmed_episode(&mut ctx);
        assert!(policy.record_confirmed_episode(&mut ctx).is_none());
        assert_eq!(
            ctx.termination().unwrap().trigger,
            EscalationTrigger::AlertCeiling
        );
    }

    #[test]
    fn test_contexts_are_isolated() {
        let policy = EscalationPolicy::new(1, 1);
        let mut a = SessionContext::new("A");
        let b = SessionContext::new("B");
        assert!(policy.record_confirmed_episode(&mut a).is_some());
        assert!(!b.is_terminated());
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn test_periodic_check_fires_once_per_interval() {
        let mut check = PeriodicAlertCheck::new(10_000.0, Box::new(AlwaysAlert));

        let mut fired = 0;
        let mut t = 0.0;
        while t <= 35_000.0 {
            if check.tick(t).is_some() {
                fired += 1;
            }
            t += 100.0;
        }
        // due at 10s, 20s, 30s
        assert_eq!(fired, 3);
    }

    #[test]
    fn test_periodic_check_does_not_burst_after_stall() {
        let mut check = PeriodicAlertCheck::new(10_000.0, Box::new(AlwaysAlert));
        check.tick(0.0);
        assert!(check.tick(45_000.0).is_some());
        assert!(check.tick(45_100.0).is_none());
        assert!(check.tick(50_000.0).is_some());
    }

    #[test]
    fn test_random_source_probability_bounds() {
        let mut never = RandomAlertSource::new(0.0, Some(7));
        let mut always = RandomAlertSource::new(1.0, Some(7));
        for _ in 0..100 {
            assert!(never.poll().is_none());
            let alert = always.poll().unwrap();
            assert!(ALERT_MESSAGES.contains(&alert.message.as_str()));
        }
    }

    #[test]
    fn test_random_source_is_reproducible_with_seed() {
        let mut a = RandomAlertSource::new(0.3, Some(42));
        let mut b = RandomAlertSource::new(0.3, Some(42));
        for _ in 0..50 {
            let x = a.poll().map(|al| (al.message, al.severity));
            let y = b.poll().map(|al| (al.message, al.severity));
            assert_eq!(x, y);
        }
    }
}
