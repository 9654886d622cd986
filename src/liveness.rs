// src/liveness.rs
//
// One-shot pre-exam verification.
//
// RUNNING arms a deadline timer. Every normal sample arms the success
// timer if it is not already running; any non-normal sample disarms it,
// so the stability requirement restarts from zero. Whichever timer
// expires first decides the outcome. Reaching a terminal state or
// cancelling drops the session and both timers.

use crate::classifier::ViolationKind;
use crate::timer::OneShotTimer;
use crate::types::VerificationConfig;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl GateState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationOutcome {
    Pending,
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationSession {
    pub started_at_ms: f64,
    pub stably_since_ms: Option<f64>,
    pub outcome: VerificationOutcome,
}

pub struct LivenessGate {
    success_duration_ms: f64,
    timeout_ms: f64,
    session: Option<VerificationSession>,
    success_timer: OneShotTimer,
    deadline_timer: OneShotTimer,
    state: GateState,
}

impl LivenessGate {
    pub fn new(success_duration_ms: f64, timeout_ms: f64) -> Self {
        Self {
            success_duration_ms,
            timeout_ms,
            session: None,
            success_timer: OneShotTimer::new(success_duration_ms),
            deadline_timer: OneShotTimer::new(timeout_ms),
            state: GateState::Idle,
        }
    }

    pub fn from_config(config: &VerificationConfig) -> Self {
        Self::new(config.success_duration_ms, config.timeout_ms)
    }

    /// Begin a fresh attempt; nothing from a previous attempt survives
    pub fn start(&mut self, now_ms: f64) {
        self.teardown();
        self.session = Some(VerificationSession {
            started_at_ms: now_ms,
            stably_since_ms: None,
            outcome: VerificationOutcome::Pending,
        });
        self.deadline_timer.arm(now_ms);
        self.state = GateState::Running;
        info!(
            "🔍 Liveness verification started (need {:.1}s stable within {:.1}s)",
            self.success_duration_ms / 1000.0,
            self.timeout_ms / 1000.0
        );
    }

    /// Feed one classified sample
    pub fn observe(&mut self, kind: ViolationKind, now_ms: f64) -> GateState {
        if self.state != GateState::Running {
            return self.state;
        }
        // Timers that expired before this sample win over the sample
        if self.fire_expired_timers(now_ms).is_terminal() {
            return self.state;
        }

        let session = match self.session.as_mut() {
            Some(session) => session,
            None => return self.state,
        };

        if kind.is_violation() {
            if self.success_timer.is_armed() {
                debug!("Stability broken by {} at {:.0}ms", kind, now_ms);
            }
            self.success_timer.disarm();
            session.stably_since_ms = None;
        } else if !self.success_timer.is_armed() {
            self.success_timer.arm(now_ms);
            session.stably_since_ms = Some(now_ms);
        }

        self.state
    }

    /// Advance the clock without a sample
    pub fn poll(&mut self, now_ms: f64) -> GateState {
        if self.state != GateState::Running {
            return self.state;
        }
        self.fire_expired_timers(now_ms)
    }

    /// Caller deactivated the gate
    pub fn cancel(&mut self) {
        if self.state == GateState::Running {
            info!("Liveness verification cancelled");
        }
        self.teardown();
        self.state = GateState::Idle;
    }

    fn fire_expired_timers(&mut self, now_ms: f64) -> GateState {
        let success_at = self
            .success_timer
            .deadline()
            .filter(|_| self.success_timer.has_elapsed(now_ms));
        let deadline_at = self
            .deadline_timer
            .deadline()
            .filter(|_| self.deadline_timer.has_elapsed(now_ms));

        match (success_at, deadline_at) {
            (Some(s), Some(d)) if s <= d => self.finish(VerificationOutcome::Success),
            (Some(_), None) => self.finish(VerificationOutcome::Success),
            (_, Some(_)) => self.finish(VerificationOutcome::Failure),
            (None, None) => {}
        }
        self.state
    }

    fn finish(&mut self, outcome: VerificationOutcome) {
        if let Some(session) = self.session.as_mut() {
            session.outcome = outcome;
        }
        match outcome {
            VerificationOutcome::Success => {
                info!("✅ Liveness verification succeeded");
                self.state = GateState::Succeeded;
            }
            _ => {
                warn!("❌ Liveness verification timed out");
                self.state = GateState::Failed;
            }
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        self.success_timer.disarm();
        self.deadline_timer.disarm();
        self.session = None;
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn session(&self) -> Option<&VerificationSession> {
        self.session.as_ref()
    }

    pub fn outcome(&self) -> VerificationOutcome {
        match self.state {
            GateState::Succeeded => VerificationOutcome::Success,
            GateState::Failed => VerificationOutcome::Failure,
            GateState::Idle | GateState::Running => VerificationOutcome::Pending,
        }
    }

    pub fn has_armed_timers(&self) -> bool {
        self.success_timer.is_armed() || self.deadline_timer.is_armed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ViolationKind::*;

    const FRAME_MS: f64 = 1000.0 / 30.0;

    fn drive(gate: &mut LivenessGate, from_ms: f64, to_ms: f64, kind: ViolationKind) -> GateState {
        let mut t = from_ms;
        while t < to_ms {
            if gate.observe(kind, t).is_terminal() {
                break;
            }
            t += FRAME_MS;
        }
        gate.state()
    }

    #[test]
    fn test_three_stable_seconds_succeed() {
        let mut gate = LivenessGate::new(3000.0, 10_000.0);
        gate.start(0.0);
        let state = drive(&mut gate, 0.0, 4000.0, Normal);

        assert_eq!(state, GateState::Succeeded);
        assert_eq!(gate.outcome(), VerificationOutcome::Success);
        assert!(!gate.has_armed_timers());
        assert!(gate.session().is_none());
    }

    #[test]
    fn test_interruption_restarts_stability() {
        let mut gate = LivenessGate::new(3000.0, 10_000.0);
        gate.start(0.0);

        drive(&mut gate, 0.0, 2500.0, Normal);
        assert_eq!(gate.observe(LookingLeft, 2500.0), GateState::Running);
        assert_eq!(gate.session().unwrap().stably_since_ms, None);

        // 2.9s of normal after the interruption is not enough
        assert_eq!(drive(&mut gate, 2600.0, 5500.0, Normal), GateState::Running);
        assert_eq!(gate.session().unwrap().stably_since_ms, Some(2600.0));
        assert_eq!(gate.poll(5600.0), GateState::Succeeded);
    }

    #[test]
    fn test_never_stable_fails_at_deadline() {
        let mut gate = LivenessGate::new(3000.0, 10_000.0);
        gate.start(0.0);

        let mut t = 0.0;
        let mut i = 0;
        while t < 9_990.0 {
            // two seconds normal, one frame of no-face, repeat
            let kind = if i % 61 == 60 { NoFace } else { Normal };
            assert_eq!(gate.observe(kind, t), GateState::Running);
            t += FRAME_MS;
            i += 1;
        }
        assert_eq!(gate.poll(10_000.0), GateState::Failed);
        assert_eq!(gate.outcome(), VerificationOutcome::Failure);
        assert!(!gate.has_armed_timers());
    }

    #[test]
    fn test_success_timer_expiring_first_wins_even_if_polled_late() {
        let mut gate = LivenessGate::new(3000.0, 10_000.0);
        gate.start(0.0);
        gate.observe(Normal, 7500.0);
        // success due at 10_500, deadline at 10_000
        assert_eq!(gate.poll(11_000.0), GateState::Failed);

        let mut gate = LivenessGate::new(3000.0, 10_000.0);
        gate.start(0.0);
        gate.observe(Normal, 6000.0);
        // success due at 9_000, deadline at 10_000
        assert_eq!(gate.poll(12_000.0), GateState::Succeeded);
    }

    #[test]
    fn test_sample_after_expiry_does_not_undo_success() {
        let mut gate = LivenessGate::new(3000.0, 10_000.0);
        gate.start(0.0);
        gate.observe(Normal, 0.0);
        assert_eq!(gate.observe(NoFace, 3100.0), GateState::Succeeded);
        assert_eq!(gate.observe(NoFace, 3200.0), GateState::Succeeded);
    }

    #[test]
    fn test_cancel_tears_down_and_restart_is_clean() {
        let mut gate = LivenessGate::new(3000.0, 10_000.0);
        gate.start(0.0);
        gate.observe(Normal, 100.0);
        gate.cancel();
        assert_eq!(gate.state(), GateState::Idle);
        assert!(!gate.has_armed_timers());
        assert_eq!(gate.poll(50_000.0), GateState::Idle);

        // A re-run must not inherit the old success timer armed at 100ms
        gate.start(20_000.0);
        assert_eq!(gate.poll(20_500.0), GateState::Running);
        assert_eq!(gate.observe(Normal, 21_000.0), GateState::Running);
        assert_eq!(gate.poll(23_999.0), GateState::Running);
        assert_eq!(gate.poll(24_000.0), GateState::Succeeded);
    }

    #[test]
    fn test_samples_before_start_are_ignored() {
        let mut gate = LivenessGate::new(3000.0, 10_000.0);
        assert_eq!(gate.observe(Normal, 0.0), GateState::Idle);
        assert_eq!(gate.poll(5000.0), GateState::Idle);
        assert_eq!(gate.outcome(), VerificationOutcome::Pending);
    }
}
