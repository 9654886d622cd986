// src/timer.rs
//
// Single-shot, cancellable timer measured on the sample clock (ms).
// A timer is only a deadline value, so a disarmed or dropped timer can
// never fire later.

#[derive(Debug, Clone)]
pub struct OneShotTimer {
    duration_ms: f64,
    armed_at_ms: Option<f64>,
}

impl OneShotTimer {
    pub fn new(duration_ms: f64) -> Self {
        Self {
            duration_ms,
            armed_at_ms: None,
        }
    }

    /// Arm (or re-arm) the timer starting at `now_ms`
    pub fn arm(&mut self, now_ms: f64) {
        self.armed_at_ms = Some(now_ms);
    }

    pub fn disarm(&mut self) {
        self.armed_at_ms = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed_at_ms.is_some()
    }

    pub fn deadline(&self) -> Option<f64> {
        self.armed_at_ms.map(|t| t + self.duration_ms)
    }

    pub fn has_elapsed(&self, now_ms: f64) -> bool {
        self.deadline().is_some_and(|deadline| now_ms >= deadline)
    }
}
