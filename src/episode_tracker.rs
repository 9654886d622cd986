// src/episode_tracker.rs
//
// Collapses a per-frame violation signal into discrete episodes.
//
//   IDLE --non-normal--> IN_EPISODE --normal--> IDLE
//
// The detector re-fires every frame, so one head turn would otherwise be
// counted dozens of times per second. An episode that opens less than the
// cool-down after the last *confirmed* episode closed is tracked but
// suppressed: it absorbs the run and is never counted. The kind of an
// episode is the kind seen when it opened.

use crate::classifier::ViolationKind;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackerState {
    Idle,
    InEpisode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViolationEpisode {
    pub kind: ViolationKind,
    pub opened_at_ms: f64,
    pub closed_at_ms: Option<f64>,
    pub sample_count: u32,
    /// False when the episode opened inside the cool-down window
    pub confirmed: bool,
}

impl ViolationEpisode {
    pub fn duration_ms(&self) -> Option<f64> {
        self.closed_at_ms.map(|closed| closed - self.opened_at_ms)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EpisodeEvent {
    /// A new episode opened; `confirmed` tells whether it counts
    Opened(ViolationEpisode),
    Closed(ViolationEpisode),
}

pub struct EpisodeTracker {
    cooldown_ms: f64,
    current: Option<ViolationEpisode>,
    last_confirmed_close_ms: Option<f64>,
    confirmed_episodes: u64,
    suppressed_episodes: u64,
}

impl EpisodeTracker {
    pub fn new(cooldown_ms: f64) -> Self {
        Self {
            cooldown_ms,
            current: None,
            last_confirmed_close_ms: None,
            confirmed_episodes: 0,
            suppressed_episodes: 0,
        }
    }

    pub fn state(&self) -> TrackerState {
        if self.current.is_some() {
            TrackerState::InEpisode
        } else {
            TrackerState::Idle
        }
    }

    /// Feed one classified sample
    pub fn observe(&mut self, kind: ViolationKind, timestamp_ms: f64) -> Option<EpisodeEvent> {
        if kind.is_violation() {
            if let Some(episode) = self.current.as_mut() {
                episode.sample_count += 1;
                return None;
            }
            return Some(self.open(kind, timestamp_ms));
        }

        self.close(timestamp_ms)
    }

    /// Close any open episode because the session is ending
    pub fn end_session(&mut self, timestamp_ms: f64) -> Option<EpisodeEvent> {
        self.close(timestamp_ms)
    }

    fn open(&mut self, kind: ViolationKind, timestamp_ms: f64) -> EpisodeEvent {
        let confirmed = self.cooldown_elapsed(timestamp_ms);
        let episode = ViolationEpisode {
            kind,
            opened_at_ms: timestamp_ms,
            closed_at_ms: None,
            sample_count: 1,
            confirmed,
        };

        if confirmed {
            self.confirmed_episodes += 1;
            info!(
                "⚠️  Violation episode #{} opened: {} at {:.0}ms",
                self.confirmed_episodes, kind, timestamp_ms
            );
        } else {
            self.suppressed_episodes += 1;
            debug!(
                "Episode {} at {:.0}ms suppressed by cool-down",
                kind, timestamp_ms
            );
        }

        self.current = Some(episode.clone());
        EpisodeEvent::Opened(episode)
    }

    fn close(&mut self, timestamp_ms: f64) -> Option<EpisodeEvent> {
        let mut episode = self.current.take()?;
        episode.closed_at_ms = Some(timestamp_ms);

        if episode.confirmed {
            self.last_confirmed_close_ms = Some(timestamp_ms);
        }
        debug!(
            "Episode {} closed after {} samples ({:.0}ms)",
            episode.kind,
            episode.sample_count,
            timestamp_ms - episode.opened_at_ms
        );
        Some(EpisodeEvent::Closed(episode))
    }

    /// Strictly more than the cool-down since the last confirmed close.
    /// Non-finite or backwards clocks keep the window closed.
    fn cooldown_elapsed(&self, timestamp_ms: f64) -> bool {
        match self.last_confirmed_close_ms {
            None => true,
            Some(closed) => timestamp_ms - closed > self.cooldown_ms,
        }
    }

    pub fn confirmed_episodes(&self) -> u64 {
        self.confirmed_episodes
    }

    pub fn suppressed_episodes(&self) -> u64 {
        self.suppressed_episodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ViolationKind::*;

    fn feed(tracker: &mut EpisodeTracker, run: &[(f64, ViolationKind)]) -> Vec<EpisodeEvent> {
        run.iter()
            .filter_map(|(t, kind)| tracker.observe(*kind, *t))
            .collect()
    }

    fn run_at_30fps(start_ms: f64, end_ms: f64, kind: ViolationKind) -> Vec<(f64, ViolationKind)> {
        let mut samples = Vec::new();
        let mut t = start_ms;
        while t <= end_ms {
            samples.push((t, kind));
            t += 1000.0 / 30.0;
        }
        samples
    }

    #[test]
    fn test_long_run_is_one_episode() {
        let mut tracker = EpisodeTracker::new(3500.0);
        let mut samples = run_at_30fps(0.0, 2000.0, LookingLeft);
        samples.push((2100.0, Normal));

        let events = feed(&mut tracker, &samples);
        assert_eq!(events.len(), 2);
        assert_eq!(tracker.confirmed_episodes(), 1);

        match &events[1] {
            EpisodeEvent::Closed(ep) => {
                assert_eq!(ep.kind, LookingLeft);
                assert_eq!(ep.opened_at_ms, 0.0);
                assert_eq!(ep.closed_at_ms, Some(2100.0));
                assert_eq!(ep.sample_count as usize, samples.len() - 1);
                assert!(ep.confirmed);
            }
            other => panic!("expected close, got {:?}", other),
        }
    }

    #[test]
    fn test_kind_is_first_sample_of_run() {
        let mut tracker = EpisodeTracker::new(3500.0);
        let events = feed(
            &mut tracker,
            &[
                (0.0, LookingRight),
                (33.0, ProhibitedObject),
                (66.0, NoFace),
                (100.0, Normal),
            ],
        );
        assert_eq!(events.len(), 2);
        match &events[1] {
            EpisodeEvent::Closed(ep) => assert_eq!(ep.kind, LookingRight),
            other => panic!("expected close, got {:?}", other),
        }
    }

    #[test]
    fn test_rerun_inside_cooldown_is_suppressed() {
        let mut tracker = EpisodeTracker::new(3500.0);
        let mut samples = run_at_30fps(0.0, 2000.0, LookingLeft);
        samples.push((2100.0, Normal));
        samples.extend(run_at_30fps(2300.0, 3000.0, LookingLeft));
        samples.push((3100.0, Normal));

        let events = feed(&mut tracker, &samples);
        assert_eq!(tracker.confirmed_episodes(), 1);
        assert_eq!(tracker.suppressed_episodes(), 1);

        let second_open = events
            .iter()
            .filter_map(|e| match e {
                EpisodeEvent::Opened(ep) => Some(ep),
                _ => None,
            })
            .nth(1)
            .unwrap();
        assert!(!second_open.confirmed);
        assert_eq!(second_open.opened_at_ms, 2300.0);
    }

    #[test]
    fn test_suppressed_close_does_not_extend_cooldown() {
        let mut tracker = EpisodeTracker::new(3500.0);
        feed(
            &mut tracker,
            &[
                (0.0, NoFace),
                (1000.0, Normal),
                (2000.0, NoFace), // suppressed
                (3000.0, Normal),
                (4600.0, LookingDown), // 3600ms after the confirmed close
            ],
        );
        assert_eq!(tracker.confirmed_episodes(), 2);
        assert_eq!(tracker.suppressed_episodes(), 1);
    }

    #[test]
    fn test_exactly_at_cooldown_boundary_is_suppressed() {
        let mut tracker = EpisodeTracker::new(3500.0);
        feed(&mut tracker, &[(0.0, NoFace), (100.0, Normal), (3600.0, NoFace)]);
        assert_eq!(tracker.confirmed_episodes(), 1);
    }

    #[test]
    fn test_at_most_one_confirmed_per_cooldown_window() {
        let mut tracker = EpisodeTracker::new(3500.0);
        // Flicker: alternate violation / normal every frame for 20 seconds
        let mut opens_ms = Vec::new();
        for i in 0..600 {
            let t = i as f64 * 1000.0 / 30.0;
            let kind = if i % 2 == 0 { LookingLeft } else { Normal };
            if let Some(EpisodeEvent::Opened(ep)) = tracker.observe(kind, t) {
                if ep.confirmed {
                    opens_ms.push(ep.opened_at_ms);
                }
            }
        }
        assert!(opens_ms.len() > 1);
        for pair in opens_ms.windows(2) {
            assert!(pair[1] - pair[0] > 3500.0);
        }
    }

    #[test]
    fn test_end_session_closes_open_episode() {
        let mut tracker = EpisodeTracker::new(3500.0);
        tracker.observe(MultipleFaces, 0.0);
        assert_eq!(tracker.state(), TrackerState::InEpisode);

        let event = tracker.end_session(500.0);
        assert!(matches!(
            event,
            Some(EpisodeEvent::Closed(ViolationEpisode {
                closed_at_ms: Some(t),
                ..
            })) if t == 500.0
        ));
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert!(tracker.end_session(600.0).is_none());
    }

    #[test]
    fn test_normal_while_idle_is_noop() {
        let mut tracker = EpisodeTracker::new(3500.0);
        assert!(tracker.observe(Normal, 0.0).is_none());
        assert_eq!(tracker.state(), TrackerState::Idle);
    }

    #[test]
    fn test_backwards_clock_stays_suppressed() {
        let mut tracker = EpisodeTracker::new(3500.0);
        feed(&mut tracker, &[(10_000.0, NoFace), (10_100.0, Normal), (50.0, NoFace)]);
        assert_eq!(tracker.confirmed_episodes(), 1);
        assert_eq!(tracker.suppressed_episodes(), 1);
    }
}
