// src/pipeline/event_bus.rs
//
// Decoupled event system. The session publishes what happened during an
// iteration; the sampling loop drains it into the caller's callback.

use crate::classifier::ViolationKind;
use crate::episode_tracker::ViolationEpisode;
use crate::escalation::{GeneralAlert, TerminationSignal};
use crate::evidence::EvidenceRecord;
use crate::liveness::VerificationOutcome;
use std::collections::VecDeque;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum ProctorEvent {
    EpisodeOpened(ViolationEpisode),

    /// Opened inside the cool-down window; tracked but not counted
    EpisodeSuppressed(ViolationEpisode),

    EpisodeClosed(ViolationEpisode),

    ViolationConfirmed {
        kind: ViolationKind,
        count: u32,
    },

    GeneralAlert {
        alert: GeneralAlert,
        count: u32,
    },

    AutoSubmit(TerminationSignal),

    EvidenceStored(EvidenceRecord),

    EvidenceFailed {
        record_id: Uuid,
        kind: ViolationKind,
        error: String,
    },

    VerificationCompleted(VerificationOutcome),
}

pub struct EventBus {
    events: VecDeque<ProctorEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending,
        }
    }

    pub fn publish(&mut self, event: ProctorEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<ProctorEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }
}
