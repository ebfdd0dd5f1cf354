//! Trailing-edge debounce with single-flight sends.

use std::time::Duration;

use tracing::trace;

/// Where the scheduler is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing to send.
    Idle,
    /// A snapshot is waiting for the quiet period to end.
    Pending {
        /// Time at which the snapshot becomes due.
        deadline: u64,
    },
    /// A snapshot has been handed out and not yet completed.
    InFlight {
        /// Deadline of a snapshot scheduled while the send was running.
        resume_at: Option<u64>,
    },
}

/// Debounces snapshots and hands out at most one at a time.
///
/// Only the latest snapshot is held; scheduling replaces it and restarts the
/// quiet period. A failed snapshot is kept but never re-sent on a timer; it
/// is superseded by the next schedule or taken back with
/// [`AutoSave::take_retained`].
#[derive(Debug, Clone)]
pub struct AutoSave<S> {
    debounce_ms: u64,
    phase: Phase,
    latest: Option<S>,
}

impl<S> AutoSave<S> {
    /// A scheduler with the given quiet period.
    #[must_use]
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce_ms: u64::try_from(debounce.as_millis()).unwrap_or(u64::MAX),
            phase: Phase::Idle,
            latest: None,
        }
    }

    /// The current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether a snapshot has been handed out and not completed.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        matches!(self.phase, Phase::InFlight { .. })
    }

    /// When the pending snapshot becomes due, if one is waiting and nothing
    /// is in flight.
    #[must_use]
    pub const fn deadline(&self) -> Option<u64> {
        match self.phase {
            Phase::Pending { deadline } => Some(deadline),
            Phase::Idle | Phase::InFlight { .. } => None,
        }
    }

    /// Replaces the held snapshot and restarts the quiet period at `now_ms`.
    pub fn schedule(&mut self, snapshot: S, now_ms: u64) {
        let deadline = now_ms.saturating_add(self.debounce_ms);
        self.latest = Some(snapshot);
        self.phase = match self.phase {
            Phase::Idle | Phase::Pending { .. } => Phase::Pending { deadline },
            Phase::InFlight { .. } => Phase::InFlight {
                resume_at: Some(deadline),
            },
        };
        trace!(deadline, "auto-save scheduled");
    }

    /// Hands out the pending snapshot once its deadline has passed.
    pub fn poll(&mut self, now_ms: u64) -> Option<S> {
        match self.phase {
            Phase::Pending { deadline } if now_ms >= deadline => self.start(),
            _ => None,
        }
    }

    /// Hands out the pending snapshot without waiting for its deadline.
    pub fn flush(&mut self) -> Option<S> {
        match self.phase {
            Phase::Pending { .. } => self.start(),
            _ => None,
        }
    }

    fn start(&mut self) -> Option<S> {
        let snapshot = self.latest.take()?;
        self.phase = Phase::InFlight { resume_at: None };
        Some(snapshot)
    }

    /// Marks the in-flight snapshot as sent.
    ///
    /// A snapshot scheduled meanwhile becomes pending again with the deadline
    /// it was given.
    pub fn complete(&mut self) {
        if let Phase::InFlight { resume_at } = self.phase {
            self.phase = resume_at.map_or(Phase::Idle, |deadline| Phase::Pending { deadline });
        }
    }

    /// Marks the in-flight snapshot as failed.
    ///
    /// If nothing newer was scheduled, `snapshot` is retained without a
    /// deadline.
    pub fn fail(&mut self, snapshot: S) {
        if let Phase::InFlight { resume_at } = self.phase {
            match resume_at {
                Some(deadline) => self.phase = Phase::Pending { deadline },
                None => {
                    self.phase = Phase::Idle;
                    self.latest = Some(snapshot);
                }
            }
        }
    }

    /// Takes back a snapshot retained after a failure.
    pub fn take_retained(&mut self) -> Option<S> {
        match self.phase {
            Phase::Idle => self.latest.take(),
            _ => None,
        }
    }

    /// Drops any pending or retained snapshot and forgets an in-flight one.
    pub fn cancel(&mut self) -> Option<S> {
        self.phase = Phase::Idle;
        self.latest.take()
    }
}
