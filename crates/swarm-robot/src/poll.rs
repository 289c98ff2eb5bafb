//! [`TelemetryPoll`] – completion check for an outstanding telemetry refresh.
//!
//! The control loop is single-threaded, so a poll is not a timer task but a
//! set of deadlines the loop checks once per tick.  The first check happens
//! [`PollSettings::first_check`] after the queries went out, later checks every
//! [`PollSettings::recheck`].  An optional overall timeout abandons the poll.
//! Dropping the poll (entity disabled or removed) cancels it.

use std::time::{Duration, Instant};

use swarm_types::TelemetrySnapshot;

use crate::telemetry::Telemetry;

/// Timing of telemetry completion checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub first_check: Duration,
    pub recheck: Duration,
    /// `None` keeps polling until the refresh completes.
    pub timeout: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            first_check: Duration::from_millis(1500),
            recheck: Duration::from_millis(1000),
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Result of a [`TelemetryPoll::check`].
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// Not due yet, or due but incomplete (rescheduled).
    Pending,
    Ready(TelemetrySnapshot),
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct TelemetryPoll {
    next_check: Instant,
    deadline: Option<Instant>,
    recheck: Duration,
    checks: u32,
}

impl TelemetryPoll {
    pub fn start(settings: PollSettings, now: Instant) -> Self {
        Self {
            next_check: now + settings.first_check,
            deadline: settings.timeout.map(|t| now + t),
            recheck: settings.recheck,
            checks: 0,
        }
    }

    pub fn next_check(&self) -> Instant {
        self.next_check
    }

    /// Number of due checks performed so far.
    pub fn checks(&self) -> u32 {
        self.checks
    }

    /// Check for completion if a check is due at `now`.
    ///
    /// On completion the telemetry's `Ready` state is consumed.  On timeout the
    /// telemetry's pending cycle is cancelled.
    pub fn check(&mut self, now: Instant, telemetry: &mut Telemetry) -> PollStatus {
        if now < self.next_check {
            return PollStatus::Pending;
        }
        self.checks += 1;
        if telemetry.has_been_updated() {
            return PollStatus::Ready(telemetry.snapshot());
        }
        if self.deadline.is_some_and(|deadline| now >= deadline) {
            telemetry.cancel_refresh();
            return PollStatus::TimedOut;
        }
        self.next_check = now + self.recheck;
        PollStatus::Pending
    }
}
