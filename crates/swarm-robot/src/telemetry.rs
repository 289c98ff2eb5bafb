//! Per-robot telemetry fields and the refresh-cycle state machine.
//!
//! A refresh is started with [`Telemetry::begin_refresh`], which expects
//! [`Telemetry::EXPECTED_WRITES`] field writes (six numeric fields plus the
//! firmware version).  Every [`Telemetry::record`] while polling decrements the
//! remaining count; reaching zero moves the state to [`RefreshState::Ready`].
//! [`Telemetry::has_been_updated`] consumes the `Ready` state exactly once and
//! returns to `Idle`.

use std::collections::BTreeMap;

use swarm_types::{SwarmError, TelemetrySnapshot};
use tracing::debug;

/// A field a robot reports in response to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TelemetryField {
    /// Body height.
    H,
    /// Rotation.
    R,
    Dx,
    Dy,
    /// Leg lift altitude.
    Alt,
    /// Gait frequency.
    Freq,
    Version,
}

impl TelemetryField {
    /// The order in which a refresh queries the robot.
    pub const QUERY_ORDER: [TelemetryField; 7] = [
        TelemetryField::H,
        TelemetryField::R,
        TelemetryField::Alt,
        TelemetryField::Freq,
        TelemetryField::Dx,
        TelemetryField::Dy,
        TelemetryField::Version,
    ];

    pub const NUMERIC: [TelemetryField; 6] = [
        TelemetryField::H,
        TelemetryField::R,
        TelemetryField::Dx,
        TelemetryField::Dy,
        TelemetryField::Alt,
        TelemetryField::Freq,
    ];

    /// Wire key used in queries and `key=value` responses.
    pub fn key(self) -> &'static str {
        match self {
            TelemetryField::H => "h",
            TelemetryField::R => "r",
            TelemetryField::Dx => "dx",
            TelemetryField::Dy => "dy",
            TelemetryField::Alt => "alt",
            TelemetryField::Freq => "freq",
            TelemetryField::Version => "version",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::QUERY_ORDER.into_iter().find(|field| field.key() == key)
    }
}

/// Where a robot's telemetry is in its refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Polling { remaining: u8 },
    Ready,
}

#[derive(Debug, Clone)]
pub struct Telemetry {
    values: BTreeMap<TelemetryField, i64>,
    version: String,
    state: RefreshState,
}

impl Telemetry {
    /// Writes expected per refresh: six numeric fields plus the version.
    pub const EXPECTED_WRITES: u8 = 7;

    pub fn new() -> Self {
        Self {
            values: TelemetryField::NUMERIC.into_iter().map(|f| (f, 0)).collect(),
            version: String::new(),
            state: RefreshState::Idle,
        }
    }

    pub fn state(&self) -> RefreshState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, RefreshState::Polling { .. })
    }

    /// Writes still expected in the current cycle; the full count outside a
    /// cycle.
    pub fn remaining(&self) -> u8 {
        match self.state {
            RefreshState::Polling { remaining } => remaining,
            RefreshState::Ready => 0,
            RefreshState::Idle => Self::EXPECTED_WRITES,
        }
    }

    /// Enter `Polling` with the full expected count, discarding any cycle in
    /// progress.
    pub fn begin_refresh(&mut self) {
        self.state = RefreshState::Polling {
            remaining: Self::EXPECTED_WRITES,
        };
    }

    /// Abandon the current cycle.
    pub fn cancel_refresh(&mut self) {
        self.state = RefreshState::Idle;
    }

    /// Store a reported value and count it toward the pending refresh.
    ///
    /// Writes outside a pending cycle are ignored and return `Ok(false)`.
    ///
    /// # Errors
    ///
    /// [`SwarmError::Parse`] when a numeric field's value is not an integer.
    /// Nothing is written in that case.
    pub fn record(&mut self, field: TelemetryField, raw: &str) -> Result<bool, SwarmError> {
        let RefreshState::Polling { remaining } = self.state else {
            debug!(field = field.key(), "telemetry write outside a refresh cycle ignored");
            return Ok(false);
        };
        self.store(field, raw)?;
        let remaining = remaining.saturating_sub(1);
        self.state = if remaining == 0 {
            RefreshState::Ready
        } else {
            RefreshState::Polling { remaining }
        };
        Ok(true)
    }

    /// Overwrite a field without touching the refresh cycle (operator edits).
    pub fn set(&mut self, field: TelemetryField, raw: &str) -> Result<(), SwarmError> {
        self.store(field, raw)
    }

    /// Returns `true` exactly once per completed cycle, then resets to `Idle`.
    pub fn has_been_updated(&mut self) -> bool {
        if self.state == RefreshState::Ready {
            self.state = RefreshState::Idle;
            true
        } else {
            false
        }
    }

    pub fn get(&self, field: TelemetryField) -> Option<i64> {
        self.values.get(&field).copied()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            fields: self
                .values
                .iter()
                .map(|(field, value)| (field.key().to_string(), *value))
                .collect(),
            version: self.version.clone(),
        }
    }

    fn store(&mut self, field: TelemetryField, raw: &str) -> Result<(), SwarmError> {
        let raw = raw.trim();
        if field == TelemetryField::Version {
            self.version = raw.to_string();
            return Ok(());
        }
        let value = raw
            .parse::<i64>()
            .map_err(|e| SwarmError::Parse(format!("{}={raw}: {e}", field.key())))?;
        self.values.insert(field, value);
        Ok(())
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}
