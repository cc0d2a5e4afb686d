use chrono::DateTime;
use chrono_tz::Tz;
use std::fmt;

// --------------------------------------------------------------------------------------------------------------

/// A closed period during which the heater relay was on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationInterval {
    pub start: DateTime<Tz>,
    pub end:   DateTime<Tz>,
}

impl OperationInterval {
    /// `end` is clamped to `start` so a clock step backwards never yields a negative interval.
    pub fn new(start: DateTime<Tz>, end: DateTime<Tz>) -> Self {
        let end = if end < start { start } else { end };
        Self { start, end }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

impl fmt::Display for OperationInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "On from {} to {}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

// --------------------------------------------------------------------------------------------------------------
