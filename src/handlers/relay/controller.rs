use chrono::DateTime;
use chrono_tz::Tz;
use log::{debug, info, warn};
use std::io;

use crate::handlers::relay::pin::RelayPin;
use crate::models::heater_models::OperationInterval;

// --------------------------------------------------------------------------------------------------------------

/// Heater relay state. The start of the current "on" interval exists only while on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Off,
    On { since: DateTime<Tz> },
}

impl RelayState {
    pub fn is_on(&self) -> bool {
        matches!(self, RelayState::On { .. })
    }

    #[cfg(test)]
    pub fn interval_start(&self) -> Option<DateTime<Tz>> {
        match self {
            RelayState::On { since } => Some(*since),
            RelayState::Off          => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    TurnedOn,
    TurnedOff(OperationInterval),
    Unchanged,
}

// --------------------------------------------------------------------------------------------------------------

/// Switches the heater on while the inverter delivers more than `threshold_kw`.
/// Anything else, including a missing reading, switches it off.
pub struct RelayController<P: RelayPin> {
    pin:          P,
    threshold_kw: f64,
    state:        RelayState,
}

impl<P: RelayPin> RelayController<P> {
    /// Drives the output low so the heater starts off regardless of what the pin held before.
    pub fn new(mut pin: P, threshold_kw: f64) -> io::Result<Self> {
        pin.set_low()?;
        Ok(Self { pin, threshold_kw, state: RelayState::Off })
    }

    #[cfg(test)]
    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Feed the latest reading. The pin is written before the state changes, so a failed
    /// write leaves the recorded state matching the last successful command.
    pub fn apply(&mut self, reading_kw: Option<f64>, now: DateTime<Tz>) -> io::Result<Transition> {
        let wanted_on = matches!(reading_kw, Some(kw) if kw > self.threshold_kw);

        match (self.state, wanted_on) {
            (RelayState::Off, true) => {
                self.pin.set_high()?;
                self.state = RelayState::On { since: now };
                info!(
                    "[Relay] Output {:.2} kW above {:.2} kW. Heater ON.",
                    reading_kw.unwrap_or_default(),
                    self.threshold_kw
                );
                Ok(Transition::TurnedOn)
            }
            (RelayState::On { since }, false) => {
                self.pin.set_low()?;
                self.state = RelayState::Off;
                match reading_kw {
                    Some(kw) => info!("[Relay] Output {:.2} kW at/below {:.2} kW. Heater OFF.", kw, self.threshold_kw),
                    None     => warn!("[Relay] No power data. Heater OFF."),
                }
                Ok(Transition::TurnedOff(OperationInterval::new(since, now)))
            }
            (state, _) => {
                debug!("[Relay] No change (heater {}).", if state.is_on() { "on" } else { "off" });
                Ok(Transition::Unchanged)
            }
        }
    }

    /// Fail-safe: switch off no matter what. Returns the interval closed by it, if any.
    pub fn force_off(&mut self, now: DateTime<Tz>) -> io::Result<Option<OperationInterval>> {
        match self.state {
            RelayState::On { since } => {
                self.pin.set_low()?;
                self.state = RelayState::Off;
                warn!("[Relay] Heater forced OFF.");
                Ok(Some(OperationInterval::new(since, now)))
            }
            RelayState::Off => {
                // Re-assert low in case the output drifted from the recorded state.
                self.pin.set_low()?;
                Ok(None)
            }
        }
    }

    /// Drive low and release the pin. Call once on shutdown.
    pub fn release(&mut self) -> io::Result<()> {
        self.pin.set_low()?;
        self.pin.cleanup()
    }
}

// --------------------------------------------------------------------------------------------------------------
