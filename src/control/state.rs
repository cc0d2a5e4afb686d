use std::time::Duration;

// --------------------------------------------------------------------------------------------------------------

/// Where the control loop is within one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Between cycles (sleeping or about to start).
    Idle,
    Authenticating,
    Polling,
    /// Login failed; wait this long before the next cycle.
    Backoff(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    /// Cycle started with a valid session.
    SessionAvailable,
    /// Cycle started without a session.
    SessionMissing,
    LoginSucceeded,
    LoginFailed(Duration),
    /// The read reported USER_MUST_RELOGIN and the cycle may still retry it.
    SessionExpired,
    /// The reading (or its absence) was handed to the relay.
    ReadCompleted,
    BackoffElapsed,
}

impl LoopState {
    /// Transition table. Events that make no sense in a state leave it unchanged.
    pub fn on(self, event: LoopEvent) -> LoopState {
        use LoopEvent::*;
        use LoopState::*;

        match (self, event) {
            (Idle, SessionAvailable)           => Polling,
            (Idle, SessionMissing)             => Authenticating,
            (Authenticating, LoginSucceeded)   => Polling,
            (Authenticating, LoginFailed(d))   => Backoff(d),
            (Polling, SessionExpired)          => Authenticating,
            (Polling, ReadCompleted)           => Idle,
            (Backoff(_), BackoffElapsed)       => Idle,
            (state, _)                         => state,
        }
    }
}

// --------------------------------------------------------------------------------------------------------------
