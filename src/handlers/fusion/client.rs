use async_trait::async_trait;

use crate::control::control_loop::TelemetrySource;
use crate::errors::AuthError;
use crate::handlers::fusion::reader::{read_power, PowerOutcome};
use crate::handlers::fusion::session::SessionManager;

// --------------------------------------------------------------------------------------------------------------

/// One inverter on the FusionSolar cloud, reachable through an owned session.
pub struct FusionClient {
    sessions:  SessionManager,
    device_id: String,
}

impl FusionClient {
    pub fn new(sessions: SessionManager, device_id: impl Into<String>) -> Self {
        Self { sessions, device_id: device_id.into() }
    }
}

#[async_trait]
impl TelemetrySource for FusionClient {
    fn has_session(&self) -> bool {
        self.sessions.is_valid()
    }

    async fn login(&mut self) -> Result<(), AuthError> {
        self.sessions.login().await.map(|_| ())
    }

    async fn read_power(&mut self) -> PowerOutcome {
        let outcome = read_power(&self.sessions, &self.device_id).await;
        if matches!(outcome, PowerOutcome::SessionExpired) {
            self.sessions.invalidate();
        }
        outcome
    }
}

// --------------------------------------------------------------------------------------------------------------
