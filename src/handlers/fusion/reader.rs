use log::{debug, error, info, warn};

use crate::errors::TelemetryError;
use crate::handlers::fusion::session::{Session, SessionManager};
use crate::models::fusion_models::{ApiResponse, DeviceRealKpi, RealKpiRequest, XSRF_TOKEN};

// --------------------------------------------------------------------------------------------------------------

/// Result of one telemetry poll.
#[derive(Debug)]
pub enum PowerOutcome {
    /// Inverter output in kW, rounded to 2 decimals.
    Value(f64),
    NoData,
    /// The caller must log in again and repeat the read.
    SessionExpired,
    Error(TelemetryError),
}

impl PowerOutcome {
    /// `Some(kw)` only for a usable reading; everything else counts as "not enough power".
    pub fn reading_kw(&self) -> Option<f64> {
        match self {
            PowerOutcome::Value(kw) => Some(*kw),
            _ => None,
        }
    }
}

/// W → kW, rounded to 2 decimals.
/// Rounds the binary value of `watts / 1000` exactly, so 5005 W is 5.00 kW and not 5.01.
pub fn watts_to_kw(watts: f64) -> f64 {
    let kw = watts / 1000.0;
    format!("{:.2}", kw).parse().unwrap_or(kw)
}

// --------------------------------------------------------------------------------------------------------------

/// Fetch the instantaneous active power of one inverter via POST /getDevRealKpi.
/// Never fails: transport and API problems come back as `PowerOutcome::Error` after being logged.
pub async fn read_power(sessions: &SessionManager, device_id: &str) -> PowerOutcome {
    let Some(session) = sessions.current() else {
        warn!("[Fusion] No session, cannot read device {}.", device_id);
        return PowerOutcome::Error(TelemetryError::NotLoggedIn);
    };

    match fetch_real_kpi(sessions, session, device_id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("[Fusion] Failed to read active power of device {}: {}", device_id, e);
            PowerOutcome::Error(e)
        }
    }
}

async fn fetch_real_kpi(
    sessions: &SessionManager,
    session: &Session,
    device_id: &str,
) -> Result<PowerOutcome, TelemetryError> {
    let url = format!("{}/getDevRealKpi", session.base_url);

    let response = sessions
        .client()
        .post(&url)
        .header(XSRF_TOKEN, &session.token)
        .json(&RealKpiRequest::inverter(device_id))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TelemetryError::Status { status: status.as_u16(), body });
    }

    let body = response.text().await?;
    let result: ApiResponse<Vec<DeviceRealKpi>> =
        serde_json::from_str(&body).map_err(|e| TelemetryError::Malformed(e.to_string()))?;

    if result.must_relogin() {
        warn!("[Fusion] Session expired (USER_MUST_RELOGIN).");
        return Ok(PowerOutcome::SessionExpired);
    }
    if !result.success {
        return Err(TelemetryError::Api(result.message));
    }

    let Some(first) = result.data.unwrap_or_default().into_iter().next() else {
        warn!("[Fusion] No data returned for device {}.", device_id);
        return Ok(PowerOutcome::NoData);
    };
    debug!("[Fusion] devId={:?} dataItemMap={:?}", first.dev_id, first.data_item_map);

    match first.data_item_map.active_power {
        Some(watts) if watts.is_finite() => {
            let kw = watts_to_kw(watts);
            info!("[Fusion] Current output: {:.2} kW", kw);
            Ok(PowerOutcome::Value(kw))
        }
        _ => {
            warn!("[Fusion] Device {} reported no active_power.", device_id);
            Ok(PowerOutcome::NoData)
        }
    }
}

// --------------------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::fusion::session::tests::{manager, mock_login_ok};
    use crate::handlers::relay::controller::tests::RecordingPin;
    use crate::handlers::relay::controller::{RelayController, Transition};
    use chrono::TimeZone;
    use chrono_tz::Europe::Warsaw;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;

    async fn logged_in(server: &mut ServerGuard) -> SessionManager {
        mock_login_ok(server, "tok-abc").await;
        let mut sessions = manager(server);
        sessions.login().await.unwrap();
        sessions
    }

    async fn mock_kpi(server: &mut ServerGuard, status: usize, body: serde_json::Value) -> mockito::Mock {
        server
            .mock("POST", "/getDevRealKpi")
            .match_header("xsrf-token", "tok-abc")
            .match_body(Matcher::Json(json!({"devTypeId": "1", "devIds": "1000000033"})))
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await
    }

    #[test]
    fn converts_watts_to_rounded_kilowatts() {
        assert_eq!(watts_to_kw(5000.0), 5.0);
        assert_eq!(watts_to_kw(5432.0), 5.43);
        assert_eq!(watts_to_kw(5436.0), 5.44);
        assert_eq!(watts_to_kw(5435.0), 5.43);
        assert_eq!(watts_to_kw(5005.0), 5.0);
        assert_eq!(watts_to_kw(0.0), 0.0);
        assert_eq!(watts_to_kw(999.0), 1.0);
    }

    #[test]
    fn reading_just_above_threshold_in_watts_keeps_heater_off() {
        let mut relay = RelayController::new(RecordingPin::default(), 5.0).unwrap();
        let now = Warsaw.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        assert_eq!(relay.apply(Some(watts_to_kw(5005.0)), now).unwrap(), Transition::Unchanged);
        assert_eq!(relay.apply(Some(watts_to_kw(5006.0)), now).unwrap(), Transition::TurnedOn);
    }

    #[tokio::test]
    async fn reads_active_power_in_kilowatts() {
        let mut server = Server::new_async().await;
        let sessions = logged_in(&mut server).await;
        let mock = mock_kpi(
            &mut server,
            200,
            json!({"success": true, "data": [{"devId": 1000000033, "dataItemMap": {"active_power": 5432}}]}),
        )
        .await;

        let outcome = read_power(&sessions, "1000000033").await;

        assert!(matches!(outcome, PowerOutcome::Value(kw) if kw == 5.43));
        assert_eq!(outcome.reading_kw(), Some(5.43));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn empty_data_is_no_data() {
        let mut server = Server::new_async().await;
        let sessions = logged_in(&mut server).await;
        mock_kpi(&mut server, 200, json!({"success": true, "data": []})).await;

        let outcome = read_power(&sessions, "1000000033").await;
        assert!(matches!(outcome, PowerOutcome::NoData));
        assert_eq!(outcome.reading_kw(), None);
    }

    #[tokio::test]
    async fn missing_active_power_is_no_data() {
        let mut server = Server::new_async().await;
        let sessions = logged_in(&mut server).await;
        mock_kpi(&mut server, 200, json!({"success": true, "data": [{"dataItemMap": {"active_power": null}}]})).await;

        assert!(matches!(read_power(&sessions, "1000000033").await, PowerOutcome::NoData));
    }

    #[tokio::test]
    async fn relogin_message_signals_session_expiry() {
        let mut server = Server::new_async().await;
        let sessions = logged_in(&mut server).await;
        mock_kpi(&mut server, 200, json!({"success": false, "message": "USER_MUST_RELOGIN"})).await;

        assert!(matches!(read_power(&sessions, "1000000033").await, PowerOutcome::SessionExpired));
    }

    #[tokio::test]
    async fn other_api_failures_are_errors() {
        let mut server = Server::new_async().await;
        let sessions = logged_in(&mut server).await;
        mock_kpi(&mut server, 200, json!({"success": false, "message": "ACCESS_FREQUENCY_IS_TOO_HIGH"})).await;

        let outcome = read_power(&sessions, "1000000033").await;
        assert!(matches!(
            outcome,
            PowerOutcome::Error(TelemetryError::Api(Some(ref m))) if m == "ACCESS_FREQUENCY_IS_TOO_HIGH"
        ));
    }

    #[tokio::test]
    async fn http_status_and_missing_session_are_errors() {
        let mut server = Server::new_async().await;
        let sessions = logged_in(&mut server).await;
        mock_kpi(&mut server, 500, json!({"error": "internal"})).await;

        assert!(matches!(
            read_power(&sessions, "1000000033").await,
            PowerOutcome::Error(TelemetryError::Status { status: 500, .. })
        ));

        let fresh = manager(&server);
        assert!(matches!(
            read_power(&fresh, "1000000033").await,
            PowerOutcome::Error(TelemetryError::NotLoggedIn)
        ));
    }
}
