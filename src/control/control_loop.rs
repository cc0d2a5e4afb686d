use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::FutureExt;
use log::{debug, error, info, warn};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::control::backoff::LoginBackoff;
use crate::control::state::{LoopEvent, LoopState};
use crate::errors::{AuthError, CycleError};
use crate::handlers::fusion::reader::PowerOutcome;
use crate::handlers::relay::controller::{RelayController, Transition};
use crate::handlers::relay::pin::RelayPin;
use crate::handlers::report::notifier::Notifier;
use crate::handlers::report::sink::ReportingSink;
use crate::logging::daily_file::DailyLog;

// --------------------------------------------------------------------------------------------------------------

/// Where power readings come from. Implemented by the FusionSolar client.
#[async_trait]
pub trait TelemetrySource: Send {
    fn has_session(&self) -> bool;
    async fn login(&mut self) -> Result<(), AuthError>;
    async fn read_power(&mut self) -> PowerOutcome;
}

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub poll_interval:  Duration,
    pub recovery_pause: Duration,
}

// --------------------------------------------------------------------------------------------------------------

/// Owns all mutable controller state and drives one poll cycle after another.
pub struct ControlLoop<S: TelemetrySource, P: RelayPin, N: Notifier> {
    source:   S,
    relay:    RelayController<P>,
    sink:     ReportingSink<N>,
    backoff:  LoginBackoff,
    log:      Option<DailyLog>,
    settings: LoopSettings,
    tz:       Tz,
    state:    LoopState,
}

impl<S: TelemetrySource, P: RelayPin, N: Notifier> ControlLoop<S, P, N> {
    pub fn new(
        source: S,
        relay: RelayController<P>,
        sink: ReportingSink<N>,
        backoff: LoginBackoff,
        log: Option<DailyLog>,
        settings: LoopSettings,
        tz: Tz,
    ) -> Self {
        Self { source, relay, sink, backoff, log, settings, tz, state: LoopState::Idle }
    }

    #[cfg(test)]
    pub fn state(&self) -> LoopState {
        self.state
    }

    #[cfg(test)]
    pub fn source(&self) -> &S {
        &self.source
    }

    #[cfg(test)]
    pub fn relay(&self) -> &RelayController<P> {
        &self.relay
    }

    #[cfg(test)]
    pub fn sink(&self) -> &ReportingSink<N> {
        &self.sink
    }

    #[cfg(test)]
    pub fn login_failures(&self) -> u32 {
        self.backoff.failures()
    }

    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }

    fn transition(&mut self, event: LoopEvent) {
        let next = self.state.on(event);
        debug!("[Control] {:?} --{:?}--> {:?}", self.state, event, next);
        self.state = next;
    }

    // ----------------------------------------------------------------------------------------------------------

    /// Poll until SIGINT/SIGTERM (`shutdown` resolving), then switch the heater off and
    /// release the output. Shutdown interrupts both a running cycle and the sleep after it.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("[Control] Poll loop started.");

        loop {
            let cycle_start = Instant::now();
            let now = self.now();

            let delay = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                delay = self.guarded_cycle(now) => delay,
            };

            // Sleep for whatever time remains of the delay.
            let elapsed = cycle_start.elapsed();
            let remaining = delay.saturating_sub(elapsed);
            if remaining.is_zero() {
                warn!("[Control] Cycle took {:?}, overran delay {:?} - skipping sleep.", elapsed, delay);
            } else {
                info!("[Control] Cycle done in {:?}. Sleeping {:?}.", elapsed, remaining);
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = sleep(remaining) => {}
            }
        }

        self.shutdown();
    }

    /// One cycle with the catch-all around it: any error or panic forces the heater off and
    /// yields the recovery pause instead of the regular delay.
    pub async fn guarded_cycle(&mut self, now: DateTime<Tz>) -> Duration {
        let result = AssertUnwindSafe(self.run_cycle(now)).catch_unwind().await;

        let failure = match result {
            Ok(Ok(delay)) => return delay,
            Ok(Err(e))    => e,
            Err(panic)    => CycleError::Panicked(panic_message(panic.as_ref())),
        };

        error!(
            "[Control] Poll cycle failed: {}. Heater off, resuming in {:?}.",
            failure, self.settings.recovery_pause
        );
        self.fail_safe(now);
        self.state = LoopState::Idle;
        self.settings.recovery_pause
    }

    /// Rotate the log, (re)authenticate when needed, read power, drive the relay and report.
    /// Returns how long to wait before the next cycle.
    pub async fn run_cycle(&mut self, now: DateTime<Tz>) -> Result<Duration, CycleError> {
        match self.state {
            LoopState::Backoff(_) => self.transition(LoopEvent::BackoffElapsed),
            LoopState::Idle => {}
            stale => {
                debug!("[Control] Previous cycle ended in {:?}; starting over.", stale);
                self.state = LoopState::Idle;
            }
        }

        if let Some(log) = &self.log {
            if log.rotate_if_needed(now.date_naive()).map_err(CycleError::LogRotation)? {
                info!("[Control] Date changed, logging to {}.", log.current_path().display());
            }
        }

        let start_event = if self.source.has_session() {
            LoopEvent::SessionAvailable
        } else {
            LoopEvent::SessionMissing
        };
        self.transition(start_event);

        let mut relogged = false;
        let delay = loop {
            match self.state {
                LoopState::Authenticating => match self.source.login().await {
                    Ok(()) => {
                        let failures = self.backoff.reset();
                        if failures > 0 {
                            info!("[Control] Logged in after {} failed attempt(s).", failures);
                        }
                        self.transition(LoopEvent::LoginSucceeded);
                    }
                    Err(e) => {
                        let delay = self.backoff.record_failure();
                        error!(
                            "[Control] Login attempt {} failed ({}). Retrying in {} min.",
                            self.backoff.failures(),
                            e,
                            delay.as_secs() / 60
                        );
                        // No fresh data while locked out.
                        self.apply_reading(None, now)?;
                        self.transition(LoopEvent::LoginFailed(delay));
                    }
                },
                LoopState::Polling => {
                    let outcome = self.source.read_power().await;
                    if matches!(outcome, PowerOutcome::SessionExpired) && !relogged {
                        relogged = true;
                        info!("[Control] Session expired. Logging in again.");
                        self.transition(LoopEvent::SessionExpired);
                        continue;
                    }
                    self.apply_reading(outcome.reading_kw(), now)?;
                    self.transition(LoopEvent::ReadCompleted);
                    break self.settings.poll_interval;
                }
                LoopState::Backoff(delay) => break delay,
                LoopState::Idle => break self.settings.poll_interval,
            }
        };

        self.sink.maybe_report(&now).await;
        Ok(delay)
    }

    fn apply_reading(&mut self, reading_kw: Option<f64>, now: DateTime<Tz>) -> Result<(), CycleError> {
        match self.relay.apply(reading_kw, now).map_err(CycleError::Relay)? {
            Transition::TurnedOff(interval) => self.sink.record(interval),
            Transition::TurnedOn | Transition::Unchanged => {}
        }
        Ok(())
    }

    fn fail_safe(&mut self, now: DateTime<Tz>) {
        match self.relay.force_off(now) {
            Ok(Some(interval)) => self.sink.record(interval),
            Ok(None) => {}
            Err(e) => error!("[Control] Could not force heater off: {}", e),
        }
    }

    /// Heater off, output released. Runs once when the loop ends.
    pub fn shutdown(&mut self) {
        info!("[Control] Shutdown requested. Switching heater off.");
        match self.relay.force_off(self.now()) {
            Ok(Some(interval)) => info!("[Control] Final heater interval (not reported): {}", interval),
            Ok(None) => {}
            Err(e) => error!("[Control] Could not switch heater off: {}", e),
        }
        if let Err(e) = self.relay.release() {
            error!("[Control] Releasing relay output failed: {}", e);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// --------------------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::config::ReportSchedule;
    use crate::handlers::relay::controller::tests::{PinCall, RecordingPin};
    use crate::handlers::report::sink::tests::CapturingNotifier;
    use crate::models::heater_models::OperationInterval;
    use chrono::TimeZone;
    use chrono_tz::Europe::Warsaw;
    use std::collections::VecDeque;

    const POLL: Duration = Duration::from_secs(180);
    const PAUSE: Duration = Duration::from_secs(60);

    fn minutes(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    fn at(h: u32, m: u32) -> DateTime<Tz> {
        Warsaw.with_ymd_and_hms(2024, 6, 1, h, m, 0).unwrap()
    }

    /// Replays scripted login results and readings. Panics on read when the script is
    /// exhausted and `panic_when_empty` is set.
    #[derive(Default)]
    struct ScriptedSource {
        session:          bool,
        logins:           VecDeque<Result<(), AuthError>>,
        readings:         VecDeque<PowerOutcome>,
        panic_when_empty: bool,
        login_calls:      usize,
        read_calls:       usize,
    }

    impl ScriptedSource {
        fn logged_in(readings: Vec<PowerOutcome>) -> Self {
            Self { session: true, readings: readings.into(), ..Self::default() }
        }
    }

    #[async_trait]
    impl TelemetrySource for ScriptedSource {
        fn has_session(&self) -> bool {
            self.session
        }

        async fn login(&mut self) -> Result<(), AuthError> {
            self.login_calls += 1;
            let result = self.logins.pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                self.session = true;
            }
            result
        }

        async fn read_power(&mut self) -> PowerOutcome {
            self.read_calls += 1;
            match self.readings.pop_front() {
                Some(PowerOutcome::SessionExpired) => {
                    self.session = false;
                    PowerOutcome::SessionExpired
                }
                Some(outcome) => outcome,
                None if self.panic_when_empty => panic!("telemetry script exhausted"),
                None => PowerOutcome::NoData,
            }
        }
    }

    type TestLoop = ControlLoop<ScriptedSource, RecordingPin, CapturingNotifier>;

    fn build(source: ScriptedSource, schedule: ReportSchedule, start: DateTime<Tz>) -> (TestLoop, RecordingPin, CapturingNotifier) {
        let pin = RecordingPin::default();
        let notifier = CapturingNotifier::default();
        let relay = RelayController::new(pin.clone(), 5.0).unwrap();
        let sink = ReportingSink::new(notifier.clone(), schedule, None, &start);
        let control = ControlLoop::new(
            source,
            relay,
            sink,
            LoginBackoff::new(minutes(5), minutes(10), 2),
            None,
            LoopSettings { poll_interval: POLL, recovery_pause: PAUSE },
            Warsaw,
        );
        (control, pin, notifier)
    }

    fn rejected() -> Result<(), AuthError> {
        Err(AuthError::Rejected(Some("USER_OR_VALUE_INVALID".to_string())))
    }

    #[tokio::test]
    async fn log_rotates_at_local_midnight_not_utc() {
        use std::io::Write as _;

        let dir = tempfile::tempdir().unwrap();
        let before = Utc.with_ymd_and_hms(2024, 6, 1, 21, 59, 0).unwrap().with_timezone(&Warsaw);
        let after = Utc.with_ymd_and_hms(2024, 6, 1, 22, 1, 0).unwrap().with_timezone(&Warsaw);
        let log = DailyLog::open(dir.path(), before.date_naive()).unwrap();

        let notifier = CapturingNotifier::default();
        let mut control = ControlLoop::new(
            ScriptedSource::logged_in(vec![PowerOutcome::Value(1.0), PowerOutcome::Value(1.0)]),
            RelayController::new(RecordingPin::default(), 5.0).unwrap(),
            ReportingSink::new(notifier, ReportSchedule::Daily { hour: 23 }, None, &before),
            LoginBackoff::new(minutes(5), minutes(10), 2),
            Some(log.clone()),
            LoopSettings { poll_interval: POLL, recovery_pause: PAUSE },
            Warsaw,
        );

        control.run_cycle(before).await.unwrap();
        log.writer().write_all(b"late on day one\n").unwrap();
        assert_eq!(log.current_path(), dir.path().join("log_2024-06-01.log"));

        control.run_cycle(after).await.unwrap();
        log.writer().write_all(b"early on day two\n").unwrap();
        assert_eq!(log.current_path(), dir.path().join("log_2024-06-02.log"));
        assert_eq!(log.read_current().unwrap(), "early on day two\n");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("log_2024-06-01.log")).unwrap(),
            "late on day one\n"
        );
    }

    #[tokio::test]
    async fn reading_sequence_produces_one_closed_interval() {
        let source = ScriptedSource::logged_in(vec![
            PowerOutcome::Value(6.0),
            PowerOutcome::Value(6.0),
            PowerOutcome::Value(4.0),
            PowerOutcome::NoData,
            PowerOutcome::Value(7.0),
        ]);
        let (mut control, pin, _) = build(source, ReportSchedule::Daily { hour: 23 }, at(12, 0));

        let mut heater = Vec::new();
        for i in 0..5 {
            let delay = control.run_cycle(at(12, 3 * i)).await.unwrap();
            assert_eq!(delay, POLL);
            heater.push(control.relay().state().is_on());
        }

        assert_eq!(heater, vec![true, true, false, false, true]);
        assert_eq!(control.sink().pending(), &[OperationInterval::new(at(12, 0), at(12, 6))]);
        assert_eq!(control.relay().state().interval_start(), Some(at(12, 12)));
        assert_eq!(pin.calls(), vec![PinCall::Low, PinCall::High, PinCall::Low, PinCall::High]);
    }

    #[tokio::test]
    async fn first_cycle_logs_in_before_reading() {
        let source = ScriptedSource { readings: vec![PowerOutcome::Value(5.5)].into(), ..ScriptedSource::default() };
        let (mut control, _, _) = build(source, ReportSchedule::Hourly, at(12, 0));

        assert_eq!(control.run_cycle(at(12, 1)).await.unwrap(), POLL);
        assert_eq!(control.source().login_calls, 1);
        assert_eq!(control.source().read_calls, 1);
        assert!(control.relay().state().is_on());
        assert_eq!(control.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn expired_session_is_renewed_and_read_retried_in_same_cycle() {
        let source = ScriptedSource::logged_in(vec![PowerOutcome::SessionExpired, PowerOutcome::Value(6.0)]);
        let (mut control, _, _) = build(source, ReportSchedule::Hourly, at(12, 0));

        let delay = control.run_cycle(at(12, 3)).await.unwrap();

        assert_eq!(delay, POLL);
        assert_eq!(control.source().login_calls, 1);
        assert_eq!(control.source().read_calls, 2);
        assert!(control.relay().state().is_on());
    }

    #[tokio::test]
    async fn repeated_expiry_in_one_cycle_counts_as_no_data() {
        let source = ScriptedSource::logged_in(vec![
            PowerOutcome::Value(6.0),
            PowerOutcome::SessionExpired,
            PowerOutcome::SessionExpired,
        ]);
        let (mut control, _, _) = build(source, ReportSchedule::Hourly, at(12, 0));

        control.run_cycle(at(12, 3)).await.unwrap();
        let delay = control.run_cycle(at(12, 6)).await.unwrap();

        assert_eq!(delay, POLL);
        assert!(!control.relay().state().is_on());
        assert_eq!(control.sink().pending(), &[OperationInterval::new(at(12, 3), at(12, 6))]);
        assert_eq!(control.source().read_calls, 3);
    }

    #[tokio::test]
    async fn failed_relogin_switches_heater_off_and_backs_off() {
        let mut source = ScriptedSource::logged_in(vec![PowerOutcome::Value(6.0), PowerOutcome::SessionExpired]);
        source.logins = vec![rejected()].into();
        let (mut control, _, _) = build(source, ReportSchedule::Hourly, at(12, 0));

        control.run_cycle(at(12, 3)).await.unwrap();
        let delay = control.run_cycle(at(12, 6)).await.unwrap();

        assert_eq!(delay, minutes(5));
        assert_eq!(control.state(), LoopState::Backoff(minutes(5)));
        assert!(!control.relay().state().is_on());
        assert_eq!(control.sink().pending(), &[OperationInterval::new(at(12, 3), at(12, 6))]);
    }

    #[tokio::test]
    async fn consecutive_login_failures_escalate_backoff() {
        let source = ScriptedSource {
            logins: vec![rejected(), rejected(), rejected(), Ok(())].into(),
            readings: vec![PowerOutcome::Value(1.0)].into(),
            ..ScriptedSource::default()
        };
        let (mut control, _, _) = build(source, ReportSchedule::Hourly, at(12, 0));

        let mut delays = Vec::new();
        for i in 0..4 {
            delays.push(control.run_cycle(at(12, 10 * i)).await.unwrap());
        }

        assert_eq!(delays, vec![minutes(5), minutes(5), minutes(10), POLL]);
        assert_eq!(control.login_failures(), 0);
        assert_eq!(control.source().read_calls, 1);
    }

    #[tokio::test]
    async fn reports_once_per_hour_boundary() {
        let source = ScriptedSource::logged_in(vec![
            PowerOutcome::Value(6.0),
            PowerOutcome::Value(4.0),
            PowerOutcome::Value(4.0),
            PowerOutcome::Value(4.0),
        ]);
        let (mut control, _, notifier) = build(source, ReportSchedule::Hourly, at(10, 50));

        for (h, m) in [(10, 53), (10, 56), (11, 2), (11, 5)] {
            control.run_cycle(at(h, m)).await.unwrap();
        }

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("On from 10:53 to 10:56"));
        assert!(control.sink().pending().is_empty());
    }

    #[tokio::test]
    async fn relay_failure_is_contained_with_recovery_pause() {
        let source = ScriptedSource::logged_in(vec![PowerOutcome::Value(6.0), PowerOutcome::Value(6.0)]);
        let (mut control, pin, _) = build(source, ReportSchedule::Hourly, at(12, 0));
        *pin.fail.lock().unwrap() = true;

        assert!(matches!(control.run_cycle(at(12, 1)).await, Err(CycleError::Relay(_))));
        assert_eq!(control.guarded_cycle(at(12, 2)).await, PAUSE);
        assert_eq!(control.state(), LoopState::Idle);
        assert!(!control.relay().state().is_on());
    }

    #[tokio::test]
    async fn panicking_cycle_forces_heater_off() {
        let mut source = ScriptedSource::logged_in(vec![PowerOutcome::Value(6.0)]);
        source.panic_when_empty = true;
        let (mut control, _, _) = build(source, ReportSchedule::Hourly, at(12, 0));

        assert_eq!(control.guarded_cycle(at(12, 3)).await, POLL);
        assert!(control.relay().state().is_on());

        assert_eq!(control.guarded_cycle(at(12, 6)).await, PAUSE);
        assert!(!control.relay().state().is_on());
        assert_eq!(control.sink().pending(), &[OperationInterval::new(at(12, 3), at(12, 6))]);
    }

    #[tokio::test]
    async fn immediate_shutdown_releases_output_without_polling() {
        let (mut control, pin, _) = build(ScriptedSource::logged_in(vec![]), ReportSchedule::Hourly, at(12, 0));

        control.run(std::future::ready(())).await;

        assert_eq!(control.source().read_calls, 0);
        assert_eq!(pin.calls().last(), Some(&PinCall::Cleanup));
    }

    #[tokio::test]
    async fn shutdown_interrupts_sleep_and_switches_heater_off() {
        let (mut control, pin, _) = build(
            ScriptedSource::logged_in(vec![PowerOutcome::Value(9.0)]),
            ReportSchedule::Hourly,
            at(12, 0),
        );

        control.run(sleep(Duration::from_millis(50))).await;

        assert_eq!(control.source().read_calls, 1);
        assert!(!control.relay().state().is_on());
        let calls = pin.calls();
        assert_eq!(&calls[calls.len() - 3..], &[PinCall::Low, PinCall::Low, PinCall::Cleanup]);
        assert!(calls.contains(&PinCall::High));
    }
}
