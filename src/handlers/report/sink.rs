use chrono::{DateTime, NaiveDate, Timelike};
use chrono_tz::Tz;
use log::{error, info, warn};
use std::fmt::Write;

use crate::configuration::config::ReportSchedule;
use crate::errors::DeliveryError;
use crate::handlers::report::notifier::Notifier;
use crate::logging::daily_file::DailyLog;
use crate::models::heater_models::OperationInterval;

// --------------------------------------------------------------------------------------------------------------

/// Identifies one reporting window. A report goes out once per distinct slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSlot {
    pub date: NaiveDate,
    pub hour: u32,
}

impl ReportSchedule {
    /// The slot `now` falls into, or `None` before today's daily report hour.
    pub fn slot(&self, now: &DateTime<Tz>) -> Option<ReportSlot> {
        let date = now.date_naive();
        match *self {
            ReportSchedule::Hourly => Some(ReportSlot { date, hour: now.hour() }),
            ReportSchedule::Daily { hour } if now.hour() >= hour => Some(ReportSlot { date, hour }),
            ReportSchedule::Daily { .. } => None,
        }
    }
}

// --------------------------------------------------------------------------------------------------------------

pub fn compose_subject(date: NaiveDate) -> String {
    format!("Heater report for {}", date.format("%Y-%m-%d"))
}

/// Interval summary first, raw log after it.
pub fn compose_body(intervals: &[OperationInterval], log_text: &str) -> String {
    let mut body = String::from("Heater operation summary:\n");
    if intervals.is_empty() {
        body.push_str("Heater was not switched on.\n");
    }
    for interval in intervals {
        let _ = writeln!(body, "{}", interval);
    }
    body.push_str("\n\n");
    body.push_str(log_text);
    body
}

// --------------------------------------------------------------------------------------------------------------

/// Collects closed heater intervals and mails them with the log once per reporting window.
pub struct ReportingSink<N: Notifier> {
    notifier:  N,
    schedule:  ReportSchedule,
    log:       Option<DailyLog>,
    intervals: Vec<OperationInterval>,
    last_slot: Option<ReportSlot>,
}

impl<N: Notifier> ReportingSink<N> {
    /// The window `started_at` falls into counts as already reported, so a restart in the
    /// middle of a window does not send a near-empty report.
    pub fn new(notifier: N, schedule: ReportSchedule, log: Option<DailyLog>, started_at: &DateTime<Tz>) -> Self {
        Self {
            notifier,
            schedule,
            log,
            intervals: Vec::new(),
            last_slot: schedule.slot(started_at),
        }
    }

    pub fn record(&mut self, interval: OperationInterval) {
        info!("[Report] Recorded: {} ({} min)", interval, interval.duration().num_minutes());
        self.intervals.push(interval);
    }

    pub fn pending(&self) -> &[OperationInterval] {
        &self.intervals
    }

    pub fn is_due(&self, now: &DateTime<Tz>) -> bool {
        match self.schedule.slot(now) {
            Some(slot) => self.last_slot != Some(slot),
            None => false,
        }
    }

    /// Send the report if `now` entered a new window. Returns true when a send was attempted.
    /// The window is consumed either way; failed reports are not retried.
    pub async fn maybe_report(&mut self, now: &DateTime<Tz>) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.last_slot = self.schedule.slot(now);

        let log_text = match &self.log {
            Some(log) => log.read_current().unwrap_or_else(|e| {
                warn!("[Report] Could not read log file: {}", e);
                String::new()
            }),
            None => String::new(),
        };

        let intervals = std::mem::take(&mut self.intervals);
        match self.flush(&intervals, &log_text, now.date_naive()).await {
            Ok(()) => {
                info!("[Report] Report sent with {} interval(s).", intervals.len());
                if let Some(log) = &self.log {
                    if let Err(e) = log.clear_current() {
                        warn!("[Report] Could not clear reported log file: {}", e);
                    }
                }
            }
            Err(e) => {
                error!("[Report] Sending report failed: {}", e);
                for interval in &intervals {
                    warn!("[Report] Dropped unreported interval: {}", interval);
                }
            }
        }
        true
    }

    pub async fn flush(
        &self,
        intervals: &[OperationInterval],
        log_text: &str,
        date: NaiveDate,
    ) -> Result<(), DeliveryError> {
        let subject = compose_subject(date);
        let body = compose_body(intervals, log_text);
        self.notifier.send(&subject, &body).await
    }
}

// --------------------------------------------------------------------------------------------------------------
