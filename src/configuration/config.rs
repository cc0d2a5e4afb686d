use chrono_tz::Tz;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;

// --------------------------------------------------------------------------------------------------------------

const DEFAULT_CONFIG_FILE: &str = "config.json";

// --------------------------------------------------------------------------------------------------------------

/// When accumulated heater intervals and the log are mailed out.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReportSchedule {
    /// Once per clock hour, on the first poll after the hour turns.
    Hourly,
    /// Once per day, on the first poll at or after `hour` (0-23, local time).
    Daily { hour: u32 },
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelayBackend {
    /// Linux sysfs GPIO (/sys/class/gpio).
    Sysfs,
    /// No hardware; levels are only logged.
    Simulated,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EmailSettings {
    pub smtp_server: String,
    pub smtp_port:   u16,
    /// Account used for SMTP authentication. Also sender and recipient unless overridden.
    pub address:     String,
    pub password:    String,
    pub from:        Option<String>,
    pub to:          Option<String>,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            smtp_server: "smtp.gmail.com".to_string(),
            smtp_port:   587,
            address:     String::new(),
            password:    String::new(),
            from:        None,
            to:          None,
        }
    }
}

impl EmailSettings {
    pub fn is_complete(&self) -> bool {
        !self.address.is_empty() && !self.password.is_empty()
    }

    pub fn sender(&self) -> &str {
        self.from.as_deref().unwrap_or(&self.address)
    }

    pub fn recipient(&self) -> &str {
        self.to.as_deref().unwrap_or(&self.address)
    }
}

// --------------------------------------------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    // --- FusionSolar ---

    /// Northbound API base, e.g. "https://eu5.fusionsolar.huawei.com/thirdData"
    pub fusion_base_url: String,
    pub fusion_username: String,
    /// The "systemCode" the API expects as password.
    pub fusion_system_code: String,
    /// Inverter device id passed as `devIds`.
    pub device_id: String,
    /// Applies to every HTTP call (login and telemetry).
    pub http_timeout_seconds: u64,

    // --- heater control ---

    /// Heater switches on while inverter output is strictly above this (kW).
    pub min_power_to_on_kw: f64,
    pub relay_pin:          u8,
    pub relay_backend:      RelayBackend,

    // --- loop timing ---

    /// Steady-state delay between polls. 180s is plenty for the cloud API refresh rate.
    pub poll_interval_seconds: u64,
    /// Delay after the first `login_backoff_escalate_after` consecutive login failures.
    pub login_backoff_short_seconds: u64,
    /// Delay for every further consecutive login failure.
    pub login_backoff_long_seconds: u64,
    pub login_backoff_escalate_after: u32,
    /// Pause after a cycle failed unexpectedly.
    pub recovery_pause_seconds: u64,

    // --- reporting ---

    /// IANA zone used for day boundaries, report windows and log timestamps.
    pub timezone:        String,
    pub report_schedule: ReportSchedule,
    pub email:           Option<EmailSettings>,

    // --- logging ---

    pub log_dir: String,
    /// Log level: "Trace", "Debug", "Info", "Warn", "Error"
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // FusionSolar
            fusion_base_url:      "https://eu5.fusionsolar.huawei.com/thirdData".to_string(),
            fusion_username:      String::new(),
            fusion_system_code:   String::new(),
            device_id:            String::new(),
            http_timeout_seconds: 10,
            // heater control
            min_power_to_on_kw: 5.0,
            relay_pin:          17,
            relay_backend:      RelayBackend::Sysfs,
            // loop timing
            poll_interval_seconds:        180,
            login_backoff_short_seconds:  300,
            login_backoff_long_seconds:   600,
            login_backoff_escalate_after: 2,
            recovery_pause_seconds:       60,
            // reporting
            timezone:        "Europe/Warsaw".to_string(),
            report_schedule: ReportSchedule::Hourly,
            email:           None,
            // logging
            log_dir:   "logs".to_string(),
            log_level: "Info".to_string(),
        }
    }
}

impl Config {
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn recovery_pause(&self) -> Duration {
        Duration::from_secs(self.recovery_pause_seconds)
    }

    /// Overlay secrets and per-installation values from the environment (or `.env`).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FUSION_USERNAME") {
            self.fusion_username = v;
        }
        if let Some(v) = lookup("FUSION_SYSTEM_CODE") {
            self.fusion_system_code = v;
        }
        if let Some(v) = lookup("FUSION_DEVICE_ID") {
            self.device_id = v;
        }
        if let Some(v) = lookup("HEATER_MIN_POWER_KW").and_then(|v| v.parse().ok()) {
            self.min_power_to_on_kw = v;
        }

        let address  = lookup("EMAIL_ADDRESS");
        let password = lookup("EMAIL_PASSWORD");
        let server   = lookup("SMTP_SERVER");
        let port     = lookup("SMTP_PORT").and_then(|v| v.parse::<u16>().ok());
        if address.is_some() || password.is_some() || server.is_some() || port.is_some() {
            let email = self.email.get_or_insert_with(EmailSettings::default);
            if let Some(v) = address  { email.address = v; }
            if let Some(v) = password { email.password = v; }
            if let Some(v) = server   { email.smtp_server = v; }
            if let Some(v) = port     { email.smtp_port = v; }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fusion_username.is_empty() || self.fusion_system_code.is_empty() {
            return Err(ConfigError::Invalid("FusionSolar credentials are missing".to_string()));
        }
        if self.device_id.is_empty() {
            return Err(ConfigError::Invalid("device_id is missing".to_string()));
        }
        if !self.min_power_to_on_kw.is_finite() {
            return Err(ConfigError::Invalid("min_power_to_on_kw must be a finite number".to_string()));
        }
        if self.poll_interval_seconds == 0 || self.http_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("poll and HTTP timeout intervals must be > 0".to_string()));
        }
        if let ReportSchedule::Daily { hour } = self.report_schedule {
            if hour > 23 {
                return Err(ConfigError::Invalid(format!("daily report hour {} is not 0-23", hour)));
            }
        }
        self.tz()?;
        Ok(())
    }
}

// --------------------------------------------------------------------------------------------------------------

pub fn parse_config(json: &str) -> Result<Config, ConfigError> {
    Ok(serde_json::from_str(json)?)
}

/// Read `config.json` (or `$CONFIG_PATH`), apply environment overrides and validate.
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    load_config_from(Path::new(&config_file), |key| std::env::var(key).ok())
}

/// A missing file means defaults; everything required can then come from the environment.
pub fn load_config_from<F>(path: &Path, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match fs::read_to_string(path) {
        Ok(config_data) => parse_config(&config_data)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            eprintln!("{} not found, using defaults and environment.", path.display());
            Config::default()
        }
        Err(source) => return Err(ConfigError::Read { path: path.display().to_string(), source }),
    };

    config.apply_env_overrides(lookup);
    config.validate()?;
    Ok(config)
}

// --------------------------------------------------------------------------------------------------------------
