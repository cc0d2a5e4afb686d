use std::io;

use thiserror::Error;

// --------------------------------------------------------------------------------------------------------------

/// Why a login attempt against the FusionSolar API did not yield a session.
/// All variants are recoverable through retry/backoff.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("HTTP error during login: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("login returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("login rejected by API: {}", .0.as_deref().unwrap_or("no message"))]
    Rejected(Option<String>),

    #[error("malformed login response: {0}")]
    Malformed(String),

    #[error("login succeeded but no XSRF-TOKEN cookie was set")]
    MissingToken,
}

/// Transient telemetry failures. The control loop treats these as "no data".
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("API error: {}", .0.as_deref().unwrap_or("no message"))]
    Api(Option<String>),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no session, login required")]
    NotLoggedIn,
}

/// Report delivery failures. Logged and swallowed by the reporting sink.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("email delivery is not configured")]
    NotConfigured,

    #[error("invalid email address '{0}'")]
    Address(String),

    #[error("failed to build email: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Anything that aborts a single poll cycle. The loop forces the relay off and pauses.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("relay output failed: {0}")]
    Relay(#[source] io::Error),

    #[error("log rotation failed: {0}")]
    LogRotation(#[source] io::Error),

    #[error("poll cycle panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown time zone '{0}'")]
    InvalidTimezone(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
