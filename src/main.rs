use chrono::Utc;
use std::process::ExitCode;

// --------------------------------------------------------------------------------------------------------------

mod configuration;
use configuration::config::{load_config, Config, RelayBackend};

mod control;
use control::backoff::LoginBackoff;
use control::control_loop::{ControlLoop, LoopSettings};

mod errors;

mod handlers;
use handlers::fusion::client::FusionClient;
use handlers::fusion::session::{Credentials, SessionManager};
use handlers::relay::controller::RelayController;
use handlers::relay::pin::GpioPin;
use handlers::report::notifier::Mailer;
use handlers::report::sink::ReportingSink;

mod logging;
use logging::daily_file::DailyLog;

mod models;

// --------------------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    // Secrets usually live in .env next to config.json.
    let _ = dotenvy::dotenv();

    let config = match load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Cannot start: {}", e);
            return ExitCode::FAILURE;
        }
    };
    // validate() already checked the zone name.
    let tz = match config.tz() {
        Ok(tz) => tz,
        Err(e) => {
            eprintln!("Cannot start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialise logger.
    let daily_log = match DailyLog::open(&config.log_dir, Utc::now().with_timezone(&tz).date_naive()) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("Cannot open log directory '{}': {}", config.log_dir, e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init(&config.log_level, tz, &daily_log) {
        eprintln!("Failed to initialise logger: {}", e);
        return ExitCode::FAILURE;
    }

    log::info!("=== Solar Heater Controller starting ===");
    log::info!("FusionSolar:  {}", config.fusion_base_url);
    log::info!("Device:       {}", config.device_id);
    log::info!("Threshold:    {:.2} kW", config.min_power_to_on_kw);
    log::info!("Poll interval: {}s", config.poll_interval_seconds);
    log::info!("Reports:      {:?} ({})", config.report_schedule, config.timezone);
    log::info!("Log file:     {}", daily_log.current_path().display());

    let mut control = match build_control_loop(&config, tz, daily_log) {
        Ok(control) => control,
        Err(e) => {
            log::error!("Startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    control.run(shutdown_signal()).await;

    log::info!("=== Solar Heater Controller stopped ===");
    ExitCode::SUCCESS
}

// --------------------------------------------------------------------------------------------------------------

fn build_control_loop(
    config: &Config,
    tz: chrono_tz::Tz,
    daily_log: DailyLog,
) -> Result<ControlLoop<FusionClient, GpioPin, Mailer>, String> {
    let credentials = Credentials {
        user_name:   config.fusion_username.clone(),
        system_code: config.fusion_system_code.clone(),
    };
    let sessions = SessionManager::new(&config.fusion_base_url, credentials, config.http_timeout())
        .map_err(|e| format!("HTTP client: {}", e))?;
    let source = FusionClient::new(sessions, config.device_id.clone());

    let pin = GpioPin::open(config.relay_pin, config.relay_backend == RelayBackend::Sysfs);
    let relay = RelayController::new(pin, config.min_power_to_on_kw)
        .map_err(|e| format!("relay GPIO {}: {}", config.relay_pin, e))?;

    let mailer = Mailer::from_settings(config.email.as_ref(), config.http_timeout());
    let sink = ReportingSink::new(
        mailer,
        config.report_schedule,
        Some(daily_log.clone()),
        &Utc::now().with_timezone(&tz),
    );

    let backoff = LoginBackoff::new(
        std::time::Duration::from_secs(config.login_backoff_short_seconds),
        std::time::Duration::from_secs(config.login_backoff_long_seconds),
        config.login_backoff_escalate_after,
    );
    let settings = LoopSettings {
        poll_interval:  config.poll_interval(),
        recovery_pause: config.recovery_pause(),
    };

    Ok(ControlLoop::new(source, relay, sink, backoff, Some(daily_log), settings, tz))
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c    => log::info!("Interrupted by user (Ctrl-C)."),
        _ = terminate => log::info!("Received SIGTERM."),
    }
}
