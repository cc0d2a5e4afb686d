pub mod daily_file;

use chrono::Utc;
use chrono_tz::Tz;
use log::LevelFilter;
use std::io::Write;

use daily_file::DailyLog;

// --------------------------------------------------------------------------------------------------------------

/// Install env_logger writing `<local time> - <LEVEL> - <message>` lines into the daily log.
pub fn init(level: &str, tz: Tz, log: &DailyLog) -> Result<(), log::SetLoggerError> {
    env_logger::Builder::new()
        .filter_level(level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info))
        .format(move |buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                Utc::now().with_timezone(&tz).format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(log.writer())))
        .try_init()
}
