use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::RwLock,
};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

const LOG_FILE: &str = "startuplens.log";

struct TelemetryState {
    enabled: bool,
    log_dir: PathBuf,
}

static TELEMETRY: Lazy<RwLock<TelemetryState>> = Lazy::new(|| {
    RwLock::new(TelemetryState {
        enabled: false,
        log_dir: PathBuf::from("logs"),
    })
});

#[derive(Debug, Clone, Copy)]
enum Level {
    Info,
    Error,
}

impl Level {
    fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Error => "ERROR",
        }
    }
}

/**
 * \brief Toggle event logging.
 */
pub fn set_enabled(enabled: bool) {
    if let Ok(mut guard) = TELEMETRY.write() {
        guard.enabled = enabled;
    }
}

pub fn is_enabled() -> bool {
    TELEMETRY.read().map(|g| g.enabled).unwrap_or(false)
}

/**
 * \brief Redirect the log file directory (defaults to `logs/`).
 */
pub fn set_log_dir(dir: impl Into<PathBuf>) {
    if let Ok(mut guard) = TELEMETRY.write() {
        guard.log_dir = dir.into();
    }
}

pub fn log_event(category: &str, message: &str) {
    record(Level::Info, category, message);
}

pub fn log_error(category: &str, message: &str) {
    record(Level::Error, category, message);
}

fn record(level: Level, category: &str, message: &str) {
    let log_dir = match TELEMETRY.read() {
        Ok(guard) if guard.enabled => guard.log_dir.clone(),
        _ => return,
    };
    if let Err(err) = write_line(&log_dir, level, category, message) {
        eprintln!("telemetry write failed: {}", err);
    }
}

fn write_line(log_dir: &Path, level: Level, category: &str, message: &str) -> Result<()> {
    if !log_dir.exists() {
        std::fs::create_dir_all(log_dir)?;
    }
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE))?;
    // one line per event, newlines in messages flattened
    let message = message.replace('\n', " | ");
    writeln!(
        file,
        "{} [{}] {} - {}",
        timestamp,
        level.as_str(),
        category,
        message
    )?;
    Ok(())
}
