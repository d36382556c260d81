use crate::{Error, Result};
use log::{LevelFilter, Log, Metadata, Record};
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Log verbosity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    #[default]
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn filter(&self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(()),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        })
    }
}

/// stderr logger with an optional append-only file sink, installed as the
/// `log` backend.
pub struct Logger {
    level: LogLevel,
    file: Option<std::fs::File>,
}

impl Logger {
    /// `RAWSERIAL_LOG_LEVEL` and `RAWSERIAL_LOG_PATH` override the arguments.
    pub fn new(level: LogLevel, file_path: Option<String>) -> Self {
        let env_level = std::env::var("RAWSERIAL_LOG_LEVEL")
            .ok()
            .and_then(|s| LogLevel::from_str(&s).ok());
        let env_file = std::env::var("RAWSERIAL_LOG_PATH").ok();
        Self::with_sink(env_level.unwrap_or(level), file_path.or(env_file))
    }

    fn with_sink(level: LogLevel, file_path: Option<String>) -> Self {
        let file = file_path.and_then(|p| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(p)
                .ok()
        });
        Self { level, file }
    }

    pub fn install(self) -> Result<()> {
        let filter = self.level.filter();
        log::set_boxed_logger(Box::new(self))
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        log::set_max_level(filter);
        Ok(())
    }

    fn format_line(record: &Record) -> String {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f32())
            .unwrap_or(0.0);
        format!("[{ts:.3}] [{}] {}", record.level(), record.args())
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level.filter()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = Self::format_line(record);
        eprintln!("{line}");
        if let Some(mut file) = self.file.as_ref() {
            let _ = writeln!(file, "{line}");
        }
    }

    fn flush(&self) {
        if let Some(mut file) = self.file.as_ref() {
            let _ = file.flush();
        }
    }
}

/// Route `log` records to the local syslog daemon instead of stderr.
#[cfg(unix)]
pub fn install_syslog(level: LogLevel) -> Result<()> {
    syslog::init(
        syslog::Facility::LOG_USER,
        level.filter(),
        Some(env!("CARGO_PKG_NAME")),
    )
    .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))
}

#[cfg(not(unix))]
pub fn install_syslog(_level: LogLevel) -> Result<()> {
    Err(Error::InvalidArgs("--syslog is only available on unix".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!("trace".parse::<LogLevel>(), Ok(LogLevel::Trace));
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Debug.to_string(), "debug");
    }

    #[test]
    fn filters_records_above_level() {
        let logger = Logger::with_sink(LogLevel::Warn, None);
        let warn = Metadata::builder().level(Level::Warn).build();
        let debug = Metadata::builder().level(Level::Debug).build();
        assert!(logger.enabled(&warn));
        assert!(!logger.enabled(&debug));
    }

    #[test]
    fn writes_enabled_records_to_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rawserial.log");
        let logger = Logger::with_sink(LogLevel::Info, Some(path.to_string_lossy().into()));
        logger.log(
            &Record::builder()
                .level(Level::Info)
                .args(format_args!("opened /dev/ttyUSB0"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(Level::Trace)
                .args(format_args!("noise"))
                .build(),
        );
        logger.flush();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[INFO] opened /dev/ttyUSB0"));
        assert!(!contents.contains("noise"));
    }
}
