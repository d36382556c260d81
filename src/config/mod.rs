use crate::app::LogLevel;
use crate::{Error, Result};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub mod loader;

#[cfg(windows)]
pub const DEFAULT_DEVICE: &str = "COM1";
#[cfg(not(windows))]
pub const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUD: u32 = 115_200;
pub const DEFAULT_WAIT_MS: u64 = 250;
/// Longest single `input_wait` the tools will ask for.
pub const MAX_WAIT_MS: u64 = 60_000;
const CONFIG_DIR_NAME: &str = ".rawserial";
const CONFIG_FILE_NAME: &str = "config.toml";

/// What to do with a modem control line after open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineSetting {
    #[default]
    Preserve,
    Assert,
    Deassert,
}

impl LineSetting {
    /// Level to drive, or `None` to leave the line alone.
    pub fn level(&self) -> Option<bool> {
        match self {
            LineSetting::Preserve => None,
            LineSetting::Assert => Some(true),
            LineSetting::Deassert => Some(false),
        }
    }
}

impl FromStr for LineSetting {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "preserve" => Ok(LineSetting::Preserve),
            "assert" | "on" | "high" => Ok(LineSetting::Assert),
            "deassert" | "off" | "low" => Ok(LineSetting::Deassert),
            other => Err(format!(
                "expected preserve, assert or deassert, got '{other}'"
            )),
        }
    }
}

impl fmt::Display for LineSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LineSetting::Preserve => "preserve",
            LineSetting::Assert => "assert",
            LineSetting::Deassert => "deassert",
        })
    }
}

/// User-supplied settings loaded from the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub device: String,
    pub baud: u32,
    pub dtr: LineSetting,
    pub rts: LineSetting,
    pub wait_ms: u64,
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            baud: DEFAULT_BAUD,
            dtr: LineSetting::default(),
            rts: LineSetting::default(),
            wait_ms: DEFAULT_WAIT_MS,
            log_level: LogLevel::default(),
        }
    }
}

impl Config {
    pub fn load_or_default() -> Result<Self> {
        loader::load_or_default()
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        loader::load_from_path(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        loader::save_to_path(self, path)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        loader::parse(raw)
    }
}

pub fn validate(cfg: &Config) -> Result<()> {
    if cfg.device.trim().is_empty() {
        return Err(Error::InvalidArgs("device must not be empty".into()));
    }
    if cfg.baud == 0 {
        return Err(Error::InvalidArgs("baud must be a positive integer".into()));
    }
    if cfg.wait_ms > MAX_WAIT_MS {
        return Err(Error::InvalidArgs(format!(
            "wait_ms must be at most {MAX_WAIT_MS}"
        )));
    }
    Ok(())
}

/// Milliseconds given either as a bare number or a duration such as `250ms` or `2s`.
pub fn parse_millis(raw: &str) -> std::result::Result<u64, String> {
    let trimmed = raw.trim();
    if let Ok(ms) = trimmed.parse::<u64>() {
        return Ok(ms);
    }
    humantime::parse_duration(trimmed)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .map_err(|e| format!("expected milliseconds or a duration like 250ms: {e}"))
}
