use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{Error, Result};

use super::{Config, CONFIG_DIR_NAME, CONFIG_FILE_NAME};

pub fn load_or_default() -> Result<Config> {
    let path = config_path()?;
    if !path.exists() {
        let cfg = Config::default();
        cfg.save_to_path(&path)?;
        super::validate(&cfg)?;
        return Ok(cfg);
    }
    load_from_path(&path)
}

pub fn load_from_path(path: &Path) -> Result<Config> {
    if !path.exists() {
        let cfg = Config::default();
        super::validate(&cfg)?;
        return Ok(cfg);
    }

    let raw = fs::read_to_string(path)?;
    parse(&raw)
}

pub fn save_to_path(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = format!(
        "# rawserial config\n\
device = \"{}\"\n\
baud = {}\n\
dtr = \"{}\"\n\
rts = \"{}\"\n\
wait_ms = {}\n\
log_level = \"{}\"\n",
        config.device,
        config.baud,
        config.dtr,
        config.rts,
        config.wait_ms,
        config.log_level,
    );
    fs::write(path, contents)?;
    Ok(())
}

pub fn parse(raw: &str) -> Result<Config> {
    let mut cfg = Config::default();

    for (idx, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (key, value) = trimmed.split_once('=').ok_or_else(|| {
            Error::InvalidArgs(format!("invalid config line {}: '{}'", idx + 1, line))
        })?;

        let key = key.trim();
        let value = value.trim().trim_matches('"');
        match key {
            "device" => cfg.device = value.to_string(),
            "baud" => {
                cfg.baud = value.parse().map_err(|_| {
                    Error::InvalidArgs(format!("invalid baud value on line {}", idx + 1))
                })?;
            }
            "dtr" => {
                cfg.dtr = value.parse().map_err(|e: String| {
                    Error::InvalidArgs(format!("invalid dtr on line {}: {e}", idx + 1))
                })?;
            }
            "rts" => {
                cfg.rts = value.parse().map_err(|e: String| {
                    Error::InvalidArgs(format!("invalid rts on line {}: {e}", idx + 1))
                })?;
            }
            "wait_ms" => {
                cfg.wait_ms = super::parse_millis(value).map_err(|e| {
                    Error::InvalidArgs(format!("invalid wait_ms on line {}: {e}", idx + 1))
                })?;
            }
            "log_level" => {
                cfg.log_level = value.parse().map_err(|_| {
                    Error::InvalidArgs(format!("invalid log_level on line {}", idx + 1))
                })?;
            }
            other => {
                return Err(Error::InvalidArgs(format!(
                    "unknown config key '{}' on line {}",
                    other,
                    idx + 1
                )));
            }
        }
    }

    super::validate(&cfg)?;
    Ok(cfg)
}

fn config_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .ok_or_else(|| Error::InvalidArgs("HOME not set; cannot locate config directory".into()))?;
    Ok(home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
