use crate::{Error, Result};

use super::errors::SerialFailureKind;

/// Rates every POSIX termios implementation exposes as a fixed `B*` constant.
pub const STANDARD_RATES: &[u32] = &[
    50, 75, 110, 134, 150, 200, 300, 600, 1_200, 1_800, 2_400, 4_800, 9_600, 19_200, 38_400,
    57_600, 115_200, 230_400,
];

pub fn is_standard(rate: u32) -> bool {
    STANDARD_RATES.contains(&rate)
}

/// Reject rates no platform accepts before touching the device.
pub fn validate(rate: u32) -> Result<u32> {
    if rate == 0 {
        return Err(Error::serial(
            SerialFailureKind::Config,
            "baud rate must be a positive integer",
        ));
    }
    Ok(rate)
}

/// Parse a rate given as text, e.g. `"115200"` or `"1_000_000"`.
pub fn parse(raw: &str) -> Result<u32> {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(|c| *c != '_').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::serial(
            SerialFailureKind::Config,
            format!("invalid baud rate '{trimmed}'"),
        ));
    }
    let rate = digits.parse::<u32>().map_err(|_| {
        Error::serial(
            SerialFailureKind::Config,
            format!("baud rate '{trimmed}' is out of range"),
        )
    })?;
    validate(rate)
}
