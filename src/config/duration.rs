//! # Duration Parsing
//!
//! Parses the `<number><unit>` duration strings used by flags, env vars and
//! the cluster config file.

use crate::config::ConfigError;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static DURATION_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$").ok());

/// Parse a duration string into `std::time::Duration`
///
/// Supports formats: "30s", "1m", "5m", "1h", "168h", "7d".
/// A bare `0` (or `0s`) is accepted and means "disabled" to callers that
/// support it, e.g. the resync period.
pub fn parse_duration(duration_str: &str) -> Result<Duration, ConfigError> {
    let trimmed = duration_str.trim().to_lowercase();

    if trimmed.is_empty() {
        return Err(ConfigError::InvalidDuration {
            value: duration_str.to_string(),
            reason: "duration string cannot be empty".to_string(),
        });
    }

    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let invalid = |reason: &str| ConfigError::InvalidDuration {
        value: duration_str.to_string(),
        reason: reason.to_string(),
    };

    let regex = DURATION_REGEX
        .as_ref()
        .ok_or_else(|| invalid("duration pattern failed to compile"))?;

    let captures = regex
        .captures(&trimmed)
        .ok_or_else(|| invalid("expected <number><unit> with unit one of s, m, h, d"))?;

    let number: u64 = captures["number"]
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(&e.to_string()))?;

    let seconds = match &captures["unit"] {
        "s" => Some(number),
        "m" => number.checked_mul(60),
        "h" => number.checked_mul(3600),
        "d" => number.checked_mul(86_400),
        _ => None,
    }
    .ok_or_else(|| invalid("duration overflows"))?;

    Ok(Duration::from_secs(seconds))
}

/// Render a duration back into the shortest exact `<number><unit>` form
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        return "0s".to_string();
    }
    if secs % 86_400 == 0 {
        format!("{}d", secs / 86_400)
    } else if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}
