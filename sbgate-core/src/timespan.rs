//! Duration parameter parsing
//!
//! Accepts the three spellings callers use for lock durations:
//! - .NET TimeSpan: `hh:mm`, `hh:mm:ss`, `d.hh:mm:ss`, optional `.fffffff`
//! - ISO 8601: `PT1M`, `P1DT2H30S`, `PT0.5S`
//! - whole seconds: `60`

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeSpanError {
    #[error("Empty duration")]
    Empty,

    #[error("Invalid duration: {0}")]
    Invalid(String),

    #[error("Duration component out of range: {0}")]
    OutOfRange(String),
}

/// Parse a duration in any of the supported spellings
pub fn parse_timespan(input: &str) -> Result<Duration, TimeSpanError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(TimeSpanError::Empty);
    }

    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    if input.starts_with('P') || input.starts_with('p') {
        return parse_iso8601(input);
    }

    parse_dotnet(input)
}

fn parse_dotnet(input: &str) -> Result<Duration, TimeSpanError> {
    let invalid = || TimeSpanError::Invalid(input.to_string());

    let parts: Vec<&str> = input.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(invalid());
    }

    // Leading "d." prefix on the hours component
    let (days, hours) = match parts[0].split_once('.') {
        Some((d, h)) => (parse_component(d, input)?, parse_component(h, input)?),
        None => (0, parse_component(parts[0], input)?),
    };
    let minutes = parse_component(parts[1], input)?;

    let (seconds, nanos) = if parts.len() == 3 {
        match parts[2].split_once('.') {
            Some((s, frac)) => (parse_component(s, input)?, parse_fraction(frac, input)?),
            None => (parse_component(parts[2], input)?, 0),
        }
    } else {
        (0, 0)
    };

    if hours > 23 {
        return Err(TimeSpanError::OutOfRange(format!("hours in {}", input)));
    }
    if minutes > 59 {
        return Err(TimeSpanError::OutOfRange(format!("minutes in {}", input)));
    }
    if seconds > 59 {
        return Err(TimeSpanError::OutOfRange(format!("seconds in {}", input)));
    }

    let total = days
        .checked_mul(86_400)
        .and_then(|secs| secs.checked_add(hours * 3_600 + minutes * 60 + seconds))
        .ok_or_else(|| TimeSpanError::OutOfRange(format!("days in {}", input)))?;
    Ok(Duration::new(total, nanos))
}

fn parse_iso8601(input: &str) -> Result<Duration, TimeSpanError> {
    let invalid = || TimeSpanError::Invalid(input.to_string());
    let body = &input[1..];
    if body.is_empty() {
        return Err(invalid());
    }

    let mut total = Duration::ZERO;
    let mut in_time = false;
    let mut number = String::new();
    let mut saw_component = false;

    for c in body.chars() {
        match c.to_ascii_uppercase() {
            'T' => {
                if in_time || !number.is_empty() {
                    return Err(invalid());
                }
                in_time = true;
            }
            d if d.is_ascii_digit() || d == '.' || d == ',' => {
                number.push(if d == ',' { '.' } else { d });
            }
            unit => {
                if number.is_empty() {
                    return Err(invalid());
                }
                let value: f64 = number.parse().map_err(|_| invalid())?;
                let multiplier = match (unit, in_time) {
                    ('W', false) => 604_800.0,
                    ('D', false) => 86_400.0,
                    ('H', true) => 3_600.0,
                    ('M', true) => 60.0,
                    ('S', true) => 1.0,
                    _ => return Err(invalid()),
                };
                let out_of_range = || TimeSpanError::OutOfRange(input.to_string());
                let component =
                    Duration::try_from_secs_f64(value * multiplier).map_err(|_| out_of_range())?;
                total = total.checked_add(component).ok_or_else(out_of_range)?;
                number.clear();
                saw_component = true;
            }
        }
    }

    if !number.is_empty() || !saw_component {
        return Err(invalid());
    }

    Ok(total)
}

fn parse_component(value: &str, input: &str) -> Result<u64, TimeSpanError> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(TimeSpanError::Invalid(input.to_string()));
    }
    value
        .parse()
        .map_err(|_| TimeSpanError::OutOfRange(input.to_string()))
}

/// Up to seven fractional digits, matching TimeSpan tick precision
fn parse_fraction(value: &str, input: &str) -> Result<u32, TimeSpanError> {
    if value.is_empty() || value.len() > 7 || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(TimeSpanError::Invalid(input.to_string()));
    }
    let padded = format!("{:0<9}", value);
    padded
        .parse()
        .map_err(|_| TimeSpanError::Invalid(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotnet_formats() {
        assert_eq!(parse_timespan("00:01:00").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_timespan("01:30").unwrap(), Duration::from_secs(5_400));
        assert_eq!(
            parse_timespan("1.02:00:30").unwrap(),
            Duration::from_secs(86_400 + 7_200 + 30)
        );
        assert_eq!(
            parse_timespan("00:00:01.5").unwrap(),
            Duration::from_millis(1_500)
        );
    }

    #[test]
    fn test_iso8601_formats() {
        assert_eq!(parse_timespan("PT1M").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_timespan("PT30S").unwrap(), Duration::from_secs(30));
        assert_eq!(
            parse_timespan("P1DT2H").unwrap(),
            Duration::from_secs(86_400 + 7_200)
        );
        assert_eq!(parse_timespan("pt0.5s").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_plain_seconds() {
        assert_eq!(parse_timespan("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_invalid_inputs() {
        assert_eq!(parse_timespan(""), Err(TimeSpanError::Empty));
        assert!(parse_timespan("abc").is_err());
        assert!(parse_timespan("PT").is_err());
        assert!(parse_timespan("P1M").is_err());
        assert!(parse_timespan("1:2:3:4").is_err());
        assert!(matches!(
            parse_timespan("00:61:00"),
            Err(TimeSpanError::OutOfRange(_))
        ));
        assert!(parse_timespan("-00:01:00").is_err());
    }

    #[test]
    fn test_oversized_durations() {
        assert!(matches!(
            parse_timespan("999999999999999999.00:00:00"),
            Err(TimeSpanError::OutOfRange(_))
        ));
        assert!(matches!(
            parse_timespan("PT99999999999999999999999S"),
            Err(TimeSpanError::OutOfRange(_))
        ));
        assert!(matches!(
            parse_timespan("P99999999999999W"),
            Err(TimeSpanError::OutOfRange(_))
        ));
        assert_eq!(
            parse_timespan("10675199.02:48:05").unwrap(),
            Duration::from_secs(10_675_199 * 86_400 + 2 * 3_600 + 48 * 60 + 5)
        );
    }
}
