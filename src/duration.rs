//! Human-friendly duration strings ("10m", "2h", "1d") to milliseconds.

use crate::error::DurationError;

const MS_PER_SECOND: f64 = 1000.0;
const MS_PER_MINUTE: f64 = MS_PER_SECOND * 60.0;
const MS_PER_HOUR: f64 = MS_PER_MINUTE * 60.0;
const MS_PER_DAY: f64 = MS_PER_HOUR * 24.0;
const MS_PER_WEEK: f64 = MS_PER_DAY * 7.0;
const MS_PER_YEAR: f64 = MS_PER_DAY * 365.25;

/// Parse a duration string into milliseconds.
///
/// Grammar: `<number><unit>` where unit is one of ms, s, m, h, d, w, y
/// (case-insensitive, optional plural `s`). A bare number is taken as
/// milliseconds. Decimals are accepted ("1.5h").
pub fn parse_duration(input: &str) -> Result<u64, DurationError> {
    let err = || DurationError {
        input: input.to_string(),
    };

    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(err());
    }

    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-' && c != '+')
        .unwrap_or(trimmed.len());
    let (number_part, unit_part) = trimmed.split_at(digits_end);

    let value: f64 = number_part.parse().map_err(|_| err())?;
    if !value.is_finite() || value < 0.0 {
        return Err(err());
    }

    let ms_per_unit = match unit_part.trim().to_ascii_lowercase().as_str() {
        "" | "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => MS_PER_SECOND,
        "m" | "min" | "mins" | "minute" | "minutes" => MS_PER_MINUTE,
        "h" | "hr" | "hrs" | "hour" | "hours" => MS_PER_HOUR,
        "d" | "day" | "days" => MS_PER_DAY,
        "w" | "week" | "weeks" => MS_PER_WEEK,
        "y" | "yr" | "yrs" | "year" | "years" => MS_PER_YEAR,
        _ => return Err(err()),
    };

    Ok((value * ms_per_unit).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::parse_duration;

    #[test]
    fn test_parses_each_unit() {
        assert_eq!(parse_duration("500ms").unwrap(), 500);
        assert_eq!(parse_duration("30s").unwrap(), 30_000);
        assert_eq!(parse_duration("30m").unwrap(), 1_800_000);
        assert_eq!(parse_duration("2h").unwrap(), 7_200_000);
        assert_eq!(parse_duration("1d").unwrap(), 86_400_000);
        assert_eq!(parse_duration("1w").unwrap(), 604_800_000);
        assert_eq!(parse_duration("1y").unwrap(), 31_557_600_000);
    }

    #[test]
    fn test_case_insensitive_and_plural() {
        assert_eq!(parse_duration("10M").unwrap(), 600_000);
        assert_eq!(parse_duration("2 hours").unwrap(), 7_200_000);
        assert_eq!(parse_duration("3 days").unwrap(), 259_200_000);
    }

    #[test]
    fn test_bare_number_is_milliseconds() {
        assert_eq!(parse_duration("1500").unwrap(), 1500);
    }

    #[test]
    fn test_decimals() {
        assert_eq!(parse_duration("1.5h").unwrap(), 5_400_000);
        assert_eq!(parse_duration("0.5s").unwrap(), 500);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10 fortnights").is_err());
        assert!(parse_duration("-5m").is_err());
        assert!(parse_duration("nan").is_err());
    }
}
