use chrono::{DateTime, NaiveDateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};

use crate::errors::ParseError;

pub static SPINNER_TEMPLATE: &str = "[{elapsed_precise}] {spinner:2.cyan/blue} {msg}";
pub static SPINNER_TOTALS_TEMPLATE: &str = "{spinner:2.cyan/blue} {msg}: {human_pos}";

pub fn new_spinner(message: &str) -> ProgressBar {
    let style = ProgressStyle::with_template(SPINNER_TEMPLATE).expect("Invalid spinner template");
    ProgressBar::new_spinner()
        .with_message(message.to_string())
        .with_style(style)
}

pub fn new_spinner_totals(message: &str) -> ProgressBar {
    let style = ProgressStyle::with_template(SPINNER_TOTALS_TEMPLATE).expect("Invalid spinner template");
    ProgressBar::new_spinner()
        .with_message(message.to_string())
        .with_style(style)
}

/// Parse a timestamp in any of the formats the inventory has been observed
/// to use and normalize it to UTC.
pub fn parse_date_time(value: &str) -> Result<DateTime<Utc>, ParseError> {
    if let Ok(datetime) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z") {
        return Ok(datetime.into());
    }
    if let Ok(datetime) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%#z") {
        return Ok(datetime.into());
    }
    if let Ok(datetime) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%#z") {
        return Ok(datetime.into());
    }
    // some inventory rows carry no offset at all; those are UTC
    if let Ok(datetime) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(datetime.and_utc());
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(datetime.and_utc());
    }

    Ok(DateTime::parse_from_rfc3339(value)?.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_offset_timestamps() {
        let parsed = parse_date_time("2024-07-26T23:00:00+0200").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 7, 26, 21, 0, 0).unwrap());

        let parsed = parse_date_time("2024-07-26T21:00:00+00:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 7, 26, 21, 0, 0).unwrap());
    }

    #[test]
    fn parses_naive_timestamps_as_utc() {
        let parsed = parse_date_time("2024-07-26 21:00:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 7, 26, 21, 0, 0).unwrap());
    }

    #[test]
    fn parses_rfc3339_with_millis() {
        let parsed = parse_date_time("2024-07-26T21:00:00.000Z").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 7, 26, 21, 0, 0).unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_date_time("yesterday").is_err());
    }
}
