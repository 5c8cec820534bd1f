use crate::error::{ReportError, Result};
use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveDateTime};
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];
const DATE_TIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

pub fn first_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    first_day_of_month(year, month)?
        .checked_add_months(Months::new(1))?
        .pred_opt()
}

/// Parses the date of a scan event.
///
/// Timestamps keep the calendar date as written, offsets are not converted.
pub fn parse_record_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.date_naive());
    }

    DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|timestamp| timestamp.date())
}

/// Parses a period string in the format "YYYY-MM".
/// Returns (year, month)
pub fn parse_period_string(period: &str) -> Result<(i32, u32)> {
    let start_str = format!("{}-01", period.trim());
    let start_date = NaiveDate::parse_from_str(&start_str, "%Y-%m-%d").map_err(|_| {
        ReportError::InvalidPeriod(format!(
            "Invalid period format: {}. Expected YYYY-MM",
            period
        ))
    })?;

    Ok((start_date.year(), start_date.month()))
}

/// Formats a quantity for report text: whole numbers without decimals,
/// fractional ones with at most two.
pub fn format_quantity(qty: Decimal) -> String {
    qty.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
        .to_string()
}

/// Parses decimal text exactly, accepting plain (`"0.1"`) and scientific
/// (`"1e-7"`) notation.
pub fn parse_decimal(text: &str) -> Option<Decimal> {
    let text = text.trim();
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_day_of_month() {
        assert_eq!(
            last_day_of_month(2023, 2),
            NaiveDate::from_ymd_opt(2023, 2, 28)
        );
        assert_eq!(
            last_day_of_month(2024, 2),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        assert_eq!(
            last_day_of_month(2023, 12),
            NaiveDate::from_ymd_opt(2023, 12, 31)
        );
        assert_eq!(last_day_of_month(2023, 13), None);
    }

    #[test]
    fn test_parse_record_date_formats() {
        let march_first = NaiveDate::from_ymd_opt(2024, 3, 1);
        assert_eq!(parse_record_date("2024-03-01"), march_first);
        assert_eq!(parse_record_date(" 2024/03/01 "), march_first);
        assert_eq!(parse_record_date("2024-03-01T08:15:00Z"), march_first);
        assert_eq!(parse_record_date("2024-03-01T23:30:00-05:00"), march_first);
        assert_eq!(parse_record_date("2024-03-01 08:15:00"), march_first);
        assert_eq!(parse_record_date("2024-03-01T08:15:00.250"), march_first);
    }

    #[test]
    fn test_parse_record_date_rejects_garbage() {
        assert_eq!(parse_record_date(""), None);
        assert_eq!(parse_record_date("yesterday"), None);
        assert_eq!(parse_record_date("2024-02-30"), None);
        assert_eq!(parse_record_date("03/01/2024"), None);
    }

    #[test]
    fn test_parse_period_string() {
        assert_eq!(parse_period_string("2024-03").unwrap(), (2024, 3));
        assert!(parse_period_string("2024-13").is_err());
        assert!(parse_period_string("March").is_err());
    }

    #[test]
    fn test_format_quantity() {
        assert_eq!(format_quantity(Decimal::from(12)), "12");
        assert_eq!(format_quantity(Decimal::ZERO), "0");
        assert_eq!(format_quantity(Decimal::new(250, 2)), "2.5");
        assert_eq!(format_quantity(Decimal::new(1239, 3)), "1.24");
        assert_eq!(format_quantity(Decimal::new(2345, 3)), "2.35");
    }

    #[test]
    fn test_parse_decimal_is_exact() {
        assert_eq!(parse_decimal("0.1"), Some(Decimal::new(1, 1)));
        assert_eq!(parse_decimal(" 3.5 "), Some(Decimal::new(35, 1)));
        assert_eq!(parse_decimal("1e-7"), Some(Decimal::new(1, 7)));
        assert_eq!(parse_decimal("abc"), None);
        assert_eq!(parse_decimal("NaN"), None);
    }
}
