use crate::error::{ReportError, Result};
use crate::utils::{first_day_of_month, last_day_of_month, parse_period_string};
use chrono::{Datelike, Local, NaiveDate};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const UNKNOWN_DEPARTMENT: &str = "Unknown";

/// One normalized barcode scan event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Record {
    #[schemars(description = "Date of the scan in YYYY-MM-DD format.")]
    pub date: NaiveDate,

    #[schemars(description = "Scanned item identifier (barcode or product name). Never empty.")]
    pub item: String,

    #[schemars(description = "Client the scan was recorded for. Empty when unknown.")]
    pub client: String,

    #[schemars(description = "Department owning the scan. 'Unknown' when the scanner did not report one.")]
    pub department: String,

    #[schemars(
        with = "f64",
        description = "Scanned quantity. Always a finite, non-negative decimal number."
    )]
    pub qty: Decimal,
}

impl Record {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(Record)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

/// A single calendar month used as the aggregation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReportingPeriod {
    year: i32,
    month: u32,
}

impl ReportingPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(ReportError::InvalidPeriod(format!(
                "month {} must be between 1 and 12",
                month
            )));
        }
        if first_day_of_month(year, month).is_none() {
            return Err(ReportError::InvalidPeriod(format!(
                "year {} is out of range",
                year
            )));
        }
        Ok(Self { year, month })
    }

    /// Parses a "YYYY-MM" period label.
    pub fn parse(period: &str) -> Result<Self> {
        let (year, month) = parse_period_string(period)?;
        Self::new(year, month)
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The calendar month of the local wall clock, read once.
    pub fn current() -> Self {
        Self::containing(Local::now().date_naive())
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> Result<NaiveDate> {
        first_day_of_month(self.year, self.month).ok_or_else(|| self.date_error())
    }

    pub fn last_day(&self) -> Result<NaiveDate> {
        last_day_of_month(self.year, self.month).ok_or_else(|| self.date_error())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    /// Sortable "YYYY-MM" label.
    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    fn date_error(&self) -> ReportError {
        ReportError::DateError(format!("no calendar dates for period {}", self.label()))
    }
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.month, self.year)
    }
}

impl TryFrom<String> for ReportingPeriod {
    type Error = ReportError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ReportingPeriod> for String {
    fn from(period: ReportingPeriod) -> Self {
        period.label()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_generation() {
        let schema_json = Record::schema_as_json().unwrap();
        assert!(schema_json.contains("department"));
        assert!(schema_json.contains("qty"));
        assert!(schema_json.contains("client"));
    }

    #[test]
    fn test_record_serializes_to_feed_shape() {
        let record = Record {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            item: "A".to_string(),
            client: "Acme".to_string(),
            department: "X".to_string(),
            qty: Decimal::new(25, 1),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["date"], "2024-03-01");
        assert_eq!(json["qty"], 2.5);
        assert_eq!(json["department"], "X");
    }

    #[test]
    fn test_period_validation() {
        assert!(ReportingPeriod::new(2024, 0).is_err());
        assert!(ReportingPeriod::new(2024, 13).is_err());
        let period = ReportingPeriod::parse("2024-02").unwrap();
        assert_eq!(period.year(), 2024);
        assert_eq!(period.month(), 2);
        assert_eq!(
            period.last_day().unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
    }

    #[test]
    fn test_period_contains_and_display() {
        let period = ReportingPeriod::new(2024, 3).unwrap();
        assert!(period.contains(NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()));
        assert!(!period.contains(NaiveDate::from_ymd_opt(2023, 3, 15).unwrap()));
        assert!(!period.contains(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()));
        assert_eq!(period.to_string(), "3/2024");
        assert_eq!(period.label(), "2024-03");
    }

    #[test]
    fn test_period_serde_uses_label() {
        let period = ReportingPeriod::new(2024, 3).unwrap();
        assert_eq!(serde_json::to_string(&period).unwrap(), "\"2024-03\"");

        let parsed: ReportingPeriod = serde_json::from_str("\"2023-11\"").unwrap();
        assert_eq!(parsed, ReportingPeriod::new(2023, 11).unwrap());
        assert!(serde_json::from_str::<ReportingPeriod>("\"2023-00\"").is_err());
    }
}
