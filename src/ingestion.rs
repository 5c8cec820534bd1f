use crate::schema::{Record, ReportingPeriod, UNKNOWN_DEPARTMENT};
use crate::utils::{parse_decimal, parse_record_date};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

/// Why a raw entry was excluded from the normalized set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    NotAnObject,
    InvalidDate(String),
    MissingItem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRecord {
    /// Position of the entry in the raw feed.
    pub index: usize,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizationReport {
    pub records: Vec<Record>,
    pub dropped: Vec<DroppedRecord>,
}

/// Normalizes raw scanner entries, keeping the feed order.
///
/// Malformed entries never fail the run: an unusable date or item drops the
/// entry, every other field falls back to its default.
pub fn normalize_with_report(raw: &[Value]) -> NormalizationReport {
    let mut report = NormalizationReport::default();

    for (index, entry) in raw.iter().enumerate() {
        match normalize_record(entry) {
            Ok(record) => report.records.push(record),
            Err(reason) => {
                debug!("Dropping raw record #{}: {:?}", index, reason);
                report.dropped.push(DroppedRecord { index, reason });
            }
        }
    }

    if !report.dropped.is_empty() {
        warn!(
            "Dropped {} of {} raw records during normalization",
            report.dropped.len(),
            raw.len()
        );
    }

    report
}

pub fn normalize_records(raw: &[Value]) -> Vec<Record> {
    normalize_with_report(raw).records
}

pub fn normalize_record(entry: &Value) -> Result<Record, DropReason> {
    let fields = entry.as_object().ok_or(DropReason::NotAnObject)?;

    let date_text = identifier(fields, "date").unwrap_or_default();
    let date = parse_record_date(&date_text).ok_or(DropReason::InvalidDate(date_text))?;

    let item = identifier(fields, "item")
        .filter(|item| !item.is_empty())
        .ok_or(DropReason::MissingItem)?;

    let client = identifier(fields, "client").unwrap_or_default();

    let department = identifier(fields, "department")
        .filter(|department| !department.is_empty())
        .unwrap_or_else(|| UNKNOWN_DEPARTMENT.to_string());

    Ok(Record {
        date,
        item,
        client,
        department,
        qty: coerce_quantity(fields.get("qty")),
    })
}

/// Reads an identifier field as trimmed text. Numeric identifiers such as
/// barcodes are kept in their textual form.
fn identifier(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Reads a quantity as an exact decimal. JSON numbers are taken from their
/// textual form so `0.1` stays `0.1`. Anything unusable or negative is zero.
pub fn coerce_quantity(value: Option<&Value>) -> Decimal {
    let qty = match value {
        Some(Value::Number(number)) => parse_decimal(&number.to_string()),
        Some(Value::String(text)) => parse_decimal(text),
        Some(Value::Bool(true)) => Some(Decimal::ONE),
        _ => None,
    };

    match qty {
        Some(qty) if qty.is_sign_positive() && !qty.is_zero() => qty,
        _ => Decimal::ZERO,
    }
}

/// Keeps the records whose date falls inside `period`, in their original order.
pub fn filter_by_period(records: &[Record], period: ReportingPeriod) -> Vec<Record> {
    records
        .iter()
        .filter(|record| period.contains(record.date))
        .cloned()
        .collect()
}
